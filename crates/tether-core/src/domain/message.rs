//! JobMessage - ジョブ用チャンネルに流れるメッセージの解釈
//!
//! サーバーは `status` を付けて送る:
//! - なし / `pending`: 進捗報告（progress, valuemin, valuemax, message）
//! - `success`: 完了（result に次のアクション）
//! - `failure`: 失敗（traceback, message にシリアライズされた例外）
//! - `cancelled`: キャンセル済み
//!
//! 数値フィールドは緩く扱う。数値でないもの・NaN は「無い」とみなす。

use serde_json::Value;

/// Progress fields of a non-terminal message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressReport {
    pub progress: Option<f64>,
    pub valuemin: Option<f64>,
    pub valuemax: Option<f64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobMessage {
    Progress(ProgressReport),
    Success {
        result: Option<Value>,
    },
    Failure {
        traceback: Option<String>,
        message: Value,
    },
    Cancelled,
}

impl JobMessage {
    pub fn parse(payload: &Value) -> Self {
        let status = payload.get("status").and_then(Value::as_str);
        match status {
            Some("success") => JobMessage::Success {
                result: payload.get("result").filter(|v| !v.is_null()).cloned(),
            },
            Some("failure") => JobMessage::Failure {
                traceback: payload
                    .get("traceback")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                message: payload.get("message").cloned().unwrap_or(Value::Null),
            },
            Some("cancelled") => JobMessage::Cancelled,
            other => {
                if let Some(unknown) = other.filter(|s| *s != "pending") {
                    tracing::debug!(status = unknown, "unknown job status, treating as progress");
                }
                JobMessage::Progress(ProgressReport {
                    progress: number(payload, "progress"),
                    valuemin: number(payload, "valuemin"),
                    valuemax: number(payload, "valuemax"),
                    message: payload
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                })
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobMessage::Progress(_))
    }
}

fn number(payload: &Value, key: &str) -> Option<f64> {
    payload
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| !v.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::absent(json!({"progress": 3}))]
    #[case::null(json!({"status": null, "progress": 3}))]
    #[case::pending(json!({"status": "pending", "progress": 3}))]
    #[case::unknown(json!({"status": "retrying", "progress": 3}))]
    fn non_terminal_statuses_are_progress(#[case] payload: Value) {
        let msg = JobMessage::parse(&payload);
        assert!(!msg.is_terminal());
        assert!(matches!(msg, JobMessage::Progress(p) if p.progress == Some(3.0)));
    }

    #[test]
    fn progress_fields_are_lenient() {
        let msg = JobMessage::parse(&json!({
            "progress": "12",
            "valuemin": 0,
            "valuemax": 100.5,
            "message": "Importing"
        }));
        let JobMessage::Progress(report) = msg else {
            panic!("expected progress");
        };
        assert_eq!(report.progress, None);
        assert_eq!(report.valuemin, Some(0.0));
        assert_eq!(report.valuemax, Some(100.5));
        assert_eq!(report.message.as_deref(), Some("Importing"));
    }

    #[test]
    fn success_keeps_result() {
        let msg = JobMessage::parse(&json!({"status": "success", "result": {"type": "ir.actions.act_window"}}));
        assert_eq!(
            msg,
            JobMessage::Success {
                result: Some(json!({"type": "ir.actions.act_window"}))
            }
        );

        let msg = JobMessage::parse(&json!({"status": "success", "result": null}));
        assert_eq!(msg, JobMessage::Success { result: None });
    }

    #[test]
    fn failure_carries_traceback_and_message() {
        let msg = JobMessage::parse(&json!({
            "status": "failure",
            "traceback": "Traceback (most recent call last): ...",
            "message": {"name": "odoo.exceptions.UserError", "message": "boom"}
        }));
        match msg {
            JobMessage::Failure { traceback, message } => {
                assert!(traceback.unwrap().starts_with("Traceback"));
                assert_eq!(message["message"], "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancelled_is_terminal() {
        let msg = JobMessage::parse(&json!({"status": "cancelled", "result": null}));
        assert_eq!(msg, JobMessage::Cancelled);
        assert!(msg.is_terminal());
    }
}
