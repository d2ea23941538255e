//! Background-job client actions.
//!
//! The server answers a request that was pushed to a background job with an
//! action instead of the final result:
//!
//! ```json
//! {"type": "web.celery.background_job",
//!  "tag": "block_with_progress",
//!  "params": {"uuid": "...", "next_action": null, "cancellable": true}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::JobId;

pub const BACKGROUND_JOB_ACTION: &str = "web.celery.background_job";

/// How the host should present the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    /// Block with the usual busy indicator, no progress.
    BlockNoProgress,
    /// Full-screen progress bar, optionally cancellable.
    BlockWithProgress,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionParams {
    #[serde(default)]
    pub uuid: Option<JobId>,
    #[serde(default)]
    pub next_action: Option<Value>,
    #[serde(default)]
    pub cancellable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundJobAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub tag: ActionTag,
    pub params: ActionParams,
}

impl BackgroundJobAction {
    /// Recognize a background-job action among arbitrary client actions.
    ///
    /// Returns `None` for every other action type.
    pub fn from_value(action: &Value) -> Option<Result<Self, serde_json::Error>> {
        let action_type = action.get("type").and_then(Value::as_str)?;
        if action_type != BACKGROUND_JOB_ACTION {
            return None;
        }
        Some(serde_json::from_value(action.clone()))
    }
}
