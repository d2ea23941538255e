//! Terminal outcome of a tracked background job.

use serde_json::Value;

use super::state::JobState;

/// How a tracked job finished.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// `next_action` is the server's `result`, falling back to the action
    /// given when the job was registered.
    Succeeded { next_action: Option<Value> },
    Failed {
        traceback: Option<String>,
        message: Value,
    },
    Cancelled,
    /// The job did not finish within the tracker's time limit.
    TimedOut,
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Succeeded { .. } => JobState::Succeeded,
            JobOutcome::Failed { .. } => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
            JobOutcome::TimedOut => JobState::TimedOut,
        }
    }

    /// Outcomes decided by the client itself rather than reported by the
    /// server.
    pub fn is_internal(&self) -> bool {
        matches!(self, JobOutcome::TimedOut)
    }

    pub fn into_result(self) -> Result<Option<Value>, JobFailure> {
        match self {
            JobOutcome::Succeeded { next_action } => Ok(next_action),
            JobOutcome::Failed { traceback, message } => {
                Err(JobFailure::Failed { traceback, message })
            }
            JobOutcome::Cancelled => Err(JobFailure::Cancelled),
            JobOutcome::TimedOut => Err(JobFailure::TimedOut),
        }
    }
}

/// Why waiting on a job did not produce a success.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobFailure {
    #[error("job failed: {}", failure_title(.message))]
    Failed {
        traceback: Option<String>,
        message: Value,
    },

    #[error("job was cancelled")]
    Cancelled,

    #[error("timed out waiting for the job")]
    TimedOut,

    #[error("tracker stopped before the job finished")]
    Dropped,
}

impl JobFailure {
    pub fn is_internal(&self) -> bool {
        matches!(self, JobFailure::TimedOut | JobFailure::Dropped)
    }
}

/// The server serializes exceptions as `{name, message, ...}`; show the most
/// useful part.
fn failure_title(message: &Value) -> String {
    match message {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("name"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| message.to_string()),
        Value::Null => "unknown error".to_string(),
        other => other.to_string(),
    }
}
