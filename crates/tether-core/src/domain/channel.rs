//! Channel - bus 上のトピック名
//!
//! # 命名規約
//! - progress: `celeryapp:{job_uuid}:progress`
//! - status:   `celeryapp:{job_uuid}:status`（サーバー側で予約、クライアントは購読しない）

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::JobId;

const NAMESPACE: &str = "celeryapp";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The channel a background job reports progress and its final status on.
    pub fn progress(job_id: &JobId) -> Self {
        Self(format!("{NAMESPACE}:{job_id}:progress"))
    }

    pub fn status(job_id: &JobId) -> Self {
        Self(format!("{NAMESPACE}:{job_id}:status"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Channel {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_channel_is_derived_from_job() {
        let job = JobId::parse("6f9619ff-8b86-d011-b42d-00c04fc964ff").unwrap();
        assert_eq!(
            Channel::progress(&job).as_str(),
            "celeryapp:6f9619ff-8b86-d011-b42d-00c04fc964ff:progress"
        );
        assert_eq!(
            Channel::status(&job).as_str(),
            "celeryapp:6f9619ff-8b86-d011-b42d-00c04fc964ff:status"
        );
    }

    #[test]
    fn channel_serializes_transparently() {
        let json = serde_json::to_value(Channel::new("res.partner")).unwrap();
        assert_eq!(json, serde_json::json!("res.partner"));
    }
}
