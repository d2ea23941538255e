//! Errors raised by the tracker and configuration layers.

use thiserror::Error;

use super::ids::JobId;
use crate::ports::TransportError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("job {0} is already being tracked")]
    AlreadyTracked(JobId),

    #[error("job {0} is not tracked")]
    NotTracked(JobId),

    #[error("job tracker is closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} is required")]
    Missing(&'static str),
}
