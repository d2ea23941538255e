//! Domain model (channels, ids, wire shapes, job messages, progress, outcomes).

pub mod channel;
pub mod errors;
pub mod ids;
pub mod message;
pub mod notification;
pub mod outcome;
pub mod progress;
pub mod state;

pub use channel::Channel;
pub use errors::{ConfigError, TrackerError};
pub use ids::{IdError, JobId, ListenerId, PollId};
pub use message::{JobMessage, ProgressReport};
pub use notification::{Cursor, Notification, PollRequest};
pub use outcome::{JobFailure, JobOutcome};
pub use progress::ProgressState;
pub use state::JobState;
