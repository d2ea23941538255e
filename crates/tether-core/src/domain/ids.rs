//! Identifiers.
//!
//! 2 種類の ID を扱います。
//!
//! - **JobId**: サーバーが発行するジョブの UUID。クライアントは生成しない。
//! - **ListenerId / PollId**: クライアント側で生成する ULID ベースの ID。
//!   Phantom type パターンで型を分けているので、混同できない。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;
use uuid::Uuid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"listener-", "poll-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ULID-backed client-side identifier.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Listener のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Listener {}

impl IdMarker for Listener {
    fn prefix() -> &'static str {
        "listener-"
    }
}

/// Poll round のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Poll {}

impl IdMarker for Poll {
    fn prefix() -> &'static str {
        "poll-"
    }
}

/// Identifier of a progress listener attached to a job.
pub type ListenerId = Id<Listener>;

/// Identifier of one long-poll round (log correlation only).
pub type PollId = Id<Poll>;

#[derive(Debug, thiserror::Error)]
#[error("invalid job id {input:?}: {reason}")]
pub struct IdError {
    pub input: String,
    pub reason: String,
}

/// Server-issued job identifier.
///
/// Always a UUID; kept in lower-case hyphenated form because it is spliced
/// into channel names and URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn parse(input: &str) -> Result<Self, IdError> {
        let uuid = Uuid::parse_str(input.trim()).map_err(|e| IdError {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(uuid.hyphenated().to_string()))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobId::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
