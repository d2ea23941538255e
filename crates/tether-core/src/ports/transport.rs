//! Transport ports - サーバーとの通信の抽象化
//!
//! # 実装
//! - **HttpTransport**: JSON-RPC over HTTP（本番用、`impls::http`）
//! - **InMemoryServer**: プロセス内サーバー（テスト・デモ用、`impls::memory`）

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{JobId, Notification, PollRequest};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The request never got a response (network, DNS, TLS, interrupted).
    #[error("request failed: {0}")]
    Request(String),

    #[error("server responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("cannot decode response: {0}")]
    Decode(String),

    #[error("transport closed")]
    Closed,
}

/// Long-polling endpoint.
///
/// `poll` is expected to block on the server side until a notification is
/// available or the server's own timeout elapses (then an empty list).
#[async_trait]
pub trait PollTransport: Send + Sync {
    async fn poll(&self, request: &PollRequest) -> Result<Vec<Notification>, TransportError>;
}

/// Control endpoint for background jobs.
#[async_trait]
pub trait JobControl: Send + Sync {
    /// Ask the server to terminate a job.
    ///
    /// Cancellation is reported back through the bus with a `cancelled`
    /// status, not through this call.
    async fn cancel(&self, job_id: &JobId) -> Result<(), TransportError>;
}
