//! JSON-RPC client for the long-polling and job-control HTTP endpoints.
//!
//! Every call is a `POST` with a JSON-RPC 2.0 envelope
//! (`{"jsonrpc": "2.0", "method": "call", "params": ..., "id": n}`), using
//! [`reqwest`].

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::domain::{JobId, Notification, PollRequest};
use crate::ports::{JobControl, PollTransport, TransportError};

pub const POLL_PATH: &str = "/longpolling/poll";
pub const CANCEL_PATH: &str = "/web_celery/!cancel";

/// HTTP client for a single server.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    session: Option<String>,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// * `base_url` - Server root, e.g. `http://localhost:8069`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Authenticate calls with a `session_id` cookie.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<P: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        params: &P,
    ) -> Result<T, TransportError> {
        let params =
            serde_json::to_value(params).map_err(|e| TransportError::Decode(e.to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": params,
            "id": id,
        });

        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        if let Some(session) = &self.session {
            request = request.header(reqwest::header::COOKIE, format!("session_id={session}"));
        }

        let response = request.send().await.map_err(request_error)?;
        let response = Self::ensure_success(response).await?;
        let envelope: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        decode_envelope(envelope)
    }

    // ---- private helpers ----

    /// Pass 2xx responses through, turn everything else into
    /// [`TransportError::Status`] with the body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    TransportError::Request(e.to_string())
}

/// Unwrap a JSON-RPC response envelope.
fn decode_envelope<T: DeserializeOwned>(mut envelope: Value) -> Result<T, TransportError> {
    if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        // servers put the useful text under data.message
        let message = error
            .pointer("/data/message")
            .or_else(|| error.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(TransportError::Rpc { code, message });
    }
    let Some(result) = envelope.get_mut("result").map(Value::take) else {
        return Err(TransportError::Decode("response has no result".to_string()));
    };
    serde_json::from_value(result).map_err(|e| TransportError::Decode(e.to_string()))
}

#[async_trait]
impl PollTransport for HttpTransport {
    async fn poll(&self, request: &PollRequest) -> Result<Vec<Notification>, TransportError> {
        let notifications: Vec<Notification> = self.call(POLL_PATH, request).await?;
        tracing::trace!(count = notifications.len(), last = request.last, "poll answered");
        Ok(notifications)
    }
}

#[async_trait]
impl JobControl for HttpTransport {
    async fn cancel(&self, job_id: &JobId) -> Result<(), TransportError> {
        let path = format!("{CANCEL_PATH}/{job_id}");
        let _: Value = self.call(&path, &json!({})).await?;
        Ok(())
    }
}
