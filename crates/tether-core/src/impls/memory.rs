//! InMemoryServer - プロセス内のサーバー（テスト・デモ用）
//!
//! # 学習ポイント
//! - Notify による long-poll の待機
//! - 全 poller を起こすため `notify_waiters` を使う（`Notified` は作成時点から有効）
//! - fail_next による障害注入

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::{Channel, JobId, Notification, PollRequest};
use crate::ports::{JobControl, PollTransport, TransportError};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(50);

#[derive(Default)]
struct ServerState {
    log: Vec<Notification>,
    next_id: u64,
    failures: u32,
    polls: u64,
    cancelled: Vec<JobId>,
    closed: bool,
}

/// # 使用例
/// ```ignore
/// let server = Arc::new(InMemoryServer::new());
/// server.publish(Channel::progress(&job_id), json!({"progress": 1})).await;
/// ```
pub struct InMemoryServer {
    state: Mutex<ServerState>,
    notify: Notify,
    poll_timeout: Duration,
}

impl InMemoryServer {
    pub fn new() -> Self {
        Self::with_poll_timeout(DEFAULT_POLL_TIMEOUT)
    }

    pub fn with_poll_timeout(poll_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            notify: Notify::new(),
            poll_timeout,
        }
    }

    /// Append a notification and wake every waiting poll. Returns its id.
    pub async fn publish(&self, channel: Channel, message: Value) -> u64 {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.log.push(Notification::new(id, channel, message));
        drop(state);

        self.notify.notify_waiters();
        id
    }

    /// Report progress on a job's channel.
    pub async fn report_progress(&self, job_id: &JobId, progress: u64, max: u64, message: &str) -> u64 {
        self.publish(
            Channel::progress(job_id),
            json!({
                "status": "pending",
                "progress": progress,
                "valuemin": 0,
                "valuemax": max,
                "message": message,
            }),
        )
        .await
    }

    pub async fn complete(&self, job_id: &JobId, result: Value) -> u64 {
        self.publish(
            Channel::progress(job_id),
            json!({"status": "success", "result": result}),
        )
        .await
    }

    pub async fn fail(&self, job_id: &JobId, traceback: &str) -> u64 {
        self.publish(
            Channel::progress(job_id),
            json!({"status": "failure", "traceback": traceback, "message": null}),
        )
        .await
    }

    /// The next `n` polls fail with a request error.
    pub async fn fail_next(&self, n: u32) {
        self.state.lock().await.failures = n;
    }

    /// Make every pending and future poll fail with [`TransportError::Closed`].
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Number of polls received so far, failed ones included.
    pub async fn poll_count(&self) -> u64 {
        self.state.lock().await.polls
    }

    pub async fn cancel_requests(&self) -> Vec<JobId> {
        self.state.lock().await.cancelled.clone()
    }
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PollTransport for InMemoryServer {
    async fn poll(&self, request: &PollRequest) -> Result<Vec<Notification>, TransportError> {
        {
            let mut state = self.state.lock().await;
            state.polls += 1;
            if state.failures > 0 {
                state.failures -= 1;
                return Err(TransportError::Request("injected failure".to_string()));
            }
        }

        let deadline = Instant::now() + self.poll_timeout;
        loop {
            // register before looking at the log so a publish in between is not missed
            let notified = self.notify.notified();
            {
                let state = self.state.lock().await;
                if state.closed {
                    return Err(TransportError::Closed);
                }
                let found: Vec<Notification> = state
                    .log
                    .iter()
                    .filter(|n| n.id > request.last && request.channels.contains(&n.channel))
                    .cloned()
                    .collect();
                if !found.is_empty() {
                    return Ok(found);
                }
            }

            tokio::select! {
                _ = notified => {},
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }
}

#[async_trait]
impl JobControl for InMemoryServer {
    async fn cancel(&self, job_id: &JobId) -> Result<(), TransportError> {
        self.state.lock().await.cancelled.push(job_id.clone());
        self.publish(
            Channel::progress(job_id),
            json!({"status": "cancelled", "result": null}),
        )
        .await;
        Ok(())
    }
}
