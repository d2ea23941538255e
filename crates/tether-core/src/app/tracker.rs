//! JobTracker - バックグラウンドジョブの追跡
//!
//! # フロー
//! 1. `track()` でジョブを登録し、progress チャンネルを bus に追加
//! 2. bus の通知を dispatch タスクが `handle_notification()` に流す
//! 3. 終端メッセージ（success / failure / cancelled）で結果を確定
//! 4. 制限時間を過ぎたら TimedOut で確定
//! 5. どの場合もジョブを外し、チャンネルを bus から削除
//!
//! 進捗メッセージは `attach()` したリスナーに転送する。
//! 同じ job id を再登録できるので、後始末は登録ごとの generation で照合する。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::action::{ActionTag, BackgroundJobAction};
use super::bus::NotificationBus;
use super::config::TrackerConfig;
use crate::domain::{
    Channel, JobFailure, JobId, JobMessage, JobOutcome, JobState, ListenerId, ProgressReport,
    TrackerError,
};
use crate::ports::{IdGenerator, JobControl, SystemClock, UlidGenerator};

struct PendingJob {
    job_id: JobId,
    generation: u64,
    next_action: Option<Value>,
    finished: oneshot::Sender<JobOutcome>,
}

type Listeners = HashMap<Channel, Vec<(ListenerId, mpsc::UnboundedSender<ProgressReport>)>>;

struct TrackerInner {
    bus: NotificationBus,
    control: Arc<dyn JobControl>,
    time_limit: Duration,
    ids: Arc<dyn IdGenerator>,
    /// Lock order: `jobs` before `listeners` and before the bus state.
    jobs: Mutex<HashMap<Channel, PendingJob>>,
    listeners: Mutex<Listeners>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

/// Tracks background jobs through the notification bus.
pub struct JobTracker {
    inner: Arc<TrackerInner>,
    dispatch: JoinHandle<()>,
}

/// Waits for one tracked job.
///
/// Dropping the handle does not stop tracking; the job is still cleaned up
/// when it finishes or times out.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The terminal outcome, or `None` if the tracker went away first.
    pub async fn outcome(self) -> Option<JobOutcome> {
        self.outcome.await.ok()
    }

    /// The next action on success.
    pub async fn wait(self) -> Result<Option<Value>, JobFailure> {
        match self.outcome.await {
            Ok(outcome) => outcome.into_result(),
            Err(_) => Err(JobFailure::Dropped),
        }
    }
}

/// Progress reports of one job. Ends when the job finishes or the listener is
/// detached.
#[derive(Debug)]
pub struct ProgressListener {
    id: ListenerId,
    job_id: JobId,
    rx: mpsc::UnboundedReceiver<ProgressReport>,
}

impl ProgressListener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub async fn recv(&mut self) -> Option<ProgressReport> {
        self.rx.recv().await
    }
}

/// How the host should present a background job it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// Block with the usual busy indicator.
    Spinner,
    ProgressBar { cancellable: bool },
}

/// A background job started from a client action.
#[derive(Debug)]
pub struct BackgroundJob {
    pub handle: JobHandle,
    pub presentation: Presentation,
    /// Present for progress-bar presentations.
    pub progress: Option<ProgressListener>,
}

impl JobTracker {
    /// Subscribe to the bus and start dispatching notifications.
    ///
    /// The bus is not started here; call `start_polling` on it.
    pub fn new(bus: NotificationBus, control: Arc<dyn JobControl>, config: &TrackerConfig) -> Self {
        Self::with_id_generator(
            bus,
            control,
            config,
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    pub fn with_id_generator(
        bus: NotificationBus,
        control: Arc<dyn JobControl>,
        config: &TrackerConfig,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        // subscribe before spawning so nothing published after `new` is lost
        let events = bus.subscribe();
        let inner = Arc::new(TrackerInner {
            bus,
            control,
            time_limit: config.job_time_limit(),
            ids,
            jobs: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        let dispatch = tokio::spawn(dispatch_loop(Arc::downgrade(&inner), events));
        Self { inner, dispatch }
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.inner.bus
    }

    /// Register a job and subscribe to its progress channel.
    ///
    /// A job id may be tracked again once its previous run has finished.
    pub fn track(
        &self,
        job_id: JobId,
        next_action: Option<Value>,
    ) -> Result<JobHandle, TrackerError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TrackerError::Closed);
        }
        let channel = Channel::progress(&job_id);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (finished_tx, finished_rx) = oneshot::channel();
        {
            let mut jobs = lock(&self.inner.jobs);
            if jobs.contains_key(&channel) {
                return Err(TrackerError::AlreadyTracked(job_id));
            }
            jobs.insert(
                channel.clone(),
                PendingJob {
                    job_id: job_id.clone(),
                    generation,
                    next_action,
                    finished: finished_tx,
                },
            );
            self.inner.bus.add_channel(channel.clone());
        }
        tracing::info!(%job_id, generation, "tracking background job");

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(watch_job(
            Arc::clone(&self.inner),
            job_id.clone(),
            channel,
            generation,
            finished_rx,
            outcome_tx,
        ));

        Ok(JobHandle {
            job_id,
            outcome: outcome_rx,
        })
    }

    /// Start tracking the job a client action points to.
    ///
    /// Returns `Ok(None)` when the action carries no job id.
    pub fn append_background_job(
        &self,
        action: &BackgroundJobAction,
    ) -> Result<Option<BackgroundJob>, TrackerError> {
        let Some(job_id) = action.params.uuid.clone() else {
            return Ok(None);
        };
        let presentation = match action.tag {
            ActionTag::BlockWithProgress => Presentation::ProgressBar {
                cancellable: action.params.cancellable,
            },
            ActionTag::BlockNoProgress => Presentation::Spinner,
            ActionTag::Unknown => {
                tracing::debug!(%job_id, "unknown background job tag, using spinner");
                Presentation::Spinner
            }
        };
        let handle = self.track(job_id.clone(), action.params.next_action.clone())?;
        let progress = match presentation {
            Presentation::ProgressBar { .. } => Some(self.attach(&job_id)?),
            Presentation::Spinner => None,
        };
        Ok(Some(BackgroundJob {
            handle,
            presentation,
            progress,
        }))
    }

    /// Route one bus notification.
    ///
    /// Channels that do not belong to a tracked job are ignored.
    pub fn handle_notification(&self, channel: &Channel, message: &Value) {
        self.inner.handle_notification(channel, message);
    }

    /// Listen to the progress reports of a tracked job.
    ///
    /// The listener ends when the job finishes, so only tracked jobs accept
    /// listeners.
    pub fn attach(&self, job_id: &JobId) -> Result<ProgressListener, TrackerError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TrackerError::Closed);
        }
        let channel = Channel::progress(job_id);
        let id = self.inner.ids.generate_listener_id();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let jobs = lock(&self.inner.jobs);
            if !jobs.contains_key(&channel) {
                return Err(TrackerError::NotTracked(job_id.clone()));
            }
            lock(&self.inner.listeners)
                .entry(channel)
                .or_default()
                .push((id, tx));
        }
        Ok(ProgressListener {
            id,
            job_id: job_id.clone(),
            rx,
        })
    }

    /// Returns whether the listener was attached.
    pub fn detach(&self, job_id: &JobId, listener_id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let channel = Channel::progress(job_id);
        let Some(attached) = listeners.get_mut(&channel) else {
            return false;
        };
        let before = attached.len();
        attached.retain(|(id, _)| *id != listener_id);
        let removed = attached.len() != before;
        if attached.is_empty() {
            listeners.remove(&channel);
        }
        removed
    }

    /// Ask the server to terminate a job.
    ///
    /// The job finishes as `Cancelled` once the server confirms through the
    /// bus.
    pub async fn cancel(&self, job_id: &JobId) -> Result<(), TrackerError> {
        if !lock(&self.inner.jobs).contains_key(&Channel::progress(job_id)) {
            return Err(TrackerError::NotTracked(job_id.clone()));
        }
        tracing::info!(%job_id, "requesting job cancellation");
        self.inner.control.cancel(job_id).await?;
        Ok(())
    }

    pub fn pending_jobs(&self) -> usize {
        lock(&self.inner.jobs).len()
    }

    /// `Pending` while the job is tracked; finished jobs are forgotten.
    pub fn state(&self, job_id: &JobId) -> Option<JobState> {
        lock(&self.inner.jobs)
            .contains_key(&Channel::progress(job_id))
            .then_some(JobState::Pending)
    }

    /// Stop dispatching and give up on every pending job.
    ///
    /// Waiting handles resolve with [`JobFailure::Dropped`]; `track` and
    /// `attach` fail with [`TrackerError::Closed`] from now on.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.dispatch.abort();
        let mut jobs = lock(&self.inner.jobs);
        for (channel, job) in jobs.drain() {
            tracing::debug!(job_id = %job.job_id, "dropping pending job");
            self.inner.bus.delete_channel(&channel);
        }
        lock(&self.inner.listeners).clear();
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.close();
    }
}

impl TrackerInner {
    fn handle_notification(&self, channel: &Channel, message: &Value) {
        match JobMessage::parse(message) {
            JobMessage::Progress(report) => {
                if lock(&self.jobs).contains_key(channel) {
                    self.forward_progress(channel, report);
                }
            }
            JobMessage::Success { result } => self.resolve(channel, |registered| {
                JobOutcome::Succeeded {
                    next_action: result.or(registered),
                }
            }),
            JobMessage::Failure { traceback, message } => {
                self.resolve(channel, |_| JobOutcome::Failed { traceback, message })
            }
            JobMessage::Cancelled => self.resolve(channel, |_| JobOutcome::Cancelled),
        }
    }

    /// Settle a tracked job. `outcome` receives the next action given at
    /// registration.
    fn resolve(&self, channel: &Channel, outcome: impl FnOnce(Option<Value>) -> JobOutcome) {
        // settle under the lock so a watcher hitting its deadline sees the outcome
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.remove(channel) else {
            return;
        };
        self.release(channel);
        let outcome = outcome(job.next_action);
        tracing::debug!(job_id = %job.job_id, state = ?outcome.state(), "terminal job message");
        let _ = job.finished.send(outcome);
    }

    fn forward_progress(&self, channel: &Channel, report: ProgressReport) {
        let mut listeners = lock(&self.listeners);
        if let Some(attached) = listeners.get_mut(channel) {
            attached.retain(|(_, tx)| tx.send(report.clone()).is_ok());
        }
    }

    /// Unsubscribe and close the listeners of a job that was just removed.
    /// The caller holds the `jobs` lock.
    fn release(&self, channel: &Channel) {
        lock(&self.listeners).remove(channel);
        self.bus.delete_channel(channel);
    }

    /// Forget a timed out job, unless it has already been settled or the
    /// channel now belongs to a newer registration. Returns whether the job
    /// was still pending.
    fn expire(&self, channel: &Channel, generation: u64) -> bool {
        let mut jobs = lock(&self.jobs);
        match jobs.get(channel) {
            Some(job) if job.generation == generation => {
                jobs.remove(channel);
                self.release(channel);
                true
            }
            _ => false,
        }
    }
}

/// Race the job against the time limit, then clean up.
async fn watch_job(
    inner: Arc<TrackerInner>,
    job_id: JobId,
    channel: Channel,
    generation: u64,
    mut finished: oneshot::Receiver<JobOutcome>,
    outcome_tx: oneshot::Sender<JobOutcome>,
) {
    let outcome = match tokio::time::timeout(inner.time_limit, &mut finished).await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(_)) => None,
        Err(_) if inner.expire(&channel, generation) => {
            tracing::warn!(%job_id, limit_secs = inner.time_limit.as_secs(), "background job timed out");
            Some(JobOutcome::TimedOut)
        }
        // settled right at the deadline
        Err(_) => finished.try_recv().ok(),
    };

    match outcome {
        Some(outcome) => {
            tracing::info!(%job_id, state = ?outcome.state(), "background job finished");
            // nobody waiting is fine
            let _ = outcome_tx.send(outcome);
        }
        None => tracing::debug!(%job_id, "tracker closed before the job finished"),
    }
}

async fn dispatch_loop(
    inner: std::sync::Weak<TrackerInner>,
    mut events: broadcast::Receiver<super::bus::BusEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.handle_notification(&event.channel, &event.message);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "job tracker lagged behind the bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
