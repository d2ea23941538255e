//! NotificationBus - long-polling ループ
//!
//! # フロー
//! 1. 現在の channels / last / options から PollRequest を作る
//! 2. サーバーに poll（停止要求と競合させる）
//! 3. 成功: 通知を順に配信し、`after_success` の遅延 *または* ページが可視に
//!    なるのを待つ（どちらか早い方）。可視なら即座に次の poll。
//! 4. 失敗: エラーは表に出さず、`after_error` の遅延後にリトライ
//!
//! 停止は backoff 待ち中でも poll 中でも効く。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::backoff::Backoff;
use super::config::BusConfig;
use crate::domain::{Channel, Cursor, Notification, PollRequest};
use crate::ports::{IdGenerator, PollTransport, SystemClock, UlidGenerator, Visibility};

/// A notification as seen by bus subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub channel: Channel,
    pub message: Value,
}

#[derive(Debug, Default)]
struct BusState {
    /// Insertion ordered, no duplicates.
    channels: Vec<Channel>,
    cursor: Cursor,
    options: Map<String, Value>,
    activated: bool,
}

struct Runner {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

struct BusInner {
    state: Mutex<BusState>,
    runner: Mutex<Option<Runner>>,
    transport: Arc<dyn PollTransport>,
    visibility: Arc<dyn Visibility>,
    backoff: Backoff,
    rng: Mutex<StdRng>,
    ids: Arc<dyn IdGenerator>,
    sender: broadcast::Sender<BusEvent>,
}

/// Long-polling notification bus.
///
/// Cheap to clone; clones share the same loop, channels and cursor.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new(
        transport: Arc<dyn PollTransport>,
        visibility: Arc<dyn Visibility>,
        config: &BusConfig,
    ) -> Self {
        Self::with_parts(
            transport,
            visibility,
            config,
            StdRng::from_entropy(),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    /// Full control over randomness and id generation (tests, replays).
    pub fn with_parts(
        transport: Arc<dyn PollTransport>,
        visibility: Arc<dyn Visibility>,
        config: &BusConfig,
        rng: StdRng,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let (sender, _) = broadcast::channel(config.fanout_capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                runner: Mutex::new(None),
                transport,
                visibility,
                backoff: config.backoff(),
                rng: Mutex::new(rng),
                ids,
                sender,
            }),
        }
    }

    /// Start the poll loop. Calling it while active does nothing.
    pub fn start_polling(&self) {
        let mut runner = lock(&self.inner.runner);
        {
            let mut state = lock(&self.inner.state);
            if state.activated {
                return;
            }
            state.activated = true;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(poll_loop(Arc::clone(&self.inner), shutdown_rx));
        tracing::info!("long-polling started");
        *runner = Some(Runner { shutdown_tx, join });
    }

    /// Stop the poll loop and forget every channel.
    ///
    /// An in-flight poll is abandoned; its notifications are not dispatched.
    pub fn stop_polling(&self) {
        let runner = lock(&self.inner.runner).take();
        {
            let mut state = lock(&self.inner.state);
            state.activated = false;
            state.channels.clear();
        }
        if let Some(runner) = runner {
            // receiver may already be gone if the loop ended on its own
            let _ = runner.shutdown_tx.send(true);
            tracing::info!("long-polling stopped");
        }
    }

    /// Stop and wait for the loop task to finish.
    pub async fn shutdown(&self) {
        let runner = lock(&self.inner.runner).take();
        {
            let mut state = lock(&self.inner.state);
            state.activated = false;
            state.channels.clear();
        }
        if let Some(runner) = runner {
            let _ = runner.shutdown_tx.send(true);
            let _ = runner.join.await;
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner.state).activated
    }

    pub fn add_channel(&self, channel: Channel) {
        let mut state = lock(&self.inner.state);
        if !state.channels.contains(&channel) {
            tracing::debug!(%channel, "channel added");
            state.channels.push(channel);
        }
    }

    pub fn delete_channel(&self, channel: &Channel) {
        let mut state = lock(&self.inner.state);
        state.channels.retain(|c| c != channel);
    }

    pub fn channels(&self) -> Vec<Channel> {
        lock(&self.inner.state).channels.clone()
    }

    pub fn last(&self) -> u64 {
        lock(&self.inner.state).cursor.value()
    }

    /// Extra options sent along with every poll.
    pub fn set_option(&self, key: impl Into<String>, value: Value) {
        lock(&self.inner.state).options.insert(key.into(), value);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.inner.sender.subscribe()
    }

    /// Record and fan out one notification.
    pub fn on_notification(&self, notification: Notification) {
        self.inner.on_notification(notification);
    }
}

impl BusInner {
    fn request(&self) -> PollRequest {
        let state = lock(&self.state);
        PollRequest {
            channels: state.channels.clone(),
            last: state.cursor.value(),
            options: state.options.clone(),
        }
    }

    fn on_notification(&self, notification: Notification) {
        lock(&self.state).cursor.advance(notification.id);
        // no subscribers is fine
        let _ = self.sender.send(BusEvent {
            channel: notification.channel,
            message: notification.message,
        });
    }
}

enum Pause {
    AfterSuccess(std::time::Duration),
    AfterError(std::time::Duration),
}

async fn poll_loop(inner: Arc<BusInner>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let request = inner.request();
        let poll_id = inner.ids.generate_poll_id();
        tracing::trace!(%poll_id, channels = request.channels.len(), last = request.last, "polling");

        let result = tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = inner.transport.poll(&request) => result,
        };

        let pause = match result {
            Ok(notifications) => {
                tracing::debug!(%poll_id, count = notifications.len(), "poll returned");
                for notification in notifications {
                    inner.on_notification(notification);
                }
                let delay = {
                    let mut rng = lock(&inner.rng);
                    inner.backoff.after_success(&mut *rng)
                };
                Pause::AfterSuccess(delay)
            }
            Err(err) => {
                let delay = {
                    let mut rng = lock(&inner.rng);
                    inner.backoff.after_error(&mut *rng)
                };
                tracing::warn!(%poll_id, error = %err, delay_ms = delay.as_millis() as u64, "poll failed, backing off");
                Pause::AfterError(delay)
            }
        };

        match pause {
            Pause::AfterSuccess(delay) => {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                    _ = inner.visibility.wait_visible() => {}
                }
            }
            Pause::AfterError(delay) => {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    tracing::debug!("poll loop exited");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Notification;
    use crate::ports::{AlwaysVisible, TransportError, WatchVisibility};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Scripted transport: answers polls from a queue and records requests.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<Vec<Notification>, TransportError>>>,
        requests: Mutex<Vec<(Instant, PollRequest)>>,
    }

    impl Scripted {
        fn push(&self, reply: Result<Vec<Notification>, TransportError>) {
            lock(&self.replies).push_back(reply);
        }

        fn requests(&self) -> Vec<(Instant, PollRequest)> {
            lock(&self.requests).clone()
        }
    }

    #[async_trait]
    impl PollTransport for Scripted {
        async fn poll(&self, request: &PollRequest) -> Result<Vec<Notification>, TransportError> {
            lock(&self.requests).push((Instant::now(), request.clone()));
            let reply = lock(&self.replies).pop_front();
            match reply {
                Some(reply) => reply,
                // nothing scripted: behave like a server holding the request
                None => std::future::pending().await,
            }
        }
    }

    fn bus_with(transport: Arc<Scripted>, visibility: Arc<dyn Visibility>) -> NotificationBus {
        NotificationBus::with_parts(
            transport,
            visibility,
            &BusConfig::default(),
            StdRng::seed_from_u64(42),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    fn note(id: u64, channel: &str) -> Notification {
        Notification::new(id, Channel::new(channel), json!({"id": id}))
    }

    #[tokio::test]
    async fn channels_are_deduplicated_and_removable() {
        let bus = bus_with(Arc::new(Scripted::default()), Arc::new(AlwaysVisible));
        bus.add_channel(Channel::new("a"));
        bus.add_channel(Channel::new("b"));
        bus.add_channel(Channel::new("a"));
        assert_eq!(bus.channels(), vec![Channel::new("a"), Channel::new("b")]);

        bus.delete_channel(&Channel::new("a"));
        assert_eq!(bus.channels(), vec![Channel::new("b")]);
    }

    #[tokio::test]
    async fn on_notification_advances_cursor_and_fans_out() {
        let bus = bus_with(Arc::new(Scripted::default()), Arc::new(AlwaysVisible));
        let mut rx = bus.subscribe();

        bus.on_notification(note(9, "x"));
        bus.on_notification(note(4, "y"));

        assert_eq!(bus.last(), 9);
        assert_eq!(rx.recv().await.unwrap().channel, Channel::new("x"));
        assert_eq!(rx.recv().await.unwrap().channel, Channel::new("y"));
    }

    #[tokio::test(start_paused = true)]
    async fn visible_page_repolls_immediately_with_new_cursor() {
        let transport = Arc::new(Scripted::default());
        transport.push(Ok(vec![note(3, "a"), note(5, "a")]));
        let bus = bus_with(Arc::clone(&transport), Arc::new(AlwaysVisible));
        bus.add_channel(Channel::new("a"));
        bus.set_option("bus_inactivity", json!(0));
        let mut rx = bus.subscribe();

        let start = Instant::now();
        bus.start_polling();
        assert_eq!(rx.recv().await.unwrap().message, json!({"id": 3}));
        assert_eq!(rx.recv().await.unwrap().message, json!({"id": 5}));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1.last, 0);
        assert_eq!(requests[1].1.last, 5);
        assert_eq!(requests[1].1.channels, vec![Channel::new("a")]);
        assert_eq!(requests[1].1.options["bus_inactivity"], json!(0));
        assert!(requests[1].0 - start < Duration::from_secs(1));

        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_page_waits_for_the_jittered_delay() {
        let transport = Arc::new(Scripted::default());
        transport.push(Ok(vec![]));
        let bus = bus_with(Arc::clone(&transport), Arc::new(WatchVisibility::new(false)));

        bus.start_polling();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        let gap = requests[1].0 - requests[0].0;
        assert!(gap > Duration::from_secs(4), "gap was {gap:?}");
        assert!(gap <= Duration::from_secs(24), "gap was {gap:?}");

        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn becoming_visible_cuts_the_wait_short() {
        let transport = Arc::new(Scripted::default());
        transport.push(Ok(vec![]));
        let visibility = Arc::new(WatchVisibility::new(false));
        let bus = bus_with(Arc::clone(&transport), visibility.clone());

        bus.start_polling();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.requests().len(), 1);

        visibility.set_visible(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].0 - requests[0].0 < Duration::from_secs(1));

        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_then_retry() {
        let transport = Arc::new(Scripted::default());
        transport.push(Err(TransportError::Request("connection reset".into())));
        transport.push(Ok(vec![note(1, "a")]));
        let bus = bus_with(Arc::clone(&transport), Arc::new(AlwaysVisible));
        let mut rx = bus.subscribe();

        bus.start_polling();
        let event = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.channel, Channel::new("a"));

        let requests = transport.requests();
        let gap = requests[1].0 - requests[0].0;
        assert!(gap > Duration::from_secs(10), "gap was {gap:?}");
        assert!(gap <= Duration::from_secs(30), "gap was {gap:?}");

        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_clears_channels() {
        let transport = Arc::new(Scripted::default());
        let bus = bus_with(Arc::clone(&transport), Arc::new(AlwaysVisible));
        bus.add_channel(Channel::new("a"));

        bus.start_polling();
        bus.start_polling();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(bus.is_active());
        assert_eq!(transport.requests().len(), 1);

        bus.stop_polling();
        assert!(!bus.is_active());
        assert!(bus.channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_an_in_flight_poll() {
        let transport = Arc::new(Scripted::default());
        let bus = bus_with(Arc::clone(&transport), Arc::new(AlwaysVisible));

        bus.start_polling();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.requests().len(), 1);

        // the scripted poll never answers; only the stop signal ends the loop
        tokio::time::timeout(Duration::from_secs(1), bus.shutdown())
            .await
            .expect("poll loop did not exit");
        assert!(lock(&bus.inner.runner).is_none());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_error_backoff() {
        let transport = Arc::new(Scripted::default());
        transport.push(Err(TransportError::Closed));
        transport.push(Ok(vec![]));
        let bus = bus_with(Arc::clone(&transport), Arc::new(AlwaysVisible));

        bus.start_polling();
        tokio::time::sleep(Duration::from_secs(1)).await;
        bus.shutdown().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.requests().len(), 1);
    }
}
