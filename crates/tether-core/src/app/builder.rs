//! TetherBuilder - bus と tracker の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - poll transport と job control が揃っていなければ build() でエラー
//! - 同じサーバーが両方を実装しているなら `server()` で一度に設定できる

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::bus::NotificationBus;
use super::config::TetherConfig;
use super::tracker::JobTracker;
use crate::ports::{
    AlwaysVisible, IdGenerator, JobControl, PollTransport, SystemClock, UlidGenerator, Visibility,
};

/// # 使用例
/// ```ignore
/// let tether = TetherBuilder::new()
///     .server(Arc::new(HttpTransport::new(base_url)))
///     .config(TetherConfig::from_env()?)
///     .build()?;
/// tether.start();
/// let next_action = tether.tracker.track(job_id, None)?.wait().await?;
/// ```
pub struct TetherBuilder {
    transport: Option<Arc<dyn PollTransport>>,
    control: Option<Arc<dyn JobControl>>,
    visibility: Arc<dyn Visibility>,
    config: TetherConfig,
    seed: Option<u64>,
    ids: Option<Arc<dyn IdGenerator>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no poll transport configured")]
    MissingPollTransport,

    #[error("no job control configured")]
    MissingJobControl,
}

impl TetherBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            control: None,
            visibility: Arc::new(AlwaysVisible),
            config: TetherConfig::default(),
            seed: None,
            ids: None,
        }
    }

    /// Use one server for both polling and job control.
    pub fn server<S>(mut self, server: Arc<S>) -> Self
    where
        S: PollTransport + JobControl + 'static,
    {
        self.transport = Some(server.clone());
        self.control = Some(server);
        self
    }

    pub fn poll_transport(mut self, transport: Arc<dyn PollTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn job_control(mut self, control: Arc<dyn JobControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn visibility(mut self, visibility: Arc<dyn Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn config(mut self, config: TetherConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed the jitter dice, making poll delays reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Must be called inside a tokio runtime: the tracker spawns its
    /// dispatch task here.
    pub fn build(self) -> Result<Tether, BuildError> {
        let transport = self.transport.ok_or(BuildError::MissingPollTransport)?;
        let control = self.control.ok_or(BuildError::MissingJobControl)?;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let bus = NotificationBus::with_parts(
            transport,
            self.visibility,
            &self.config.bus,
            rng,
            Arc::clone(&ids),
        );
        let tracker = JobTracker::with_id_generator(bus.clone(), control, &self.config.tracker, ids);
        Ok(Tether { bus, tracker })
    }
}

impl Default for TetherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired bus and tracker.
pub struct Tether {
    pub bus: NotificationBus,
    pub tracker: JobTracker,
}

impl Tether {
    pub fn start(&self) {
        self.bus.start_polling();
    }

    pub async fn shutdown(&self) {
        self.tracker.close();
        self.bus.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryServer;

    #[tokio::test]
    async fn test_build_success() {
        let tether = TetherBuilder::new()
            .server(Arc::new(InMemoryServer::new()))
            .seed(7)
            .build();
        assert!(tether.is_ok());
    }

    #[tokio::test]
    async fn test_build_missing_transport() {
        let tether = TetherBuilder::new()
            .job_control(Arc::new(InMemoryServer::new()))
            .build();
        assert!(matches!(tether, Err(BuildError::MissingPollTransport)));
    }

    #[tokio::test]
    async fn test_build_missing_control() {
        let tether = TetherBuilder::new()
            .poll_transport(Arc::new(InMemoryServer::new()))
            .build();
        assert!(matches!(tether, Err(BuildError::MissingJobControl)));
    }
}
