//! Visibility port - ページ可視状態の抽象化
//!
//! ブラウザの Page Visibility API に相当。可視状態を知る手段がない環境では
//! 常に可視とみなす（`AlwaysVisible`）。

use async_trait::async_trait;
use tokio::sync::watch;

#[async_trait]
pub trait Visibility: Send + Sync {
    fn is_visible(&self) -> bool;

    /// Resolve immediately when visible, otherwise on the next transition to
    /// visible.
    async fn wait_visible(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

#[async_trait]
impl Visibility for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }

    async fn wait_visible(&self) {}
}

/// Visibility driven by the host through [`WatchVisibility::set_visible`].
#[derive(Debug, Clone)]
pub struct WatchVisibility {
    tx: watch::Sender<bool>,
}

impl WatchVisibility {
    pub fn new(visible: bool) -> Self {
        let (tx, _rx) = watch::channel(visible);
        Self { tx }
    }

    pub fn set_visible(&self, visible: bool) {
        self.tx.send_replace(visible);
    }
}

#[async_trait]
impl Visibility for WatchVisibility {
    fn is_visible(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait_visible(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in self, so wait_for can only fail if self is gone
        let _ = rx.wait_for(|visible| *visible).await;
    }
}
