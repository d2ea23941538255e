//! ProgressMonitor - 進捗リスナーを ProgressState に畳み込む
//!
//! 描画はしない。ホスト側は `changed()` を待って `snapshot()` を読む。

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::tracker::ProgressListener;
use crate::domain::ProgressState;

pub struct ProgressMonitor {
    rx: watch::Receiver<ProgressState>,
    task: JoinHandle<()>,
}

impl ProgressMonitor {
    pub fn spawn(mut listener: ProgressListener) -> Self {
        let (tx, rx) = watch::channel(ProgressState::new());
        let task = tokio::spawn(async move {
            while let Some(report) = listener.recv().await {
                tx.send_modify(|state| state.apply(&report));
            }
            tracing::trace!(job_id = %listener.job_id(), "progress stream ended");
        });
        Self { rx, task }
    }

    pub fn snapshot(&self) -> ProgressState {
        self.rx.borrow().clone()
    }

    /// Wait for the next update. Returns `false` once the job's progress
    /// stream has ended.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
