//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **TetherBuilder**: bus と tracker の構築とワイヤリング
//! - **NotificationBus**: long-polling ループと通知のファンアウト
//! - **JobTracker**: バックグラウンドジョブの状態機械
//! - **ProgressMonitor**: 進捗表示用の状態
//! - **Backoff**: ポーリング間隔のジッター

pub mod action;
pub mod backoff;
pub mod builder;
pub mod bus;
pub mod config;
pub mod monitor;
pub mod tracker;

// 主要な型を再エクスポート
pub use self::action::{ActionParams, ActionTag, BackgroundJobAction, BACKGROUND_JOB_ACTION};
pub use self::backoff::Backoff;
pub use self::builder::{BuildError, Tether, TetherBuilder};
pub use self::bus::{BusEvent, NotificationBus};
pub use self::config::{BusConfig, TetherConfig, TrackerConfig};
pub use self::monitor::ProgressMonitor;
pub use self::tracker::{BackgroundJob, JobHandle, JobTracker, Presentation, ProgressListener};
