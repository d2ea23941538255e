//! tether-core
//!
//! Long-polling notification bus and background-job tracking.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（channel, ids, notification, message, progress, outcome, state, errors）
//! - **ports**: 抽象化レイヤー（PollTransport, JobControl, Visibility, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（bus, tracker, monitor, backoff, config, builder）
//! - **impls**: 実装（HttpTransport, InMemoryServer）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
