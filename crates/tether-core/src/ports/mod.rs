//! Ports - 抽象化レイヤー
//!
//! 外部との境界（サーバー、ページ可視状態、時刻、ID 生成）を trait として定義し、
//! 実装の詳細を隠蔽します。

pub mod clock;
pub mod id_generator;
pub mod transport;
pub mod visibility;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::transport::{JobControl, PollTransport, TransportError};
pub use self::visibility::{AlwaysVisible, Visibility, WatchVisibility};
