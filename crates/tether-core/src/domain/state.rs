//! State - 追跡中ジョブの状態
//!
//! # 状態遷移
//! - Pending -> Succeeded（`success` 受信）
//! - Pending -> Failed（`failure` 受信）
//! - Pending -> Cancelled（`cancelled` 受信）
//! - Pending -> TimedOut（制限時間切れ、クライアント側で判定）
//!
//! 終端状態からは遷移しない。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Pending)
    }
}
