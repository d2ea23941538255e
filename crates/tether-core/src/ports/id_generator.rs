//! IdGenerator port - クライアント側 ID の生成
//!
//! Clock を使って現在時刻ベースの ULID を生成します。
//! テスト時は FixedClock で timestamp 部分を固定できます。

use ulid::Ulid;

use crate::domain::{ListenerId, PollId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_listener_id(&self) -> ListenerId;

    fn generate_poll_id(&self) -> PollId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_listener_id(&self) -> ListenerId {
        ListenerId::from(self.next_ulid())
    }

    fn generate_poll_id(&self) -> PollId {
        PollId::from(self.next_ulid())
    }
}
