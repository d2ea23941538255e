//! Backoff policy: decides how long the bus waits between polls.

use std::time::Duration;

use rand::Rng;

/// Delays of the long-poll loop.
///
/// Every delay gets a dice roll added (`1..=dice_faces` times `dice_step`) so
/// that many clients reconnecting after a server restart spread out instead
/// of polling in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Base wait after a successful poll while the page is hidden.
    pub hidden_delay: Duration,

    /// Base wait after a failed poll.
    pub error_delay: Duration,

    pub dice_faces: u32,

    pub dice_step: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            hidden_delay: Duration::from_millis(4_000),
            error_delay: Duration::from_millis(10_000),
            dice_faces: 20,
            dice_step: Duration::from_millis(1_000),
        }
    }
}

impl Backoff {
    /// Jitter: `uniform(1..=dice_faces) * dice_step`.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let faces = self.dice_faces.max(1);
        self.dice_step * rng.gen_range(1..=faces)
    }

    /// Upper bound of the wait before the next poll after a success; a page
    /// becoming visible cuts it short.
    pub fn after_success<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        self.hidden_delay + self.roll(rng)
    }

    pub fn after_error<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        self.error_delay + self.roll(rng)
    }
}
