//! Wire shapes of the long-polling endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::channel::Channel;

/// One notification as delivered by the server's poll endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub channel: Channel,
    #[serde(default)]
    pub message: Value,
}

impl Notification {
    pub fn new(id: u64, channel: Channel, message: Value) -> Self {
        Self {
            id,
            channel,
            message,
        }
    }
}

/// Last-seen notification id.
///
/// Notifications of one response are not guaranteed to be sorted, so the
/// cursor only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn advance(&mut self, id: u64) {
        if id > self.0 {
            self.0 = id;
        }
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// Parameters of one `/longpolling/poll` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollRequest {
    pub channels: Vec<Channel>,
    pub last: u64,
    #[serde(default)]
    pub options: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::forward(vec![3, 7], 7)]
    #[case::unordered(vec![9, 4, 6], 9)]
    #[case::stale(vec![0], 0)]
    fn cursor_only_moves_forward(#[case] ids: Vec<u64>, #[case] expected: u64) {
        let mut cursor = Cursor::default();
        for id in ids {
            cursor.advance(id);
        }
        assert_eq!(cursor.value(), expected);
    }

    #[test]
    fn notification_tolerates_missing_message() {
        let n: Notification =
            serde_json::from_value(serde_json::json!({"id": 5, "channel": "c"})).unwrap();
        assert_eq!(n.id, 5);
        assert!(n.message.is_null());
    }

    #[test]
    fn poll_request_wire_shape() {
        let req = PollRequest {
            channels: vec![Channel::new("a")],
            last: 12,
            options: Map::new(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"channels": ["a"], "last": 12, "options": {}})
        );
    }
}
