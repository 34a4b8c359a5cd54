//! Timestamps and chat messages

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{GroupId, MessageId, UserId};

/// A point in time, in milliseconds since the Unix epoch.
///
/// Message ordering and watermarks both use this type. A watermark is an
/// `Option<Timestamp>`: `None` means no read position was ever recorded,
/// which is not the same as `Timestamp::EPOCH` (everything unread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Create a timestamp from milliseconds since the epoch
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the epoch
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Convert from a UTC datetime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    /// Convert to a UTC datetime, if representable
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Add a duration, saturating at the maximum representable instant
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// A chat message posted to a group.
///
/// Created by the chat-send path; the unread engine only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn new(id: MessageId, group_id: GroupId, sender_id: UserId, timestamp: Timestamp) -> Self {
        Self {
            id,
            group_id,
            sender_id,
            timestamp,
        }
    }

    /// Whether this message is unread relative to a watermark.
    ///
    /// Everything at or before the watermark counts as read.
    pub fn is_after(&self, watermark: Option<Timestamp>) -> bool {
        match watermark {
            Some(t) => self.timestamp > t,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(ts: i64) -> Message {
        Message::new(
            MessageId::new(format!("m{}", ts)).unwrap(),
            GroupId::new("g").unwrap(),
            UserId::new("u").unwrap(),
            Timestamp::from_millis(ts),
        )
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::from_millis(1) > Timestamp::EPOCH);
        assert_eq!(Timestamp::from_millis(5).as_millis(), 5);
    }

    #[test]
    fn test_datetime_round_trip() {
        let dt = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let ts = Timestamp::from(dt);
        assert_eq!(ts.as_millis(), 1_700_000_000_123);
        assert_eq!(ts.to_datetime(), Some(dt));
    }

    #[test]
    fn test_saturating_add() {
        let ts = Timestamp::from_millis(1_000);
        assert_eq!(
            ts.saturating_add(Duration::from_millis(500)),
            Timestamp::from_millis(1_500)
        );
        assert_eq!(
            Timestamp::from_millis(i64::MAX).saturating_add(Duration::from_secs(1)),
            Timestamp::from_millis(i64::MAX)
        );
    }

    #[test]
    fn test_watermark_boundary_is_read() {
        let msg = message(100);
        assert!(!msg.is_after(Some(Timestamp::from_millis(100))));
        assert!(msg.is_after(Some(Timestamp::from_millis(99))));
        assert!(msg.is_after(None));
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let json = serde_json::to_value(message(7)).unwrap();
        assert_eq!(json["groupId"], "g");
        assert_eq!(json["senderId"], "u");
        assert_eq!(json["timestamp"], 7);
    }
}
