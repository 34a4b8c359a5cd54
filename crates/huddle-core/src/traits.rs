//! Core traits for Huddle
//!
//! These traits describe the collaborators the unread engine consumes. The
//! engine only ever sees these interfaces; backing stores live elsewhere.
//!
//! ## Key Traits
//!
//! - [`MembershipDirectory`]: which groups a user currently belongs to
//! - [`WatermarkStore`]: last-read timestamps per `(group, user)`
//! - [`MessageFeed`]: messages of a group newer than a timestamp
//! - [`Clock`]: Time abstraction for testability

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorResult;
use crate::identity::{GroupId, MessageId, UserId};
use crate::message::Timestamp;
use crate::subscription::Subscription;

/// Live view of a user's group memberships
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Subscribe to the set of groups `user` belongs to.
    ///
    /// The first item is the current set; every later item is the complete
    /// new set after a join or leave.
    async fn subscribe(&self, user: &UserId) -> CollaboratorResult<Subscription<BTreeSet<GroupId>>>;
}

/// Result of a conditional watermark write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    /// No record existed; one was created
    Created,
    /// The stored value was older and has been replaced
    Advanced,
    /// The stored value was already at or beyond the offered one
    Unchanged,
}

impl UpsertOutcome {
    /// Whether the write changed the stored value
    pub fn changed(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

/// Per `(group, user)` last-read timestamps.
///
/// Records are created lazily. An absent record (`None`) means no read
/// position has ever been established for the pair.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// One-shot read of the current watermark
    async fn get(&self, group: &GroupId, user: &UserId) -> CollaboratorResult<Option<Timestamp>>;

    /// Subscribe to the watermark of `(group, user)`.
    ///
    /// The first item is the current value (possibly `None`), followed by
    /// every accepted write.
    async fn subscribe(
        &self,
        group: &GroupId,
        user: &UserId,
    ) -> CollaboratorResult<Subscription<Option<Timestamp>>>;

    /// Write `value` unless the stored watermark is already `>= value`.
    ///
    /// Implementations must make this a single conditional write so two
    /// clients racing to create the same record cannot move it backwards.
    async fn upsert_if_absent_or_newer(
        &self,
        group: &GroupId,
        user: &UserId,
        value: Timestamp,
    ) -> CollaboratorResult<UpsertOutcome>;
}

/// Append-only, timestamp-ordered messages per group
#[async_trait]
pub trait MessageFeed: Send + Sync {
    /// Subscribe to the ids of messages in `group` with timestamp strictly
    /// greater than `after` (`None` means all messages).
    ///
    /// Each item is the complete current result set.
    async fn subscribe(
        &self,
        group: &GroupId,
        after: Option<Timestamp>,
    ) -> CollaboratorResult<Subscription<BTreeSet<MessageId>>>;

    /// Count-only variant of [`subscribe`](Self::subscribe).
    ///
    /// Backends that can count server-side should override this.
    async fn subscribe_count(
        &self,
        group: &GroupId,
        after: Option<Timestamp>,
    ) -> CollaboratorResult<Subscription<u64>> {
        let sub = self.subscribe(group, after).await?;
        Ok(sub.map(|ids| ids.len() as u64))
    }
}

/// Time abstraction for testability
///
/// This trait allows tests to control time, enabling deterministic
/// testing of watermark and baseline behavior.
pub trait Clock: Send + Sync {
    /// Get the current wall-clock time
    fn now(&self) -> Timestamp;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_datetime(Utc::now())
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock stopped at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.as_millis()),
        }
    }

    /// Move the clock to `to`
    pub fn set(&self, to: Timestamp) {
        self.millis.store(to.as_millis(), Ordering::SeqCst);
    }

    /// Advance the clock and return the new time
    pub fn advance(&self, millis: i64) -> Timestamp {
        let now = self.millis.fetch_add(millis, Ordering::SeqCst) + millis;
        Timestamp::from_millis(now)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}
