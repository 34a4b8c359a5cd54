//! In-memory collaborator implementations
//!
//! This module provides in-memory implementations of the collaborator
//! traits, suitable for testing and simulation environments.
//!
//! Each store keeps the current value and the live listeners of a subject in
//! the same `DashMap` entry, so the initial item a subscriber receives and
//! every later notification are produced under one lock and arrive in order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use huddle_core::{
    CollaboratorError, CollaboratorResult, GroupId, MembershipDirectory, Message, MessageFeed,
    MessageId, Subscription, SubscriptionHandle, Timestamp, UpsertOutcome, UserId, WatermarkStore,
};
use tracing::{debug, trace};

use crate::listeners::ListenerSet;

/// Consume one unit of an injected-fault budget.
fn take_fault(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ============================================================================
// Membership
// ============================================================================

#[derive(Default)]
struct MembershipSlot {
    groups: BTreeSet<GroupId>,
    listeners: ListenerSet<BTreeSet<GroupId>>,
}

/// In-memory implementation of [`MembershipDirectory`]
#[derive(Default)]
pub struct InMemoryMembershipDirectory {
    users: Arc<DashMap<UserId, MembershipSlot>>,
    next_listener: AtomicU64,
    fail_next_subscribes: AtomicUsize,
}

impl InMemoryMembershipDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user` to `group`. Returns `false` if already a member.
    pub fn join(&self, user: &UserId, group: &GroupId) -> bool {
        let mut slot = self.users.entry(user.clone()).or_default();
        if !slot.groups.insert(group.clone()) {
            return false;
        }
        debug!(user = %user, group = %group, "Member joined group");
        let groups = slot.groups.clone();
        slot.listeners.broadcast(&groups);
        true
    }

    /// Remove `user` from `group`. Returns `false` if not a member.
    pub fn leave(&self, user: &UserId, group: &GroupId) -> bool {
        let Some(mut slot) = self.users.get_mut(user) else {
            return false;
        };
        if !slot.groups.remove(group) {
            return false;
        }
        debug!(user = %user, group = %group, "Member left group");
        let groups = slot.groups.clone();
        slot.listeners.broadcast(&groups);
        true
    }

    /// Replace the full group set of `user`
    pub fn set_groups(&self, user: &UserId, groups: impl IntoIterator<Item = GroupId>) {
        let mut slot = self.users.entry(user.clone()).or_default();
        slot.groups = groups.into_iter().collect();
        let groups = slot.groups.clone();
        slot.listeners.broadcast(&groups);
    }

    /// Current group set of `user`
    pub fn groups(&self, user: &UserId) -> BTreeSet<GroupId> {
        self.users
            .get(user)
            .map(|slot| slot.groups.clone())
            .unwrap_or_default()
    }

    /// Push a terminal error to every listener of `user` and detach them.
    ///
    /// Returns the number of listeners that were failed.
    pub fn fail(&self, user: &UserId, error: CollaboratorError) -> usize {
        match self.users.get_mut(user) {
            Some(mut slot) => slot.listeners.fail_all(error),
            None => 0,
        }
    }

    /// Make the next `n` calls to `subscribe` fail
    pub fn fail_next_subscribes(&self, n: usize) {
        self.fail_next_subscribes.store(n, Ordering::SeqCst);
    }

    /// Number of live listeners across all users
    pub fn listener_count(&self) -> usize {
        self.users.iter().map(|slot| slot.listeners.len()).sum()
    }
}

#[async_trait]
impl MembershipDirectory for InMemoryMembershipDirectory {
    async fn subscribe(&self, user: &UserId) -> CollaboratorResult<Subscription<BTreeSet<GroupId>>> {
        if take_fault(&self.fail_next_subscribes) {
            return Err(CollaboratorError::Unavailable(
                "membership directory unavailable".to_string(),
            ));
        }

        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let rx = {
            let mut slot = self.users.entry(user.clone()).or_default();
            let initial = slot.groups.clone();
            slot.listeners.add(id, (), Ok(initial))
        };
        trace!(user = %user, listener = id, "Membership listener registered");

        let users: Weak<DashMap<UserId, MembershipSlot>> = Arc::downgrade(&self.users);
        let key = user.clone();
        let handle = SubscriptionHandle::with_unregister(move || {
            if let Some(users) = users.upgrade()
                && let Some(mut slot) = users.get_mut(&key)
            {
                slot.listeners.remove(id);
            }
        });

        Ok(Subscription::from_receiver(rx, handle))
    }
}

// ============================================================================
// Watermarks
// ============================================================================

type WatermarkKey = (GroupId, UserId);

#[derive(Default)]
struct WatermarkSlot {
    value: Option<Timestamp>,
    listeners: ListenerSet<Option<Timestamp>>,
}

/// In-memory implementation of [`WatermarkStore`]
///
/// Writes are monotonic: a value at or below the stored one is reported as
/// [`UpsertOutcome::Unchanged`] and no listener is notified.
#[derive(Default)]
pub struct InMemoryWatermarkStore {
    records: Arc<DashMap<WatermarkKey, WatermarkSlot>>,
    next_listener: AtomicU64,
    fail_next_upserts: AtomicUsize,
    fail_next_subscribes: AtomicUsize,
    upsert_attempts: AtomicUsize,
}

impl InMemoryWatermarkStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally set a watermark, bypassing the monotonic check.
    ///
    /// Used to seed fixtures and to simulate writes made by other clients.
    pub fn seed(&self, group: &GroupId, user: &UserId, value: Timestamp) {
        let mut slot = self
            .records
            .entry((group.clone(), user.clone()))
            .or_default();
        slot.value = Some(value);
        slot.listeners.broadcast(&Some(value));
    }

    /// Current stored value, without subscribing
    pub fn value(&self, group: &GroupId, user: &UserId) -> Option<Timestamp> {
        self.records
            .get(&(group.clone(), user.clone()))
            .and_then(|slot| slot.value)
    }

    /// Push an error into every live subscription of `(group, user)`
    pub fn inject_error(&self, group: &GroupId, user: &UserId, error: CollaboratorError) {
        if let Some(mut slot) = self.records.get_mut(&(group.clone(), user.clone())) {
            slot.listeners.inject(error);
        }
    }

    /// Make the next `n` conditional writes fail
    pub fn fail_next_upserts(&self, n: usize) {
        self.fail_next_upserts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `subscribe` fail
    pub fn fail_next_subscribes(&self, n: usize) {
        self.fail_next_subscribes.store(n, Ordering::SeqCst);
    }

    /// Total conditional writes attempted, including injected failures
    pub fn upsert_attempts(&self) -> usize {
        self.upsert_attempts.load(Ordering::SeqCst)
    }

    /// Number of live listeners across all records
    pub fn listener_count(&self) -> usize {
        self.records.iter().map(|slot| slot.listeners.len()).sum()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, group: &GroupId, user: &UserId) -> CollaboratorResult<Option<Timestamp>> {
        Ok(self.value(group, user))
    }

    async fn subscribe(
        &self,
        group: &GroupId,
        user: &UserId,
    ) -> CollaboratorResult<Subscription<Option<Timestamp>>> {
        if take_fault(&self.fail_next_subscribes) {
            return Err(CollaboratorError::Unavailable(
                "watermark store unavailable".to_string(),
            ));
        }

        let key = (group.clone(), user.clone());
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let rx = {
            let mut slot = self.records.entry(key.clone()).or_default();
            let initial = slot.value;
            slot.listeners.add(id, (), Ok(initial))
        };
        trace!(group = %group, user = %user, listener = id, "Watermark listener registered");

        let records: Weak<DashMap<WatermarkKey, WatermarkSlot>> = Arc::downgrade(&self.records);
        let handle = SubscriptionHandle::with_unregister(move || {
            if let Some(records) = records.upgrade()
                && let Some(mut slot) = records.get_mut(&key)
            {
                slot.listeners.remove(id);
            }
        });

        Ok(Subscription::from_receiver(rx, handle))
    }

    async fn upsert_if_absent_or_newer(
        &self,
        group: &GroupId,
        user: &UserId,
        value: Timestamp,
    ) -> CollaboratorResult<UpsertOutcome> {
        self.upsert_attempts.fetch_add(1, Ordering::SeqCst);
        if take_fault(&self.fail_next_upserts) {
            return Err(CollaboratorError::WriteFailed(format!(
                "watermark write for {}/{} rejected",
                group, user
            )));
        }

        let mut slot = self
            .records
            .entry((group.clone(), user.clone()))
            .or_default();
        let outcome = match slot.value {
            None => UpsertOutcome::Created,
            Some(current) if value > current => UpsertOutcome::Advanced,
            Some(_) => UpsertOutcome::Unchanged,
        };

        if outcome.changed() {
            slot.value = Some(value);
            slot.listeners.broadcast(&Some(value));
        }

        debug!(
            group = %group,
            user = %user,
            value = value.as_millis(),
            outcome = ?outcome,
            "Watermark upsert"
        );
        Ok(outcome)
    }
}

// ============================================================================
// Message feed
// ============================================================================

#[derive(Default)]
struct GroupLog {
    /// Ordered by timestamp; equal timestamps keep insertion order.
    messages: Vec<Message>,
    deleted: bool,
    listeners: ListenerSet<BTreeSet<MessageId>, Option<Timestamp>>,
}

fn ids_after(messages: &[Message], after: Option<Timestamp>) -> BTreeSet<MessageId> {
    let start = match after {
        Some(t) => messages.partition_point(|m| m.timestamp <= t),
        None => 0,
    };
    messages[start..].iter().map(|m| m.id.clone()).collect()
}

/// In-memory implementation of [`MessageFeed`]
#[derive(Default)]
pub struct InMemoryMessageFeed {
    groups: Arc<DashMap<GroupId, GroupLog>>,
    next_listener: AtomicU64,
    next_message: AtomicU64,
    fail_next_subscribes: DashMap<GroupId, usize>,
}

impl InMemoryMessageFeed {
    /// Create an empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to its group and notify matching listeners.
    pub fn post(&self, message: Message) -> CollaboratorResult<()> {
        let mut guard = self.groups.entry(message.group_id.clone()).or_default();
        let log = &mut *guard;
        if log.deleted {
            return Err(CollaboratorError::NotFound(format!(
                "group {}",
                message.group_id
            )));
        }

        let at = log
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        trace!(
            group = %message.group_id,
            message = %message.id,
            timestamp = message.timestamp.as_millis(),
            "Message posted"
        );
        log.messages.insert(at, message);

        let GroupLog {
            messages,
            listeners,
            ..
        } = log;
        let messages: &[Message] = messages;
        let posted = &messages[at];
        listeners.notify(|after| {
            posted
                .is_after(*after)
                .then(|| ids_after(messages, *after))
        });
        Ok(())
    }

    /// Post a message with a generated id and return the id
    pub fn post_at(
        &self,
        group: &GroupId,
        sender: &UserId,
        timestamp: Timestamp,
    ) -> CollaboratorResult<MessageId> {
        let n = self.next_message.fetch_add(1, Ordering::Relaxed);
        let id = MessageId::new(format!("{}-m{}", group, n))
            .map_err(|e| CollaboratorError::WriteFailed(e.to_string()))?;
        self.post(Message::new(id.clone(), group.clone(), sender.clone(), timestamp))?;
        Ok(id)
    }

    /// Delete a group: live listeners receive `NotFound` and are detached,
    /// and later subscriptions fail.
    pub fn delete_group(&self, group: &GroupId) -> usize {
        let mut log = self.groups.entry(group.clone()).or_default();
        log.deleted = true;
        log.messages.clear();
        let failed = log
            .listeners
            .fail_all(CollaboratorError::NotFound(format!("group {}", group)));
        debug!(group = %group, listeners = failed, "Group deleted from feed");
        failed
    }

    /// Make the next `n` subscriptions to `group` fail
    pub fn fail_next_subscribes(&self, group: &GroupId, n: usize) {
        self.fail_next_subscribes.insert(group.clone(), n);
    }

    /// Number of stored messages in `group`
    pub fn message_count(&self, group: &GroupId) -> usize {
        self.groups
            .get(group)
            .map(|log| log.messages.len())
            .unwrap_or(0)
    }

    /// Number of live listeners across all groups
    pub fn listener_count(&self) -> usize {
        self.groups.iter().map(|log| log.listeners.len()).sum()
    }

    /// Number of live listeners on one group
    pub fn listener_count_for(&self, group: &GroupId) -> usize {
        self.groups
            .get(group)
            .map(|log| log.listeners.len())
            .unwrap_or(0)
    }

    fn take_subscribe_fault(&self, group: &GroupId) -> bool {
        match self.fail_next_subscribes.get_mut(group) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl MessageFeed for InMemoryMessageFeed {
    async fn subscribe(
        &self,
        group: &GroupId,
        after: Option<Timestamp>,
    ) -> CollaboratorResult<Subscription<BTreeSet<MessageId>>> {
        if self.take_subscribe_fault(group) {
            return Err(CollaboratorError::Unavailable(format!(
                "feed for group {} unavailable",
                group
            )));
        }

        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let rx = {
            let mut log = self.groups.entry(group.clone()).or_default();
            if log.deleted {
                return Err(CollaboratorError::NotFound(format!("group {}", group)));
            }
            let initial = ids_after(&log.messages, after);
            log.listeners.add(id, after, Ok(initial))
        };
        trace!(
            group = %group,
            after = ?after.map(|t| t.as_millis()),
            listener = id,
            "Feed listener registered"
        );

        let groups: Weak<DashMap<GroupId, GroupLog>> = Arc::downgrade(&self.groups);
        let key = group.clone();
        let handle = SubscriptionHandle::with_unregister(move || {
            if let Some(groups) = groups.upgrade()
                && let Some(mut log) = groups.get_mut(&key)
            {
                log.listeners.remove(id);
            }
        });

        Ok(Subscription::from_receiver(rx, handle))
    }
}
