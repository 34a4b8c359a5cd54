//! Shared harness for unread engine tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use huddle_core::{GroupId, ManualClock, MessageId, Timestamp, UserId};
use huddle_storage::{InMemoryMembershipDirectory, InMemoryMessageFeed, InMemoryWatermarkStore};
use huddle_unread::{Result, Summary, SummaryStream, UnreadConfig, UnreadTracker};

/// Clock reading at harness creation. Backlog fixtures sit below it.
pub const T0: Timestamp = Timestamp::from_millis(1_700_000_000_000);

const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub directory: Arc<InMemoryMembershipDirectory>,
    pub watermarks: Arc<InMemoryWatermarkStore>,
    pub feed: Arc<InMemoryMessageFeed>,
    pub clock: Arc<ManualClock>,
    pub tracker: UnreadTracker,
    pub user: UserId,
    pub sender: UserId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(UnreadConfig::testing())
    }

    pub fn with_config(config: UnreadConfig) -> Self {
        huddle_logging::init_testing();

        let directory = Arc::new(InMemoryMembershipDirectory::new());
        let watermarks = Arc::new(InMemoryWatermarkStore::new());
        let feed = Arc::new(InMemoryMessageFeed::new());
        let clock = Arc::new(ManualClock::new(T0));
        let tracker = UnreadTracker::new(
            directory.clone(),
            watermarks.clone(),
            feed.clone(),
            clock.clone(),
            config,
        )
        .expect("valid config");

        Self {
            directory,
            watermarks,
            feed,
            clock,
            tracker,
            user: UserId::new("alice").unwrap(),
            sender: UserId::new("bob").unwrap(),
        }
    }

    /// Make the user a member of `id` and return its group id
    pub fn join(&self, id: &str) -> GroupId {
        let group = gid(id);
        self.directory.join(&self.user, &group);
        group
    }

    pub fn leave(&self, group: &GroupId) {
        self.directory.leave(&self.user, group);
    }

    /// Post `n` messages before `T0`
    pub fn backlog(&self, group: &GroupId, n: i64) {
        for i in 1..=n {
            self.feed
                .post_at(group, &self.sender, Timestamp::from_millis(T0.as_millis() - 10_000 + i))
                .unwrap();
        }
    }

    /// Advance the clock and post one message at the new time
    pub fn post_now(&self, group: &GroupId) -> MessageId {
        let at = self.clock.advance(1);
        self.feed.post_at(group, &self.sender, at).unwrap()
    }

    /// Set the user's watermark for `group` as another client would
    pub fn seed_watermark(&self, group: &GroupId, at: Timestamp) {
        self.watermarks.seed(group, &self.user, at);
    }

    pub fn start(&self) -> (SummaryStream, huddle_unread::UnreadHandle) {
        self.tracker.start(&self.user)
    }

    /// Live listeners across all three collaborators
    pub fn listeners(&self) -> usize {
        self.directory.listener_count() + self.watermarks.listener_count() + self.feed.listener_count()
    }
}

pub fn gid(id: &str) -> GroupId {
    GroupId::new(id).unwrap()
}

/// Next stream item, failing the test if none arrives in time.
pub async fn next(stream: &mut SummaryStream) -> Option<Result<Summary>> {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for a summary")
}

/// Consume summaries until one satisfies `pred`.
///
/// Every summary seen on the way must be internally consistent.
pub async fn wait_for(stream: &mut SummaryStream, pred: impl Fn(&Summary) -> bool) -> Summary {
    loop {
        let summary = next(stream)
            .await
            .expect("summary stream ended")
            .expect("summary stream failed");
        assert!(summary.is_consistent(), "inconsistent summary: {:?}", summary);
        if pred(&summary) {
            return summary;
        }
    }
}

/// Poll `cond` until it holds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Assert that no summary arrives within `window`.
pub async fn assert_quiet(stream: &mut SummaryStream, window: Duration) {
    if let Ok(item) = tokio::time::timeout(window, stream.next()).await {
        panic!("unexpected stream item: {:?}", item);
    }
}
