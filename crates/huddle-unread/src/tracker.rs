//! Per-group unread tracking.
//!
//! A tracker owns two subscriptions for its `(group, user)` pair: the user's
//! read watermark and the group's message feed filtered to messages after
//! that watermark. It reports a single number, the size of that filtered
//! set, to the aggregator over a channel.
//!
//! When no watermark exists the tracker does not count the backlog. It
//! counts from its own start time and writes that start time back as the
//! baseline watermark.

use std::sync::Arc;

use futures::StreamExt;
use huddle_core::{CollaboratorError, CollaboratorResult, GroupId, Subscription, Timestamp, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::mark_read::write_watermark;
use crate::retry::Backoff;
use crate::service::EngineContext;

/// A count reported by one tracker incarnation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TrackerUpdate {
    pub group: GroupId,
    /// Incarnation of the tracker that produced the count
    pub epoch: u64,
    pub count: u64,
}

/// Owner's side of a running tracker. Dropping it retires the tracker.
pub(crate) struct TrackerHandle {
    epoch: u64,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Cancel the tracker and hand back its task for joining.
    pub fn retire(mut self) -> Option<JoinHandle<()>> {
        self.token.cancel();
        self.task.take()
    }

    /// A handle with no task behind it
    #[cfg(test)]
    pub fn detached(epoch: u64) -> Self {
        Self {
            epoch,
            token: CancellationToken::new(),
            task: None,
        }
    }

    #[cfg(test)]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawn a tracker for `(group, user)` under `parent`.
pub(crate) fn spawn_tracker(
    ctx: Arc<EngineContext>,
    user: UserId,
    group: GroupId,
    epoch: u64,
    parent: &CancellationToken,
    updates: mpsc::UnboundedSender<TrackerUpdate>,
) -> TrackerHandle {
    let token = parent.child_token();
    let started_at = ctx.clock.now();
    let tracker = GroupUnreadTracker {
        resubscribe_watermark: Backoff::new(ctx.config.resubscribe.clone()),
        resubscribe_feed: Backoff::new(ctx.config.resubscribe.clone()),
        ctx,
        user,
        group,
        epoch,
        token: token.clone(),
        updates,
        started_at,
        watermark: None,
        feed: None,
        after: None,
        last_count: None,
        watermark_retry_at: None,
        feed_retry_at: None,
        baseline: None,
    };
    let task = tokio::spawn(tracker.run());

    TrackerHandle {
        epoch,
        token,
        task: Some(task),
    }
}

struct GroupUnreadTracker {
    ctx: Arc<EngineContext>,
    user: UserId,
    group: GroupId,
    epoch: u64,
    token: CancellationToken,
    updates: mpsc::UnboundedSender<TrackerUpdate>,
    /// Baseline used while the user has no watermark
    started_at: Timestamp,

    watermark: Option<Subscription<Option<Timestamp>>>,
    feed: Option<Subscription<u64>>,
    /// Lower bound of the live feed subscription
    after: Option<Timestamp>,
    last_count: Option<u64>,

    resubscribe_watermark: Backoff,
    resubscribe_feed: Backoff,
    watermark_retry_at: Option<Instant>,
    feed_retry_at: Option<Instant>,
    baseline: Option<JoinHandle<()>>,
}

impl GroupUnreadTracker {
    async fn run(mut self) {
        debug!(group = %self.group, epoch = self.epoch, "Tracker started");
        self.subscribe_watermark().await;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = sleep_until_opt(self.watermark_retry_at) => {
                    self.watermark_retry_at = None;
                    self.subscribe_watermark().await;
                }
                item = next_item(&mut self.watermark) => self.on_watermark(item).await,
                _ = sleep_until_opt(self.feed_retry_at) => {
                    self.feed_retry_at = None;
                    self.subscribe_feed().await;
                }
                item = next_item(&mut self.feed) => self.on_feed(item),
            }
        }

        self.close();
    }

    async fn subscribe_watermark(&mut self) {
        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            result = self.ctx.watermarks.subscribe(&self.group, &self.user) => result,
        };
        match result {
            Ok(sub) => {
                trace!(group = %self.group, "Watermark subscribed");
                self.watermark = Some(sub);
            }
            Err(e) => {
                log_failure(&self.group, "Watermark subscribe", &e);
                self.schedule_watermark_retry();
            }
        }
    }

    async fn on_watermark(&mut self, item: Option<CollaboratorResult<Option<Timestamp>>>) {
        match item {
            Some(Ok(value)) => {
                self.resubscribe_watermark.record_success();
                let after = match value {
                    Some(at) => at,
                    None => {
                        self.ensure_baseline();
                        self.started_at
                    }
                };
                if self.after != Some(after) {
                    self.after = Some(after);
                    self.subscribe_feed().await;
                }
            }
            Some(Err(e)) => {
                log_failure(&self.group, "Watermark subscription", &e);
                self.degrade();
            }
            None => {
                debug!(group = %self.group, "Watermark subscription ended");
                self.degrade();
            }
        }
    }

    /// Drop both subscriptions, report zero and retry from the watermark.
    fn degrade(&mut self) {
        if let Some(watermark) = self.watermark.take() {
            watermark.cancel();
        }
        if let Some(feed) = self.feed.take() {
            feed.cancel();
        }
        self.after = None;
        self.feed_retry_at = None;
        self.emit(0);
        self.schedule_watermark_retry();
    }

    fn schedule_watermark_retry(&mut self) {
        match self.resubscribe_watermark.record_failure() {
            Some(delay) => self.watermark_retry_at = Some(Instant::now() + delay),
            None => error!(
                group = %self.group,
                attempts = self.resubscribe_watermark.failures(),
                "Giving up on watermark subscription"
            ),
        }
    }

    /// Start the baseline write unless one is already running.
    fn ensure_baseline(&mut self) {
        if self.baseline.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let store = self.ctx.watermarks.clone();
        let policy = self.ctx.config.write.clone();
        let group = self.group.clone();
        let user = self.user.clone();
        let at = self.started_at;
        let token = self.token.child_token();

        debug!(group = %group, at = %at, "Writing baseline watermark");
        self.baseline = Some(tokio::spawn(async move {
            if let Err(e) = write_watermark(store.as_ref(), &group, &user, at, &policy, Some(&token)).await {
                warn!(group = %group, error = %e, "Baseline watermark not written");
            }
        }));
    }

    async fn subscribe_feed(&mut self) {
        let Some(after) = self.after else {
            return;
        };
        // Never hold two feed subscriptions for one group
        if let Some(old) = self.feed.take() {
            old.cancel();
        }
        self.feed_retry_at = None;

        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            result = self.ctx.feed.subscribe_count(&self.group, Some(after)) => result,
        };
        match result {
            Ok(sub) => {
                trace!(group = %self.group, after = %after, "Feed subscribed");
                self.feed = Some(sub);
            }
            Err(e) => {
                log_failure(&self.group, "Feed subscribe", &e);
                self.emit(0);
                self.schedule_feed_retry();
            }
        }
    }

    fn on_feed(&mut self, item: Option<CollaboratorResult<u64>>) {
        match item {
            Some(Ok(count)) => {
                self.resubscribe_feed.record_success();
                self.emit(count);
            }
            Some(Err(e)) => {
                log_failure(&self.group, "Feed subscription", &e);
                self.feed = None;
                self.emit(0);
                self.schedule_feed_retry();
            }
            None => {
                debug!(group = %self.group, "Feed subscription ended");
                self.feed = None;
                self.emit(0);
                self.schedule_feed_retry();
            }
        }
    }

    fn schedule_feed_retry(&mut self) {
        match self.resubscribe_feed.record_failure() {
            Some(delay) => self.feed_retry_at = Some(Instant::now() + delay),
            None => error!(
                group = %self.group,
                attempts = self.resubscribe_feed.failures(),
                "Giving up on feed subscription"
            ),
        }
    }

    fn emit(&mut self, count: u64) {
        if self.token.is_cancelled() {
            return;
        }
        if self.ctx.config.dedupe_counts && self.last_count == Some(count) {
            return;
        }
        self.last_count = Some(count);

        let update = TrackerUpdate {
            group: self.group.clone(),
            epoch: self.epoch,
            count,
        };
        if self.updates.send(update).is_err() {
            // Aggregator is gone
            self.token.cancel();
        }
    }

    fn close(&mut self) {
        if let Some(watermark) = self.watermark.take() {
            watermark.cancel();
        }
        if let Some(feed) = self.feed.take() {
            feed.cancel();
        }
        debug!(group = %self.group, epoch = self.epoch, "Tracker stopped");
    }
}

/// Missing groups and revoked access log at debug, everything else warns.
fn log_failure(group: &GroupId, what: &str, error: &CollaboratorError) {
    if error.is_transient() {
        warn!(group = %group, error = %error, "{what} failed");
    } else {
        debug!(group = %group, error = %error, "{what} failed permanently");
    }
}

/// Next item of an optional subscription; pending while there is none.
async fn next_item<T>(sub: &mut Option<Subscription<T>>) -> Option<CollaboratorResult<T>> {
    match sub {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
