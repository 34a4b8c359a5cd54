//! Consumer-facing entry point.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use huddle_core::{
    Clock, GroupId, MembershipDirectory, MessageFeed, UpsertOutcome, UserId, WatermarkStore,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::run_aggregator;
use crate::config::UnreadConfig;
use crate::error::Result;
use crate::mark_read::write_watermark;
use crate::summary::Summary;

/// Collaborators and configuration shared by the aggregator and every
/// tracker it spawns.
pub(crate) struct EngineContext {
    pub directory: Arc<dyn MembershipDirectory>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub feed: Arc<dyn MessageFeed>,
    pub clock: Arc<dyn Clock>,
    pub config: UnreadConfig,
    /// Runtime the engine was created on, if any
    pub runtime: Option<Handle>,
}

/// Unread-activity engine for one deployment.
///
/// Cheap to clone; all clones share the same collaborators.
#[derive(Clone)]
pub struct UnreadTracker {
    ctx: Arc<EngineContext>,
}

impl UnreadTracker {
    /// Create an engine over the given collaborators.
    ///
    /// When called inside a Tokio runtime, that runtime is remembered and
    /// used for background writes requested from threads outside it.
    ///
    /// Fails only if `config` is invalid.
    pub fn new(
        directory: Arc<dyn MembershipDirectory>,
        watermarks: Arc<dyn WatermarkStore>,
        feed: Arc<dyn MessageFeed>,
        clock: Arc<dyn Clock>,
        config: UnreadConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(EngineContext {
                directory,
                watermarks,
                feed,
                clock,
                config,
                runtime: Handle::try_current().ok(),
            }),
        })
    }

    pub fn config(&self) -> &UnreadConfig {
        &self.ctx.config
    }

    /// Start tracking unread activity for `user`.
    ///
    /// The stream yields `Summary::default()` first, then a new summary after
    /// every membership change and every per-group count change. A failure
    /// of the membership subscription is delivered as a single `Err` after
    /// which the stream ends.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, user: &UserId) -> (SummaryStream, UnreadHandle) {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail
        let _ = tx.send(Ok(Summary::default()));

        let task = tokio::spawn(run_aggregator(
            self.ctx.clone(),
            user.clone(),
            token.clone(),
            tx,
        ));
        info!(user = %user, "Unread tracking started");

        (
            SummaryStream {
                rx,
                token: token.clone(),
            },
            UnreadHandle { token, task },
        )
    }

    /// Mark `group` as read for `user` now, without waiting.
    ///
    /// The write runs in the background with bounded retries. Failures are
    /// logged and never reach the caller. The summary follows once the
    /// group's tracker sees the new watermark.
    ///
    /// Safe to call from any thread. The write runs on the current runtime,
    /// or on the one the engine was created on. With neither available the
    /// request is dropped and logged.
    pub fn mark_group_read(&self, group: &GroupId, user: &UserId) {
        let Some(runtime) = Handle::try_current().ok().or_else(|| self.ctx.runtime.clone()) else {
            error!(group = %group, user = %user, "Mark as read dropped: no Tokio runtime");
            return;
        };

        let this = self.clone();
        let group = group.clone();
        let user = user.clone();
        runtime.spawn(async move {
            if let Err(e) = this.mark_group_read_now(&group, &user).await {
                warn!(group = %group, user = %user, error = %e, "Mark as read failed");
            }
        });
    }

    /// Mark `group` as read for `user` now and wait for the write.
    pub async fn mark_group_read_now(&self, group: &GroupId, user: &UserId) -> Result<UpsertOutcome> {
        let now = self.ctx.clock.now();
        write_watermark(
            self.ctx.watermarks.as_ref(),
            group,
            user,
            now,
            &self.ctx.config.write,
            None,
        )
        .await
    }
}

/// Stream of [`Summary`] values for one started user.
///
/// Ends when the engine is cancelled or after a terminal membership error.
/// Dropping the stream shuts the engine down.
pub struct SummaryStream {
    rx: mpsc::UnboundedReceiver<Result<Summary>>,
    token: CancellationToken,
}

impl Stream for SummaryStream {
    type Item = Result<Summary>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

/// Cancellation handle for a started engine.
pub struct UnreadHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl UnreadHandle {
    /// Stop the aggregator and every tracker. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait until every subscription has been released.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Unread aggregator task failed");
        }
    }
}
