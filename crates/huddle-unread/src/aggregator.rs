//! Folding tracker counts into a [`Summary`].
//!
//! The aggregator owns the membership subscription and the registry of live
//! trackers. Membership changes flow down as spawns and retirements; counts
//! flow up over a single channel. Every update carries the epoch of the
//! tracker incarnation that produced it, so a count from a retired tracker
//! can never resurrect its group.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures::StreamExt;
use huddle_core::{GroupId, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, UnreadError};
use crate::reconcile::ReconcilePlan;
use crate::service::EngineContext;
use crate::summary::Summary;
use crate::tracker::{TrackerHandle, TrackerUpdate, spawn_tracker};

/// Counts and live trackers of one started user.
#[derive(Default)]
pub(crate) struct AggregatorState {
    by_group: BTreeMap<GroupId, u64>,
    registry: HashMap<GroupId, TrackerHandle>,
    /// Tasks of retired trackers that may still be releasing subscriptions
    retiring: Vec<JoinHandle<()>>,
    next_epoch: u64,
}

impl AggregatorState {
    /// Bring the registry in line with `target`.
    ///
    /// New groups start at zero until their tracker reports. Retired groups
    /// are removed from the counts immediately.
    pub fn reconcile(
        &mut self,
        target: &BTreeSet<GroupId>,
        mut spawn: impl FnMut(&GroupId, u64) -> TrackerHandle,
    ) -> ReconcilePlan {
        let plan = ReconcilePlan::between(self.registry.keys(), target);

        self.retiring.retain(|task| !task.is_finished());
        for group in &plan.retire {
            if let Some(task) = self.registry.remove(group).and_then(TrackerHandle::retire) {
                self.retiring.push(task);
            }
            self.by_group.remove(group);
        }

        for group in &plan.spawn {
            self.next_epoch += 1;
            let handle = spawn(group, self.next_epoch);
            self.registry.insert(group.clone(), handle);
            self.by_group.insert(group.clone(), 0);
        }

        plan
    }

    /// Record a tracker's count. Returns whether the summary changed.
    pub fn apply(&mut self, update: TrackerUpdate) -> bool {
        let current = self.registry.get(&update.group).map(TrackerHandle::epoch);
        if current != Some(update.epoch) {
            debug!(group = %update.group, epoch = update.epoch, "Discarding stale count");
            return false;
        }
        match self.by_group.insert(update.group, update.count) {
            Some(previous) => previous != update.count,
            None => true,
        }
    }

    pub fn summary(&self) -> Summary {
        Summary::from_counts(self.by_group.clone())
    }

    pub fn tracked(&self) -> usize {
        self.registry.len()
    }

    /// Retire every tracker and return their tasks.
    pub fn retire_all(&mut self) -> Vec<JoinHandle<()>> {
        self.by_group.clear();
        let mut tasks: Vec<_> = self
            .registry
            .drain()
            .filter_map(|(_, handle)| handle.retire())
            .collect();
        tasks.append(&mut self.retiring);
        tasks
    }
}

/// Run the aggregator for `user` until cancelled, until `output` is dropped,
/// or until the membership subscription fails.
pub(crate) async fn run_aggregator(
    ctx: Arc<EngineContext>,
    user: UserId,
    token: CancellationToken,
    output: mpsc::UnboundedSender<Result<Summary>>,
) {
    let mut membership = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        result = ctx.directory.subscribe(&user) => match result {
            Ok(sub) => sub,
            Err(e) => {
                error!(user = %user, error = %e, "Membership subscribe failed");
                let _ = output.send(Err(UnreadError::Membership(e)));
                return;
            }
        },
    };

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let mut state = AggregatorState::default();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(user = %user, "Aggregator cancelled");
                break;
            }
            _ = output.closed() => {
                debug!(user = %user, "Summary consumer went away");
                break;
            }
            item = membership.next() => match item {
                Some(Ok(groups)) => {
                    let plan = state.reconcile(&groups, |group, epoch| {
                        spawn_tracker(
                            ctx.clone(),
                            user.clone(),
                            group.clone(),
                            epoch,
                            &token,
                            updates_tx.clone(),
                        )
                    });
                    if !plan.is_empty() {
                        info!(
                            user = %user,
                            joined = plan.spawn.len(),
                            left = plan.retire.len(),
                            tracked = state.tracked(),
                            "Membership changed"
                        );
                    }
                    if output.send(Ok(state.summary())).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(user = %user, error = %e, "Membership subscription failed");
                    let _ = output.send(Err(UnreadError::Membership(e)));
                    break;
                }
                None => {
                    warn!(user = %user, "Membership subscription closed");
                    let _ = output.send(Err(UnreadError::MembershipClosed));
                    break;
                }
            },
            Some(update) = updates_rx.recv() => {
                if state.apply(update) && output.send(Ok(state.summary())).is_err() {
                    break;
                }
            }
        }
    }

    membership.cancel();
    for task in state.retire_all() {
        if let Err(e) = task.await {
            warn!(error = %e, "Tracker task failed");
        }
    }
    info!(user = %user, "Unread tracking stopped");
}
