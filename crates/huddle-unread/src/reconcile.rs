//! Diffing live trackers against the current membership set.

use std::collections::BTreeSet;

use huddle_core::GroupId;

/// Which trackers to start and which to stop after a membership change.
///
/// Both lists are sorted and disjoint. Groups present on both sides are left
/// untouched, so their counts survive unrelated joins and leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Groups in the target set with no live tracker
    pub spawn: Vec<GroupId>,
    /// Live trackers whose group left the target set
    pub retire: Vec<GroupId>,
}

impl ReconcilePlan {
    /// Compute the plan that turns `live` into `target`.
    pub fn between<'a>(
        live: impl IntoIterator<Item = &'a GroupId>,
        target: &BTreeSet<GroupId>,
    ) -> Self {
        let live: BTreeSet<&GroupId> = live.into_iter().collect();

        let spawn = target
            .iter()
            .filter(|group| !live.contains(group))
            .cloned()
            .collect();
        let retire = live
            .into_iter()
            .filter(|group| !target.contains(*group))
            .cloned()
            .collect();

        Self { spawn, retire }
    }

    /// Whether nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.spawn.is_empty() && self.retire.is_empty()
    }
}
