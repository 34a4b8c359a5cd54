//! The aggregate unread view published to consumers.

use std::collections::BTreeMap;

use huddle_core::GroupId;
use serde::{Deserialize, Serialize};

/// Unread counts across all of a user's groups.
///
/// Always internally consistent: `total_unread` is the sum of `by_group`,
/// and `groups_with_unread` counts the entries of `by_group` above zero.
/// Every constructor recomputes both from the per-group map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SummaryWire")]
pub struct Summary {
    total_unread: u64,
    groups_with_unread: u64,
    by_group: BTreeMap<GroupId, u64>,
}

impl Summary {
    /// Fold per-group counts into a summary.
    pub fn from_counts(by_group: BTreeMap<GroupId, u64>) -> Self {
        let (total_unread, groups_with_unread) =
            by_group
                .values()
                .fold((0u64, 0u64), |(total, groups), &count| {
                    (
                        total.saturating_add(count),
                        groups + u64::from(count > 0),
                    )
                });
        Self {
            total_unread,
            groups_with_unread,
            by_group,
        }
    }

    pub fn total_unread(&self) -> u64 {
        self.total_unread
    }

    pub fn groups_with_unread(&self) -> u64 {
        self.groups_with_unread
    }

    /// Counts per tracked group, including groups at zero
    pub fn by_group(&self) -> &BTreeMap<GroupId, u64> {
        &self.by_group
    }

    /// Count for one group, `None` if the group is not tracked
    pub fn count_for(&self, group: &GroupId) -> Option<u64> {
        self.by_group.get(group).copied()
    }

    /// Whether the derived totals match the per-group map
    pub fn is_consistent(&self) -> bool {
        let total = self
            .by_group
            .values()
            .fold(0u64, |acc, count| acc.saturating_add(*count));
        let groups = self.by_group.values().filter(|count| **count > 0).count() as u64;
        total == self.total_unread && groups == self.groups_with_unread
    }
}

/// Incoming JSON shape; totals are ignored and recomputed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryWire {
    #[serde(default)]
    by_group: BTreeMap<GroupId, u64>,
}

impl From<SummaryWire> for Summary {
    fn from(wire: SummaryWire) -> Self {
        Summary::from_counts(wire.by_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(id: &str) -> GroupId {
        GroupId::new(id).unwrap()
    }

    #[test]
    fn test_default_is_empty() {
        let summary = Summary::default();
        assert_eq!(summary.total_unread(), 0);
        assert_eq!(summary.groups_with_unread(), 0);
        assert!(summary.by_group().is_empty());
        assert!(summary.is_consistent());
    }

    #[test]
    fn test_from_counts() {
        let summary = Summary::from_counts(BTreeMap::from([
            (gid("a"), 3),
            (gid("b"), 0),
            (gid("c"), 2),
        ]));
        assert_eq!(summary.total_unread(), 5);
        assert_eq!(summary.groups_with_unread(), 2);
        assert_eq!(summary.count_for(&gid("b")), Some(0));
        assert_eq!(summary.count_for(&gid("z")), None);
        assert!(summary.is_consistent());
    }

    #[test]
    fn test_total_saturates() {
        let summary = Summary::from_counts(BTreeMap::from([(gid("a"), u64::MAX), (gid("b"), 1)]));
        assert_eq!(summary.total_unread(), u64::MAX);
        assert_eq!(summary.groups_with_unread(), 2);
        assert!(summary.is_consistent());
    }

    #[test]
    fn test_json_shape() {
        let summary = Summary::from_counts(BTreeMap::from([(gid("g1"), 3), (gid("g2"), 0)]));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "totalUnread": 3,
                "groupsWithUnread": 1,
                "byGroup": { "g1": 3, "g2": 0 }
            })
        );
    }

    #[test]
    fn test_deserialize_recomputes_totals() {
        let summary: Summary = serde_json::from_str(
            r#"{ "totalUnread": 99, "groupsWithUnread": 7, "byGroup": { "g1": 4, "g2": 1 } }"#,
        )
        .unwrap();
        assert_eq!(summary.total_unread(), 5);
        assert_eq!(summary.groups_with_unread(), 2);
        assert!(summary.is_consistent());
    }
}
