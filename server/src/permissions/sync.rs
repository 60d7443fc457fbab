//! Replace-set synchronization for join tables.
//!
//! A sync replaces an owner's associated set with the desired one. Instead of
//! delete-all-then-insert-all, the difference is computed and only the rows
//! that change are touched, so readers never observe an empty set mid-sync.

use std::collections::HashSet;

use uuid::Uuid;

/// Rows to attach and detach to turn the current set into the desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Ids to insert, in first-seen order of the desired list.
    pub attach: Vec<Uuid>,
    /// Ids to delete, in the order they were found.
    pub detach: Vec<Uuid>,
}

impl SyncPlan {
    /// Compute the plan for `current` → `desired`. Duplicates collapse.
    #[must_use]
    pub fn compute(current: &[Uuid], desired: &[Uuid]) -> Self {
        let current_set: HashSet<Uuid> = current.iter().copied().collect();
        let desired_set: HashSet<Uuid> = desired.iter().copied().collect();

        let mut seen = HashSet::with_capacity(desired.len());
        let attach = desired
            .iter()
            .copied()
            .filter(|id| !current_set.contains(id) && seen.insert(*id))
            .collect();

        let mut seen = HashSet::with_capacity(current.len());
        let detach = current
            .iter()
            .copied()
            .filter(|id| !desired_set.contains(id) && seen.insert(*id))
            .collect();

        Self { attach, detach }
    }

    /// True when the sets already match.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.attach.is_empty() && self.detach.is_empty()
    }

    /// Apply the plan to an in-memory set.
    pub fn apply_to(&self, set: &mut HashSet<Uuid>) {
        for id in &self.detach {
            set.remove(id);
        }
        set.extend(self.attach.iter().copied());
    }
}

/// Deduplicate ids, keeping first-seen order.
#[must_use]
pub fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::now_v7()).collect()
    }

    #[test]
    fn test_plan_from_empty() {
        let desired = ids(2);
        let plan = SyncPlan::compute(&[], &desired);
        assert_eq!(plan.attach, desired);
        assert!(plan.detach.is_empty());
    }

    #[test]
    fn test_plan_to_empty_detaches_everything() {
        let current = ids(3);
        let plan = SyncPlan::compute(&current, &[]);
        assert!(plan.attach.is_empty());
        assert_eq!(plan.detach, current);
    }

    #[test]
    fn test_plan_only_touches_changes() {
        let v = ids(4);
        let current = vec![v[0], v[1], v[2]];
        let desired = vec![v[1], v[2], v[3]];

        let plan = SyncPlan::compute(&current, &desired);
        assert_eq!(plan.attach, vec![v[3]]);
        assert_eq!(plan.detach, vec![v[0]]);
    }

    #[test]
    fn test_plan_same_set_is_noop() {
        let v = ids(2);
        let plan = SyncPlan::compute(&v, &[v[1], v[0], v[1]]);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_duplicates_in_desired_collapse() {
        let v = ids(1);
        let plan = SyncPlan::compute(&[], &[v[0], v[0], v[0]]);
        assert_eq!(plan.attach, vec![v[0]]);
    }

    #[test]
    fn test_apply_to_reaches_desired_set() {
        let v = ids(5);
        let mut set: HashSet<Uuid> = [v[0], v[1], v[2]].into_iter().collect();
        let current: Vec<Uuid> = set.iter().copied().collect();
        let desired = vec![v[2], v[3], v[4]];

        SyncPlan::compute(&current, &desired).apply_to(&mut set);

        let expected: HashSet<Uuid> = desired.into_iter().collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn test_dedup_ids_keeps_order() {
        let v = ids(3);
        assert_eq!(dedup_ids(&[v[2], v[0], v[2], v[1], v[0]]), vec![v[2], v[0], v[1]]);
    }
}
