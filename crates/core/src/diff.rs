//! Set difference between an observed and a desired relation set.

use serde::{Deserialize, Serialize};

use crate::types::RelationSet;

/// The mutations needed to move from an observed set to a desired one.
///
/// `to_add` never overlaps the observed set and `to_remove` is always
/// drawn from it, so applying the diff to the observed set yields exactly
/// the desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDiff {
    /// Members that are desired but not observed.
    pub to_add: RelationSet,
    /// Members that are observed but not desired.
    pub to_remove: RelationSet,
}

impl SetDiff {
    /// True when no mutation is required.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of mutations the diff implies.
    pub fn len(&self) -> usize {
        self.to_add.len().saturating_add(self.to_remove.len())
    }

    /// Compute `(base ∪ to_add) − to_remove`.
    pub fn apply_to(&self, base: &RelationSet) -> RelationSet {
        base.union(&self.to_add).difference(&self.to_remove)
    }
}

/// Compute the diff that moves `observed` to `desired`.
///
/// Pure and total: no I/O, no error cases.
pub fn diff(observed: &RelationSet, desired: &RelationSet) -> SetDiff {
    SetDiff {
        to_add: desired.difference(observed),
        to_remove: observed.difference(desired),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> RelationSet {
        RelationSet::from_ids(ids.iter().copied()).unwrap_or_default()
    }

    #[test]
    fn test_diff_add_and_remove() {
        let d = diff(&set(&["g1", "g2"]), &set(&["g2", "g3"]));
        assert_eq!(d.to_add, set(&["g3"]));
        assert_eq!(d.to_remove, set(&["g1"]));
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn test_diff_identical_sets_is_empty() {
        let d = diff(&set(&["a", "b"]), &set(&["b", "a"]));
        assert!(d.is_empty());
    }

    #[test]
    fn test_diff_from_empty_base() {
        let d = diff(&RelationSet::new(), &set(&["A", "B"]));
        assert_eq!(d.to_add, set(&["A", "B"]));
        assert!(d.to_remove.is_empty());
    }

    #[test]
    fn test_diff_to_empty_desired() {
        let d = diff(&set(&["A"]), &RelationSet::new());
        assert!(d.to_add.is_empty());
        assert_eq!(d.to_remove, set(&["A"]));
    }

    #[test]
    fn test_apply_to_reaches_desired() {
        let observed = set(&["x", "y"]);
        let desired = set(&["y", "z"]);
        assert_eq!(diff(&observed, &desired).apply_to(&observed), desired);
    }
}
