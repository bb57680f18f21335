//! Core types for the reconciler.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tether_core::{Owner, RelatedId, RelationSet};
use tether_directory::DirectoryError;
use ulid::Ulid;

use crate::classify::FailureKind;
use crate::error::Error;

/// A single edge mutation issued against the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", content = "related", rename_all = "snake_case")]
pub enum MutationOp {
    Add(RelatedId),
    Remove(RelatedId),
}

impl MutationOp {
    pub const fn related(&self) -> &RelatedId {
        match self {
            Self::Add(related) | Self::Remove(related) => related,
        }
    }

    /// Whether `error` means the edge is already in the state this
    /// mutation wanted: a duplicate on add, a missing edge on remove.
    pub fn is_satisfied_by(&self, error: &DirectoryError) -> bool {
        match self {
            Self::Add(_) => error.is_duplicate_edge(),
            Self::Remove(_) => error.is_missing_edge(),
        }
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(related) => write!(f, "add {related}"),
            Self::Remove(related) => write!(f, "remove {related}"),
        }
    }
}

/// What the mutation phase did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    /// Mutations the directory accepted, in issue order.
    pub applied: Vec<MutationOp>,
    /// Mutations the directory reported as already in effect.
    pub already_satisfied: Vec<MutationOp>,
    /// Transient failures that were retried.
    pub retries: u32,
}

impl MutationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutation issued, whether applied or already in effect, in
    /// the order they were issued.
    pub fn issued(&self) -> usize {
        self.applied.len().saturating_add(self.already_satisfied.len())
    }

    pub fn is_empty(&self) -> bool {
        self.issued() == 0
    }
}

/// Statistics from a verification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyStats {
    /// Complete or failed reads of the owner's listing.
    pub polls: u32,
    /// Backoff waits taken between polls.
    pub waits: u32,
    /// Reads that failed with a transient error.
    pub transient_failures: u32,
    /// Time spent verifying, in milliseconds.
    pub elapsed_ms: u64,
}

/// Terminal outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationResult {
    /// The directory shows the desired state.
    Converged(RelationSet),
    /// The desired state was never confirmed in time; carries the last
    /// complete read (empty if no read ever succeeded).
    TimedOut(RelationSet),
    /// The operation aborted.
    Failed(Error),
}

impl ReconciliationResult {
    pub const fn is_converged(&self) -> bool {
        matches!(self, Self::Converged(_))
    }

    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The last observed set, if the operation got that far.
    pub const fn observed(&self) -> Option<&RelationSet> {
        match self {
            Self::Converged(observed) | Self::TimedOut(observed) => Some(observed),
            Self::Failed(_) => None,
        }
    }

    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged(observed) => write!(f, "converged {observed}"),
            Self::TimedOut(observed) => write!(f, "timed out, last observed {observed}"),
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ResultView<'a> {
    Converged {
        observed: &'a RelationSet,
    },
    TimedOut {
        observed: &'a RelationSet,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<FailureKind>,
        error: String,
    },
}

impl Serialize for ReconciliationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let view = match self {
            Self::Converged(observed) => ResultView::Converged { observed },
            Self::TimedOut(observed) => ResultView::TimedOut { observed },
            Self::Failed(err) => ResultView::Failed {
                kind: err.kind(),
                error: err.to_string(),
            },
        };
        view.serialize(serializer)
    }
}

/// A [`ReconciliationResult`] with the record of how it was reached.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationOutcome {
    pub operation_id: Ulid,
    pub owner: Owner,
    pub result: ReconciliationResult,
    pub mutations: MutationReport,
    pub verification: VerifyStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use tether_core::RelatedId;

    use super::*;
    use crate::cancel::Interruption;

    fn id(value: &str) -> RelatedId {
        RelatedId::new(value).expect("valid id")
    }

    #[test]
    fn test_add_is_satisfied_by_duplicate_only() {
        let add = MutationOp::Add(id("g1"));
        assert!(add.is_satisfied_by(&DirectoryError::already_exists(&id("g1"))));
        assert!(!add.is_satisfied_by(&DirectoryError::related_not_found(&id("g1"))));
    }

    #[test]
    fn test_remove_is_satisfied_by_missing_edge_only() {
        let remove = MutationOp::Remove(id("g1"));
        assert!(remove.is_satisfied_by(&DirectoryError::related_not_found(&id("g1"))));
        assert!(!remove.is_satisfied_by(&DirectoryError::transport("reset")));

        let owner = Owner::new("user-1").expect("valid owner");
        assert!(!remove.is_satisfied_by(&DirectoryError::owner_not_found(&owner)));
    }

    #[test]
    fn test_mutation_op_serializes_tagged() {
        let json = serde_json::to_value(MutationOp::Remove(id("g9"))).expect("serialize");
        assert_eq!(json["op"], "remove");
        assert_eq!(json["related"], "g9");
    }

    #[test]
    fn test_result_serializes_with_status() {
        let observed: RelationSet = [id("a"), id("b")].into_iter().collect();
        let converged =
            serde_json::to_value(ReconciliationResult::Converged(observed)).expect("serialize");
        assert_eq!(converged["status"], "converged");
        assert_eq!(converged["observed"], serde_json::json!(["a", "b"]));

        let failed = serde_json::to_value(ReconciliationResult::Failed(Error::Interrupted(
            Interruption::DeadlineElapsed,
        )))
        .expect("serialize");
        assert_eq!(failed["status"], "failed");
        assert!(failed.get("kind").is_none());
        assert_eq!(failed["error"], "operation interrupted: deadline elapsed");
    }

    #[test]
    fn test_result_accessors() {
        let timed_out = ReconciliationResult::TimedOut(RelationSet::new());
        assert!(timed_out.is_timed_out());
        assert_eq!(timed_out.observed(), Some(&RelationSet::new()));
        assert!(timed_out.error().is_none());
    }
}
