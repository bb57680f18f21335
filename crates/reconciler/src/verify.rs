//! Convergence polling.
//!
//! The directory accepts writes before it shows them. [`ConsistencyVerifier`]
//! re-reads the owner's complete listing on a backoff schedule until the
//! listing satisfies the desired set or the schedule runs out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_core::{Owner, RelationSet};
use tether_directory::{RemoteDirectoryClient, drain_related};
use tracing::{debug, error, info, warn};

use crate::backoff::{BackoffPolicy, BackoffScheduler, WaitOutcome};
use crate::cancel::OperationContext;
use crate::classify::ErrorClassifier;
use crate::clock::Clock;
use crate::error::Error;
use crate::types::{ReconciliationResult, VerifyStats};

/// What an observed set must show for the desired state to count as visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "removed")]
pub enum Match {
    /// Every desired id is observed; extra observed ids are tolerated.
    #[default]
    Superset,
    /// Every desired id is observed and none of the removed ids is.
    /// Edges outside both sets are tolerated.
    Without(RelationSet),
}

impl Match {
    /// `Superset`, or `Without(removed)` when there are removals to confirm.
    pub fn after_removing(removed: &RelationSet) -> Self {
        if removed.is_empty() {
            Self::Superset
        } else {
            Self::Without(removed.clone())
        }
    }

    pub fn is_satisfied(&self, observed: &RelationSet, desired: &RelationSet) -> bool {
        match self {
            Self::Superset => observed.is_superset(desired),
            Self::Without(removed) => {
                observed.is_superset(desired) && observed.intersection(removed).is_empty()
            }
        }
    }
}

/// Polls the directory until it shows the desired state.
pub struct ConsistencyVerifier {
    client: Arc<dyn RemoteDirectoryClient>,
    classifier: Arc<dyn ErrorClassifier>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
}

impl ConsistencyVerifier {
    pub fn new(
        client: Arc<dyn RemoteDirectoryClient>,
        classifier: Arc<dyn ErrorClassifier>,
        clock: Arc<dyn Clock>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            client,
            classifier,
            clock,
            policy,
        }
    }

    /// Poll until `owner`'s listing satisfies `desired` under `mode`.
    ///
    /// Every read drains the full listing before comparing. Transient read
    /// failures count as "not yet converged"; a permanent one ends the run
    /// with [`ReconciliationResult::Failed`]. When the schedule is exhausted,
    /// the deadline passes, or `ctx` is cancelled, the run ends with
    /// [`ReconciliationResult::TimedOut`] carrying the last complete read.
    pub async fn verify(
        &self,
        owner: &Owner,
        desired: &RelationSet,
        mode: &Match,
        ctx: &OperationContext,
    ) -> (ReconciliationResult, VerifyStats) {
        let started = self.clock.now();
        let mut scheduler =
            BackoffScheduler::new(self.policy.clone(), Arc::clone(&self.clock), ctx.clone());
        let mut stats = VerifyStats::default();
        let mut last_observed = RelationSet::new();

        let result = loop {
            let read = ctx
                .run(
                    self.clock.as_ref(),
                    drain_related(self.client.as_ref(), owner),
                )
                .await;

            let retry_hint = match read {
                Err(interruption) => {
                    info!(owner = %owner, polls = stats.polls, %interruption, "Verification interrupted");
                    break ReconciliationResult::TimedOut(last_observed);
                }
                Ok(Ok(observed)) => {
                    stats.polls = stats.polls.saturating_add(1);
                    if mode.is_satisfied(&observed, desired) {
                        debug!(owner = %owner, polls = stats.polls, "Desired state visible");
                        break ReconciliationResult::Converged(observed);
                    }
                    debug!(
                        owner = %owner,
                        missing = %desired.difference(&observed),
                        unexpected = %observed.difference(desired),
                        "Not yet converged"
                    );
                    last_observed = observed;
                    None
                }
                Ok(Err(err)) => {
                    stats.polls = stats.polls.saturating_add(1);
                    let kind = self.classifier.classify(&err);
                    if !kind.is_transient() {
                        error!(owner = %owner, %kind, error = %err, "Verification read failed permanently");
                        break ReconciliationResult::Failed(Error::remote(kind, err));
                    }
                    stats.transient_failures = stats.transient_failures.saturating_add(1);
                    warn!(owner = %owner, %kind, error = %err, "Verification read failed, will re-poll");
                    err.retry_after()
                }
            };

            let Some(delay) = scheduler.next_delay_at_least(retry_hint) else {
                info!(owner = %owner, polls = stats.polls, "Backoff schedule exhausted before convergence");
                break ReconciliationResult::TimedOut(last_observed);
            };
            if scheduler.wait(delay).await == WaitOutcome::Cancelled {
                info!(owner = %owner, polls = stats.polls, "Verification cancelled while waiting");
                break ReconciliationResult::TimedOut(last_observed);
            }
            stats.waits = stats.waits.saturating_add(1);
        };

        let elapsed = self.clock.now().saturating_duration_since(started);
        stats.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        (result, stats)
    }
}

impl std::fmt::Debug for ConsistencyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyVerifier")
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::time::Duration;

    use tether_directory::{DirectoryError, InMemoryDirectory};

    use super::*;
    use crate::classify::{DefaultClassifier, FailureKind};
    use crate::clock::ManualClock;

    fn owner() -> Owner {
        Owner::new("user-1").expect("valid owner")
    }

    fn set(ids: &[&str]) -> RelationSet {
        RelationSet::from_ids(ids.iter().copied()).expect("valid ids")
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1))
            .with_max_total(Duration::from_secs(10))
    }

    fn verifier(directory: &Arc<InMemoryDirectory>, clock: &Arc<ManualClock>) -> ConsistencyVerifier {
        ConsistencyVerifier::new(
            directory.clone(),
            Arc::new(DefaultClassifier),
            clock.clone(),
            policy(),
        )
    }

    #[test]
    fn test_match_modes() {
        let observed = set(&["a", "b", "c"]);
        assert!(Match::Superset.is_satisfied(&observed, &set(&["a", "b"])));
        assert!(Match::Superset.is_satisfied(&RelationSet::new(), &RelationSet::new()));

        let without_c = Match::Without(set(&["c"]));
        assert!(!without_c.is_satisfied(&observed, &set(&["a", "b"])));
        assert!(without_c.is_satisfied(&set(&["a", "b", "unmanaged"]), &set(&["a", "b"])));
        assert!(!without_c.is_satisfied(&set(&["b"]), &set(&["a", "b"])));
    }

    #[test]
    fn test_after_removing_picks_mode() {
        assert_eq!(Match::after_removing(&RelationSet::new()), Match::Superset);
        assert_eq!(
            Match::after_removing(&set(&["g1"])),
            Match::Without(set(&["g1"]))
        );
    }

    /// Given: the directory already shows the desired set
    /// When: verifying
    /// Then: converges on the first read without waiting
    #[tokio::test]
    async fn test_immediate_convergence_takes_no_waits() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.seed(&owner(), &set(&["a", "b", "extra"])).await;
        let clock = Arc::new(ManualClock::new());

        let (result, stats) = verifier(&directory, &clock)
            .verify(&owner(), &set(&["a", "b"]), &Match::Superset, &OperationContext::new())
            .await;

        assert_eq!(result, ReconciliationResult::Converged(set(&["a", "b", "extra"])));
        assert_eq!(stats.polls, 1);
        assert_eq!(stats.waits, 0);
        assert!(clock.sleeps().is_empty());
    }

    /// Given: every read fails with a transient error
    /// When: verifying under a 2s deadline
    /// Then: times out with an empty last-observed set instead of failing
    #[tokio::test]
    async fn test_transient_outage_times_out() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.create_owner(&owner()).await;
        directory
            .set_list_outage(Some(DirectoryError::transport("connection reset")))
            .await;
        let clock = Arc::new(ManualClock::new());
        let ctx = OperationContext::with_timeout(clock.as_ref(), Duration::from_secs(2));

        let (result, stats) = verifier(&directory, &clock)
            .verify(&owner(), &set(&["a"]), &Match::Superset, &ctx)
            .await;

        assert_eq!(result, ReconciliationResult::TimedOut(RelationSet::new()));
        // 100 + 200 + 400 + 800 = 1500ms; the next 1000ms would pass the deadline.
        assert_eq!(stats.waits, 4);
        assert_eq!(stats.transient_failures, 5);
        assert!(clock.elapsed() <= Duration::from_secs(2));
    }

    /// Given: the owner has been deleted upstream
    /// When: verifying
    /// Then: fails immediately with OwnerNotFound
    #[tokio::test]
    async fn test_owner_not_found_fails_without_retry() {
        let directory = Arc::new(InMemoryDirectory::new());
        let clock = Arc::new(ManualClock::new());

        let (result, stats) = verifier(&directory, &clock)
            .verify(&owner(), &set(&["a"]), &Match::Superset, &OperationContext::new())
            .await;

        let kind = result.error().and_then(Error::kind);
        assert_eq!(kind, Some(FailureKind::OwnerNotFound));
        assert_eq!(stats.polls, 1);
        assert!(clock.sleeps().is_empty());
    }

    /// Given: the listing still shows an edge that should be gone
    /// When: verifying that the edge was removed
    /// Then: times out carrying the stale listing
    #[tokio::test]
    async fn test_removed_edge_still_visible_times_out() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.seed(&owner(), &set(&["a", "stale"])).await;
        let clock = Arc::new(ManualClock::new());
        let ctx = OperationContext::with_timeout(clock.as_ref(), Duration::from_millis(500));

        let (result, _) = verifier(&directory, &clock)
            .verify(&owner(), &set(&["a"]), &Match::Without(set(&["stale"])), &ctx)
            .await;

        assert_eq!(result, ReconciliationResult::TimedOut(set(&["a", "stale"])));
    }

    /// Given: the directory throttles the first read with a 3s retry hint
    /// When: verifying
    /// Then: the first wait honours the hint
    #[tokio::test]
    async fn test_rate_limit_hint_stretches_wait() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.seed(&owner(), &set(&["a"])).await;
        directory
            .fail_list_page(0, DirectoryError::rate_limited(Some(Duration::from_secs(3))))
            .await;
        let clock = Arc::new(ManualClock::new());

        let (result, stats) = verifier(&directory, &clock)
            .verify(&owner(), &set(&["a"]), &Match::Superset, &OperationContext::new())
            .await;

        assert!(result.is_converged());
        assert_eq!(stats.transient_failures, 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3)]);
    }
}
