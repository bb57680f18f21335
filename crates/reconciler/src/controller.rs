//! The reconciliation controller.
//!
//! Each operation diffs, mutates, then verifies, and always ends in exactly
//! one [`ReconciliationResult`]. Mutations are issued one at a time in a
//! fixed order (additions before removals), and every mutation finishes
//! before verification polling starts.

use std::sync::Arc;

use chrono::Utc;
use tether_core::{Owner, RelationSet, diff};
use tether_directory::{DirectoryError, RemoteDirectoryClient, drain_related};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::cancel::{Interruption, OperationContext};
use crate::classify::{DefaultClassifier, ErrorClassifier};
use crate::clock::{Clock, TokioClock};
use crate::config::ReconcilerConfig;
use crate::error::{Error, Result};
use crate::types::{
    MutationOp, MutationReport, ReconciliationOutcome, ReconciliationResult, VerifyStats,
};
use crate::verify::{ConsistencyVerifier, Match};

/// Drives an owner's relationship set towards a desired set.
///
/// Holds no per-owner state, so one controller can serve concurrent
/// operations on different owners.
pub struct ReconciliationController {
    client: Arc<dyn RemoteDirectoryClient>,
    classifier: Arc<dyn ErrorClassifier>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    verifier: ConsistencyVerifier,
}

/// Bookkeeping for one in-progress operation.
struct Operation {
    id: Ulid,
    name: &'static str,
    owner: Owner,
    started_at: chrono::DateTime<Utc>,
    mutations: MutationReport,
}

impl Operation {
    fn start(name: &'static str, owner: &Owner) -> Self {
        let id = Ulid::new();
        info!(op_id = %id, op = name, owner = %owner, "Reconciliation started");
        Self {
            id,
            name,
            owner: owner.clone(),
            started_at: Utc::now(),
            mutations: MutationReport::new(),
        }
    }

    fn finish(self, result: ReconciliationResult, verification: VerifyStats) -> ReconciliationOutcome {
        match &result {
            ReconciliationResult::Converged(observed) => info!(
                op_id = %self.id,
                op = self.name,
                owner = %self.owner,
                observed = %observed,
                mutations = self.mutations.issued(),
                polls = verification.polls,
                "Reconciliation converged"
            ),
            ReconciliationResult::TimedOut(observed) => warn!(
                op_id = %self.id,
                op = self.name,
                owner = %self.owner,
                last_observed = %observed,
                polls = verification.polls,
                elapsed_ms = verification.elapsed_ms,
                "Reconciliation timed out before convergence"
            ),
            ReconciliationResult::Failed(err) => error!(
                op_id = %self.id,
                op = self.name,
                owner = %self.owner,
                error = %err,
                "Reconciliation failed"
            ),
        }

        ReconciliationOutcome {
            operation_id: self.id,
            owner: self.owner,
            result,
            mutations: self.mutations,
            verification,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl ReconciliationController {
    /// Create a controller with the default classifier and the tokio clock.
    ///
    /// Use [`ReconciliationControllerBuilder`] to validate the configuration
    /// or to inject a classifier or clock.
    pub fn new(client: Arc<dyn RemoteDirectoryClient>, config: ReconcilerConfig) -> Self {
        Self::from_parts(client, Arc::new(DefaultClassifier), Arc::new(TokioClock), config)
    }

    fn from_parts(
        client: Arc<dyn RemoteDirectoryClient>,
        classifier: Arc<dyn ErrorClassifier>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        let verifier = ConsistencyVerifier::new(
            Arc::clone(&client),
            Arc::clone(&classifier),
            Arc::clone(&clock),
            config.backoff.clone(),
        );
        Self {
            client,
            classifier,
            clock,
            config,
            verifier,
        }
    }

    pub fn builder() -> ReconciliationControllerBuilder {
        ReconciliationControllerBuilder::new()
    }

    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Make `desired` visible for `owner`, reading the current edges first.
    ///
    /// Only additions are issued; edges outside `desired` are left alone and
    /// tolerated by verification. A transient failure of the initial read
    /// falls back to an empty base, since re-adding an existing edge is
    /// harmless.
    pub async fn establish(
        &self,
        owner: &Owner,
        desired: &RelationSet,
        ctx: &OperationContext,
    ) -> ReconciliationOutcome {
        let op = Operation::start("establish", owner);

        let base = match self.read_base(owner, ctx).await {
            Ok(base) => base,
            Err(err) => return op.finish(ReconciliationResult::Failed(err), VerifyStats::default()),
        };

        let plan = diff(&base, desired);
        debug!(op_id = %op.id, to_add = %plan.to_add, "Establish plan");
        let ops = plan.to_add.into_iter().map(MutationOp::Add).collect();

        self.mutate_then_verify(op, ops, desired, &Match::Superset, ctx)
            .await
    }

    /// Like [`establish`](Self::establish), for a relationship being
    /// created from nothing: skips the initial read and adds every id.
    pub async fn establish_fresh(
        &self,
        owner: &Owner,
        desired: &RelationSet,
        ctx: &OperationContext,
    ) -> ReconciliationOutcome {
        let op = Operation::start("establish_fresh", owner);
        let ops = desired.iter().cloned().map(MutationOp::Add).collect();

        self.mutate_then_verify(op, ops, desired, &Match::Superset, ctx)
            .await
    }

    /// Move `owner` from `previous` to `new` without reading first.
    ///
    /// Additions are issued before removals. Verification requires every id
    /// in `new` to be listed and, when anything was removed, none of the
    /// removed ids. Edges this relationship never managed are tolerated.
    pub async fn reconcile(
        &self,
        owner: &Owner,
        previous: &RelationSet,
        new: &RelationSet,
        ctx: &OperationContext,
    ) -> ReconciliationOutcome {
        let op = Operation::start("reconcile", owner);

        let plan = diff(previous, new);
        debug!(
            op_id = %op.id,
            to_add = %plan.to_add,
            to_remove = %plan.to_remove,
            "Reconcile plan"
        );
        let mode = Match::after_removing(&plan.to_remove);
        let ops = plan
            .to_add
            .into_iter()
            .map(MutationOp::Add)
            .chain(plan.to_remove.into_iter().map(MutationOp::Remove))
            .collect();

        self.mutate_then_verify(op, ops, new, &mode, ctx).await
    }

    /// Remove every edge in `desired`. Absence is not re-verified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MutationFailed`] for the first removal that fails
    /// permanently or runs out of retries.
    pub async fn dissolve(&self, owner: &Owner, desired: &RelationSet) -> Result<MutationReport> {
        self.dissolve_within(owner, desired, &OperationContext::new())
            .await
    }

    /// [`dissolve`](Self::dissolve) bound to a deadline and cancel signal.
    ///
    /// # Errors
    ///
    /// As [`dissolve`](Self::dissolve), plus [`Error::Interrupted`] when
    /// `ctx` stops the operation before or during a removal.
    pub async fn dissolve_within(
        &self,
        owner: &Owner,
        desired: &RelationSet,
        ctx: &OperationContext,
    ) -> Result<MutationReport> {
        let op_id = Ulid::new();
        info!(%op_id, op = "dissolve", owner = %owner, edges = desired.len(), "Dissolve started");

        let mut report = MutationReport::new();
        let ops = desired.iter().cloned().map(MutationOp::Remove).collect();
        match self.apply_mutations(owner, ops, &mut report, ctx).await {
            Ok(()) => {
                info!(%op_id, owner = %owner, removed = report.issued(), "Dissolve complete");
                Ok(report)
            }
            Err(err) => {
                error!(%op_id, owner = %owner, error = %err, "Dissolve failed");
                Err(err)
            }
        }
    }

    async fn mutate_then_verify(
        &self,
        mut op: Operation,
        ops: Vec<MutationOp>,
        desired: &RelationSet,
        mode: &Match,
        ctx: &OperationContext,
    ) -> ReconciliationOutcome {
        let owner = op.owner.clone();
        let mutated = self
            .apply_mutations(&owner, ops, &mut op.mutations, ctx)
            .await;

        let (result, stats) = match mutated {
            Ok(()) => self.verifier.verify(&owner, desired, mode, ctx).await,
            Err(err) => (ReconciliationResult::Failed(err), VerifyStats::default()),
        };
        op.finish(result, stats)
    }

    /// Read the diff base for establish.
    async fn read_base(&self, owner: &Owner, ctx: &OperationContext) -> Result<RelationSet> {
        let read = ctx
            .run(
                self.clock.as_ref(),
                drain_related(self.client.as_ref(), owner),
            )
            .await
            .map_err(Error::Interrupted)?;

        match read {
            Ok(observed) => Ok(observed),
            Err(err) => {
                let kind = self.classifier.classify(&err);
                if kind.is_transient() {
                    warn!(owner = %owner, %kind, error = %err, "Initial read failed, diffing against an empty base");
                    Ok(RelationSet::new())
                } else {
                    Err(Error::remote(kind, err))
                }
            }
        }
    }

    /// Issue `ops` in order, retrying transient failures.
    ///
    /// A failure the mutation was trying to cause anyway (duplicate on add,
    /// missing edge on remove) counts as success.
    async fn apply_mutations(
        &self,
        owner: &Owner,
        ops: Vec<MutationOp>,
        report: &mut MutationReport,
        ctx: &OperationContext,
    ) -> Result<()> {
        for op in ops {
            let mut attempts: u32 = 0;
            loop {
                attempts = attempts.saturating_add(1);
                let sent = ctx
                    .run(self.clock.as_ref(), self.send(owner, &op))
                    .await
                    .map_err(Error::Interrupted)?;

                let err = match sent {
                    Ok(()) => {
                        debug!(owner = %owner, %op, attempts, "Mutation applied");
                        report.applied.push(op);
                        break;
                    }
                    Err(err) if op.is_satisfied_by(&err) => {
                        debug!(owner = %owner, %op, "Mutation already in effect");
                        report.already_satisfied.push(op);
                        break;
                    }
                    Err(err) => err,
                };

                let kind = self.classifier.classify(&err);
                if !kind.is_transient() || attempts > self.config.mutation_retries {
                    return Err(Error::mutation_failed(op, attempts, kind, err));
                }

                let delay = err
                    .retry_after()
                    .map_or(self.config.mutation_retry_delay, |hint| {
                        hint.max(self.config.mutation_retry_delay)
                    });
                if ctx
                    .remaining(self.clock.now())
                    .is_some_and(|remaining| remaining < delay)
                {
                    return Err(Error::mutation_failed(op, attempts, kind, err));
                }

                warn!(
                    owner = %owner,
                    %op,
                    %kind,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Mutation failed, retrying"
                );
                report.retries = report.retries.saturating_add(1);

                tokio::select! {
                    biased;
                    () = ctx.cancelled() => return Err(Error::Interrupted(Interruption::Cancelled)),
                    () = self.clock.sleep(delay) => {}
                }
            }
        }
        Ok(())
    }

    async fn send(&self, owner: &Owner, op: &MutationOp) -> std::result::Result<(), DirectoryError> {
        match op {
            MutationOp::Add(related) => self.client.add_related(owner, related).await,
            MutationOp::Remove(related) => self.client.remove_related(owner, related).await,
        }
    }
}

impl std::fmt::Debug for ReconciliationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationController")
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ReconciliationController`].
#[derive(Default)]
pub struct ReconciliationControllerBuilder {
    client: Option<Arc<dyn RemoteDirectoryClient>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    clock: Option<Arc<dyn Clock>>,
    config: ReconcilerConfig,
}

impl ReconciliationControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory client. Required.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn RemoteDirectoryClient>) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set the clock used for every wait. Defaults to [`TokioClock`].
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if no client was set or the
    /// configuration fails validation.
    pub fn build(self) -> Result<ReconciliationController> {
        let client = self
            .client
            .ok_or_else(|| Error::invalid_config("a directory client is required"))?;
        self.config.validate()?;

        Ok(ReconciliationController::from_parts(
            client,
            self.classifier
                .unwrap_or_else(|| Arc::new(DefaultClassifier)),
            self.clock.unwrap_or_else(|| Arc::new(TokioClock)),
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::time::Duration;

    use tether_core::RelatedId;
    use tether_directory::InMemoryDirectory;

    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::clock::ManualClock;

    fn owner() -> Owner {
        Owner::new("user-1").expect("valid owner")
    }

    fn id(value: &str) -> RelatedId {
        RelatedId::new(value).expect("valid id")
    }

    fn controller(directory: &Arc<InMemoryDirectory>) -> ReconciliationController {
        ReconciliationController::builder()
            .with_client(directory.clone())
            .with_clock(Arc::new(ManualClock::new()))
            .with_config(
                ReconcilerConfig::default()
                    .with_mutation_retries(2)
                    .with_backoff(BackoffPolicy::quick()),
            )
            .build()
            .expect("valid controller")
    }

    #[test]
    fn test_builder_requires_client() {
        let result = ReconciliationController::builder().build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_validates_config() {
        let config = ReconcilerConfig::default()
            .with_backoff(BackoffPolicy::default().with_base_delay(Duration::ZERO));
        let result = ReconciliationController::builder()
            .with_client(Arc::new(InMemoryDirectory::new()))
            .with_config(config)
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_add_counts_as_applied_state() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .seed(&owner(), &RelationSet::from_iter([id("a")]))
            .await;
        let controller = controller(&directory);

        let desired = RelationSet::from_iter([id("a"), id("b")]);
        let outcome = controller
            .establish_fresh(&owner(), &desired, &OperationContext::new())
            .await;

        assert!(outcome.result.is_converged());
        assert_eq!(outcome.mutations.applied, vec![MutationOp::Add(id("b"))]);
        assert_eq!(outcome.mutations.already_satisfied, vec![MutationOp::Add(id("a"))]);
    }

    #[tokio::test]
    async fn test_removing_missing_edge_is_not_an_error() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.create_owner(&owner()).await;
        let controller = controller(&directory);

        let report = controller
            .dissolve(&owner(), &RelationSet::from_iter([id("gone")]))
            .await
            .expect("dissolve succeeds");

        assert!(report.applied.is_empty());
        assert_eq!(report.already_satisfied, vec![MutationOp::Remove(id("gone"))]);
    }

    #[tokio::test]
    async fn test_cancelled_before_mutation_fails_interrupted() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.create_owner(&owner()).await;
        let controller = controller(&directory);

        let handle = crate::cancel::CancelHandle::new();
        handle.cancel();
        let ctx = OperationContext::new().cancel_on(handle.signal());

        let outcome = controller
            .establish_fresh(&owner(), &RelationSet::from_iter([id("a")]), &ctx)
            .await;

        assert_eq!(
            outcome.result,
            ReconciliationResult::Failed(Error::Interrupted(Interruption::Cancelled))
        );
        assert!(directory.mutations().await.is_empty());
    }

    /// Treats every failure as throttling.
    struct RetryEverything;

    impl ErrorClassifier for RetryEverything {
        fn classify(&self, _error: &DirectoryError) -> crate::classify::FailureKind {
            crate::classify::FailureKind::RateLimited
        }
    }

    #[tokio::test]
    async fn test_injected_classifier_decides_retries() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.create_owner(&owner()).await;
        directory
            .fail_next_mutation(DirectoryError::status(
                tether_directory::StatusCode::INTERNAL_SERVER_ERROR,
                tether_directory::Subject::Unknown,
                "internal error",
            ))
            .await;
        let controller = ReconciliationController::builder()
            .with_client(directory.clone())
            .with_classifier(Arc::new(RetryEverything))
            .with_clock(Arc::new(ManualClock::new()))
            .with_config(ReconcilerConfig::default().with_backoff(BackoffPolicy::quick()))
            .build()
            .expect("valid controller");

        let outcome = controller
            .establish_fresh(&owner(), &RelationSet::from_iter([id("a")]), &OperationContext::new())
            .await;

        assert!(outcome.result.is_converged());
        assert_eq!(outcome.mutations.retries, 1);
    }
}
