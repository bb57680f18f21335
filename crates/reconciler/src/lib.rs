//! Desired-state reconciliation of membership edges.
//!
//! The remote directory accepts writes immediately but shows them to reads
//! only after an unbounded delay. The reconciler works around that in three
//! steps per operation:
//!
//! 1. **Diff**: compute the additions and removals that take the observed
//!    (or previously desired) set to the desired set
//! 2. **Mutate**: issue them one at a time, retrying transient failures a
//!    fixed number of times
//! 3. **Verify**: re-read the full listing on a capped exponential backoff
//!    until it shows the desired set
//!
//! Every operation ends in exactly one [`ReconciliationResult`]:
//! `Converged`, `TimedOut` (with the last listing seen) or `Failed`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tether_core::{Owner, RelationSet};
//! use tether_directory::InMemoryDirectory;
//! use tether_reconciler::{OperationContext, ReconcilerConfig, ReconciliationController};
//!
//! let directory = Arc::new(InMemoryDirectory::new().with_visibility_lag(2));
//! let controller = ReconciliationController::new(directory, ReconcilerConfig::default());
//!
//! let owner = Owner::new("user-1")?;
//! let desired = RelationSet::parse_list("admins, ops")?;
//! let outcome = controller
//!     .establish(&owner, &desired, &OperationContext::new())
//!     .await;
//! assert!(outcome.result.is_converged());
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod backoff;
pub mod cancel;
pub mod classify;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod types;
pub mod verify;

pub use backoff::{BackoffPolicy, BackoffScheduler, WaitOutcome};
pub use cancel::{CancelHandle, CancelSignal, Interruption, OperationContext};
pub use classify::{DefaultClassifier, Disposition, ErrorClassifier, FailureKind};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::ReconcilerConfig;
pub use controller::{ReconciliationController, ReconciliationControllerBuilder};
pub use error::{Error, Result};
pub use types::{
    MutationOp, MutationReport, ReconciliationOutcome, ReconciliationResult, VerifyStats,
};
pub use verify::{ConsistencyVerifier, Match};
