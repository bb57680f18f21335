//! Cancellation and deadlines for a single reconciliation.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::clock::Clock;

/// Why an operation stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interruption {
    /// The caller fired the cancel handle.
    Cancelled,
    /// The caller's deadline passed.
    DeadlineElapsed,
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineElapsed => write!(f, "deadline elapsed"),
        }
    }
}

/// Handle that cancels every [`CancelSignal`] derived from it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancel_tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self { cancel_tx }
    }

    /// Fire the cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// A signal that observes this handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            cancel_rx: self.cancel_tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`CancelHandle`].
///
/// A signal whose handle has been dropped can never fire.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    cancel_rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, cancel_rx) = watch::channel(false);
        Self { cancel_rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolve once the handle fires; pend forever if it never can.
    pub async fn cancelled(&self) {
        let mut cancel_rx = self.cancel_rx.clone();
        let closed = cancel_rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// The deadline and cancellation signal an operation is bound to.
///
/// Both are enforced at every suspension point: before each remote call,
/// while a remote call is in flight, and around each backoff wait.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    deadline: Option<Instant>,
    cancel: CancelSignal,
}

impl OperationContext {
    /// No deadline, never cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from the clock's current time.
    pub fn with_timeout(clock: &dyn Clock, timeout: Duration) -> Self {
        Self::new().deadline_at(clock.now() + timeout)
    }

    #[must_use]
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn cancel_on(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Whether the operation must stop at `now`.
    pub fn interruption(&self, now: Instant) -> Option<Interruption> {
        if self.is_cancelled() {
            return Some(Interruption::Cancelled);
        }
        match self.deadline {
            Some(deadline) if now >= deadline => Some(Interruption::DeadlineElapsed),
            _ => None,
        }
    }

    /// Resolve once the cancel handle fires.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Run `fut` unless the operation is already over, aborting it if
    /// cancellation fires or the deadline passes while it is in flight.
    ///
    /// # Errors
    ///
    /// Returns the [`Interruption`] that stopped the call.
    pub async fn run<F: Future>(
        &self,
        clock: &dyn Clock,
        fut: F,
    ) -> Result<F::Output, Interruption> {
        if let Some(interruption) = self.interruption(clock.now()) {
            return Err(interruption);
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => clock.sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Interruption::Cancelled),
            output = fut => Ok(output),
            () = deadline => Err(Interruption::DeadlineElapsed),
        }
    }
}
