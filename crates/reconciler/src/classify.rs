//! Classification of directory failures into retryable and fatal.

use std::fmt;

use serde::{Deserialize, Serialize};
use tether_directory::{DirectoryError, Subject};

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Retrying cannot help; abort the operation.
    Permanent,
    /// The condition may clear on its own; retry or keep polling.
    Transient,
}

/// What went wrong, as far as the reconciler cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The owner was deleted upstream.
    OwnerNotFound,
    /// The directory is throttling us.
    RateLimited,
    /// Network-level or gateway failure.
    TransientIo,
    /// A listing failed part-way; the next read starts over.
    PartialPage,
    /// Anything not explicitly recognised.
    Unclassified,
}

impl FailureKind {
    pub const fn disposition(self) -> Disposition {
        match self {
            Self::RateLimited | Self::TransientIo | Self::PartialPage => Disposition::Transient,
            Self::OwnerNotFound | Self::Unclassified => Disposition::Permanent,
        }
    }

    pub const fn is_transient(self) -> bool {
        matches!(self.disposition(), Disposition::Transient)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OwnerNotFound => write!(f, "owner not found"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::TransientIo => write!(f, "transient I/O"),
            Self::PartialPage => write!(f, "partial page"),
            Self::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// Maps directory failures onto [`FailureKind`].
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &DirectoryError) -> FailureKind;
}

/// The stock classification policy.
///
/// Unknown conditions fail closed: anything not recognised is
/// [`FailureKind::Unclassified`] and therefore permanent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &DirectoryError) -> FailureKind {
        match error {
            DirectoryError::Status {
                status, subject, ..
            } => match (status.as_u16(), subject) {
                (404, Subject::Owner) => FailureKind::OwnerNotFound,
                (429, _) => FailureKind::RateLimited,
                (408 | 502 | 503 | 504, _) => FailureKind::TransientIo,
                _ => FailureKind::Unclassified,
            },
            DirectoryError::Transport { .. } => FailureKind::TransientIo,
            // A page failure keeps its underlying verdict when that verdict is fatal.
            DirectoryError::PartialPage { source, .. } => match self.classify(source) {
                kind if kind.is_transient() => FailureKind::PartialPage,
                kind => kind,
            },
        }
    }
}
