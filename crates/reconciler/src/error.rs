//! Error types for the reconciler crate.

use std::path::Path;

use tether_directory::DirectoryError;
use thiserror::Error;

use crate::cancel::Interruption;
use crate::classify::FailureKind;
use crate::types::MutationOp;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A read failed in a way retrying cannot fix.
    #[error("directory read failed ({kind}): {source}")]
    Remote {
        kind: FailureKind,
        #[source]
        source: DirectoryError,
    },

    /// An add or remove failed permanently, or kept failing transiently
    /// until its retries ran out.
    #[error("{op} failed after {attempts} attempt(s) ({kind}): {source}")]
    MutationFailed {
        op: MutationOp,
        attempts: u32,
        kind: FailureKind,
        #[source]
        source: DirectoryError,
    },

    /// The operation was cancelled or ran out of time before it could act.
    #[error("operation interrupted: {0}")]
    Interrupted(Interruption),

    /// Configuration values are out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Configuration could not be parsed.
    #[error("failed to parse configuration: {reason}")]
    ConfigParse { reason: String },

    /// Configuration file could not be read.
    #[error("failed to read configuration '{path}': {reason}")]
    ConfigRead { path: String, reason: String },
}

impl Error {
    /// Create a remote read error.
    pub const fn remote(kind: FailureKind, source: DirectoryError) -> Self {
        Self::Remote { kind, source }
    }

    /// Create a mutation failure.
    pub const fn mutation_failed(
        op: MutationOp,
        attempts: u32,
        kind: FailureKind,
        source: DirectoryError,
    ) -> Self {
        Self::MutationFailed {
            op,
            attempts,
            kind,
            source,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a config parse error.
    pub fn config_parse(reason: impl Into<String>) -> Self {
        Self::ConfigParse {
            reason: reason.into(),
        }
    }

    /// Create a config read error.
    pub fn config_read(path: &Path, reason: impl Into<String>) -> Self {
        Self::ConfigRead {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    /// The classified directory failure behind this error, if any.
    pub const fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Remote { kind, .. } | Self::MutationFailed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The directory error behind this error, if any.
    pub const fn directory_error(&self) -> Option<&DirectoryError> {
        match self {
            Self::Remote { source, .. } | Self::MutationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
