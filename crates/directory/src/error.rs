//! Error types surfaced by a remote directory.

use std::fmt;
use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tether_core::{Owner, RelatedId};
use thiserror::Error;

/// Result type alias for directory operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Which entity a status response refers to.
///
/// A `404` about the owner means the owner was deleted upstream; a `404`
/// about a related entity on removal means the edge is already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Owner,
    Related,
    Unknown,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Related => write!(f, "related"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A structured failure from a remote directory call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// The directory answered with a non-success status.
    #[error("directory returned {status} ({subject}): {message}")]
    Status {
        status: StatusCode,
        subject: Subject,
        message: String,
        /// Server-provided hint for when to try again.
        retry_after: Option<Duration>,
    },

    /// The request never produced a response (connection reset, DNS, timeout).
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// A listing failed after some pages had already been read.
    ///
    /// The pages read so far must be discarded; the next read starts over.
    #[error("listing failed after {pages_read} page(s): {source}")]
    PartialPage {
        pages_read: usize,
        #[source]
        source: Box<DirectoryError>,
    },
}

impl DirectoryError {
    /// Create a status error.
    pub fn status(status: StatusCode, subject: Subject, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            subject,
            message: message.into(),
            retry_after: None,
        }
    }

    /// The owner does not exist (deleted upstream).
    pub fn owner_not_found(owner: &Owner) -> Self {
        Self::status(
            StatusCode::NOT_FOUND,
            Subject::Owner,
            format!("owner '{owner}' does not exist"),
        )
    }

    /// The edge to a related entity does not exist.
    pub fn related_not_found(related: &RelatedId) -> Self {
        Self::status(
            StatusCode::NOT_FOUND,
            Subject::Related,
            format!("no membership edge to '{related}'"),
        )
    }

    /// The edge to a related entity already exists.
    pub fn already_exists(related: &RelatedId) -> Self {
        Self::status(
            StatusCode::CONFLICT,
            Subject::Related,
            format!("membership edge to '{related}' already exists"),
        )
    }

    /// The directory is throttling the caller.
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            subject: Subject::Unknown,
            message: "request throttled".to_string(),
            retry_after,
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Wrap a failure that interrupted a multi-page listing.
    pub fn partial_page(pages_read: usize, source: Self) -> Self {
        Self::PartialPage {
            pages_read,
            source: Box::new(source),
        }
    }

    /// The HTTP-style status, if the directory answered at all.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } => None,
            Self::PartialPage { source, .. } => source.status_code(),
        }
    }

    /// The server's retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            Self::Transport { .. } => None,
            Self::PartialPage { source, .. } => source.retry_after(),
        }
    }

    /// True for a `409` about the related entity: the edge is already there.
    pub fn is_duplicate_edge(&self) -> bool {
        matches!(
            self,
            Self::Status { status, subject: Subject::Related, .. } if *status == StatusCode::CONFLICT
        )
    }

    /// True for a `404` about the related entity: the edge is already gone.
    pub fn is_missing_edge(&self) -> bool {
        matches!(
            self,
            Self::Status { status, subject: Subject::Related, .. } if *status == StatusCode::NOT_FOUND
        )
    }
}
