//! The remote directory contract consumed by the reconciler.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_core::{Owner, RelatedId};

use crate::error::Result;

/// Opaque continuation token handed back by a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One related entity as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedRecord {
    pub id: RelatedId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl RelatedRecord {
    pub fn new(id: RelatedId) -> Self {
        Self {
            id,
            display_name: None,
        }
    }
}

/// A single page of a relationship listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelatedPage {
    pub records: Vec<RelatedRecord>,
    /// Cursor for the next page, `None` on the last page.
    pub next: Option<PageCursor>,
}

/// Client for a directory that stores owner → related membership edges.
///
/// Writes are accepted synchronously but may not be visible to reads for
/// an unbounded delay. Implementations must be safe to share between
/// concurrent reconciliations of different owners.
#[async_trait]
pub trait RemoteDirectoryClient: Send + Sync {
    /// Fetch one page of the owner's related entities.
    ///
    /// `cursor` is `None` for the first page.
    async fn list_page(&self, owner: &Owner, cursor: Option<&PageCursor>) -> Result<RelatedPage>;

    /// Create the edge `owner → related`.
    async fn add_related(&self, owner: &Owner, related: &RelatedId) -> Result<()>;

    /// Delete the edge `owner → related`.
    async fn remove_related(&self, owner: &Owner, related: &RelatedId) -> Result<()>;
}
