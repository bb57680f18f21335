//! In-memory, eventually consistent directory.
//!
//! Writes are committed immediately but only become visible to listings
//! after a configurable number of reads, which mimics the replication lag
//! of hosted identity directories. Faults can be scripted per page or per
//! mutation, and every call is logged so tests can assert on what was sent.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use http::StatusCode;
use tether_core::{Owner, RelatedId, RelationSet};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::{PageCursor, RelatedPage, RelatedRecord, RemoteDirectoryClient};
use crate::error::{DirectoryError, Result, Subject};

const DEFAULT_PAGE_SIZE: usize = 100;

/// A call received by [`InMemoryDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    List { owner: Owner, page: usize },
    Add { owner: Owner, related: RelatedId },
    Remove { owner: Owner, related: RelatedId },
}

impl DirectoryCall {
    /// True for add/remove calls.
    pub const fn is_mutation(&self) -> bool {
        !matches!(self, Self::List { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeChange {
    Add,
    Remove,
}

#[derive(Debug)]
struct PendingWrite {
    owner: Owner,
    change: EdgeChange,
    related: RelatedId,
    reads_remaining: u32,
}

#[derive(Debug, Default)]
struct OwnerEdges {
    /// Authoritative edges, updated synchronously by writes.
    committed: RelationSet,
    /// Edges a listing currently returns.
    visible: RelationSet,
}

impl OwnerEdges {
    fn make_visible(&mut self, change: EdgeChange, related: RelatedId) {
        match change {
            EdgeChange::Add => {
                self.visible.insert(related);
            }
            EdgeChange::Remove => {
                self.visible.remove(&related);
            }
        }
    }
}

#[derive(Debug)]
struct ListFault {
    page: usize,
    error: DirectoryError,
}

#[derive(Debug, Default)]
struct DirectoryState {
    owners: HashMap<Owner, OwnerEdges>,
    pending: Vec<PendingWrite>,
    list_faults: VecDeque<ListFault>,
    list_outage: Option<DirectoryError>,
    mutation_faults: VecDeque<DirectoryError>,
    calls: Vec<DirectoryCall>,
}

impl DirectoryState {
    /// Called at the start of every full read of `owner`.
    ///
    /// Writes that have waited out their lag become visible, the rest move
    /// one read closer.
    fn advance_visibility(&mut self, owner: &Owner) {
        let mut matured = Vec::new();
        self.pending.retain_mut(|write| {
            if &write.owner != owner {
                return true;
            }
            if write.reads_remaining == 0 {
                matured.push((write.change, write.related.clone()));
                return false;
            }
            write.reads_remaining = write.reads_remaining.saturating_sub(1);
            true
        });

        if let Some(edges) = self.owners.get_mut(owner) {
            for (change, related) in matured {
                edges.make_visible(change, related);
            }
        }
    }

    fn record_write(&mut self, owner: &Owner, change: EdgeChange, related: &RelatedId, lag: u32) {
        if lag == 0 {
            if let Some(edges) = self.owners.get_mut(owner) {
                edges.make_visible(change, related.clone());
            }
            return;
        }
        self.pending.push(PendingWrite {
            owner: owner.clone(),
            change,
            related: related.clone(),
            reads_remaining: lag,
        });
    }

    fn take_list_fault(&mut self, page: usize) -> Option<DirectoryError> {
        if let Some(error) = &self.list_outage {
            return Some(error.clone());
        }
        if self.list_faults.front().is_some_and(|fault| fault.page == page) {
            return self.list_faults.pop_front().map(|fault| fault.error);
        }
        None
    }
}

/// Eventually consistent in-memory directory for tests and simulation.
#[derive(Debug)]
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
    page_size: usize,
    visibility_lag: u32,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    /// Create a directory with immediate visibility and 100-entry pages.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DirectoryState::default()),
            page_size: DEFAULT_PAGE_SIZE,
            visibility_lag: 0,
        }
    }

    /// Set how many entries a listing page holds (minimum 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set how many full reads miss a write before it becomes visible.
    #[must_use]
    pub const fn with_visibility_lag(mut self, reads: u32) -> Self {
        self.visibility_lag = reads;
        self
    }

    /// Register an owner with no edges.
    pub async fn create_owner(&self, owner: &Owner) {
        self.state
            .lock()
            .await
            .owners
            .entry(owner.clone())
            .or_default();
    }

    /// Register an owner whose edges are already committed and visible.
    pub async fn seed(&self, owner: &Owner, related: &RelationSet) {
        let mut state = self.state.lock().await;
        let edges = state.owners.entry(owner.clone()).or_default();
        edges.committed.extend(related.iter().cloned());
        edges.visible.extend(related.iter().cloned());
    }

    /// Delete an owner upstream, dropping its edges and pending writes.
    pub async fn delete_owner(&self, owner: &Owner) {
        let mut state = self.state.lock().await;
        state.owners.remove(owner);
        state.pending.retain(|write| &write.owner != owner);
    }

    /// Fail the next listing request for page `page` (0-based) with `error`.
    ///
    /// Faults are consumed in the order they were queued.
    pub async fn fail_list_page(&self, page: usize, error: DirectoryError) {
        self.state
            .lock()
            .await
            .list_faults
            .push_back(ListFault { page, error });
    }

    /// Fail every listing request with `error` until cleared with `None`.
    pub async fn set_list_outage(&self, error: Option<DirectoryError>) {
        self.state.lock().await.list_outage = error;
    }

    /// Fail the next add or remove request with `error`.
    pub async fn fail_next_mutation(&self, error: DirectoryError) {
        self.state.lock().await.mutation_faults.push_back(error);
    }

    /// Authoritative edges for `owner`, `None` if the owner does not exist.
    pub async fn committed(&self, owner: &Owner) -> Option<RelationSet> {
        self.state
            .lock()
            .await
            .owners
            .get(owner)
            .map(|edges| edges.committed.clone())
    }

    /// Edges a listing would currently return for `owner`.
    pub async fn visible(&self, owner: &Owner) -> Option<RelationSet> {
        self.state
            .lock()
            .await
            .owners
            .get(owner)
            .map(|edges| edges.visible.clone())
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<DirectoryCall> {
        self.state.lock().await.calls.clone()
    }

    /// Add and remove calls received so far, in order.
    pub async fn mutations(&self) -> Vec<DirectoryCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Number of first-page listing requests (one per full read).
    pub async fn reads(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| matches!(call, DirectoryCall::List { page: 0, .. }))
            .count()
    }

    fn parse_cursor(cursor: Option<&PageCursor>) -> Result<usize> {
        cursor.map_or(Ok(0), |cursor| {
            cursor.as_str().parse::<usize>().map_err(|_| {
                DirectoryError::status(
                    StatusCode::BAD_REQUEST,
                    Subject::Unknown,
                    format!("malformed page cursor '{cursor}'"),
                )
            })
        })
    }
}

#[async_trait]
impl RemoteDirectoryClient for InMemoryDirectory {
    async fn list_page(&self, owner: &Owner, cursor: Option<&PageCursor>) -> Result<RelatedPage> {
        let offset = Self::parse_cursor(cursor)?;
        let page = offset / self.page_size;

        let mut state = self.state.lock().await;
        state.calls.push(DirectoryCall::List {
            owner: owner.clone(),
            page,
        });

        if let Some(error) = state.take_list_fault(page) {
            return Err(error);
        }
        if !state.owners.contains_key(owner) {
            return Err(DirectoryError::owner_not_found(owner));
        }
        if cursor.is_none() {
            state.advance_visibility(owner);
        }

        let visible = state
            .owners
            .get(owner)
            .map(|edges| edges.visible.clone())
            .unwrap_or_default();

        let records: Vec<RelatedRecord> = visible
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .map(RelatedRecord::new)
            .collect();

        let end = offset.saturating_add(records.len());
        let next = (end < visible.len()).then(|| PageCursor::new(end.to_string()));

        Ok(RelatedPage { records, next })
    }

    async fn add_related(&self, owner: &Owner, related: &RelatedId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(DirectoryCall::Add {
            owner: owner.clone(),
            related: related.clone(),
        });

        if let Some(error) = state.mutation_faults.pop_front() {
            return Err(error);
        }
        let edges = state
            .owners
            .get_mut(owner)
            .ok_or_else(|| DirectoryError::owner_not_found(owner))?;
        if !edges.committed.insert(related.clone()) {
            return Err(DirectoryError::already_exists(related));
        }

        state.record_write(owner, EdgeChange::Add, related, self.visibility_lag);
        debug!(owner = %owner, related = %related, "Edge added");
        Ok(())
    }

    async fn remove_related(&self, owner: &Owner, related: &RelatedId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(DirectoryCall::Remove {
            owner: owner.clone(),
            related: related.clone(),
        });

        if let Some(error) = state.mutation_faults.pop_front() {
            return Err(error);
        }
        let edges = state
            .owners
            .get_mut(owner)
            .ok_or_else(|| DirectoryError::owner_not_found(owner))?;
        if !edges.committed.remove(related) {
            return Err(DirectoryError::related_not_found(related));
        }

        state.record_write(owner, EdgeChange::Remove, related, self.visibility_lag);
        debug!(owner = %owner, related = %related, "Edge removed");
        Ok(())
    }
}
