//! Remote directory contract for tether.
//!
//! The reconciler talks to a directory that stores owner → related
//! membership edges. The directory is eventually consistent: writes are
//! accepted synchronously but reads may lag behind them.
//!
//! - [`RemoteDirectoryClient`]: the async client trait
//! - [`paging`]: lazy page stream and a drain that never yields partial sets
//! - [`DirectoryError`]: structured, status-like failures
//! - [`InMemoryDirectory`]: a lagging in-memory directory for tests and simulation

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod client;
pub mod error;
pub mod memory;
pub mod paging;

pub use client::{PageCursor, RelatedPage, RelatedRecord, RemoteDirectoryClient};
pub use error::{DirectoryError, Result, Subject};
pub use memory::{DirectoryCall, InMemoryDirectory};
pub use paging::{drain_related, related_pages};

pub use http::StatusCode;
