//! Core types for tether.
//!
//! - [`Owner`] and [`RelatedId`]: validated identifiers on either side of a
//!   membership edge
//! - [`RelationSet`]: the desired or observed set of related entities
//! - [`diff`]: the pure set difference that drives every reconciliation

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod diff;
pub mod error;
pub mod types;

pub use diff::{SetDiff, diff};
pub use error::{Error, Result};
pub use types::{Owner, RelatedId, RelationSet};
