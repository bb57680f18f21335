#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # tether
//!
//! Keeps an owner's membership edges in an eventually consistent directory
//! at a desired state.
//!
//! This library re-exports the tether workspace crates and hosts the CLI.

pub use tether_core;
pub use tether_directory;
pub use tether_reconciler;

pub mod cli;
pub mod commands;
