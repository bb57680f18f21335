//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// tether - keep membership edges in a lagging directory at a desired state
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Desired-state reconciliation of membership edges")]
#[command(
    long_about = "tether computes the add/remove mutations that move an owner's membership set to a desired set, applies them, and polls an eventually consistent directory until the change is visible."
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the mutations that move one set to another
    Diff {
        /// Currently observed ids, comma-separated
        #[arg(short, long, default_value = "")]
        observed: String,

        /// Desired ids, comma-separated
        #[arg(short, long, default_value = "")]
        desired: String,

        /// Print JSON instead of +/- lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Establish or reconcile against a simulated lagging directory
    Simulate {
        /// Owner whose edges are managed
        #[arg(long)]
        owner: String,

        /// Desired ids, comma-separated
        #[arg(short, long, default_value = "")]
        desired: String,

        /// Previously desired ids; switches to the reconcile path
        #[arg(short, long)]
        previous: Option<String>,

        /// Edges the owner already has, comma-separated
        #[arg(long, default_value = "")]
        existing: String,

        /// Number of full reads that miss each write
        #[arg(long, default_value_t = 2)]
        lag_reads: u32,

        /// Entries per listing page
        #[arg(long, default_value_t = 100)]
        page_size: usize,

        /// Overall deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Remove every listed edge from a simulated directory
    Dissolve {
        /// Owner whose edges are removed
        #[arg(long)]
        owner: String,

        /// Ids to remove, comma-separated
        #[arg(short, long, default_value = "")]
        desired: String,

        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file (TOML or JSON); defaults plus TETHER_* overrides otherwise
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
