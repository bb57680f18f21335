//! CLI command handlers.
//!
//! `simulate` and `dissolve` run the real controller against an
//! [`InMemoryDirectory`], so the reconciliation behaviour (lag, polling,
//! cancellation) can be watched without a live directory.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tether_core::{Owner, RelationSet, SetDiff, diff};
use tether_directory::InMemoryDirectory;
use tether_reconciler::{
    CancelHandle, MutationReport, OperationContext, ReconcilerConfig, ReconciliationController,
    ReconciliationOutcome, ReconciliationResult, TokioClock,
};
use tracing::{info, warn};

use crate::cli::Commands;

/// Exit status for a run that timed out before convergence.
pub const EXIT_TIMED_OUT: u8 = 2;

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Diff {
            observed,
            desired,
            json,
        } => cmd_diff(&observed, &desired, json),

        Commands::Simulate {
            owner,
            desired,
            previous,
            existing,
            lag_reads,
            page_size,
            timeout_ms,
            config,
        } => {
            let simulation = Simulation::parse(
                &owner,
                &desired,
                previous.as_deref(),
                &existing,
                lag_reads,
                page_size,
                timeout_ms.map(Duration::from_millis),
            )?;
            let config = load_config(config.as_deref())?;
            cmd_simulate(&simulation, config).await
        }

        Commands::Dissolve {
            owner,
            desired,
            config,
        } => cmd_dissolve(&owner, &desired, load_config(config.as_deref())?).await,

        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

/// Load configuration from `path`, or defaults plus `TETHER_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<ReconcilerConfig> {
    match path {
        Some(path) => ReconcilerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => ReconcilerConfig::from_env().context("Invalid TETHER_* environment override"),
    }
}

/// Parse two comma-separated lists and diff them.
pub fn plan_diff(observed: &str, desired: &str) -> Result<SetDiff> {
    let observed = RelationSet::parse_list(observed).context("Invalid --observed list")?;
    let desired = RelationSet::parse_list(desired).context("Invalid --desired list")?;
    Ok(diff(&observed, &desired))
}

/// `+ id` lines for additions followed by `- id` lines for removals.
pub fn render_diff(plan: &SetDiff) -> String {
    let adds = plan.to_add.iter().map(|id| format!("+ {id}\n"));
    let removes = plan.to_remove.iter().map(|id| format!("- {id}\n"));
    adds.chain(removes).collect()
}

/// Process exit status for a terminal result.
pub const fn exit_status(result: &ReconciliationResult) -> u8 {
    match result {
        ReconciliationResult::Converged(_) => 0,
        ReconciliationResult::Failed(_) => 1,
        ReconciliationResult::TimedOut(_) => EXIT_TIMED_OUT,
    }
}

fn cmd_diff(observed: &str, desired: &str, json: bool) -> Result<ExitCode> {
    let plan = plan_diff(observed, desired)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", render_diff(&plan));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(path)?;
    print!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to render configuration")?
    );
    Ok(ExitCode::SUCCESS)
}

/// Inputs for one simulated establish or reconcile.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub owner: Owner,
    pub desired: RelationSet,
    /// `Some` selects the reconcile path.
    pub previous: Option<RelationSet>,
    pub existing: RelationSet,
    pub lag_reads: u32,
    pub page_size: usize,
    pub timeout: Option<Duration>,
}

impl Simulation {
    /// Build a simulation from raw CLI arguments.
    pub fn parse(
        owner: &str,
        desired: &str,
        previous: Option<&str>,
        existing: &str,
        lag_reads: u32,
        page_size: usize,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            owner: Owner::new(owner).context("Invalid --owner")?,
            desired: RelationSet::parse_list(desired).context("Invalid --desired list")?,
            previous: previous
                .map(RelationSet::parse_list)
                .transpose()
                .context("Invalid --previous list")?,
            existing: RelationSet::parse_list(existing).context("Invalid --existing list")?,
            lag_reads,
            page_size,
            timeout,
        })
    }

    /// Run against a fresh simulated directory, stopping early if `cancel` fires.
    pub async fn run(
        &self,
        config: ReconcilerConfig,
        cancel: &CancelHandle,
    ) -> Result<ReconciliationOutcome> {
        let directory = Arc::new(
            InMemoryDirectory::new()
                .with_visibility_lag(self.lag_reads)
                .with_page_size(self.page_size),
        );
        directory.seed(&self.owner, &self.existing).await;

        let clock = Arc::new(TokioClock);
        let controller = ReconciliationController::builder()
            .with_client(directory)
            .with_clock(clock.clone())
            .with_config(config)
            .build()
            .context("Failed to build reconciliation controller")?;

        let ctx = self
            .timeout
            .map_or_else(OperationContext::new, |timeout| {
                OperationContext::with_timeout(clock.as_ref(), timeout)
            })
            .cancel_on(cancel.signal());

        let outcome = match &self.previous {
            Some(previous) => {
                controller
                    .reconcile(&self.owner, previous, &self.desired, &ctx)
                    .await
            }
            None => controller.establish(&self.owner, &self.desired, &ctx).await,
        };
        Ok(outcome)
    }
}

async fn cmd_simulate(simulation: &Simulation, config: ReconcilerConfig) -> Result<ExitCode> {
    info!(
        owner = %simulation.owner,
        desired = %simulation.desired,
        lag_reads = simulation.lag_reads,
        "Starting simulation"
    );

    let cancel = CancelHandle::new();
    let interrupt = spawn_interrupt_watcher(cancel.clone());
    let outcome = simulation.run(config, &cancel).await;
    interrupt.abort();

    let outcome = outcome?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(ExitCode::from(exit_status(&outcome.result)))
}

async fn cmd_dissolve(owner: &str, desired: &str, config: ReconcilerConfig) -> Result<ExitCode> {
    let owner = Owner::new(owner).context("Invalid --owner")?;
    let desired = RelationSet::parse_list(desired).context("Invalid --desired list")?;

    let directory = Arc::new(InMemoryDirectory::new());
    directory.seed(&owner, &desired).await;
    let controller = ReconciliationController::new(directory, config);

    let report: MutationReport = controller
        .dissolve(&owner, &desired)
        .await
        .context("Dissolve failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

/// Fire `cancel` on Ctrl-C.
fn spawn_interrupt_watcher(cancel: CancelHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling reconciliation");
                cancel.cancel();
            }
            Err(err) => warn!(error = %err, "Failed to listen for Ctrl-C"),
        }
    })
}
