//! Argument parsing and command dispatch for the `tether` binary.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use clap::Parser;
use tether::cli::{Cli, Commands};
use tether::commands::{execute_command, plan_diff, render_diff};

/// Given a simulate invocation with a previous set
/// When parsing arguments
/// Then every flag lands in the Simulate command
#[test]
fn simulate_arguments_parse() {
    let cli = Cli::try_parse_from([
        "tether",
        "simulate",
        "--owner",
        "user-1",
        "--desired",
        "g2,g3",
        "--previous",
        "g1,g2",
        "--lag-reads",
        "4",
        "--timeout-ms",
        "1500",
        "-v",
    ])
    .expect("valid arguments");

    assert!(cli.verbose);
    match cli.command {
        Commands::Simulate {
            owner,
            desired,
            previous,
            lag_reads,
            page_size,
            timeout_ms,
            config,
            ..
        } => {
            assert_eq!(owner, "user-1");
            assert_eq!(desired, "g2,g3");
            assert_eq!(previous.as_deref(), Some("g1,g2"));
            assert_eq!(lag_reads, 4);
            assert_eq!(page_size, 100);
            assert_eq!(timeout_ms, Some(1500));
            assert!(config.is_none());
        }
        other => panic!("expected simulate, got {other:?}"),
    }
}

/// Given a simulate invocation without an owner
/// When parsing arguments
/// Then clap rejects it
#[test]
fn simulate_requires_owner() {
    assert!(Cli::try_parse_from(["tether", "simulate", "--desired", "a"]).is_err());
}

/// Given observed and desired lists
/// When rendering the diff
/// Then additions are listed before removals
#[test]
fn diff_output_orders_adds_first() {
    let plan = plan_diff("a,b", "b,c").expect("valid lists");
    assert_eq!(render_diff(&plan), "+ c\n- a\n");
}

/// Given a valid diff and a simulate with a blank owner
/// When executing them
/// Then the diff succeeds and the simulate reports an error
#[tokio::test]
async fn execute_reports_invalid_owner() {
    let cli = Cli::try_parse_from(["tether", "diff", "--observed", "a", "--desired", "b"])
        .expect("valid arguments");
    assert!(execute_command(cli.command).await.is_ok());

    let bad = Cli::try_parse_from(["tether", "simulate", "--owner", " ", "--desired", "a"])
        .expect("valid arguments");
    assert!(execute_command(bad.command).await.is_err());
}
