//! Command-line interface definitions for the `winlaunch` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `winlaunch` binary.
#[derive(Debug, Parser)]
#[command(
    name = "winlaunch",
    about = "Bootstrap a build agent on a Windows instance over WinRM",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Show the remote paths and commands a launch would use.
    #[command(
        name = "plan",
        about = "Show the remote paths and commands a launch would use"
    )]
    Plan(PlanCommand),
}

/// Arguments for the `winlaunch plan` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct PlanCommand {
    /// Emit the plan as JSON instead of labelled lines.
    #[arg(long)]
    pub(crate) json: bool,
}
