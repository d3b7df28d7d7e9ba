//! Binary entry point for the winlaunch CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use winlaunch::{BootstrapPlan, Node, NodeConfig};

mod cli;

use cli::{Cli, PlanCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] winlaunch::ConfigError),
    #[error("failed to render plan: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(&cli, io::stdout().lock()) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

/// Installs a stderr subscriber honouring `RUST_LOG`, defaulting to warnings
/// only so stdout carries nothing but command output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

fn dispatch(cli: &Cli, out: impl Write) -> Result<(), CliError> {
    match cli {
        Cli::Plan(command) => {
            let node = NodeConfig::load_without_cli_args()?.to_node()?;
            write_plan(out, &node, command)
        }
    }
}

fn write_plan(mut out: impl Write, node: &Node, command: &PlanCommand) -> Result<(), CliError> {
    let plan = BootstrapPlan::for_node(node);
    tracing::debug!(node = %node.display_name, json = command.json, "rendering bootstrap plan");

    if command.json {
        serde_json::to_writer_pretty(&mut out, &plan)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "node: {}", node.display_name)?;
    writeln!(out, "working directory: {}", plan.working_dir)?;
    writeln!(out, "prepare: {}", plan.ensure_dir_command)?;
    if node.effective_init_script().is_some() {
        writeln!(out, "init script: {}", plan.init_script_path)?;
        writeln!(out, "init command: {}", plan.init_command)?;
        writeln!(out, "init marker: {}", plan.marker_path)?;
    } else {
        writeln!(out, "init script: none")?;
    }
    writeln!(out, "agent upload: {}", plan.agent_path)?;
    writeln!(out, "agent command: {}", plan.agent_command)?;
    writeln!(out, "agent timeout: {}s", plan.agent_timeout_secs)?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
