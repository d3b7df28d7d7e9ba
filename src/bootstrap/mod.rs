//! Turns a ready session into a running agent channel.
//!
//! The bootstrapper prepares the remote working directory, runs the node's
//! init script at most once per remote filesystem (guarded by a marker
//! file), uploads and starts the agent runtime, and hands the agent's stdio
//! to the channel builder. The session is closed on every failure path; on
//! success it is owned by the channel's [`CloseHook`].

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::artifact::ArtifactSource;
use crate::channel::{ChannelBuilder, CloseHook};
use crate::launch_log::LaunchLog;
use crate::node::Node;
use crate::session::{RemoteProcess, RemoteReader, Session, TransportError};

mod error;
mod plan;

pub use error::{LaunchError, LaunchStage};
pub use plan::{
    AGENT_EXEC_TIMEOUT, BootstrapPlan, INIT_MARKER_CONTENTS, INIT_MARKER_FILE, INIT_SCRIPT_FILE,
};

/// Bootstraps the agent runtime over an already connected session.
#[derive(Debug)]
pub struct Bootstrapper<A, B> {
    artifact: A,
    channels: B,
}

impl<A, B> Bootstrapper<A, B>
where
    A: ArtifactSource,
    B: ChannelBuilder,
{
    /// Creates a bootstrapper uploading `artifact` and wiring channels with
    /// `channels`.
    #[must_use]
    pub const fn new(artifact: A, channels: B) -> Self {
        Self { artifact, channels }
    }

    /// Runs the bootstrap sequence on `session`.
    ///
    /// Ownership of `session` moves into the returned channel's close hook
    /// on success. On any failure the session is closed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::InitScript`] when the init script exits
    /// non-zero, and [`LaunchError`] for any failed upload, remote command,
    /// payload fetch, or channel construction.
    pub async fn launch<S>(
        &self,
        node: &Node,
        session: S,
        log: Arc<dyn LaunchLog>,
    ) -> Result<B::Channel, LaunchError>
    where
        S: Session + 'static,
    {
        let plan = BootstrapPlan::for_node(node);
        let process = match self.prepare(node, &plan, &session, log.as_ref()).await {
            Ok(process) => Arc::<dyn RemoteProcess>::from(process),
            Err(err) => {
                report_failure(node, &err, log.as_ref());
                close_session(&session, log.as_ref()).await;
                return Err(err);
            }
        };

        let hook = CloseHook::new(Arc::clone(&process), Box::new(session), Arc::clone(&log));
        match self.attach(process.as_ref(), hook.clone(), Arc::clone(&log)) {
            Ok(channel) => {
                hook.watch_exit(process);
                log.line(&format!("agent channel established on {}", node.display_name));
                tracing::info!(node = %node.display_name, "agent channel established");
                Ok(channel)
            }
            Err(err) => {
                report_failure(node, &err, log.as_ref());
                hook.fire().await;
                Err(err)
            }
        }
    }

    async fn prepare<S: Session>(
        &self,
        node: &Node,
        plan: &BootstrapPlan,
        session: &S,
        log: &dyn LaunchLog,
    ) -> Result<Box<dyn RemoteProcess>, LaunchError> {
        log.line("Creating tmp directory if it does not exist");
        run_checked(session, &plan.ensure_dir_command, LaunchStage::WorkingDirectory).await?;

        if let Some(script) = node.effective_init_script() {
            let marker_present = session
                .exists(&plan.marker_path)
                .await
                .map_err(LaunchError::transport(LaunchStage::MarkerCheck))?;
            if marker_present {
                log.line("init script already ran on this instance; skipping");
            } else {
                run_init_script(session, plan, script, log).await?;
            }
        }

        let payload = self.artifact.fetch().await?;
        upload(session, &plan.agent_path, &payload)
            .await
            .map_err(LaunchError::transport(LaunchStage::AgentUpload))?;
        log.line(&format!(
            "{} sent remotely. Bootstrapping it",
            node.agent_file_name
        ));

        session
            .exec(&plan.agent_command, Some(plan.agent_timeout()))
            .await
            .map_err(LaunchError::transport(LaunchStage::AgentStart))
    }

    fn attach(
        &self,
        process: &dyn RemoteProcess,
        hook: CloseHook,
        log: Arc<dyn LaunchLog>,
    ) -> Result<B::Channel, LaunchError> {
        let stdout = process
            .take_stdout()
            .ok_or(LaunchError::MissingStream("stdout"))?;
        let stdin = process
            .take_stdin()
            .ok_or(LaunchError::MissingStream("stdin"))?;
        Ok(self.channels.build(stdout, stdin, log, hook)?)
    }
}

async fn run_checked<S: Session>(
    session: &S,
    command: &str,
    stage: LaunchStage,
) -> Result<(), LaunchError> {
    let process = session
        .exec(command, None)
        .await
        .map_err(LaunchError::transport(stage))?;
    let exit_code = process
        .wait_for_exit()
        .await
        .map_err(LaunchError::transport(stage))?;
    if exit_code != 0 {
        return Err(LaunchError::RemoteCommand {
            command: command.to_owned(),
            exit_code,
        });
    }
    Ok(())
}

async fn run_init_script<S: Session>(
    session: &S,
    plan: &BootstrapPlan,
    script: &str,
    log: &dyn LaunchLog,
) -> Result<(), LaunchError> {
    log.line("Executing init script");
    upload(session, &plan.init_script_path, script.as_bytes())
        .await
        .map_err(LaunchError::transport(LaunchStage::InitUpload))?;

    let process = session
        .exec(&plan.init_command, None)
        .await
        .map_err(LaunchError::transport(LaunchStage::InitRun))?;
    if let Some(stdout) = process.take_stdout() {
        stream_lines(stdout, log)
            .await
            .map_err(LaunchError::transport(LaunchStage::InitRun))?;
    }
    let exit_code = process
        .wait_for_exit()
        .await
        .map_err(LaunchError::transport(LaunchStage::InitRun))?;
    tracing::info!(exit_code, "init script finished");

    if exit_code != 0 {
        // The marker stays absent so the next launch retries initialization.
        log.line(&format!("init script failed: exit code={exit_code}"));
        return Err(LaunchError::InitScript { exit_code });
    }

    upload(session, &plan.marker_path, INIT_MARKER_CONTENTS)
        .await
        .map_err(LaunchError::transport(LaunchStage::MarkerWrite))?;
    log.line("init script ran successfully");
    Ok(())
}

async fn upload<S: Session>(session: &S, path: &str, bytes: &[u8]) -> Result<(), TransportError> {
    let mut sink = session.put_file(path).await?;
    sink.write_all(bytes).await?;
    sink.shutdown().await?;
    Ok(())
}

/// Copies `stdout` to the launch log line by line as it arrives.
async fn stream_lines(stdout: RemoteReader, log: &dyn LaunchLog) -> Result<(), TransportError> {
    let mut reader = BufReader::new(stdout);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buffer);
        log.line(line.trim_end_matches(['\r', '\n']));
    }
}

fn report_failure(node: &Node, err: &LaunchError, log: &dyn LaunchLog) {
    log.line(&format!("launch of {} failed: {err}", node.display_name));
    tracing::warn!(node = %node.display_name, error = %err, "bootstrap failed");
}

async fn close_session<S: Session>(session: &S, log: &dyn LaunchLog) {
    if let Err(err) = session.close().await {
        log.line(&format!("failed to close WinRM session: {err}"));
    }
}
