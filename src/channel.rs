//! Hand-off of the agent's stdio to the persistent channel.
//!
//! The channel implementation is supplied by the caller through
//! [`ChannelBuilder`]. This module owns the part the bootstrapper must
//! guarantee: a single-shot [`CloseHook`] that releases the remote process
//! and its session together, whichever side closes first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::launch_log::LaunchLog;
use crate::session::{RemoteProcess, RemoteReader, RemoteWriter, Session};

/// Errors raised while constructing a channel.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ChannelError {
    /// Raised when the channel implementation rejects the streams.
    #[error("channel construction failed: {0}")]
    Build(String),
}

/// Constructs the persistent channel from the agent's stdio.
pub trait ChannelBuilder: Send + Sync {
    /// Channel type produced by the builder.
    type Channel: Send;

    /// Builds a channel reading from `stdout` and writing to `stdin`.
    ///
    /// The implementation must call [`CloseHook::fire`] once the channel
    /// closes, for whatever reason.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the channel cannot be constructed.
    fn build(
        &self,
        stdout: RemoteReader,
        stdin: RemoteWriter,
        log: Arc<dyn LaunchLog>,
        on_close: CloseHook,
    ) -> Result<Self::Channel, ChannelError>;
}

struct Resources {
    process: Arc<dyn RemoteProcess>,
    session: Box<dyn Session>,
}

struct HookInner {
    fired: AtomicBool,
    resources: Mutex<Option<Resources>>,
    log: Arc<dyn LaunchLog>,
}

/// Single-shot close handler owning the agent process and its session.
///
/// Clones share state. The first [`CloseHook::fire`] terminates the process
/// and then closes the session; every later call is a no-op.
#[derive(Clone)]
pub struct CloseHook {
    inner: Arc<HookInner>,
}

impl std::fmt::Debug for CloseHook {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CloseHook")
            .field("fired", &self.has_fired())
            .finish_non_exhaustive()
    }
}

impl CloseHook {
    /// Takes ownership of `process` and `session`.
    #[must_use]
    pub fn new(
        process: Arc<dyn RemoteProcess>,
        session: Box<dyn Session>,
        log: Arc<dyn LaunchLog>,
    ) -> Self {
        Self {
            inner: Arc::new(HookInner {
                fired: AtomicBool::new(false),
                resources: Mutex::new(Some(Resources { process, session })),
                log,
            }),
        }
    }

    /// Returns `true` once the hook has fired.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Releases the process and session. Returns `true` when this call did
    /// the work and `false` when the hook had already fired.
    pub async fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        let Some(Resources { process, session }) = self.inner.resources.lock().await.take() else {
            return false;
        };

        if let Err(err) = process.terminate().await {
            self.inner
                .log
                .line(&format!("failed to terminate agent process: {err}"));
            tracing::warn!(error = %err, "agent terminate failed");
        }
        if let Err(err) = session.close().await {
            self.inner
                .log
                .line(&format!("failed to close WinRM session: {err}"));
            tracing::warn!(error = %err, "session close failed");
        }
        self.inner.log.line("agent channel closed");
        true
    }

    /// Spawns a task that fires the hook when `process` exits.
    ///
    /// A transport error while waiting also fires the hook, terminating an
    /// agent that may still be running: once the exit can no longer be
    /// observed the process state is unknown and the node is released.
    pub fn watch_exit(&self, process: Arc<dyn RemoteProcess>) -> JoinHandle<()> {
        let hook = self.clone();
        tokio::spawn(async move {
            match process.wait_for_exit().await {
                Ok(code) => hook
                    .inner
                    .log
                    .line(&format!("agent process exited with code {code}")),
                Err(err) => hook
                    .inner
                    .log
                    .line(&format!("lost track of agent process: {err}")),
            }
            hook.fire().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeHost, FakeProcess, MemoryLog, ProcessScript};

    fn hook_for(host: &FakeHost) -> (CloseHook, Arc<FakeProcess>) {
        let process = Arc::new(FakeProcess::spawn(&ProcessScript::long_running(), host));
        let log: Arc<dyn LaunchLog> = Arc::new(MemoryLog::new());
        let hook = CloseHook::new(
            Arc::clone(&process) as Arc<dyn RemoteProcess>,
            Box::new(host.session()),
            log,
        );
        (hook, process)
    }

    #[tokio::test]
    async fn fire_runs_once() {
        let host = FakeHost::new();
        let (hook, _process) = hook_for(&host);

        assert!(hook.fire().await);
        assert!(!hook.fire().await);
        assert!(hook.has_fired());
        assert_eq!(host.terminations(), 1);
        assert_eq!(host.closes(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_fire_runs_once() {
        let host = FakeHost::new();
        let (hook, _process) = hook_for(&host);

        let first_hook = hook.clone();
        let second_hook = hook.clone();
        let first = tokio::spawn(async move { first_hook.fire().await });
        let second = tokio::spawn(async move { second_hook.fire().await });
        let fired = [
            first.await.expect("first task"),
            second.await.expect("second task"),
        ];

        assert_eq!(fired.iter().filter(|did_work| **did_work).count(), 1);
        assert_eq!(host.terminations(), 1);
        assert_eq!(host.closes(), 1);
    }

    #[tokio::test]
    async fn process_exit_fires_hook() {
        let host = FakeHost::new();
        let (hook, process) = hook_for(&host);

        let watcher = hook.watch_exit(Arc::clone(&process) as Arc<dyn RemoteProcess>);
        process.finish(0);
        watcher.await.expect("watcher task");

        assert!(hook.has_fired());
        assert_eq!(host.closes(), 1);
        assert!(!hook.fire().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stdout_eof_racing_process_exit_releases_once() {
        let host = FakeHost::new();
        let (hook, process) = hook_for(&host);
        let mut stdout = process.take_stdout().expect("long-running process has stdout");

        let eof_hook = hook.clone();
        let reader = tokio::spawn(async move {
            let mut sink = tokio::io::sink();
            tokio::io::copy(&mut stdout, &mut sink).await.ok();
            eof_hook.fire().await
        });
        let watcher = hook.watch_exit(Arc::clone(&process) as Arc<dyn RemoteProcess>);
        process.finish(0);

        reader.await.expect("reader task");
        watcher.await.expect("watcher task");

        assert_eq!(process.exit_code(), Some(0));
        assert_eq!(host.terminations(), 1);
        assert_eq!(host.closes(), 1);
        assert!(!hook.fire().await);
    }
}
