//! Acquisition of a ready remote-management session.
//!
//! Instance boot is three independent delays: the provider assigning an
//! address, the management service starting, and that service settling.
//! The connector treats all of them as "not ready yet" and retries with a
//! fixed backoff until the node's launch timeout expires.

use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;

use crate::clock::{Clock, TokioClock};
use crate::instance::{Endpoint, InstanceDescriber};
use crate::launch_log::LaunchLog;
use crate::node::Node;
use crate::session::{Session, SessionFactory, TransportError};

/// Errors surfaced by [`Connector::connect`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectError {
    /// Raised when no ready session was obtained before the deadline.
    #[error("timed out after {elapsed_secs} seconds of waiting for WinRM to be connected")]
    Timeout {
        /// Seconds elapsed since the connect call began.
        elapsed_secs: u64,
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Why an attempt did not yield a session.
#[derive(Clone, Debug, Eq, PartialEq)]
enum NotReady {
    AddressUnassigned { host: String },
    Unreachable,
    Unsettled,
}

/// Result of a single connection attempt.
enum Attempt<S> {
    Ready(S),
    NotYetReady(NotReady),
    Failed(TransportError),
}

/// Per-call loop state.
struct LoopState {
    started_wall: SystemTime,
    already_booted: Option<bool>,
}

impl LoopState {
    /// Evaluates the already-booted heuristic once, on the first snapshot.
    fn already_booted(&mut self, node: &Node, created_at: SystemTime, log: &dyn LaunchLog) -> bool {
        *self.already_booted.get_or_insert_with(|| {
            let age = self
                .started_wall
                .duration_since(created_at)
                .unwrap_or(Duration::ZERO);
            log.line(&format!(
                "{} booted {}s before this launch",
                node.display_name,
                age.as_secs()
            ));
            age > node.already_booted_threshold
        })
    }
}

/// Produces ready sessions for a [`Node`].
#[derive(Debug)]
pub struct Connector<D, F, C = TokioClock> {
    describer: D,
    factory: F,
    clock: C,
}

impl<D, F> Connector<D, F, TokioClock>
where
    D: InstanceDescriber,
    F: SessionFactory,
{
    /// Creates a connector driven by the tokio timer.
    #[must_use]
    pub const fn new(describer: D, factory: F) -> Self {
        Self::with_clock(describer, factory, TokioClock)
    }
}

impl<D, F, C> Connector<D, F, C>
where
    D: InstanceDescriber,
    F: SessionFactory,
    C: Clock,
{
    /// Creates a connector with an explicit clock.
    #[must_use]
    pub const fn with_clock(describer: D, factory: F, clock: C) -> Self {
        Self {
            describer,
            factory,
            clock,
        }
    }

    /// Retries until a probed, stabilized session is available.
    ///
    /// Transient failures (snapshot fetch, session open, probe) are logged
    /// and retried after the node's backoff; they never abort the loop.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Timeout`] once the time elapsed since the call
    /// began exceeds the node's launch timeout.
    pub async fn connect(&self, node: &Node, log: &dyn LaunchLog) -> Result<F::Session, ConnectError> {
        let started = self.clock.now();
        let mut state = LoopState {
            started_wall: self.clock.wall_time(),
            already_booted: None,
        };
        let mut attempts: u32 = 0;

        loop {
            let elapsed = self.elapsed_since(started);
            if elapsed > node.launch_timeout {
                let err = ConnectError::Timeout {
                    elapsed_secs: elapsed.as_secs(),
                    attempts,
                };
                log.line(&err.to_string());
                tracing::warn!(node = %node.display_name, attempts, "connect deadline exceeded");
                return Err(err);
            }

            attempts = attempts.saturating_add(1);
            match self.attempt(node, &mut state, log).await {
                Attempt::Ready(session) => {
                    log.line("Connected with WinRM.");
                    tracing::info!(node = %node.display_name, attempts, "session ready");
                    return Ok(session);
                }
                Attempt::NotYetReady(reason) => {
                    log_not_ready(node, &reason, log);
                    tracing::debug!(node = %node.display_name, attempt = attempts, reason = ?reason, "not ready");
                }
                Attempt::Failed(err) => {
                    log.line(&format!(
                        "Waiting for WinRM to come up ({err}). Sleeping {}s.",
                        node.backoff.as_secs()
                    ));
                    tracing::debug!(node = %node.display_name, attempt = attempts, error = %err, "attempt failed");
                }
            }
            self.clock.sleep(node.backoff).await;
        }
    }

    async fn attempt(
        &self,
        node: &Node,
        state: &mut LoopState,
        log: &dyn LaunchLog,
    ) -> Attempt<F::Session> {
        let snapshot = match self.describer.describe().await {
            Ok(snapshot) => snapshot,
            Err(err) => return Attempt::Failed(err),
        };
        let already_booted = state.already_booted(node, snapshot.created_at, log);

        let endpoint = snapshot.resolve(node.address_preference);
        if endpoint.is_unassigned() {
            return Attempt::NotYetReady(NotReady::AddressUnassigned {
                host: endpoint.host,
            });
        }

        let Endpoint { host, ip } = endpoint;
        log.line(&format!(
            "Connecting to {host}({ip}) with WinRM as {}",
            node.credentials.user
        ));
        tracing::debug!(node = %node.display_name, %ip, scheme = ?node.transport, "opening session");
        let session = match self
            .factory
            .open(&ip, &node.credentials, node.transport)
            .await
        {
            Ok(session) => session,
            Err(err) => return Attempt::Failed(err),
        };

        match session.probe().await {
            Ok(true) => {}
            Ok(false) => return discard(session, Attempt::NotYetReady(NotReady::Unreachable)).await,
            Err(err) => return discard(session, Attempt::Failed(err)).await,
        }

        if !already_booted || node.stop_on_terminate {
            log.line(&format!(
                "WinRM service responded. Waiting for WinRM service to stabilize on {}",
                node.display_name
            ));
            self.clock.sleep(node.boot_delay).await;
            state.already_booted = Some(true);
            log.line(&format!("WinRM should now be ok on {}", node.display_name));

            match session.probe().await {
                Ok(true) => {}
                Ok(false) => return discard(session, Attempt::NotYetReady(NotReady::Unsettled)).await,
                Err(err) => return discard(session, Attempt::Failed(err)).await,
            }
        }

        Attempt::Ready(session)
    }

    fn elapsed_since(&self, started: Instant) -> Duration {
        self.clock.now().saturating_duration_since(started)
    }
}

/// Closes a rejected candidate so at most one session stays open.
async fn discard<S: Session>(session: S, outcome: Attempt<S>) -> Attempt<S> {
    if let Err(err) = session.close().await {
        tracing::debug!(error = %err, "closing rejected session candidate failed");
    }
    outcome
}

fn log_not_ready(node: &Node, reason: &NotReady, log: &dyn LaunchLog) {
    let backoff = node.backoff.as_secs();
    let message = match reason {
        NotReady::AddressUnassigned { host } => format!(
            "Invalid host {}, your host is most likely waiting for an ip address. Sleeping {backoff}s.",
            if host.is_empty() { "<none>" } else { host.as_str() }
        ),
        NotReady::Unreachable => format!("Waiting for WinRM to come up. Sleeping {backoff}s."),
        NotReady::Unsettled => format!("WinRM not yet up. Sleeping {backoff}s."),
    };
    log.line(&message);
}
