//! Immutable description of the Windows node being provisioned.
//!
//! A [`Node`] is created by the caller before a launch and is never mutated
//! while the launch runs. It carries everything the connector and the
//! bootstrapper need: how to reach the instance, which credentials to use,
//! where to stage files remotely, and the timing knobs for the readiness
//! loop.

use std::time::Duration;

use thiserror::Error;

/// Default remote working directory used to stage the agent and init script.
pub const DEFAULT_WORKING_DIR: &str = r"C:\Windows\Temp\";

/// Default administrative account used for remote management.
pub const DEFAULT_ADMIN_USER: &str = "Administrator";

/// Default executable used to start the agent runtime.
pub const DEFAULT_AGENT_LAUNCHER: &str = "java";

/// Default file name of the uploaded agent runtime.
pub const DEFAULT_AGENT_FILE_NAME: &str = "agent.jar";

/// Fixed wait between connection attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Overall ceiling for acquiring a remote-management session.
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Wait applied after the management service first answers.
pub const DEFAULT_BOOT_DELAY: Duration = Duration::from_secs(60);

/// Instances created longer ago than this are assumed to have finished
/// booting, so the stabilization wait is skipped after its first use.
pub const ALREADY_BOOTED_THRESHOLD: Duration = Duration::from_secs(3 * 60);

/// Which of the instance's addresses the connector should dial.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AddressPreference {
    /// Prefer the public address, falling back to the private one while the
    /// public address is not assigned.
    #[default]
    Public,
    /// Always use the private address.
    Private,
}

/// Transport used by the remote-management session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TransportScheme {
    /// Plain HTTP transport.
    #[default]
    Http,
    /// TLS-encrypted transport.
    Https,
}

impl TransportScheme {
    /// Returns `true` for the encrypted transport.
    #[must_use]
    pub const fn is_encrypted(self) -> bool {
        matches!(self, Self::Https)
    }
}

/// Reference to the administrative credential used to open sessions.
///
/// The secret itself is resolved by the session factory; this crate only
/// carries the reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credentials {
    /// Account name on the remote host.
    pub user: String,
    /// Opaque reference to the password, resolved by the session factory.
    pub secret_ref: Option<String>,
}

impl Credentials {
    /// Creates a credential reference for `user` without a secret reference.
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret_ref: None,
        }
    }

    /// Attaches a secret reference.
    #[must_use]
    pub fn with_secret_ref(mut self, secret_ref: impl Into<String>) -> Self {
        self.secret_ref = Some(secret_ref.into());
        self
    }
}

/// Configuration for one target instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node {
    /// Label used in log lines.
    pub display_name: String,
    /// Address resolution preference.
    pub address_preference: AddressPreference,
    /// Administrative credential reference.
    pub credentials: Credentials,
    /// Transport scheme for the management session.
    pub transport: TransportScheme,
    /// Remote working directory, always ending with a backslash.
    pub working_dir: String,
    /// Optional one-time initialization script (batch file contents).
    pub init_script: Option<String>,
    /// Extra options inserted into the agent invocation.
    pub launch_options: Option<String>,
    /// Executable that starts the agent runtime.
    pub agent_launcher: String,
    /// File name the agent runtime is uploaded as.
    pub agent_file_name: String,
    /// Overall deadline for the connection loop.
    pub launch_timeout: Duration,
    /// Stabilization delay after the first successful probe.
    pub boot_delay: Duration,
    /// Wait between failed connection attempts.
    pub backoff: Duration,
    /// Age after which an instance counts as already booted.
    pub already_booted_threshold: Duration,
    /// Whether the node is torn down on disconnect. Such nodes always
    /// re-apply the stabilization wait.
    pub stop_on_terminate: bool,
}

impl Node {
    /// Starts a builder for a [`Node`].
    #[must_use]
    pub fn builder(display_name: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(display_name)
    }

    /// Returns the init script when it contains anything besides whitespace.
    #[must_use]
    pub fn effective_init_script(&self) -> Option<&str> {
        self.init_script
            .as_deref()
            .filter(|script| !script.trim().is_empty())
    }

    /// Joins `file_name` onto the remote working directory.
    #[must_use]
    pub fn remote_path(&self, file_name: &str) -> String {
        format!("{}{file_name}", self.working_dir)
    }
}

/// Errors raised while building a [`Node`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NodeError {
    /// Raised when a required text field is blank.
    #[error("missing or empty node field: {0}")]
    Validation(String),
    /// Raised when a duration that must be positive is zero.
    #[error("node field {0} must be greater than zero")]
    ZeroDuration(String),
}

/// Builder for [`Node`] that trims text inputs and validates on build.
#[derive(Clone, Debug)]
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    /// Creates a builder populated with the crate defaults.
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            node: Node {
                display_name: display_name.into(),
                address_preference: AddressPreference::default(),
                credentials: Credentials::new(DEFAULT_ADMIN_USER),
                transport: TransportScheme::default(),
                working_dir: DEFAULT_WORKING_DIR.to_owned(),
                init_script: None,
                launch_options: None,
                agent_launcher: DEFAULT_AGENT_LAUNCHER.to_owned(),
                agent_file_name: DEFAULT_AGENT_FILE_NAME.to_owned(),
                launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
                boot_delay: DEFAULT_BOOT_DELAY,
                backoff: DEFAULT_BACKOFF,
                already_booted_threshold: ALREADY_BOOTED_THRESHOLD,
                stop_on_terminate: false,
            },
        }
    }

    /// Sets the address preference.
    #[must_use]
    pub const fn address_preference(mut self, value: AddressPreference) -> Self {
        self.node.address_preference = value;
        self
    }

    /// Sets the credential reference.
    #[must_use]
    pub fn credentials(mut self, value: Credentials) -> Self {
        self.node.credentials = value;
        self
    }

    /// Sets the transport scheme.
    #[must_use]
    pub const fn transport(mut self, value: TransportScheme) -> Self {
        self.node.transport = value;
        self
    }

    /// Sets the remote working directory.
    #[must_use]
    pub fn working_dir(mut self, value: impl Into<String>) -> Self {
        self.node.working_dir = value.into();
        self
    }

    /// Sets the optional init script.
    #[must_use]
    pub fn init_script(mut self, value: Option<String>) -> Self {
        self.node.init_script = value;
        self
    }

    /// Sets the optional agent launch options.
    #[must_use]
    pub fn launch_options(mut self, value: Option<String>) -> Self {
        self.node.launch_options = value;
        self
    }

    /// Sets the agent launcher executable.
    #[must_use]
    pub fn agent_launcher(mut self, value: impl Into<String>) -> Self {
        self.node.agent_launcher = value.into();
        self
    }

    /// Sets the agent file name.
    #[must_use]
    pub fn agent_file_name(mut self, value: impl Into<String>) -> Self {
        self.node.agent_file_name = value.into();
        self
    }

    /// Sets the overall connection deadline.
    #[must_use]
    pub const fn launch_timeout(mut self, value: Duration) -> Self {
        self.node.launch_timeout = value;
        self
    }

    /// Sets the stabilization delay.
    #[must_use]
    pub const fn boot_delay(mut self, value: Duration) -> Self {
        self.node.boot_delay = value;
        self
    }

    /// Sets the retry backoff.
    #[must_use]
    pub const fn backoff(mut self, value: Duration) -> Self {
        self.node.backoff = value;
        self
    }

    /// Sets the already-booted threshold.
    #[must_use]
    pub const fn already_booted_threshold(mut self, value: Duration) -> Self {
        self.node.already_booted_threshold = value;
        self
    }

    /// Sets whether the node is torn down on disconnect.
    #[must_use]
    pub const fn stop_on_terminate(mut self, value: bool) -> Self {
        self.node.stop_on_terminate = value;
        self
    }

    /// Builds and validates the [`Node`].
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Validation`] when a required text field is blank
    /// and [`NodeError::ZeroDuration`] when the launch timeout or backoff is
    /// zero.
    pub fn build(self) -> Result<Node, NodeError> {
        let mut node = self.node;
        node.display_name = node.display_name.trim().to_owned();
        node.credentials.user = node.credentials.user.trim().to_owned();
        node.agent_launcher = node.agent_launcher.trim().to_owned();
        node.agent_file_name = node.agent_file_name.trim().to_owned();
        node.working_dir = normalise_working_dir(&node.working_dir);
        node.launch_options = node
            .launch_options
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        require_text(&node.display_name, "display_name")?;
        require_text(&node.credentials.user, "admin_user")?;
        require_text(&node.working_dir, "working_dir")?;
        require_text(&node.agent_launcher, "agent_launcher")?;
        require_text(&node.agent_file_name, "agent_file_name")?;
        if node.launch_timeout.is_zero() {
            return Err(NodeError::ZeroDuration(String::from("launch_timeout")));
        }
        if node.backoff.is_zero() {
            return Err(NodeError::ZeroDuration(String::from("backoff")));
        }
        Ok(node)
    }
}

fn require_text(value: &str, field: &str) -> Result<(), NodeError> {
    if value.is_empty() {
        return Err(NodeError::Validation(field.to_owned()));
    }
    Ok(())
}

fn normalise_working_dir(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.ends_with('\\') {
        return trimmed.to_owned();
    }
    format!("{trimmed}\\")
}
