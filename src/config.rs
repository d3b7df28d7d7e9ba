//! Node configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::node::{
    AddressPreference, Credentials, DEFAULT_ADMIN_USER, DEFAULT_AGENT_FILE_NAME,
    DEFAULT_AGENT_LAUNCHER, DEFAULT_WORKING_DIR, Node, TransportScheme,
};

/// Node settings derived from defaults, configuration files, and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "WINLAUNCH",
    discovery(
        app_name = "winlaunch",
        env_var = "WINLAUNCH_CONFIG_PATH",
        config_file_name = "winlaunch.toml",
        dotfile_name = ".winlaunch.toml",
        project_file_name = "winlaunch.toml"
    )
)]
pub struct NodeConfig {
    /// Label used in launch log lines.
    #[ortho_config(default = "windows-node".to_owned())]
    pub display_name: String,
    /// Dial the private address instead of preferring the public one.
    #[ortho_config(default = false)]
    pub use_private_address: bool,
    /// Administrative account used for remote management.
    #[ortho_config(default = DEFAULT_ADMIN_USER.to_owned())]
    pub admin_user: String,
    /// Reference to the administrative password, resolved by the session
    /// factory.
    pub admin_password_ref: Option<String>,
    /// Use the TLS-encrypted management transport.
    #[ortho_config(default = false)]
    pub use_https: bool,
    /// Remote working directory for staged files.
    #[ortho_config(default = DEFAULT_WORKING_DIR.to_owned())]
    pub working_dir: String,
    /// One-time initialization script (batch file contents).
    pub init_script: Option<String>,
    /// Options inserted into the agent invocation.
    pub launch_options: Option<String>,
    /// Executable used to start the agent runtime.
    #[ortho_config(default = DEFAULT_AGENT_LAUNCHER.to_owned())]
    pub agent_launcher: String,
    /// File name used for the uploaded agent runtime.
    #[ortho_config(default = DEFAULT_AGENT_FILE_NAME.to_owned())]
    pub agent_file_name: String,
    /// Overall connection deadline in seconds.
    #[ortho_config(default = 600)]
    pub launch_timeout_secs: u64,
    /// Stabilization delay in seconds after the service first answers.
    #[ortho_config(default = 60)]
    pub boot_delay_secs: u64,
    /// Wait between connection attempts in seconds.
    #[ortho_config(default = 10)]
    pub backoff_secs: u64,
    /// Instance age in seconds after which it counts as already booted.
    #[ortho_config(default = 180)]
    pub already_booted_threshold_secs: u64,
    /// Whether the node is torn down on disconnect.
    #[ortho_config(default = false)]
    pub stop_on_terminate: bool,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl NodeConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(Self::guidance(metadata)));
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::MissingField(Self::guidance(metadata)));
        }
        Ok(())
    }

    fn guidance(metadata: &FieldMetadata) -> String {
        format!(
            "missing {}: set {} or add {} to winlaunch.toml",
            metadata.description, metadata.env_var, metadata.toml_key
        )
    }

    /// Loads configuration without attempting to parse CLI arguments.
    /// Values merge defaults, configuration files, and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("winlaunch")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// or a duration that must be positive is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.display_name,
            &FieldMetadata::new("node display name", "WINLAUNCH_DISPLAY_NAME", "display_name"),
        )?;
        Self::require_field(
            &self.admin_user,
            &FieldMetadata::new("administrative user", "WINLAUNCH_ADMIN_USER", "admin_user"),
        )?;
        Self::require_field(
            &self.working_dir,
            &FieldMetadata::new("remote working directory", "WINLAUNCH_WORKING_DIR", "working_dir"),
        )?;
        Self::require_field(
            &self.agent_launcher,
            &FieldMetadata::new("agent launcher", "WINLAUNCH_AGENT_LAUNCHER", "agent_launcher"),
        )?;
        Self::require_field(
            &self.agent_file_name,
            &FieldMetadata::new(
                "agent file name",
                "WINLAUNCH_AGENT_FILE_NAME",
                "agent_file_name",
            ),
        )?;
        Self::require_positive(
            self.launch_timeout_secs,
            &FieldMetadata::new(
                "positive launch timeout",
                "WINLAUNCH_LAUNCH_TIMEOUT_SECS",
                "launch_timeout_secs",
            ),
        )?;
        Self::require_positive(
            self.backoff_secs,
            &FieldMetadata::new("positive retry backoff", "WINLAUNCH_BACKOFF_SECS", "backoff_secs"),
        )?;
        Ok(())
    }

    /// Builds the immutable [`Node`] described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn to_node(&self) -> Result<Node, ConfigError> {
        self.validate()?;

        let credentials = match &self.admin_password_ref {
            Some(secret_ref) => Credentials::new(&self.admin_user).with_secret_ref(secret_ref),
            None => Credentials::new(&self.admin_user),
        };
        let address_preference = if self.use_private_address {
            AddressPreference::Private
        } else {
            AddressPreference::Public
        };
        let transport = if self.use_https {
            TransportScheme::Https
        } else {
            TransportScheme::Http
        };

        Node::builder(&self.display_name)
            .address_preference(address_preference)
            .credentials(credentials)
            .transport(transport)
            .working_dir(&self.working_dir)
            .init_script(self.init_script.clone())
            .launch_options(self.launch_options.clone())
            .agent_launcher(&self.agent_launcher)
            .agent_file_name(&self.agent_file_name)
            .launch_timeout(Duration::from_secs(self.launch_timeout_secs))
            .boot_delay(Duration::from_secs(self.boot_delay_secs))
            .backoff(Duration::from_secs(self.backoff_secs))
            .already_booted_threshold(Duration::from_secs(self.already_booted_threshold_secs))
            .stop_on_terminate(self.stop_on_terminate)
            .build()
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
