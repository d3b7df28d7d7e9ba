//! Rendering of remote paths and commands for a node.

use std::borrow::Cow;
use std::time::Duration;

use serde::Serialize;
use shell_escape::windows::escape;

use crate::node::Node;

/// Sentinel file recording that the init script already ran.
pub const INIT_MARKER_FILE: &str = ".winlaunch-init";

/// Contents written to the init marker.
pub const INIT_MARKER_CONTENTS: &[u8] = b"init ran";

/// Batch file the init script is uploaded as.
pub const INIT_SCRIPT_FILE: &str = "init.bat";

/// Execution ceiling for the long-lived agent process.
pub const AGENT_EXEC_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Every remote path and command used to bootstrap one node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BootstrapPlan {
    /// Remote working directory.
    pub working_dir: String,
    /// Idempotent command creating the working directory.
    pub ensure_dir_command: String,
    /// Remote path of the uploaded init script.
    pub init_script_path: String,
    /// Command running the init script.
    pub init_command: String,
    /// Remote path of the init marker.
    pub marker_path: String,
    /// Remote path of the uploaded agent runtime.
    pub agent_path: String,
    /// Command starting the agent runtime.
    pub agent_command: String,
    /// Execution timeout for the agent, in seconds.
    pub agent_timeout_secs: u64,
}

impl BootstrapPlan {
    /// Renders the plan for `node`.
    #[must_use]
    pub fn for_node(node: &Node) -> Self {
        let dir = node.working_dir.trim_end_matches('\\');
        let escaped_dir = quote(dir);
        let init_script_path = node.remote_path(INIT_SCRIPT_FILE);
        let agent_path = node.remote_path(&node.agent_file_name);

        let mut agent_command = node.agent_launcher.clone();
        if let Some(options) = node.launch_options.as_deref() {
            agent_command.push(' ');
            agent_command.push_str(options);
        }
        agent_command.push_str(" -jar ");
        agent_command.push_str(&quote(&agent_path));

        Self {
            working_dir: node.working_dir.clone(),
            ensure_dir_command: format!("if not exist {escaped_dir} mkdir {escaped_dir}"),
            init_command: format!("cmd /c {}", quote(&init_script_path)),
            init_script_path,
            marker_path: node.remote_path(INIT_MARKER_FILE),
            agent_path,
            agent_command,
            agent_timeout_secs: AGENT_EXEC_TIMEOUT.as_secs(),
        }
    }

    /// Execution timeout for the agent process.
    #[must_use]
    pub const fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}
