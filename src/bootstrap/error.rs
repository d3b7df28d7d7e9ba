//! Error types for the launch workflow.

use std::fmt;

use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::channel::ChannelError;
use crate::connector::ConnectError;
use crate::session::TransportError;

/// Bootstrap step that was running when a transport call failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LaunchStage {
    /// Creating the remote working directory.
    WorkingDirectory,
    /// Checking for the init marker.
    MarkerCheck,
    /// Uploading the init script.
    InitUpload,
    /// Running the init script.
    InitRun,
    /// Writing the init marker.
    MarkerWrite,
    /// Uploading the agent runtime.
    AgentUpload,
    /// Starting the agent runtime.
    AgentStart,
}

impl fmt::Display for LaunchStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::WorkingDirectory => "creating the working directory",
            Self::MarkerCheck => "checking the init marker",
            Self::InitUpload => "uploading the init script",
            Self::InitRun => "running the init script",
            Self::MarkerWrite => "writing the init marker",
            Self::AgentUpload => "uploading the agent runtime",
            Self::AgentStart => "starting the agent runtime",
        };
        formatter.write_str(label)
    }
}

/// Errors raised while launching an agent on a node.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Raised when no session could be acquired.
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    /// Raised when a preparatory remote command exits non-zero.
    #[error("remote command `{command}` exited with status {exit_code}")]
    RemoteCommand {
        /// Command that failed.
        command: String,
        /// Exit code reported by the remote host.
        exit_code: i32,
    },
    /// Raised when the init script exits non-zero. The marker is not
    /// written, so the next launch runs the script again.
    #[error("init script failed: exit code={exit_code}")]
    InitScript {
        /// Exit code reported by the init script.
        exit_code: i32,
    },
    /// Raised when a transport call fails mid-bootstrap.
    #[error("{stage} failed: {source}")]
    Transport {
        /// Step that was running.
        stage: LaunchStage,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },
    /// Raised when the agent payload cannot be fetched.
    #[error("agent runtime unavailable: {0}")]
    Artifact(#[from] ArtifactError),
    /// Raised when the channel cannot be constructed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// Raised when the agent process does not expose a stdio stream.
    #[error("agent process did not expose {0}")]
    MissingStream(&'static str),
}

impl LaunchError {
    pub(crate) fn transport(stage: LaunchStage) -> impl FnOnce(TransportError) -> Self {
        move |source| Self::Transport { stage, source }
    }
}
