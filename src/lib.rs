//! Core library for the winlaunch Windows worker provisioner.
//!
//! The crate turns a freshly started Windows instance into a connected build
//! agent: the [`Connector`] waits (bounded by a deadline) for a stable WinRM
//! session, and the [`Bootstrapper`] runs the node's one-time init script,
//! uploads and starts the agent runtime, and hands its stdio to a channel.
//! Provider metadata, the WinRM wire protocol, and the channel itself are
//! supplied by the caller through the traits in [`instance`], [`session`],
//! and [`channel`].

pub mod artifact;
pub mod bootstrap;
pub mod channel;
pub mod clock;
pub mod config;
pub mod connector;
pub mod instance;
pub mod launch_log;
pub mod launcher;
pub mod node;
pub mod session;
pub mod test_support;

pub use artifact::{ArtifactError, ArtifactSource, BytesArtifact, FileArtifact};
pub use bootstrap::{BootstrapPlan, Bootstrapper, LaunchError, LaunchStage};
pub use channel::{ChannelBuilder, ChannelError, CloseHook};
pub use clock::{Clock, TokioClock};
pub use config::{ConfigError, NodeConfig};
pub use connector::{ConnectError, Connector};
pub use instance::{Endpoint, InstanceDescriber, InstanceSnapshot};
pub use launch_log::{LaunchLog, TracingLog, WriterLog};
pub use launcher::Launcher;
pub use node::{AddressPreference, Credentials, Node, NodeBuilder, NodeError, TransportScheme};
pub use session::{RemoteProcess, Session, SessionFactory, TransportError};
