//! End-to-end launch: connect, then bootstrap.

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::artifact::ArtifactSource;
use crate::bootstrap::{Bootstrapper, LaunchError};
use crate::channel::ChannelBuilder;
use crate::clock::Clock;
use crate::connector::Connector;
use crate::instance::InstanceDescriber;
use crate::launch_log::LaunchLog;
use crate::node::Node;
use crate::session::SessionFactory;

/// Provisions a node into a connected agent channel.
#[derive(Debug)]
pub struct Launcher<D, F, C, A, B> {
    connector: Connector<D, F, C>,
    bootstrapper: Bootstrapper<A, B>,
}

impl<D, F, C, A, B> Launcher<D, F, C, A, B>
where
    D: InstanceDescriber,
    F: SessionFactory,
    C: Clock,
    A: ArtifactSource,
    B: ChannelBuilder,
{
    /// Combines a connector and a bootstrapper.
    #[must_use]
    pub const fn new(connector: Connector<D, F, C>, bootstrapper: Bootstrapper<A, B>) -> Self {
        Self {
            connector,
            bootstrapper,
        }
    }

    /// Connects to `node` and bootstraps the agent on it.
    ///
    /// Every failure is written to `log` before it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Connect`] when no session became ready before
    /// the node's launch timeout, or any error raised by
    /// [`Bootstrapper::launch`].
    pub async fn launch(
        &self,
        node: &Node,
        log: Arc<dyn LaunchLog>,
    ) -> Result<B::Channel, LaunchError> {
        let launch_id = Uuid::new_v4();
        let span = tracing::info_span!("launch", node = %node.display_name, %launch_id);

        async move {
            let session = match self.connector.connect(node, log.as_ref()).await {
                Ok(session) => session,
                Err(err) => {
                    log.line(&format!("launch of {} failed: {err}", node.display_name));
                    return Err(LaunchError::from(err));
                }
            };
            self.bootstrapper.launch(node, session, log).await
        }
        .instrument(span)
        .await
    }
}
