use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::ChannelRegistry;
use crate::capture::CaptureLauncher;
use crate::config::{LiveTriggerPolicy, PubSubConfig};
use crate::directory::ChannelDirectory;
use crate::logging::LogSink;
use crate::pubsub::PubSubConnector;

/// Everything a watch task needs, shared by all of them.
#[derive(Clone)]
pub struct WatchContext {
    pub registry: Arc<ChannelRegistry>,
    pub directory: Arc<dyn ChannelDirectory>,
    pub launcher: Arc<CaptureLauncher>,
    pub connector: Arc<dyn PubSubConnector>,
    pub logs: LogSink,
    pub pubsub: PubSubConfig,
    pub live: LiveTriggerPolicy,
    /// Root token; cancelled on shutdown.
    pub cancel: CancellationToken,
}
