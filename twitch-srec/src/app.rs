//! Component wiring.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::capture::{CaptureBackend, CaptureLauncher, YtDlpBackend};
use crate::config::AppConfig;
use crate::directory::{ChannelDirectory, GqlDirectory};
use crate::logging::LogSink;
use crate::pubsub::{PubSubConnector, WsConnector};
use crate::reconciler::Reconciler;
use crate::scheduler::{ChannelRegistry, Supervisor, WatchContext};
use crate::utils::http_client::build_client;

/// External services the watcher talks to.
pub struct Backends {
    pub directory: Arc<dyn ChannelDirectory>,
    pub connector: Arc<dyn PubSubConnector>,
    pub capture: Arc<dyn CaptureBackend>,
}

impl Backends {
    /// GraphQL directory, WebSocket PubSub and yt-dlp.
    pub fn production(config: &AppConfig, logs: &LogSink) -> Result<Self> {
        let client = build_client(config.directory.request_timeout)?;
        Ok(Self {
            directory: Arc::new(GqlDirectory::new(client, config.directory.clone())),
            connector: Arc::new(WsConnector::new(config.pubsub.endpoint.clone())),
            capture: Arc::new(YtDlpBackend::new(config.capture.clone(), logs.clone())),
        })
    }
}

pub struct App {
    pub supervisor: Supervisor,
    pub reconciler: Reconciler,
}

impl App {
    pub fn new(config: &AppConfig, cancel: CancellationToken) -> Result<Self> {
        let logs = log_sink(config);
        let backends = Backends::production(config, &logs)?;
        Ok(Self::with_backends(config, cancel, logs, backends))
    }

    pub fn with_backends(
        config: &AppConfig,
        cancel: CancellationToken,
        logs: LogSink,
        backends: Backends,
    ) -> Self {
        let registry = ChannelRegistry::new();
        let launcher = CaptureLauncher::new(
            backends.capture,
            Arc::clone(&registry),
            logs.clone(),
            config.capture.clone(),
        );

        let ctx = WatchContext {
            registry,
            directory: backends.directory,
            launcher: Arc::new(launcher),
            connector: backends.connector,
            logs,
            pubsub: config.pubsub.clone(),
            live: config.live.clone(),
            cancel,
        };
        let supervisor = Supervisor::new(ctx, config.reconnect.clone());
        let reconciler = Reconciler::new(supervisor.clone(), config.reconciler.clone());
        Self {
            supervisor,
            reconciler,
        }
    }

    /// Run until the root token is cancelled, then stop every task.
    pub async fn run(self, shutdown_timeout: Duration) {
        let cancel = self.supervisor.context().cancel.clone();
        let reconciler = tokio::spawn(self.reconciler.run());

        cancel.cancelled().await;
        info!("Shutting down");
        let _ = reconciler.await;
        self.supervisor.shutdown(shutdown_timeout).await;
    }
}

pub fn log_sink(config: &AppConfig) -> LogSink {
    LogSink::with_max_lines(
        config.capture.output_dir.clone(),
        config.common_log_path.clone(),
        config.max_log_lines,
    )
}
