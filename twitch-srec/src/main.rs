use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use twitch_srec::app::App;
use twitch_srec::config::{Args, Credentials};
use twitch_srec::{logging, panic_hook};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut config = Args::parse().into_config();

    let _log_guard = logging::init_logging(&config.log_dir, config.log_filter.as_deref())?;
    panic_hook::install(&config.log_dir);

    let credentials = Credentials::load_or_create(&config.credentials_path).await?;
    config.apply_credentials(&credentials);
    if credentials.token().is_none() {
        info!("No token configured, using the public client id");
    }

    let cancel = CancellationToken::new();
    logging::start_retention_cleanup(config.log_dir.clone(), cancel.clone());

    let app = App::new(&config, cancel.clone())?;
    info!(
        watch_list = %config.reconciler.watch_list_path.display(),
        output = %config.capture.output_dir.display(),
        "twitch-srec started"
    );

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl-c");
            }
            cancel.cancel();
        }
    });

    app.run(SHUTDOWN_TIMEOUT).await;
    info!("twitch-srec stopped");
    Ok(())
}
