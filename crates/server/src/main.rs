mod bootstrap;
mod http;

use std::sync::Arc;

use anyhow::Result;
use reservo_channels::{MessageHandler, PollWorker};
use reservo_core::config::AppConfig;

/// `RUST_LOG` wins over the configured level so a single run can be
/// re-filtered without touching the config file.
fn init_logging(config: &AppConfig) {
    use reservo_core::config::LogFormat;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(None)?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    http::serve(
        &app.config.server.bind_address,
        app.config.server.port,
        http::AppState {
            agent_id: app.agent_id.clone(),
            pipeline: Arc::clone(&app.pipeline),
            adapters: app.adapters.clone(),
        },
        shutdown_rx.clone(),
    )
    .await?;

    let mut workers = Vec::new();
    for adapter in app.adapters.iter().filter(|adapter| adapter.is_polling()) {
        let worker = PollWorker::new(
            app.agent_id.clone(),
            Arc::clone(adapter),
            Arc::clone(&app.pipeline) as Arc<dyn MessageHandler>,
            app.config.poll.interval_secs,
            app.config.poll.dedup_capacity,
        );
        let receiver = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { worker.run(receiver).await }));
    }

    tracing::info!(agent_id = %app.agent_id, "reservo-server started");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    for worker in workers {
        let _ = worker.await;
    }

    Ok(())
}
