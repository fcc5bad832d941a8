use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;

use tracing::info;

use reelgate::{AppConfig, ApplicationServer, Logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // init logger and sentry, guards are kept alive to flush logs and maintain sentry connection
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!("logger and env prepped...");

    // the selector drift counters and the proxy/extraction counters all land here
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("could not install the prometheus recorder")?;

    info!("metrics recorder ok, starting server...");

    ApplicationServer::serve(config, metrics)
        .await
        .context("server failed to start")?;

    Ok(())
}
