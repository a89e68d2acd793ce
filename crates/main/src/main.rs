//! 主应用程序入口
//!
//! 加载配置、初始化日志和指标、选择存储后端，然后启动 Axum 服务。

use anyhow::Context;
use config::{AppConfig, LogConfig};
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{cors_layer, metrics::install_recorder, router, AppState};

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_tracing(&config.log);

    match config.sanitized_database_url() {
        Some(url) => tracing::info!(database = %url, "using postgres storage"),
        None => tracing::info!("using in-memory storage"),
    }

    let metrics = install_recorder().context("installing metrics recorder")?;
    let infra = Infrastructure::connect(&config.database, &config.password)
        .await
        .context("initialising storage")?;

    let state = AppState::build(&infra, &config, Some(metrics));
    let app = router(state).layer(cors_layer(&config.server.cors_origins));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;

    tracing::info!(address = %address, "tears listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}
