use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use license_ledger::{
    AppState, Config, DelayedTaskQueue, PgSettingsSource, PgStore, Platform, SettingsProvider,
    SystemClock, init_pool, init_router, spawn_earnings_job, spawn_expiry_sweep,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to read configuration")?;
    let pool = init_pool(&config).await?;

    let store = PgStore::new(pool.clone());
    store.migrate().await.context("Failed to run migrations")?;

    let settings = SettingsProvider::new(
        Arc::new(PgSettingsSource::new(pool)),
        Duration::from_secs(config.settings_ttl_secs),
    );
    settings
        .refresh()
        .await
        .context("Failed to load business settings")?;

    let (tasks, worker) = DelayedTaskQueue::new();
    let platform = Platform::new(
        Arc::new(store),
        Arc::new(settings),
        Arc::new(tasks),
        Arc::new(SystemClock),
    );

    let worker_platform = platform.clone();
    tokio::spawn(async move { worker.run(&worker_platform).await });

    // Expiry tasks do not survive a restart; the sweep's first tick runs now.
    spawn_expiry_sweep(
        platform.clone(),
        Duration::from_secs(config.expiry_sweep_secs),
    );
    spawn_earnings_job(
        platform.clone(),
        Duration::from_secs(config.earnings_interval_secs),
    );

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;
    let app = init_router(AppState { platform });

    info!("Listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
