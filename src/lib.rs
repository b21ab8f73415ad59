//! Ledger, license engine and order workflow of the USDT license platform.

mod api;
mod audit;
mod clock;
mod commissions;
mod config;
mod engine;
mod error;
mod jobs;
mod ledger;
mod licenses;
mod orders;
mod platform;
mod products;
mod responses;
mod scheduler;
mod settings;
mod store;
mod types;
mod users;
mod wallets;

use anyhow::Context;
use anyhow::Result;
use sqlx::{PgPool, postgres::PgPoolOptions};

pub use api::{AppState, init_router};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{Accrual, EarningTerms, USDT_SCALE, earning_date, usdt};
pub use error::{CoreError, CoreResult, RuleViolation};
pub use jobs::{BatchReport, spawn_earnings_job, spawn_expiry_sweep};
pub use ledger::NewLedgerEntry;
pub use licenses::{AdjustOutcome, ProcessOutcome};
pub use orders::Confirmation;
pub use platform::Platform;
pub use products::ProductInput;
pub use scheduler::{DelayedTaskQueue, Task, TaskHandler, TaskQueue, TaskWorker};
pub use settings::{PgSettingsSource, Settings, SettingsProvider, SettingsSource, StaticSettings};
pub use store::{MemoryStore, PgStore, Store, StoreTx};
pub use types::*;

/// Initializes the database pool.
pub async fn init_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}
