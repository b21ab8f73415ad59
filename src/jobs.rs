//! The periodic earnings batch.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::platform::Platform;
use crate::types::LicenseStatus;

/// What one batch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed_days: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Platform {
    /// Processes every due day of every active license.
    ///
    /// A license that missed several runs is caught up one day at a time,
    /// each day in its own transaction. One license failing does not stop
    /// the others.
    pub async fn process_due_licenses(&self) -> CoreResult<BatchReport> {
        let license_ids = {
            let mut tx = self.store.begin().await?;
            let ids = tx.license_ids_with_status(LicenseStatus::Active).await?;
            tx.commit().await?;
            ids
        };

        let mut report = BatchReport::default();
        for license_id in license_ids {
            loop {
                match self.process_license_earnings(license_id, false, None).await {
                    Ok(outcome) => {
                        report.processed_days += 1;
                        if outcome.completed {
                            report.completed += 1;
                            break;
                        }
                    }
                    // Not due yet, at its cap, or paused since the listing.
                    Err(CoreError::Rule(_) | CoreError::InvalidState { .. }) => break,
                    Err(e) => {
                        warn!(%license_id, "earnings processing failed: {e}");
                        report.failed += 1;
                        break;
                    }
                }
            }
        }

        if report.processed_days > 0 || report.failed > 0 {
            info!(
                processed_days = report.processed_days,
                completed = report.completed,
                failed = report.failed,
                "earnings batch finished"
            );
        } else {
            debug!("earnings batch found nothing due");
        }
        Ok(report)
    }
}

/// Runs [`Platform::process_due_licenses`] every `interval`, starting now.
pub fn spawn_earnings_job(platform: Platform, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = platform.process_due_licenses().await {
                warn!("earnings batch aborted: {e}");
            }
        }
    })
}

/// Runs [`Platform::expire_overdue_orders`] every `interval`. Picks up orders
/// whose scheduled expiry was lost, e.g. across a restart.
pub fn spawn_expiry_sweep(platform: Platform, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = platform.expire_overdue_orders().await {
                warn!("expiry sweep failed: {e}");
            }
        }
    })
}
