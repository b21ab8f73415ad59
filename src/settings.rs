//! Admin-tunable business settings.
//!
//! Components never read settings from ambient state: they receive a
//! [`SettingsProvider`], which caches whatever its [`SettingsSource`] returns
//! for a fixed TTL and can be refreshed explicitly after an admin edit.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult, RuleViolation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Fraction of principal earned per day.
    pub daily_earning_rate: Decimal,
    pub max_earning_days: i32,
    /// Total payout cap as a multiple of principal (2.0 = 200%).
    pub earning_cap_percentage: Decimal,
    /// Fraction of the order amount owed to the buyer's sponsor.
    pub referral_commission_rate: Decimal,
    pub order_expiration_minutes: i64,
    /// Days 1..=K are cashback, later days are potential.
    pub cashback_threshold_days: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daily_earning_rate: dec!(0.08),
            max_earning_days: 25,
            earning_cap_percentage: dec!(2.0),
            referral_commission_rate: dec!(0.10),
            order_expiration_minutes: 30,
            cashback_threshold_days: 13,
        }
    }
}

impl Settings {
    /// Applies one stored `key = value` pair on top of the current values.
    pub fn apply(&mut self, key: &str, value: &str) -> CoreResult<()> {
        fn parse<T: FromStr>(key: &str, value: &str) -> CoreResult<T> {
            value.trim().parse().map_err(|_| {
                RuleViolation::InvalidInput(format!("setting {key} has invalid value {value:?}"))
                    .into()
            })
        }

        match key {
            "daily_earning_rate" => self.daily_earning_rate = parse(key, value)?,
            "max_earning_days" => self.max_earning_days = parse(key, value)?,
            "earning_cap_percentage" => self.earning_cap_percentage = parse(key, value)?,
            "referral_commission_rate" => self.referral_commission_rate = parse(key, value)?,
            "order_expiration_minutes" => self.order_expiration_minutes = parse(key, value)?,
            "cashback_threshold_days" => self.cashback_threshold_days = parse(key, value)?,
            other => warn!(key = other, "ignoring unknown setting"),
        }
        Ok(())
    }
}

/// Where settings are loaded from.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self) -> CoreResult<Settings>;
}

/// A fixed set of settings, for tests and local runs.
pub struct StaticSettings(pub Settings);

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn load(&self) -> CoreResult<Settings> {
        Ok(self.0.clone())
    }
}

/// Reads the `system_settings` key/value table and overlays it on the defaults.
pub struct PgSettingsSource {
    pool: PgPool,
}

impl PgSettingsSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsSource for PgSettingsSource {
    async fn load(&self) -> CoreResult<Settings> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM system_settings")
                .fetch_all(&self.pool)
                .await?;

        let mut settings = Settings::default();
        for (key, value) in rows {
            settings.apply(&key, &value)?;
        }
        Ok(settings)
    }
}

/// Caches settings from a source for a fixed time-to-live.
pub struct SettingsProvider {
    source: Arc<dyn SettingsSource>,
    ttl: Duration,
    cached: RwLock<Option<(Instant, Settings)>>,
}

impl SettingsProvider {
    pub fn new(source: Arc<dyn SettingsSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// A provider that always returns `settings`.
    pub fn fixed(settings: Settings) -> Self {
        Self::new(Arc::new(StaticSettings(settings)), Duration::MAX)
    }

    /// The cached settings, reloaded when older than the TTL.
    pub async fn current(&self) -> CoreResult<Settings> {
        if let Some((loaded_at, settings)) = self.cached.read().await.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(settings.clone());
            }
        }
        self.refresh().await
    }

    /// Reloads from the source regardless of the cache age.
    pub async fn refresh(&self) -> CoreResult<Settings> {
        let settings = self.source.load().await?;
        validate(&settings)?;
        debug!(?settings, "settings loaded");
        *self.cached.write().await = Some((Instant::now(), settings.clone()));
        Ok(settings)
    }
}

/// One year.
const MAX_ORDER_EXPIRATION_MINUTES: i64 = 525_600;

fn validate(settings: &Settings) -> CoreResult<()> {
    let invalid = |msg: &str| -> CoreError { RuleViolation::InvalidInput(msg.to_string()).into() };

    if settings.daily_earning_rate <= Decimal::ZERO {
        return Err(invalid("daily_earning_rate must be positive"));
    }
    if settings.max_earning_days < 1 {
        return Err(invalid("max_earning_days must be at least 1"));
    }
    if settings.earning_cap_percentage <= Decimal::ZERO {
        return Err(invalid("earning_cap_percentage must be positive"));
    }
    if settings.referral_commission_rate < Decimal::ZERO {
        return Err(invalid("referral_commission_rate cannot be negative"));
    }
    if !(1..=MAX_ORDER_EXPIRATION_MINUTES).contains(&settings.order_expiration_minutes) {
        return Err(invalid("order_expiration_minutes must be between 1 and 525600"));
    }
    if settings.cashback_threshold_days < 0 {
        return Err(invalid("cashback_threshold_days cannot be negative"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl SettingsSource for CountingSource {
        async fn load(&self) -> CoreResult<Settings> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst) as i32;
            Ok(Settings {
                max_earning_days: 25 + n,
                ..Settings::default()
            })
        }
    }

    #[tokio::test]
    async fn current_reuses_cache_until_refresh() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let provider = SettingsProvider::new(source.clone(), Duration::from_secs(3600));

        assert_eq!(provider.current().await.unwrap().max_earning_days, 25);
        assert_eq!(provider.current().await.unwrap().max_earning_days, 25);
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        assert_eq!(provider.refresh().await.unwrap().max_earning_days, 26);
        assert_eq!(provider.current().await.unwrap().max_earning_days, 26);
    }

    #[tokio::test]
    async fn zero_ttl_reloads_every_time() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let provider = SettingsProvider::new(source.clone(), Duration::ZERO);

        provider.current().await.unwrap();
        provider.current().await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn apply_overlays_known_keys() {
        let mut settings = Settings::default();
        settings.apply("daily_earning_rate", "0.05").unwrap();
        settings.apply("cashback_threshold_days", " 10 ").unwrap();
        settings.apply("unrelated", "x").unwrap();

        assert_eq!(settings.daily_earning_rate, dec!(0.05));
        assert_eq!(settings.cashback_threshold_days, 10);
        assert!(settings.apply("max_earning_days", "many").is_err());
    }

    #[tokio::test]
    async fn refresh_rejects_nonsense_values() {
        let provider = SettingsProvider::fixed(Settings {
            max_earning_days: 0,
            ..Settings::default()
        });
        assert!(provider.current().await.is_err());
    }

    #[tokio::test]
    async fn order_expiration_is_bounded_to_a_year() {
        let too_long = SettingsProvider::fixed(Settings {
            order_expiration_minutes: 1_000_000_000_000,
            ..Settings::default()
        });
        assert!(too_long.current().await.is_err());

        let a_year = SettingsProvider::fixed(Settings {
            order_expiration_minutes: 525_600,
            ..Settings::default()
        });
        assert_eq!(a_year.current().await.unwrap().order_expiration_minutes, 525_600);
    }
}
