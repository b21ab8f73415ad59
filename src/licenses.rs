//! License lifecycle: daily processing, admin adjustments and pausing.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit;
use crate::engine::{EarningTerms, earning_date};
use crate::error::{CoreError, CoreResult, RuleViolation};
use crate::ledger::{NewLedgerEntry, record_entry};
use crate::platform::{Platform, require_product};
use crate::settings::Settings;
use crate::store::StoreTx;
use crate::types::{
    AuditRecord, LicenseDailyEarning, LicenseStatus, RefType, UserLicense,
};

/// Result of processing one day.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub license: UserLicense,
    pub earning: LicenseDailyEarning,
    /// True if this day moved the license to `completed`.
    pub completed: bool,
}

/// Result of an admin day-count adjustment.
#[derive(Debug, Clone, Serialize)]
pub struct AdjustOutcome {
    pub license: UserLicense,
    pub created_days: Vec<i32>,
    pub removed_days: Vec<i32>,
}

async fn require_license(tx: &mut dyn StoreTx, id: Uuid) -> CoreResult<UserLicense> {
    tx.lock_license(id)
        .await?
        .ok_or_else(|| CoreError::not_found("license", id))
}

async fn terms_for(
    tx: &mut dyn StoreTx,
    license: &UserLicense,
    settings: &Settings,
) -> CoreResult<EarningTerms> {
    let product = require_product(tx, license.product_id).await?;
    Ok(EarningTerms::for_license(
        license,
        settings,
        product.duration_days,
    ))
}

/// Sets the day count and every total derived from it. Returns whether the
/// license is now exhausted.
fn apply_days(
    license: &mut UserLicense,
    terms: &EarningTerms,
    days: i32,
    now: DateTime<Utc>,
) -> bool {
    let accrual = terms.accrued(days);
    license.days_generated = days;
    license.total_earned_usdt = accrual.total;
    license.cashback_accum = accrual.cashback;
    license.potential_accum = accrual.potential;
    license.updated_at = now;

    let exhausted = terms.is_exhausted(days, accrual.total);
    if exhausted {
        license.status = LicenseStatus::Completed;
    } else if license.status == LicenseStatus::Completed {
        license.status = LicenseStatus::Active;
    }
    exhausted
}

fn new_earning(
    license: &UserLicense,
    terms: &EarningTerms,
    day_index: i32,
    now: DateTime<Utc>,
) -> LicenseDailyEarning {
    let (cashback_amount, potential_amount) = terms.split_day(day_index);
    let applied = !license.flags.pause_potential;
    LicenseDailyEarning {
        id: Uuid::new_v4(),
        license_id: license.id,
        day_index,
        cashback_amount,
        potential_amount,
        applied_to_balance: applied,
        earning_date: earning_date(license.started_at, day_index),
        applied_at: applied.then_some(now),
        created_at: now,
    }
}

/// Inserts the row and, unless withheld, credits the owner.
async fn post_earning(
    tx: &mut dyn StoreTx,
    license: &UserLicense,
    earning: &LicenseDailyEarning,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    tx.insert_daily_earning(earning).await?;
    if earning.applied_to_balance {
        record_entry(
            tx,
            NewLedgerEntry::credit(license.user_id, earning.amount(), RefType::Earning, earning.id)
                .meta(json!({ "license_id": license.id, "day_index": earning.day_index })),
            now,
        )
        .await?;
    }
    Ok(())
}

/// Offsets the credit of a removed day, if one was posted.
async fn reverse_earning(
    tx: &mut dyn StoreTx,
    license: &UserLicense,
    earning: &LicenseDailyEarning,
    reason: &str,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if !earning.applied_to_balance {
        return Ok(());
    }
    record_entry(
        tx,
        NewLedgerEntry::debit(license.user_id, earning.amount(), RefType::Earning, earning.id)
            .meta(json!({
                "license_id": license.id,
                "day_index": earning.day_index,
                "reason": reason,
            })),
        now,
    )
    .await?;
    Ok(())
}

impl Platform {
    pub async fn license(&self, id: Uuid) -> CoreResult<UserLicense> {
        let mut tx = self.store.begin().await?;
        let license = require_license(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(license)
    }

    pub async fn licenses_for_user(&self, user_id: Uuid) -> CoreResult<Vec<UserLicense>> {
        let mut tx = self.store.begin().await?;
        let licenses = tx.licenses_for_user(user_id).await?;
        tx.commit().await?;
        Ok(licenses)
    }

    pub async fn daily_earnings(&self, license_id: Uuid) -> CoreResult<Vec<LicenseDailyEarning>> {
        let mut tx = self.store.begin().await?;
        require_license(&mut *tx, license_id).await?;
        let rows = tx.daily_earnings(license_id).await?;
        tx.commit().await?;
        Ok(rows)
    }

    /// Processes the next unprocessed day of a license.
    ///
    /// `force` skips the 24h activation window and the due-date check, and
    /// replaces an existing row for the day instead of failing.
    pub async fn process_license_earnings(
        &self,
        license_id: Uuid,
        force: bool,
        actor_id: Option<Uuid>,
    ) -> CoreResult<ProcessOutcome> {
        let settings = self.settings.current().await?;
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut license = require_license(&mut *tx, license_id).await?;
        if license.status != LicenseStatus::Active {
            return Err(CoreError::invalid_state(
                "license",
                license_id,
                license.status,
                "active",
            ));
        }

        let terms = terms_for(&mut *tx, &license, &settings).await?;
        if terms.is_exhausted(license.days_generated, license.total_earned_usdt) {
            return Err(RuleViolation::AlreadyAtCap { license_id }.into());
        }

        let day_index = license.days_generated + 1;
        if !force {
            if now < license.started_at + Duration::hours(24) {
                return Err(RuleViolation::ActivationWindowOpen { license_id }.into());
            }
            if earning_date(license.started_at, day_index) > now {
                return Err(RuleViolation::EarningDateInFuture {
                    license_id,
                    day_index,
                }
                .into());
            }
        }

        if let Some(existing) = tx.daily_earning(license_id, day_index).await? {
            if !force {
                return Err(RuleViolation::DayAlreadyProcessed {
                    license_id,
                    day_index,
                }
                .into());
            }
            debug!(%license_id, day_index, "replacing existing daily earning");
            tx.delete_daily_earning(license_id, day_index).await?;
            reverse_earning(&mut *tx, &license, &existing, "day reprocessed", now).await?;
        }

        let before = license.clone();
        let earning = new_earning(&license, &terms, day_index, now);
        post_earning(&mut *tx, &license, &earning, now).await?;
        let completed = apply_days(&mut license, &terms, day_index, now);
        tx.update_license(&license).await?;

        audit::record(
            &mut *tx,
            AuditRecord::new("license.process_day", "license", license_id, actor_id, now)
                .values(&before, &license),
        )
        .await?;
        tx.commit().await?;

        info!(
            %license_id,
            day_index,
            force,
            applied = earning.applied_to_balance,
            completed,
            "license day processed"
        );
        Ok(ProcessOutcome {
            license,
            earning,
            completed,
        })
    }

    /// Moves a license to an arbitrary day count, keeping rows, totals and the
    /// ledger consistent.
    ///
    /// Removed days have their posted credits offset by debits. Missing days
    /// up to the target are created and credited (unless potential is
    /// paused); days that already have a row are left alone.
    pub async fn adjust_license_days(
        &self,
        license_id: Uuid,
        target_days: i32,
        actor_id: Uuid,
    ) -> CoreResult<AdjustOutcome> {
        let settings = self.settings.current().await?;
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut license = require_license(&mut *tx, license_id).await?;
        let terms = terms_for(&mut *tx, &license, &settings).await?;
        if target_days < 0 {
            return Err(RuleViolation::InvalidInput("days cannot be negative".into()).into());
        }
        let maximum = terms.last_day();
        if target_days > maximum {
            return Err(RuleViolation::DaysExceedMaximum {
                requested: target_days,
                maximum,
            }
            .into());
        }

        let before = license.clone();

        let removed = tx.delete_daily_earnings_after(license_id, target_days).await?;
        for earning in &removed {
            reverse_earning(&mut *tx, &license, earning, "days adjusted", now).await?;
        }

        let mut created_days = Vec::new();
        for day_index in 1..=target_days {
            if tx.daily_earning(license_id, day_index).await?.is_some() {
                continue;
            }
            let earning = new_earning(&license, &terms, day_index, now);
            post_earning(&mut *tx, &license, &earning, now).await?;
            created_days.push(day_index);
        }

        apply_days(&mut license, &terms, target_days, now);
        tx.update_license(&license).await?;

        audit::record(
            &mut *tx,
            AuditRecord::new("license.adjust_days", "license", license_id, Some(actor_id), now)
                .values(&before, &license),
        )
        .await?;
        tx.commit().await?;

        let removed_days: Vec<i32> = removed.iter().map(|e| e.day_index).collect();
        info!(
            %license_id,
            from = before.days_generated,
            to = target_days,
            created = created_days.len(),
            removed = removed_days.len(),
            "license days adjusted"
        );
        Ok(AdjustOutcome {
            license,
            created_days,
            removed_days,
        })
    }

    /// Shifts `started_at` (and `ends_at`) by a signed number of minutes.
    pub async fn adjust_license_timing(
        &self,
        license_id: Uuid,
        shift_minutes: i64,
        actor_id: Uuid,
    ) -> CoreResult<UserLicense> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut license = require_license(&mut *tx, license_id).await?;
        if license.status != LicenseStatus::Active {
            return Err(CoreError::invalid_state(
                "license",
                license_id,
                license.status,
                "active",
            ));
        }

        let shift = Duration::try_minutes(shift_minutes)
            .ok_or_else(|| RuleViolation::InvalidInput("shift is out of range".into()))?;
        let out_of_range = || RuleViolation::InvalidInput("shift is out of range".into());
        let new_start = license
            .started_at
            .checked_add_signed(shift)
            .ok_or_else(out_of_range)?;
        let new_end = license
            .ends_at
            .checked_add_signed(shift)
            .ok_or_else(out_of_range)?;
        if new_start > now + Duration::hours(24) {
            return Err(RuleViolation::StartTooFarInFuture.into());
        }

        let before = license.clone();
        license.started_at = new_start;
        license.ends_at = new_end;
        license.updated_at = now;
        tx.update_license(&license).await?;

        audit::record(
            &mut *tx,
            AuditRecord::new("license.adjust_timing", "license", license_id, Some(actor_id), now)
                .values(&before, &license),
        )
        .await?;
        tx.commit().await?;

        info!(%license_id, shift_minutes, "license timing adjusted");
        Ok(license)
    }

    /// Withholds (or resumes) ledger credits without stopping day advancement.
    pub async fn set_pause_potential(
        &self,
        license_id: Uuid,
        paused: bool,
        actor_id: Uuid,
    ) -> CoreResult<UserLicense> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut license = require_license(&mut *tx, license_id).await?;
        let before = license.flags;
        license.flags.pause_potential = paused;
        license.updated_at = now;
        tx.update_license(&license).await?;

        audit::record(
            &mut *tx,
            AuditRecord::new("license.pause_potential", "license", license_id, Some(actor_id), now)
                .values(&before, &license.flags),
        )
        .await?;
        tx.commit().await?;
        Ok(license)
    }

    /// Stops day processing entirely until resumed.
    pub async fn pause_license(&self, license_id: Uuid, actor_id: Uuid) -> CoreResult<UserLicense> {
        self.transition_license(license_id, LicenseStatus::Active, LicenseStatus::Paused, actor_id)
            .await
    }

    pub async fn resume_license(
        &self,
        license_id: Uuid,
        actor_id: Uuid,
    ) -> CoreResult<UserLicense> {
        self.transition_license(license_id, LicenseStatus::Paused, LicenseStatus::Active, actor_id)
            .await
    }

    async fn transition_license(
        &self,
        license_id: Uuid,
        from: LicenseStatus,
        to: LicenseStatus,
        actor_id: Uuid,
    ) -> CoreResult<UserLicense> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut license = require_license(&mut *tx, license_id).await?;
        if license.status != from {
            return Err(CoreError::invalid_state(
                "license",
                license_id,
                license.status,
                from.as_str(),
            ));
        }
        license.status = to;
        license.updated_at = now;
        tx.update_license(&license).await?;

        audit::record(
            &mut *tx,
            AuditRecord::new("license.status", "license", license_id, Some(actor_id), now)
                .values(&json!({ "status": from }), &json!({ "status": to })),
        )
        .await?;
        tx.commit().await?;

        info!(%license_id, %from, %to, "license status changed");
        Ok(license)
    }
}
