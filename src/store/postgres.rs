use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Store, StoreTx};
use crate::error::{CoreError, CoreResult, RuleViolation};
use crate::types::{
    AdminWallet, AuditRecord, LedgerEntry, LicenseDailyEarning, LicenseProduct, LicenseStatus,
    OrderDeposit, ReferralCommission, User, UserLicense, UserStatus, WalletStatus,
};

// NOTE: 23505 = unique_violation
const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION))
}

/// A store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> CoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO users (id, email, ref_code, sponsor_id, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.ref_code)
        .bind(user.sponsor_id)
        .bind(user.status)
        .bind(user.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return RuleViolation::InvalidInput("email or referral code already taken".into())
                    .into();
            }
            CoreError::from(e)
        })?;
        Ok(())
    }

    async fn lock_user(&mut self, id: Uuid) -> CoreResult<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE id = $1 FOR UPDATE"#)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn user_by_ref_code(&mut self, ref_code: &str) -> CoreResult<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE ref_code = $1"#)
                .bind(ref_code)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn set_user_status(&mut self, id: Uuid, status: UserStatus) -> CoreResult<()> {
        sqlx::query(r#"UPDATE users SET status = $2 WHERE id = $1"#)
            .bind(id)
            .bind(status)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_product(&mut self, product: &LicenseProduct) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO license_products
                 (id, name, price_usdt, daily_rate, duration_days, cap_percentage,
                  cashback_cap, potential_cap, active, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.price_usdt)
        .bind(product.daily_rate)
        .bind(product.duration_days)
        .bind(product.cap_percentage)
        .bind(product.cashback_cap)
        .bind(product.potential_cap)
        .bind(product.active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn product(&mut self, id: Uuid) -> CoreResult<Option<LicenseProduct>> {
        Ok(
            sqlx::query_as::<_, LicenseProduct>(r#"SELECT * FROM license_products WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn update_product(&mut self, product: &LicenseProduct) -> CoreResult<()> {
        sqlx::query(
            r#"UPDATE license_products
               SET name = $2, price_usdt = $3, daily_rate = $4, duration_days = $5,
                   cap_percentage = $6, cashback_cap = $7, potential_cap = $8,
                   active = $9, updated_at = $10
               WHERE id = $1"#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.price_usdt)
        .bind(product.daily_rate)
        .bind(product.duration_days)
        .bind(product.cap_percentage)
        .bind(product.cashback_cap)
        .bind(product.potential_cap)
        .bind(product.active)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_product(&mut self, id: Uuid) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM license_products WHERE id = $1"#)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn product_in_use(&mut self, id: Uuid) -> CoreResult<bool> {
        Ok(sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM order_deposits WHERE product_id = $1)
                   OR EXISTS (SELECT 1 FROM user_licenses WHERE product_id = $1)"#,
        )
        .bind(id)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn products(&mut self, active_only: bool) -> CoreResult<Vec<LicenseProduct>> {
        Ok(sqlx::query_as::<_, LicenseProduct>(
            r#"SELECT * FROM license_products
               WHERE active OR NOT $1
               ORDER BY created_at, id"#,
        )
        .bind(active_only)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_order(&mut self, order: &OrderDeposit) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO order_deposits
                 (id, user_id, product_id, amount_usdt, wallet_address, status, tx_hash,
                  expires_at, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.product_id)
        .bind(order.amount_usdt)
        .bind(&order.wallet_address)
        .bind(order.status)
        .bind(&order.tx_hash)
        .bind(order.expires_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_order(&mut self, id: Uuid) -> CoreResult<Option<OrderDeposit>> {
        Ok(
            sqlx::query_as::<_, OrderDeposit>(
                r#"SELECT * FROM order_deposits WHERE id = $1 FOR UPDATE"#,
            )
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?,
        )
    }

    async fn update_order(&mut self, order: &OrderDeposit) -> CoreResult<()> {
        sqlx::query(
            r#"UPDATE order_deposits
               SET status = $2, tx_hash = $3, updated_at = $4
               WHERE id = $1"#,
        )
        .bind(order.id)
        .bind(order.status)
        .bind(&order.tx_hash)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return RuleViolation::DuplicateTxHash.into();
            }
            CoreError::from(e)
        })?;
        Ok(())
    }

    async fn open_order_for_user(&mut self, user_id: Uuid) -> CoreResult<Option<OrderDeposit>> {
        Ok(sqlx::query_as::<_, OrderDeposit>(
            r#"SELECT * FROM order_deposits
               WHERE user_id = $1 AND status IN ('pending', 'paid')
               ORDER BY created_at DESC
               LIMIT 1"#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn order_by_tx_hash(&mut self, tx_hash: &str) -> CoreResult<Option<OrderDeposit>> {
        Ok(
            sqlx::query_as::<_, OrderDeposit>(r#"SELECT * FROM order_deposits WHERE tx_hash = $1"#)
                .bind(tx_hash)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn overdue_order_ids(&mut self, now: DateTime<Utc>) -> CoreResult<Vec<Uuid>> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM order_deposits
               WHERE status = 'pending' AND expires_at <= $1
               ORDER BY expires_at, id"#,
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn orders_for_user(&mut self, user_id: Uuid) -> CoreResult<Vec<OrderDeposit>> {
        Ok(sqlx::query_as::<_, OrderDeposit>(
            r#"SELECT * FROM order_deposits WHERE user_id = $1 ORDER BY created_at, id"#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_license(&mut self, license: &UserLicense) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO user_licenses
                 (id, user_id, product_id, order_id, principal_usdt, status, started_at, ends_at,
                  days_generated, total_earned_usdt, cashback_accum, potential_accum,
                  pause_potential, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"#,
        )
        .bind(license.id)
        .bind(license.user_id)
        .bind(license.product_id)
        .bind(license.order_id)
        .bind(license.principal_usdt)
        .bind(license.status)
        .bind(license.started_at)
        .bind(license.ends_at)
        .bind(license.days_generated)
        .bind(license.total_earned_usdt)
        .bind(license.cashback_accum)
        .bind(license.potential_accum)
        .bind(license.flags.pause_potential)
        .bind(license.created_at)
        .bind(license.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_license(&mut self, id: Uuid) -> CoreResult<Option<UserLicense>> {
        Ok(
            sqlx::query_as::<_, UserLicense>(
                r#"SELECT * FROM user_licenses WHERE id = $1 FOR UPDATE"#,
            )
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?,
        )
    }

    async fn update_license(&mut self, license: &UserLicense) -> CoreResult<()> {
        sqlx::query(
            r#"UPDATE user_licenses
               SET status = $2, started_at = $3, ends_at = $4, days_generated = $5,
                   total_earned_usdt = $6, cashback_accum = $7, potential_accum = $8,
                   pause_potential = $9, updated_at = $10
               WHERE id = $1"#,
        )
        .bind(license.id)
        .bind(license.status)
        .bind(license.started_at)
        .bind(license.ends_at)
        .bind(license.days_generated)
        .bind(license.total_earned_usdt)
        .bind(license.cashback_accum)
        .bind(license.potential_accum)
        .bind(license.flags.pause_potential)
        .bind(license.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn license_ids_with_status(&mut self, status: LicenseStatus) -> CoreResult<Vec<Uuid>> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM user_licenses WHERE status = $1 ORDER BY started_at, id"#,
        )
        .bind(status)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn licenses_for_user(&mut self, user_id: Uuid) -> CoreResult<Vec<UserLicense>> {
        Ok(sqlx::query_as::<_, UserLicense>(
            r#"SELECT * FROM user_licenses WHERE user_id = $1 ORDER BY created_at, id"#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_daily_earning(&mut self, earning: &LicenseDailyEarning) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO license_daily_earnings
                 (id, license_id, day_index, cashback_amount, potential_amount,
                  applied_to_balance, earning_date, applied_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(earning.id)
        .bind(earning.license_id)
        .bind(earning.day_index)
        .bind(earning.cashback_amount)
        .bind(earning.potential_amount)
        .bind(earning.applied_to_balance)
        .bind(earning.earning_date)
        .bind(earning.applied_at)
        .bind(earning.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return RuleViolation::DayAlreadyProcessed {
                    license_id: earning.license_id,
                    day_index: earning.day_index,
                }
                .into();
            }
            CoreError::from(e)
        })?;
        Ok(())
    }

    async fn daily_earning(
        &mut self,
        license_id: Uuid,
        day_index: i32,
    ) -> CoreResult<Option<LicenseDailyEarning>> {
        Ok(sqlx::query_as::<_, LicenseDailyEarning>(
            r#"SELECT * FROM license_daily_earnings WHERE license_id = $1 AND day_index = $2"#,
        )
        .bind(license_id)
        .bind(day_index)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn delete_daily_earning(&mut self, license_id: Uuid, day_index: i32) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM license_daily_earnings WHERE license_id = $1 AND day_index = $2"#)
            .bind(license_id)
            .bind(day_index)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_daily_earnings_after(
        &mut self,
        license_id: Uuid,
        after_day: i32,
    ) -> CoreResult<Vec<LicenseDailyEarning>> {
        let mut removed = sqlx::query_as::<_, LicenseDailyEarning>(
            r#"DELETE FROM license_daily_earnings
               WHERE license_id = $1 AND day_index > $2
               RETURNING *"#,
        )
        .bind(license_id)
        .bind(after_day)
        .fetch_all(&mut *self.tx)
        .await?;
        removed.sort_by_key(|e| e.day_index);
        Ok(removed)
    }

    async fn daily_earnings(&mut self, license_id: Uuid) -> CoreResult<Vec<LicenseDailyEarning>> {
        Ok(sqlx::query_as::<_, LicenseDailyEarning>(
            r#"SELECT * FROM license_daily_earnings WHERE license_id = $1 ORDER BY day_index"#,
        )
        .bind(license_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO ledger_entries
                 (id, user_id, direction, amount, ref_type, ref_id, meta, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.direction)
        .bind(entry.amount)
        .bind(entry.ref_type)
        .bind(entry.ref_id)
        .bind(&entry.meta)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match entry.reversal_target() {
            Some(entry_id) if is_unique_violation(&e) => {
                RuleViolation::AlreadyReversed { entry_id }.into()
            }
            _ => CoreError::from(e),
        })?;
        Ok(())
    }

    async fn ledger_entry(&mut self, id: Uuid) -> CoreResult<Option<LedgerEntry>> {
        Ok(
            sqlx::query_as::<_, LedgerEntry>(r#"SELECT * FROM ledger_entries WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn reversal_of(&mut self, entry_id: Uuid) -> CoreResult<Option<LedgerEntry>> {
        Ok(sqlx::query_as::<_, LedgerEntry>(
            r#"SELECT * FROM ledger_entries WHERE meta->>'reversal_of' = $1 LIMIT 1"#,
        )
        .bind(entry_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn ledger_entries(&mut self, user_id: Uuid) -> CoreResult<Vec<LedgerEntry>> {
        Ok(sqlx::query_as::<_, LedgerEntry>(
            r#"SELECT * FROM ledger_entries WHERE user_id = $1 ORDER BY seq"#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn balance(&mut self, user_id: Uuid) -> CoreResult<Decimal> {
        Ok(sqlx::query_scalar::<_, Decimal>(
            r#"SELECT COALESCE(SUM(CASE WHEN direction = 'credit' THEN amount ELSE -amount END), 0)
               FROM ledger_entries
               WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn insert_commission(&mut self, commission: &ReferralCommission) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO referral_commissions
                 (id, sponsor_id, referred_user_id, license_id, order_id, amount_usdt, status,
                  created_at, resolved_at, resolved_by)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(commission.id)
        .bind(commission.sponsor_id)
        .bind(commission.referred_user_id)
        .bind(commission.license_id)
        .bind(commission.order_id)
        .bind(commission.amount_usdt)
        .bind(commission.status)
        .bind(commission.created_at)
        .bind(commission.resolved_at)
        .bind(commission.resolved_by)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_commission(&mut self, id: Uuid) -> CoreResult<Option<ReferralCommission>> {
        Ok(sqlx::query_as::<_, ReferralCommission>(
            r#"SELECT * FROM referral_commissions WHERE id = $1 FOR UPDATE"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn update_commission(&mut self, commission: &ReferralCommission) -> CoreResult<()> {
        sqlx::query(
            r#"UPDATE referral_commissions
               SET status = $2, resolved_at = $3, resolved_by = $4
               WHERE id = $1"#,
        )
        .bind(commission.id)
        .bind(commission.status)
        .bind(commission.resolved_at)
        .bind(commission.resolved_by)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commissions_for_order(
        &mut self,
        order_id: Uuid,
    ) -> CoreResult<Vec<ReferralCommission>> {
        Ok(sqlx::query_as::<_, ReferralCommission>(
            r#"SELECT * FROM referral_commissions WHERE order_id = $1 ORDER BY created_at, id"#,
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_wallet(&mut self, wallet: &AdminWallet) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO admin_wallets
                 (id, label, address, status, assigned_count, last_assigned_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(wallet.id)
        .bind(&wallet.label)
        .bind(&wallet.address)
        .bind(wallet.status)
        .bind(wallet.assigned_count)
        .bind(wallet.last_assigned_at)
        .bind(wallet.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return RuleViolation::InvalidInput("wallet address already registered".into())
                    .into();
            }
            CoreError::from(e)
        })?;
        Ok(())
    }

    async fn assign_next_wallet(&mut self, now: DateTime<Utc>) -> CoreResult<Option<AdminWallet>> {
        // Selection and increment are one statement; the row lock keeps two
        // concurrent orders from reading the same count.
        Ok(sqlx::query_as::<_, AdminWallet>(
            r#"UPDATE admin_wallets
               SET assigned_count = assigned_count + 1, last_assigned_at = $1
               WHERE id = (
                   SELECT id FROM admin_wallets
                   WHERE status = 'active'
                   ORDER BY assigned_count ASC, last_assigned_at ASC NULLS FIRST, created_at, id
                   LIMIT 1
                   FOR UPDATE
               )
               RETURNING *"#,
        )
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn set_wallet_status(
        &mut self,
        id: Uuid,
        status: WalletStatus,
    ) -> CoreResult<Option<AdminWallet>> {
        Ok(sqlx::query_as::<_, AdminWallet>(
            r#"UPDATE admin_wallets SET status = $2 WHERE id = $1 RETURNING *"#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn wallets(&mut self) -> CoreResult<Vec<AdminWallet>> {
        Ok(
            sqlx::query_as::<_, AdminWallet>(r#"SELECT * FROM admin_wallets ORDER BY created_at, id"#)
                .fetch_all(&mut *self.tx)
                .await?,
        )
    }

    async fn insert_audit(&mut self, record: &AuditRecord) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO audit_logs
                 (id, action, entity, entity_id, actor_id, old_values, new_values, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(record.id)
        .bind(&record.action)
        .bind(&record.entity)
        .bind(record.entity_id)
        .bind(record.actor_id)
        .bind(&record.old_values)
        .bind(&record.new_values)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn audit_records(&mut self, entity_id: Uuid) -> CoreResult<Vec<AuditRecord>> {
        Ok(sqlx::query_as::<_, AuditRecord>(
            r#"SELECT * FROM audit_logs WHERE entity_id = $1 ORDER BY seq"#,
        )
        .bind(entity_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }
}
