//! Transactional persistence.
//!
//! Every core operation runs inside one [`StoreTx`]: it either commits as a
//! whole or, when dropped without [`StoreTx::commit`], leaves nothing behind.
//! `lock_*` methods read a row for a read-modify-write and hold it until the
//! transaction ends.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::CoreResult;
use crate::types::{
    AdminWallet, AuditRecord, LedgerEntry, LicenseDailyEarning, LicenseProduct, LicenseStatus,
    OrderDeposit, ReferralCommission, User, UserLicense, UserStatus, WalletStatus,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn commit(self: Box<Self>) -> CoreResult<()>;

    // users
    async fn insert_user(&mut self, user: &User) -> CoreResult<()>;
    async fn lock_user(&mut self, id: Uuid) -> CoreResult<Option<User>>;
    async fn user_by_ref_code(&mut self, ref_code: &str) -> CoreResult<Option<User>>;
    async fn set_user_status(&mut self, id: Uuid, status: UserStatus) -> CoreResult<()>;

    // products
    async fn insert_product(&mut self, product: &LicenseProduct) -> CoreResult<()>;
    async fn product(&mut self, id: Uuid) -> CoreResult<Option<LicenseProduct>>;
    async fn update_product(&mut self, product: &LicenseProduct) -> CoreResult<()>;
    async fn delete_product(&mut self, id: Uuid) -> CoreResult<()>;
    async fn product_in_use(&mut self, id: Uuid) -> CoreResult<bool>;
    async fn products(&mut self, active_only: bool) -> CoreResult<Vec<LicenseProduct>>;

    // orders
    async fn insert_order(&mut self, order: &OrderDeposit) -> CoreResult<()>;
    async fn lock_order(&mut self, id: Uuid) -> CoreResult<Option<OrderDeposit>>;
    async fn update_order(&mut self, order: &OrderDeposit) -> CoreResult<()>;
    async fn open_order_for_user(&mut self, user_id: Uuid) -> CoreResult<Option<OrderDeposit>>;
    async fn order_by_tx_hash(&mut self, tx_hash: &str) -> CoreResult<Option<OrderDeposit>>;
    /// Pending orders whose deadline is at or before `now`.
    async fn overdue_order_ids(&mut self, now: DateTime<Utc>) -> CoreResult<Vec<Uuid>>;
    async fn orders_for_user(&mut self, user_id: Uuid) -> CoreResult<Vec<OrderDeposit>>;

    // licenses
    async fn insert_license(&mut self, license: &UserLicense) -> CoreResult<()>;
    async fn lock_license(&mut self, id: Uuid) -> CoreResult<Option<UserLicense>>;
    async fn update_license(&mut self, license: &UserLicense) -> CoreResult<()>;
    async fn license_ids_with_status(&mut self, status: LicenseStatus) -> CoreResult<Vec<Uuid>>;
    async fn licenses_for_user(&mut self, user_id: Uuid) -> CoreResult<Vec<UserLicense>>;

    // daily earnings
    /// Fails with `DayAlreadyProcessed` if the `(license_id, day_index)` row exists.
    async fn insert_daily_earning(&mut self, earning: &LicenseDailyEarning) -> CoreResult<()>;
    async fn daily_earning(
        &mut self,
        license_id: Uuid,
        day_index: i32,
    ) -> CoreResult<Option<LicenseDailyEarning>>;
    async fn delete_daily_earning(&mut self, license_id: Uuid, day_index: i32) -> CoreResult<()>;
    /// Deletes and returns every row with `day_index > after_day`.
    async fn delete_daily_earnings_after(
        &mut self,
        license_id: Uuid,
        after_day: i32,
    ) -> CoreResult<Vec<LicenseDailyEarning>>;
    /// Rows ordered by `day_index`.
    async fn daily_earnings(&mut self, license_id: Uuid) -> CoreResult<Vec<LicenseDailyEarning>>;

    // ledger
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> CoreResult<()>;
    async fn ledger_entry(&mut self, id: Uuid) -> CoreResult<Option<LedgerEntry>>;
    /// The entry whose `meta.reversal_of` points at `entry_id`.
    async fn reversal_of(&mut self, entry_id: Uuid) -> CoreResult<Option<LedgerEntry>>;
    /// Entries in insertion order.
    async fn ledger_entries(&mut self, user_id: Uuid) -> CoreResult<Vec<LedgerEntry>>;
    async fn balance(&mut self, user_id: Uuid) -> CoreResult<Decimal>;

    // referral commissions
    async fn insert_commission(&mut self, commission: &ReferralCommission) -> CoreResult<()>;
    async fn lock_commission(&mut self, id: Uuid) -> CoreResult<Option<ReferralCommission>>;
    async fn update_commission(&mut self, commission: &ReferralCommission) -> CoreResult<()>;
    async fn commissions_for_order(&mut self, order_id: Uuid)
    -> CoreResult<Vec<ReferralCommission>>;

    // wallets
    async fn insert_wallet(&mut self, wallet: &AdminWallet) -> CoreResult<()>;
    /// Picks the least used active wallet, bumps its counter and stamps it.
    async fn assign_next_wallet(&mut self, now: DateTime<Utc>) -> CoreResult<Option<AdminWallet>>;
    async fn set_wallet_status(
        &mut self,
        id: Uuid,
        status: WalletStatus,
    ) -> CoreResult<Option<AdminWallet>>;
    async fn wallets(&mut self) -> CoreResult<Vec<AdminWallet>>;

    // audit
    async fn insert_audit(&mut self, record: &AuditRecord) -> CoreResult<()>;
    async fn audit_records(&mut self, entity_id: Uuid) -> CoreResult<Vec<AuditRecord>>;
}
