use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreTx};
use crate::error::{CoreError, CoreResult, RuleViolation};
use crate::types::{
    AdminWallet, AuditRecord, LedgerEntry, LicenseDailyEarning, LicenseProduct, LicenseStatus,
    OrderDeposit, OrderStatus, ReferralCommission, User, UserLicense, UserStatus, WalletStatus,
};

#[derive(Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    products: HashMap<Uuid, LicenseProduct>,
    orders: HashMap<Uuid, OrderDeposit>,
    licenses: HashMap<Uuid, UserLicense>,
    earnings: BTreeMap<(Uuid, i32), LicenseDailyEarning>,
    ledger: Vec<LedgerEntry>,
    commissions: HashMap<Uuid, ReferralCommission>,
    wallets: HashMap<Uuid, AdminWallet>,
    audit: Vec<AuditRecord>,
}

/// A store kept in process memory.
///
/// Transactions are serialised behind one mutex and work on a copy of the
/// state that replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

fn missing(entity: &'static str, id: Uuid) -> CoreError {
    CoreError::not_found(entity, id)
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> CoreResult<()> {
        if self
            .work
            .users
            .values()
            .any(|u| u.ref_code == user.ref_code || u.email == user.email)
        {
            return Err(
                RuleViolation::InvalidInput("email or referral code already taken".into()).into(),
            );
        }
        self.work.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn lock_user(&mut self, id: Uuid) -> CoreResult<Option<User>> {
        Ok(self.work.users.get(&id).cloned())
    }

    async fn user_by_ref_code(&mut self, ref_code: &str) -> CoreResult<Option<User>> {
        Ok(self
            .work
            .users
            .values()
            .find(|u| u.ref_code == ref_code)
            .cloned())
    }

    async fn set_user_status(&mut self, id: Uuid, status: UserStatus) -> CoreResult<()> {
        let user = self.work.users.get_mut(&id).ok_or_else(|| missing("user", id))?;
        user.status = status;
        Ok(())
    }

    async fn insert_product(&mut self, product: &LicenseProduct) -> CoreResult<()> {
        self.work.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn product(&mut self, id: Uuid) -> CoreResult<Option<LicenseProduct>> {
        Ok(self.work.products.get(&id).cloned())
    }

    async fn update_product(&mut self, product: &LicenseProduct) -> CoreResult<()> {
        let slot = self
            .work
            .products
            .get_mut(&product.id)
            .ok_or_else(|| missing("product", product.id))?;
        *slot = product.clone();
        Ok(())
    }

    async fn delete_product(&mut self, id: Uuid) -> CoreResult<()> {
        self.work.products.remove(&id);
        Ok(())
    }

    async fn product_in_use(&mut self, id: Uuid) -> CoreResult<bool> {
        Ok(self.work.orders.values().any(|o| o.product_id == id)
            || self.work.licenses.values().any(|l| l.product_id == id))
    }

    async fn products(&mut self, active_only: bool) -> CoreResult<Vec<LicenseProduct>> {
        let mut items: Vec<LicenseProduct> = self
            .work
            .products
            .values()
            .filter(|p| !active_only || p.active)
            .cloned()
            .collect();
        items.sort_by_key(|p| (p.created_at, p.id));
        Ok(items)
    }

    async fn insert_order(&mut self, order: &OrderDeposit) -> CoreResult<()> {
        self.work.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn lock_order(&mut self, id: Uuid) -> CoreResult<Option<OrderDeposit>> {
        Ok(self.work.orders.get(&id).cloned())
    }

    async fn update_order(&mut self, order: &OrderDeposit) -> CoreResult<()> {
        let slot = self
            .work
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| missing("order", order.id))?;
        *slot = order.clone();
        Ok(())
    }

    async fn open_order_for_user(&mut self, user_id: Uuid) -> CoreResult<Option<OrderDeposit>> {
        Ok(self
            .work
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.status.is_open())
            .max_by_key(|o| o.created_at)
            .cloned())
    }

    async fn order_by_tx_hash(&mut self, tx_hash: &str) -> CoreResult<Option<OrderDeposit>> {
        Ok(self
            .work
            .orders
            .values()
            .find(|o| o.tx_hash.as_deref() == Some(tx_hash))
            .cloned())
    }

    async fn overdue_order_ids(&mut self, now: DateTime<Utc>) -> CoreResult<Vec<Uuid>> {
        let mut overdue: Vec<&OrderDeposit> = self
            .work
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.expires_at <= now)
            .collect();
        overdue.sort_by_key(|o| (o.expires_at, o.id));
        Ok(overdue.into_iter().map(|o| o.id).collect())
    }

    async fn orders_for_user(&mut self, user_id: Uuid) -> CoreResult<Vec<OrderDeposit>> {
        let mut items: Vec<OrderDeposit> = self
            .work
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|o| (o.created_at, o.id));
        Ok(items)
    }

    async fn insert_license(&mut self, license: &UserLicense) -> CoreResult<()> {
        self.work.licenses.insert(license.id, license.clone());
        Ok(())
    }

    async fn lock_license(&mut self, id: Uuid) -> CoreResult<Option<UserLicense>> {
        Ok(self.work.licenses.get(&id).cloned())
    }

    async fn update_license(&mut self, license: &UserLicense) -> CoreResult<()> {
        let slot = self
            .work
            .licenses
            .get_mut(&license.id)
            .ok_or_else(|| missing("license", license.id))?;
        *slot = license.clone();
        Ok(())
    }

    async fn license_ids_with_status(&mut self, status: LicenseStatus) -> CoreResult<Vec<Uuid>> {
        let mut matching: Vec<&UserLicense> = self
            .work
            .licenses
            .values()
            .filter(|l| l.status == status)
            .collect();
        matching.sort_by_key(|l| (l.started_at, l.id));
        Ok(matching.into_iter().map(|l| l.id).collect())
    }

    async fn licenses_for_user(&mut self, user_id: Uuid) -> CoreResult<Vec<UserLicense>> {
        let mut items: Vec<UserLicense> = self
            .work
            .licenses
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|l| (l.created_at, l.id));
        Ok(items)
    }

    async fn insert_daily_earning(&mut self, earning: &LicenseDailyEarning) -> CoreResult<()> {
        let key = (earning.license_id, earning.day_index);
        if self.work.earnings.contains_key(&key) {
            return Err(RuleViolation::DayAlreadyProcessed {
                license_id: earning.license_id,
                day_index: earning.day_index,
            }
            .into());
        }
        self.work.earnings.insert(key, earning.clone());
        Ok(())
    }

    async fn daily_earning(
        &mut self,
        license_id: Uuid,
        day_index: i32,
    ) -> CoreResult<Option<LicenseDailyEarning>> {
        Ok(self.work.earnings.get(&(license_id, day_index)).cloned())
    }

    async fn delete_daily_earning(&mut self, license_id: Uuid, day_index: i32) -> CoreResult<()> {
        self.work.earnings.remove(&(license_id, day_index));
        Ok(())
    }

    async fn delete_daily_earnings_after(
        &mut self,
        license_id: Uuid,
        after_day: i32,
    ) -> CoreResult<Vec<LicenseDailyEarning>> {
        let doomed: Vec<(Uuid, i32)> = self
            .work
            .earnings
            .range((license_id, after_day.saturating_add(1))..=(license_id, i32::MAX))
            .map(|(key, _)| *key)
            .collect();
        Ok(doomed
            .into_iter()
            .filter_map(|key| self.work.earnings.remove(&key))
            .collect())
    }

    async fn daily_earnings(&mut self, license_id: Uuid) -> CoreResult<Vec<LicenseDailyEarning>> {
        Ok(self
            .work
            .earnings
            .range((license_id, i32::MIN)..=(license_id, i32::MAX))
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> CoreResult<()> {
        if let Some(entry_id) = entry.reversal_target() {
            if self.reversal_of(entry_id).await?.is_some() {
                return Err(RuleViolation::AlreadyReversed { entry_id }.into());
            }
        }
        self.work.ledger.push(entry.clone());
        Ok(())
    }

    async fn ledger_entry(&mut self, id: Uuid) -> CoreResult<Option<LedgerEntry>> {
        Ok(self.work.ledger.iter().find(|e| e.id == id).cloned())
    }

    async fn reversal_of(&mut self, entry_id: Uuid) -> CoreResult<Option<LedgerEntry>> {
        let target = entry_id.to_string();
        Ok(self
            .work
            .ledger
            .iter()
            .find(|e| e.meta.get("reversal_of").and_then(|v| v.as_str()) == Some(target.as_str()))
            .cloned())
    }

    async fn ledger_entries(&mut self, user_id: Uuid) -> CoreResult<Vec<LedgerEntry>> {
        Ok(self
            .work
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn balance(&mut self, user_id: Uuid) -> CoreResult<Decimal> {
        Ok(self
            .work
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(LedgerEntry::signed_amount)
            .sum())
    }

    async fn insert_commission(&mut self, commission: &ReferralCommission) -> CoreResult<()> {
        self.work.commissions.insert(commission.id, commission.clone());
        Ok(())
    }

    async fn lock_commission(&mut self, id: Uuid) -> CoreResult<Option<ReferralCommission>> {
        Ok(self.work.commissions.get(&id).cloned())
    }

    async fn update_commission(&mut self, commission: &ReferralCommission) -> CoreResult<()> {
        let slot = self
            .work
            .commissions
            .get_mut(&commission.id)
            .ok_or_else(|| missing("commission", commission.id))?;
        *slot = commission.clone();
        Ok(())
    }

    async fn commissions_for_order(
        &mut self,
        order_id: Uuid,
    ) -> CoreResult<Vec<ReferralCommission>> {
        let mut items: Vec<ReferralCommission> = self
            .work
            .commissions
            .values()
            .filter(|c| c.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by_key(|c| (c.created_at, c.id));
        Ok(items)
    }

    async fn insert_wallet(&mut self, wallet: &AdminWallet) -> CoreResult<()> {
        if self.work.wallets.values().any(|w| w.address == wallet.address) {
            return Err(RuleViolation::InvalidInput("wallet address already registered".into()).into());
        }
        self.work.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn assign_next_wallet(&mut self, now: DateTime<Utc>) -> CoreResult<Option<AdminWallet>> {
        // None sorts before Some, so never-assigned wallets win ties.
        let next = self
            .work
            .wallets
            .values_mut()
            .filter(|w| w.status == WalletStatus::Active)
            .min_by_key(|w| (w.assigned_count, w.last_assigned_at, w.created_at, w.id));
        Ok(next.map(|wallet| {
            wallet.assigned_count += 1;
            wallet.last_assigned_at = Some(now);
            wallet.clone()
        }))
    }

    async fn set_wallet_status(
        &mut self,
        id: Uuid,
        status: WalletStatus,
    ) -> CoreResult<Option<AdminWallet>> {
        Ok(self.work.wallets.get_mut(&id).map(|wallet| {
            wallet.status = status;
            wallet.clone()
        }))
    }

    async fn wallets(&mut self) -> CoreResult<Vec<AdminWallet>> {
        let mut items: Vec<AdminWallet> = self.work.wallets.values().cloned().collect();
        items.sort_by_key(|w| (w.created_at, w.id));
        Ok(items)
    }

    async fn insert_audit(&mut self, record: &AuditRecord) -> CoreResult<()> {
        self.work.audit.push(record.clone());
        Ok(())
    }

    async fn audit_records(&mut self, entity_id: Uuid) -> CoreResult<Vec<AuditRecord>> {
        Ok(self
            .work
            .audit
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
