//! Deposit orders, from wallet assignment to confirmation or expiry.

use std::time::Duration as StdDuration;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit;
use crate::engine::usdt;
use crate::error::{CoreError, CoreResult, RuleViolation};
use crate::ledger::{NewLedgerEntry, record_entry};
use crate::platform::{Platform, require_product, require_user};
use crate::scheduler::Task;
use crate::store::StoreTx;
use crate::types::{
    AuditRecord, CommissionStatus, LicenseFlags, LicenseStatus, OrderDeposit, OrderStatus, RefType,
    ReferralCommission, UserLicense, UserStatus,
};
use crate::wallets::assign_wallet;

/// Everything one confirmation created.
#[derive(Debug, Clone, Serialize)]
pub struct Confirmation {
    pub order: OrderDeposit,
    pub license: UserLicense,
    /// Present when the buyer has a sponsor.
    pub commission: Option<ReferralCommission>,
}

async fn require_order(tx: &mut dyn StoreTx, id: Uuid) -> CoreResult<OrderDeposit> {
    tx.lock_order(id)
        .await?
        .ok_or_else(|| CoreError::not_found("order", id))
}

impl Platform {
    pub async fn order(&self, id: Uuid) -> CoreResult<OrderDeposit> {
        let mut tx = self.store.begin().await?;
        let order = require_order(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(order)
    }

    pub async fn orders_for_user(&self, user_id: Uuid) -> CoreResult<Vec<OrderDeposit>> {
        let mut tx = self.store.begin().await?;
        let orders = tx.orders_for_user(user_id).await?;
        tx.commit().await?;
        Ok(orders)
    }

    /// Opens a pending order for the product's current price and schedules
    /// its expiry.
    pub async fn create_order(&self, user_id: Uuid, product_id: Uuid) -> CoreResult<OrderDeposit> {
        let settings = self.settings.current().await?;
        let now = self.now();
        let mut tx = self.store.begin().await?;

        // The user row lock serialises order creation per user.
        let user = require_user(&mut *tx, user_id).await?;
        if user.status != UserStatus::Active {
            return Err(RuleViolation::InactiveUser { user_id }.into());
        }
        if let Some(open) = tx.open_order_for_user(user_id).await? {
            return Err(RuleViolation::OpenOrderExists {
                user_id,
                order_id: open.id,
            }
            .into());
        }

        let product = require_product(&mut *tx, product_id).await?;
        if !product.active {
            return Err(RuleViolation::InactiveProduct { product_id }.into());
        }

        let window = Duration::try_minutes(settings.order_expiration_minutes)
            .ok_or_else(|| RuleViolation::InvalidInput("order expiration is out of range".into()))?;
        let wallet = assign_wallet(&mut *tx, now).await?;
        let order = OrderDeposit {
            id: Uuid::new_v4(),
            user_id,
            product_id,
            amount_usdt: product.price_usdt,
            wallet_address: wallet.address,
            status: OrderStatus::Pending,
            tx_hash: None,
            expires_at: now + window,
            created_at: now,
            updated_at: now,
        };
        tx.insert_order(&order).await?;
        tx.commit().await?;

        let delay = window.to_std().unwrap_or(StdDuration::ZERO);
        if let Err(e) = self
            .tasks
            .enqueue(Task::ExpireOrder { order_id: order.id }, delay)
            .await
        {
            // The startup sweep still expires it.
            error!(order_id = %order.id, "failed to schedule order expiry: {e}");
        }

        info!(order_id = %order.id, %user_id, amount = %order.amount_usdt, "order created");
        Ok(order)
    }

    /// Marks a pending order as paid once the user pastes their transaction hash.
    pub async fn submit_tx_hash(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        tx_hash: &str,
    ) -> CoreResult<OrderDeposit> {
        let tx_hash = tx_hash.trim();
        if tx_hash.is_empty() {
            return Err(RuleViolation::InvalidInput("transaction hash is required".into()).into());
        }

        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut order = require_order(&mut *tx, order_id).await?;
        if order.user_id != user_id {
            return Err(CoreError::not_found("order", order_id));
        }
        if order.status != OrderStatus::Pending {
            return Err(CoreError::invalid_state("order", order_id, order.status, "pending"));
        }
        if now >= order.expires_at {
            return Err(RuleViolation::OrderDeadlinePassed { order_id }.into());
        }
        if let Some(other) = tx.order_by_tx_hash(tx_hash).await? {
            if other.id != order_id {
                return Err(RuleViolation::DuplicateTxHash.into());
            }
        }

        order.status = OrderStatus::Paid;
        order.tx_hash = Some(tx_hash.to_string());
        order.updated_at = now;
        tx.update_order(&order).await?;
        tx.commit().await?;

        info!(%order_id, "order paid");
        Ok(order)
    }

    /// Confirms a paid order: creates the license, debits the purchase and
    /// opens a pending commission for the sponsor, all in one transaction.
    pub async fn confirm_order(&self, order_id: Uuid, admin_id: Uuid) -> CoreResult<Confirmation> {
        let settings = self.settings.current().await?;
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut order = require_order(&mut *tx, order_id).await?;
        if order.status != OrderStatus::Paid {
            return Err(CoreError::invalid_state("order", order_id, order.status, "paid"));
        }
        let user = require_user(&mut *tx, order.user_id).await?;
        let product = require_product(&mut *tx, order.product_id).await?;

        let before = order.clone();
        order.status = OrderStatus::Confirmed;
        order.updated_at = now;
        tx.update_order(&order).await?;

        let license = UserLicense {
            id: Uuid::new_v4(),
            user_id: user.id,
            product_id: product.id,
            order_id,
            principal_usdt: order.amount_usdt,
            status: LicenseStatus::Active,
            started_at: now,
            ends_at: now + Duration::days(i64::from(product.duration_days)),
            days_generated: 0,
            total_earned_usdt: Decimal::ZERO,
            cashback_accum: Decimal::ZERO,
            potential_accum: Decimal::ZERO,
            flags: LicenseFlags::default(),
            created_at: now,
            updated_at: now,
        };
        tx.insert_license(&license).await?;

        record_entry(
            &mut *tx,
            NewLedgerEntry::debit(user.id, order.amount_usdt, RefType::Order, order_id)
                .meta(json!({ "license_id": license.id, "product_id": product.id })),
            now,
        )
        .await?;

        let commission_amount = usdt(order.amount_usdt * settings.referral_commission_rate);
        let commission = match user.sponsor_id {
            Some(sponsor_id) if commission_amount > Decimal::ZERO => {
                let commission = ReferralCommission {
                    id: Uuid::new_v4(),
                    sponsor_id,
                    referred_user_id: user.id,
                    license_id: license.id,
                    order_id,
                    amount_usdt: commission_amount,
                    status: CommissionStatus::Pending,
                    created_at: now,
                    resolved_at: None,
                    resolved_by: None,
                };
                tx.insert_commission(&commission).await?;
                Some(commission)
            }
            _ => None,
        };

        audit::record(
            &mut *tx,
            AuditRecord::new("order.confirm", "order", order_id, Some(admin_id), now).values(
                &before,
                &json!({ "order": &order, "license_id": license.id }),
            ),
        )
        .await?;
        tx.commit().await?;

        info!(
            %order_id,
            license_id = %license.id,
            commission = commission.is_some(),
            "order confirmed"
        );
        Ok(Confirmation {
            order,
            license,
            commission,
        })
    }

    /// Rejects a pending or paid order.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        admin_id: Uuid,
        reason: Option<&str>,
    ) -> CoreResult<OrderDeposit> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut order = require_order(&mut *tx, order_id).await?;
        if !order.status.is_open() {
            return Err(CoreError::invalid_state(
                "order",
                order_id,
                order.status,
                "pending or paid",
            ));
        }

        let before = order.clone();
        order.status = OrderStatus::Canceled;
        order.updated_at = now;
        tx.update_order(&order).await?;

        audit::record(
            &mut *tx,
            AuditRecord::new("order.cancel", "order", order_id, Some(admin_id), now)
                .values(&before, &json!({ "order": &order, "reason": reason })),
        )
        .await?;
        tx.commit().await?;

        info!(%order_id, "order canceled");
        Ok(order)
    }

    /// Expires the order if it is still pending. Returns whether it changed;
    /// orders that moved on in the meantime are left as they are.
    pub async fn expire_order(&self, order_id: Uuid) -> CoreResult<bool> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let Some(mut order) = tx.lock_order(order_id).await? else {
            warn!(%order_id, "expiry fired for unknown order");
            return Ok(false);
        };
        if order.status != OrderStatus::Pending {
            debug!(%order_id, status = %order.status, "stale expiry ignored");
            return Ok(false);
        }

        order.status = OrderStatus::Expired;
        order.updated_at = now;
        tx.update_order(&order).await?;
        tx.commit().await?;

        info!(%order_id, "order expired");
        Ok(true)
    }

    /// Expires every pending order past its deadline. Covers expiry jobs that
    /// were lost, e.g. across a restart.
    pub async fn expire_overdue_orders(&self) -> CoreResult<usize> {
        let now = self.now();
        let overdue = {
            let mut tx = self.store.begin().await?;
            let ids = tx.overdue_order_ids(now).await?;
            tx.commit().await?;
            ids
        };

        let mut expired = 0;
        for order_id in overdue {
            if self.expire_order(order_id).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "overdue orders expired");
        }
        Ok(expired)
    }
}
