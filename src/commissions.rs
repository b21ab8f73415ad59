//! Admin resolution of pending referral commissions.

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{NewLedgerEntry, record_entry};
use crate::platform::Platform;
use crate::types::{AuditRecord, CommissionStatus, RefType, ReferralCommission};

impl Platform {
    pub async fn commissions_for_order(
        &self,
        order_id: Uuid,
    ) -> CoreResult<Vec<ReferralCommission>> {
        let mut tx = self.store.begin().await?;
        let commissions = tx.commissions_for_order(order_id).await?;
        tx.commit().await?;
        Ok(commissions)
    }

    /// Pays a pending commission out to the sponsor's ledger.
    pub async fn release_commission(
        &self,
        commission_id: Uuid,
        admin_id: Uuid,
    ) -> CoreResult<ReferralCommission> {
        self.resolve_commission(commission_id, CommissionStatus::Released, admin_id)
            .await
    }

    /// Drops a pending commission without touching the ledger.
    pub async fn cancel_commission(
        &self,
        commission_id: Uuid,
        admin_id: Uuid,
    ) -> CoreResult<ReferralCommission> {
        self.resolve_commission(commission_id, CommissionStatus::Cancelled, admin_id)
            .await
    }

    async fn resolve_commission(
        &self,
        commission_id: Uuid,
        to: CommissionStatus,
        admin_id: Uuid,
    ) -> CoreResult<ReferralCommission> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut commission = tx
            .lock_commission(commission_id)
            .await?
            .ok_or_else(|| CoreError::not_found("commission", commission_id))?;
        if commission.status != CommissionStatus::Pending {
            return Err(CoreError::invalid_state(
                "commission",
                commission_id,
                commission.status,
                "pending",
            ));
        }

        let before = commission.clone();
        commission.status = to;
        commission.resolved_at = Some(now);
        commission.resolved_by = Some(admin_id);
        tx.update_commission(&commission).await?;

        if to == CommissionStatus::Released {
            record_entry(
                &mut *tx,
                NewLedgerEntry::credit(
                    commission.sponsor_id,
                    commission.amount_usdt,
                    RefType::ReferralCommission,
                    commission.id,
                )
                .meta(json!({
                    "order_id": commission.order_id,
                    "referred_user_id": commission.referred_user_id,
                })),
                now,
            )
            .await?;
        }

        audit::record(
            &mut *tx,
            AuditRecord::new("commission.resolve", "commission", commission_id, Some(admin_id), now)
                .values(&before, &commission),
        )
        .await?;
        tx.commit().await?;

        info!(%commission_id, status = %to, amount = %commission.amount_usdt, "commission resolved");
        Ok(commission)
    }
}
