use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::audit;
use crate::error::{CoreError, CoreResult, RuleViolation};
use crate::platform::Platform;
use crate::store::StoreTx;
use crate::types::{AdminWallet, AuditRecord, WalletStatus};

/// Takes the next deposit wallet inside the caller's transaction.
pub(crate) async fn assign_wallet(
    tx: &mut dyn StoreTx,
    now: DateTime<Utc>,
) -> CoreResult<AdminWallet> {
    match tx.assign_next_wallet(now).await? {
        Some(wallet) => Ok(wallet),
        None => {
            error!("wallet pool has no active wallets");
            Err(CoreError::NoActiveWallets)
        }
    }
}

impl Platform {
    /// The active wallet with the fewest assignments, oldest use first.
    pub async fn next_wallet_for_assignment(&self) -> CoreResult<AdminWallet> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let wallet = assign_wallet(&mut *tx, now).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    pub async fn add_wallet(
        &self,
        label: &str,
        address: &str,
        actor_id: Uuid,
    ) -> CoreResult<AdminWallet> {
        let address = address.trim();
        if address.is_empty() {
            return Err(RuleViolation::InvalidInput("wallet address is required".into()).into());
        }

        let now = self.now();
        let wallet = AdminWallet {
            id: Uuid::new_v4(),
            label: label.trim().to_string(),
            address: address.to_string(),
            status: WalletStatus::Active,
            assigned_count: 0,
            last_assigned_at: None,
            created_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_wallet(&wallet).await?;
        audit::record(
            &mut *tx,
            AuditRecord::new("wallet.add", "wallet", wallet.id, Some(actor_id), now)
                .values(&serde_json::Value::Null, &wallet),
        )
        .await?;
        tx.commit().await?;

        info!(wallet_id = %wallet.id, "wallet added");
        Ok(wallet)
    }

    pub async fn set_wallet_status(
        &self,
        wallet_id: Uuid,
        status: WalletStatus,
        actor_id: Uuid,
    ) -> CoreResult<AdminWallet> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let wallet = tx
            .set_wallet_status(wallet_id, status)
            .await?
            .ok_or_else(|| CoreError::not_found("wallet", wallet_id))?;
        audit::record(
            &mut *tx,
            AuditRecord::new("wallet.status", "wallet", wallet_id, Some(actor_id), now)
                .values(&serde_json::Value::Null, &wallet),
        )
        .await?;
        tx.commit().await?;
        Ok(wallet)
    }

    pub async fn wallets(&self) -> CoreResult<Vec<AdminWallet>> {
        let mut tx = self.store.begin().await?;
        let wallets = tx.wallets().await?;
        tx.commit().await?;
        Ok(wallets)
    }
}
