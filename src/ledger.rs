//! Append-only USDT ledger.
//!
//! Balances are never stored: a user's balance is the sum of credits minus
//! the sum of debits. Entries are never updated or deleted; a correction is a
//! new entry pointing at the original through `meta.reversal_of`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit;
use crate::error::{CoreError, CoreResult, RuleViolation};
use crate::platform::{Platform, require_user};
use crate::store::StoreTx;
use crate::types::{AuditRecord, Direction, LedgerEntry, RefType};

/// An entry about to be recorded.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub direction: Direction,
    pub amount: Decimal,
    pub ref_type: RefType,
    pub ref_id: Uuid,
    pub meta: serde_json::Value,
}

impl NewLedgerEntry {
    pub fn credit(user_id: Uuid, amount: Decimal, ref_type: RefType, ref_id: Uuid) -> Self {
        Self::new(user_id, Direction::Credit, amount, ref_type, ref_id)
    }

    pub fn debit(user_id: Uuid, amount: Decimal, ref_type: RefType, ref_id: Uuid) -> Self {
        Self::new(user_id, Direction::Debit, amount, ref_type, ref_id)
    }

    fn new(
        user_id: Uuid,
        direction: Direction,
        amount: Decimal,
        ref_type: RefType,
        ref_id: Uuid,
    ) -> Self {
        Self {
            user_id,
            direction,
            amount,
            ref_type,
            ref_id,
            meta: json!({}),
        }
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}

/// Records one immutable entry inside the caller's transaction.
pub async fn record_entry(
    tx: &mut dyn StoreTx,
    entry: NewLedgerEntry,
    at: DateTime<Utc>,
) -> CoreResult<LedgerEntry> {
    if entry.amount <= Decimal::ZERO {
        return Err(RuleViolation::InvalidAmount(entry.amount).into());
    }

    let entry = LedgerEntry {
        id: Uuid::new_v4(),
        user_id: entry.user_id,
        direction: entry.direction,
        amount: entry.amount,
        ref_type: entry.ref_type,
        ref_id: entry.ref_id,
        meta: entry.meta,
        created_at: at,
    };
    tx.insert_ledger_entry(&entry).await?;
    Ok(entry)
}

impl Platform {
    /// Records a single entry in its own transaction.
    pub async fn record_entry(&self, entry: NewLedgerEntry) -> CoreResult<LedgerEntry> {
        let mut tx = self.store.begin().await?;
        require_user(&mut *tx, entry.user_id).await?;
        let entry = record_entry(&mut *tx, entry, self.now()).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Credits minus debits over every committed entry of the user.
    pub async fn balance(&self, user_id: Uuid) -> CoreResult<Decimal> {
        let mut tx = self.store.begin().await?;
        require_user(&mut *tx, user_id).await?;
        let balance = tx.balance(user_id).await?;
        tx.commit().await?;
        Ok(balance)
    }

    pub async fn ledger_entries(&self, user_id: Uuid) -> CoreResult<Vec<LedgerEntry>> {
        let mut tx = self.store.begin().await?;
        let entries = tx.ledger_entries(user_id).await?;
        tx.commit().await?;
        Ok(entries)
    }

    /// Credits a manual bonus.
    pub async fn grant_bonus(
        &self,
        user_id: Uuid,
        amount: Decimal,
        note: &str,
        admin_id: Uuid,
    ) -> CoreResult<LedgerEntry> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        require_user(&mut *tx, user_id).await?;

        let entry = record_entry(
            &mut *tx,
            NewLedgerEntry::credit(user_id, amount, RefType::Bonus, Uuid::new_v4())
                .meta(json!({ "note": note, "granted_by": admin_id })),
            now,
        )
        .await?;
        audit::record(
            &mut *tx,
            AuditRecord::new("ledger.bonus", "user", user_id, Some(admin_id), now)
                .values(&json!({}), &entry),
        )
        .await?;

        tx.commit().await?;
        info!(%user_id, %amount, "bonus granted");
        Ok(entry)
    }

    /// Debits a manual payout that an admin sent on-chain.
    pub async fn record_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        tx_hash: &str,
        admin_id: Uuid,
    ) -> CoreResult<LedgerEntry> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        require_user(&mut *tx, user_id).await?;

        let balance = tx.balance(user_id).await?;
        if amount > balance {
            return Err(RuleViolation::InsufficientBalance {
                balance,
                requested: amount,
            }
            .into());
        }

        let entry = record_entry(
            &mut *tx,
            NewLedgerEntry::debit(user_id, amount, RefType::Withdrawal, Uuid::new_v4())
                .meta(json!({ "tx_hash": tx_hash.trim(), "approved_by": admin_id })),
            now,
        )
        .await?;
        audit::record(
            &mut *tx,
            AuditRecord::new("ledger.withdrawal", "user", user_id, Some(admin_id), now)
                .values(&json!({ "balance": balance }), &entry),
        )
        .await?;

        tx.commit().await?;
        info!(%user_id, %amount, "withdrawal recorded");
        Ok(entry)
    }

    /// Offsets an existing entry with one of the opposite direction.
    pub async fn reverse_entry(
        &self,
        entry_id: Uuid,
        reason: &str,
        admin_id: Uuid,
    ) -> CoreResult<LedgerEntry> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let original = tx
            .ledger_entry(entry_id)
            .await?
            .ok_or_else(|| CoreError::not_found("ledger entry", entry_id))?;
        if original.reversal_target().is_some() || tx.reversal_of(entry_id).await?.is_some() {
            return Err(RuleViolation::AlreadyReversed { entry_id }.into());
        }

        let reversal = record_entry(
            &mut *tx,
            NewLedgerEntry {
                user_id: original.user_id,
                direction: original.direction.opposite(),
                amount: original.amount,
                ref_type: original.ref_type,
                ref_id: original.ref_id,
                meta: json!({ "reversal_of": entry_id.to_string(), "reason": reason }),
            },
            now,
        )
        .await?;
        audit::record(
            &mut *tx,
            AuditRecord::new("ledger.reverse", "ledger_entry", entry_id, Some(admin_id), now)
                .values(&original, &reversal),
        )
        .await?;

        tx.commit().await?;
        Ok(reversal)
    }
}
