use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::platform::Platform;
use crate::store::StoreTx;
use crate::types::AuditRecord;

fn snapshot<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

impl AuditRecord {
    pub fn new(
        action: &str,
        entity: &str,
        entity_id: Uuid,
        actor_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id,
            actor_id,
            old_values: serde_json::Value::Null,
            new_values: serde_json::Value::Null,
            created_at: at,
        }
    }

    pub fn values<O: Serialize, N: Serialize>(mut self, old: &O, new: &N) -> Self {
        self.old_values = snapshot(old);
        self.new_values = snapshot(new);
        self
    }
}

/// Writes the record inside the caller's transaction.
pub async fn record(tx: &mut dyn StoreTx, record: AuditRecord) -> CoreResult<()> {
    tx.insert_audit(&record).await?;
    info!(
        action = %record.action,
        entity = %record.entity,
        entity_id = %record.entity_id,
        actor_id = ?record.actor_id,
        "audit"
    );
    Ok(())
}

impl Platform {
    /// Audit trail of one entity, oldest first.
    pub async fn audit_trail(&self, entity_id: Uuid) -> CoreResult<Vec<AuditRecord>> {
        let mut tx = self.store.begin().await?;
        let records = tx.audit_records(entity_id).await?;
        tx.commit().await?;
        Ok(records)
    }
}
