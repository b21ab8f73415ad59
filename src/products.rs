use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::audit;
use crate::error::{CoreResult, RuleViolation};
use crate::platform::{Platform, require_product};
use crate::types::{AuditRecord, LicenseProduct};

/// Admin input for creating or replacing a catalog entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductInput {
    pub name: String,
    pub price_usdt: Decimal,
    pub daily_rate: Decimal,
    pub duration_days: i32,
    pub cap_percentage: Decimal,
    #[serde(default)]
    pub cashback_cap: Decimal,
    #[serde(default)]
    pub potential_cap: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ProductInput {
    fn validate(&self) -> CoreResult<()> {
        let invalid = |msg: &str| -> CoreResult<()> {
            Err(RuleViolation::InvalidInput(msg.to_string()).into())
        };

        if self.name.trim().is_empty() {
            return invalid("product name is required");
        }
        if self.price_usdt <= Decimal::ZERO {
            return invalid("price_usdt must be positive");
        }
        if self.daily_rate <= Decimal::ZERO || self.daily_rate > Decimal::ONE {
            return invalid("daily_rate must be in (0, 1]");
        }
        if !(1..=36_500).contains(&self.duration_days) {
            return invalid("duration_days must be between 1 and 36500");
        }
        if self.cap_percentage <= Decimal::ZERO {
            return invalid("cap_percentage must be positive");
        }
        if self.cashback_cap < Decimal::ZERO || self.potential_cap < Decimal::ZERO {
            return invalid("caps cannot be negative");
        }
        Ok(())
    }
}

impl Platform {
    pub async fn products(&self, active_only: bool) -> CoreResult<Vec<LicenseProduct>> {
        let mut tx = self.store.begin().await?;
        let products = tx.products(active_only).await?;
        tx.commit().await?;
        Ok(products)
    }

    pub async fn product(&self, id: Uuid) -> CoreResult<LicenseProduct> {
        let mut tx = self.store.begin().await?;
        let product = require_product(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(product)
    }

    pub async fn create_product(
        &self,
        input: ProductInput,
        actor_id: Uuid,
    ) -> CoreResult<LicenseProduct> {
        input.validate()?;
        let now = self.now();
        let product = LicenseProduct {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            price_usdt: input.price_usdt,
            daily_rate: input.daily_rate,
            duration_days: input.duration_days,
            cap_percentage: input.cap_percentage,
            cashback_cap: input.cashback_cap,
            potential_cap: input.potential_cap,
            active: input.active,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_product(&product).await?;
        audit::record(
            &mut *tx,
            AuditRecord::new("product.create", "product", product.id, Some(actor_id), now)
                .values(&serde_json::Value::Null, &product),
        )
        .await?;
        tx.commit().await?;

        info!(product_id = %product.id, name = %product.name, "product created");
        Ok(product)
    }

    /// Replaces a product's terms. Existing licenses keep their snapshot principal.
    pub async fn update_product(
        &self,
        id: Uuid,
        input: ProductInput,
        actor_id: Uuid,
    ) -> CoreResult<LicenseProduct> {
        input.validate()?;
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let before = require_product(&mut *tx, id).await?;
        let product = LicenseProduct {
            name: input.name.trim().to_string(),
            price_usdt: input.price_usdt,
            daily_rate: input.daily_rate,
            duration_days: input.duration_days,
            cap_percentage: input.cap_percentage,
            cashback_cap: input.cashback_cap,
            potential_cap: input.potential_cap,
            active: input.active,
            updated_at: now,
            ..before.clone()
        };
        tx.update_product(&product).await?;
        audit::record(
            &mut *tx,
            AuditRecord::new("product.update", "product", id, Some(actor_id), now)
                .values(&before, &product),
        )
        .await?;
        tx.commit().await?;
        Ok(product)
    }

    /// Deletes a product nobody ever ordered. Referenced products should be
    /// deactivated instead.
    pub async fn delete_product(&self, id: Uuid, actor_id: Uuid) -> CoreResult<()> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let product = require_product(&mut *tx, id).await?;
        if tx.product_in_use(id).await? {
            return Err(RuleViolation::ProductInUse { product_id: id }.into());
        }
        tx.delete_product(id).await?;
        audit::record(
            &mut *tx,
            AuditRecord::new("product.delete", "product", id, Some(actor_id), now)
                .values(&product, &serde_json::Value::Null),
        )
        .await?;
        tx.commit().await?;

        info!(product_id = %id, "product deleted");
        Ok(())
    }
}
