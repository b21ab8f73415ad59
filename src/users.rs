use tracing::info;
use uuid::Uuid;

use crate::audit;
use crate::error::{CoreError, CoreResult, RuleViolation};
use crate::platform::{Platform, require_user};
use crate::store::StoreTx;
use crate::types::{AuditRecord, User, UserStatus};

const REF_CODE_LEN: usize = 8;
const REF_CODE_ATTEMPTS: usize = 8;

fn new_ref_code() -> String {
    Uuid::new_v4().simple().to_string()[..REF_CODE_LEN].to_uppercase()
}

async fn unused_ref_code(tx: &mut dyn StoreTx) -> CoreResult<String> {
    for _ in 0..REF_CODE_ATTEMPTS {
        let code = new_ref_code();
        if tx.user_by_ref_code(&code).await?.is_none() {
            return Ok(code);
        }
    }
    Err(CoreError::Infrastructure(anyhow::anyhow!(
        "could not find a free referral code"
    )))
}

impl Platform {
    /// Registers a user, optionally under the sponsor owning `sponsor_ref_code`.
    ///
    /// The sponsor is fixed here and never changes afterwards.
    pub async fn register_user(
        &self,
        email: &str,
        sponsor_ref_code: Option<&str>,
    ) -> CoreResult<User> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(RuleViolation::InvalidInput("email is invalid".into()).into());
        }

        let now = self.now();
        let mut tx = self.store.begin().await?;

        let sponsor_id = match sponsor_ref_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let sponsor = tx
                    .user_by_ref_code(&code.to_uppercase())
                    .await?
                    .ok_or_else(|| CoreError::not_found("referral code", code))?;
                if sponsor.status != UserStatus::Active {
                    return Err(RuleViolation::InactiveUser {
                        user_id: sponsor.id,
                    }
                    .into());
                }
                Some(sponsor.id)
            }
            None => None,
        };

        let user = User {
            id: Uuid::new_v4(),
            email,
            ref_code: unused_ref_code(&mut *tx).await?,
            sponsor_id,
            status: UserStatus::Active,
            created_at: now,
        };
        tx.insert_user(&user).await?;
        tx.commit().await?;

        info!(user_id = %user.id, sponsored = sponsor_id.is_some(), "user registered");
        Ok(user)
    }

    pub async fn user(&self, id: Uuid) -> CoreResult<User> {
        let mut tx = self.store.begin().await?;
        let user = require_user(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(user)
    }

    /// Suspends, reactivates or soft-deletes a user. Referred users are unaffected.
    pub async fn set_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
        actor_id: Uuid,
    ) -> CoreResult<User> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut user = require_user(&mut *tx, user_id).await?;
        let before = user.status;
        tx.set_user_status(user_id, status).await?;
        user.status = status;

        audit::record(
            &mut *tx,
            AuditRecord::new("user.status", "user", user_id, Some(actor_id), now)
                .values(&before, &status),
        )
        .await?;
        tx.commit().await?;
        Ok(user)
    }
}
