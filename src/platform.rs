use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::scheduler::TaskQueue;
use crate::settings::SettingsProvider;
use crate::store::{Store, StoreTx};
use crate::types::{LicenseProduct, User};

/// Entry point for every core operation.
///
/// Cheap to clone; collaborators are shared behind `Arc`s so request
/// handlers, the task worker and the earnings batch can each hold one.
#[derive(Clone)]
pub struct Platform {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) settings: Arc<SettingsProvider>,
    pub(crate) tasks: Arc<dyn TaskQueue>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Platform {
    pub fn new(
        store: Arc<dyn Store>,
        settings: Arc<SettingsProvider>,
        tasks: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            settings,
            tasks,
            clock,
        }
    }

    pub fn settings(&self) -> &SettingsProvider {
        &self.settings
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub(crate) async fn require_user(tx: &mut dyn StoreTx, id: Uuid) -> CoreResult<User> {
    tx.lock_user(id)
        .await?
        .ok_or_else(|| CoreError::not_found("user", id))
}

pub(crate) async fn require_product(tx: &mut dyn StoreTx, id: Uuid) -> CoreResult<LicenseProduct> {
    tx.product(id)
        .await?
        .ok_or_else(|| CoreError::not_found("product", id))
}
