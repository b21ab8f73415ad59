#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use license_ledger::{
    AdminWallet, Confirmation, CoreResult, LicenseProduct, ManualClock, MemoryStore, Platform,
    ProductInput, Settings, SettingsProvider, Task, TaskQueue, User,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Remembers every scheduled task instead of running it.
#[derive(Default)]
pub struct RecordingQueue {
    pub tasks: Mutex<Vec<(Task, StdDuration)>>,
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: Task, delay: StdDuration) -> CoreResult<()> {
        self.tasks.lock().unwrap().push((task, delay));
        Ok(())
    }
}

pub struct Harness {
    pub platform: Platform,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub queue: Arc<RecordingQueue>,
    pub admin: Uuid,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let queue = Arc::new(RecordingQueue::default());
        let platform = Platform::new(
            Arc::new(store.clone()),
            Arc::new(SettingsProvider::fixed(settings)),
            queue.clone(),
            clock.clone(),
        );
        Self {
            platform,
            store,
            clock,
            queue,
            admin: Uuid::new_v4(),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn product(&self, price: Decimal, duration_days: i32) -> LicenseProduct {
        self.platform
            .create_product(
                ProductInput {
                    name: format!("License {price}"),
                    price_usdt: price,
                    daily_rate: dec!(0.08),
                    duration_days,
                    cap_percentage: dec!(2.0),
                    cashback_cap: Decimal::ZERO,
                    potential_cap: Decimal::ZERO,
                    active: true,
                },
                self.admin,
            )
            .await
            .unwrap()
    }

    pub async fn wallets(&self, n: usize) -> Vec<AdminWallet> {
        let mut wallets = Vec::with_capacity(n);
        for i in 0..n {
            let address = format!("T{}", Uuid::new_v4().simple());
            wallets.push(
                self.platform
                    .add_wallet(&format!("hot-{i}"), &address, self.admin)
                    .await
                    .unwrap(),
            );
        }
        wallets
    }

    pub async fn user(&self, sponsor: Option<&User>) -> User {
        let email = format!("{}@example.com", Uuid::new_v4().simple());
        self.platform
            .register_user(&email, sponsor.map(|s| s.ref_code.as_str()))
            .await
            .unwrap()
    }

    /// Runs an order for `product` through creation, payment and confirmation.
    pub async fn confirmed_license(&self, user: &User, product: &LicenseProduct) -> Confirmation {
        let order = self
            .platform
            .create_order(user.id, product.id)
            .await
            .unwrap();
        let hash = format!("0x{}", Uuid::new_v4().simple());
        self.platform
            .submit_tx_hash(order.id, user.id, &hash)
            .await
            .unwrap();
        self.platform
            .confirm_order(order.id, self.admin)
            .await
            .unwrap()
    }

    /// A funded-by-purchase user holding one fresh license.
    pub async fn licensed_user(&self, price: Decimal) -> (User, Confirmation) {
        self.wallets(1).await;
        let product = self.product(price, 25).await;
        let user = self.user(None).await;
        let confirmation = self.confirmed_license(&user, &product).await;
        (user, confirmation)
    }
}
