mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use common::Harness;
use license_ledger::{
    BatchReport, CoreError, CoreResult, DelayedTaskQueue, LicenseStatus, OrderStatus, Task,
    TaskHandler, TaskQueue,
};
use rust_decimal_macros::dec;
use uuid::Uuid;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Uuid>>,
    fail_first: bool,
}

#[async_trait]
impl TaskHandler for Recorder {
    async fn handle(&self, task: Task) -> CoreResult<()> {
        let Task::ExpireOrder { order_id } = task;
        let mut seen = self.seen.lock().unwrap();
        seen.push(order_id);
        if self.fail_first && seen.len() == 1 {
            return Err(CoreError::Infrastructure(anyhow::anyhow!("boom")));
        }
        Ok(())
    }
}

#[tokio::test]
async fn tasks_fire_in_due_order() {
    let (queue, worker) = DelayedTaskQueue::new();
    let recorder = Arc::new(Recorder::default());
    let worker = tokio::spawn({
        let recorder = recorder.clone();
        async move { worker.run(&*recorder).await }
    });

    let (late, early) = (Uuid::new_v4(), Uuid::new_v4());
    queue
        .enqueue(
            Task::ExpireOrder { order_id: late },
            StdDuration::from_millis(60),
        )
        .await
        .unwrap();
    queue
        .enqueue(
            Task::ExpireOrder { order_id: early },
            StdDuration::from_millis(10),
        )
        .await
        .unwrap();
    drop(queue);

    worker.await.unwrap();
    assert_eq!(*recorder.seen.lock().unwrap(), vec![early, late]);
}

#[tokio::test]
async fn a_failing_task_does_not_stop_the_worker() {
    let (queue, worker) = DelayedTaskQueue::new();
    let recorder = Arc::new(Recorder {
        fail_first: true,
        ..Recorder::default()
    });
    let worker = tokio::spawn({
        let recorder = recorder.clone();
        async move { worker.run(&*recorder).await }
    });

    for delay in [5, 15] {
        queue
            .enqueue(
                Task::ExpireOrder {
                    order_id: Uuid::new_v4(),
                },
                StdDuration::from_millis(delay),
            )
            .await
            .unwrap();
    }
    drop(queue);

    worker.await.unwrap();
    assert_eq!(recorder.seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn enqueue_fails_once_the_worker_is_gone() {
    let (queue, worker) = DelayedTaskQueue::new();
    drop(worker);
    let err = queue
        .enqueue(
            Task::ExpireOrder {
                order_id: Uuid::new_v4(),
            },
            StdDuration::ZERO,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Infrastructure(_)));
}

#[tokio::test]
async fn scheduled_expiry_only_touches_pending_orders() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(100), 25).await;
    let idle = h.user(None).await;
    let payer = h.user(None).await;

    let stale = h.platform.create_order(idle.id, product.id).await.unwrap();
    let paid = h.platform.create_order(payer.id, product.id).await.unwrap();
    h.platform
        .submit_tx_hash(paid.id, payer.id, "0xpaid")
        .await
        .unwrap();

    let (queue, worker) = DelayedTaskQueue::new();
    let platform = h.platform.clone();
    let worker = tokio::spawn(async move { worker.run(&platform).await });
    for order_id in [stale.id, paid.id] {
        queue
            .enqueue(Task::ExpireOrder { order_id }, StdDuration::from_millis(5))
            .await
            .unwrap();
    }
    drop(queue);
    worker.await.unwrap();

    assert_eq!(
        h.platform.order(stale.id).await.unwrap().status,
        OrderStatus::Expired
    );
    assert_eq!(
        h.platform.order(paid.id).await.unwrap().status,
        OrderStatus::Paid
    );
}

#[tokio::test]
async fn batch_catches_up_on_missed_days() {
    let h = Harness::new();
    let (user, confirmation) = h.licensed_user(dec!(500)).await;

    h.advance(Duration::days(3) + Duration::hours(1));
    let report = h.platform.process_due_licenses().await.unwrap();
    assert_eq!(
        report,
        BatchReport {
            processed_days: 3,
            completed: 0,
            failed: 0
        }
    );
    assert_eq!(h.platform.balance(user.id).await.unwrap(), dec!(-380));

    let again = h.platform.process_due_licenses().await.unwrap();
    assert_eq!(again, BatchReport::default());
    assert_eq!(
        h.platform
            .license(confirmation.license.id)
            .await
            .unwrap()
            .days_generated,
        3
    );
}

#[tokio::test]
async fn batch_runs_licenses_to_completion_and_skips_paused_ones() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(200), 25).await;
    let running = h.user(None).await;
    let held = h.user(None).await;
    let running_license = h.confirmed_license(&running, &product).await.license;
    let held_license = h.confirmed_license(&held, &product).await.license;
    h.platform
        .pause_license(held_license.id, h.admin)
        .await
        .unwrap();

    h.advance(Duration::days(40));
    let report = h.platform.process_due_licenses().await.unwrap();
    assert_eq!(report.processed_days, 25);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);

    let finished = h.platform.license(running_license.id).await.unwrap();
    assert_eq!(finished.status, LicenseStatus::Completed);
    assert_eq!(finished.total_earned_usdt, dec!(400));

    let untouched = h.platform.license(held_license.id).await.unwrap();
    assert_eq!(untouched.days_generated, 0);
    assert_eq!(untouched.status, LicenseStatus::Paused);
}
