mod common;

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::Duration;
use common::Harness;
use license_ledger::{
    CommissionStatus, CoreError, Direction, OrderStatus, ProductInput, RefType, RuleViolation,
    Task, UserStatus, WalletStatus,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn confirming_a_sponsored_order_creates_license_debit_and_commission() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(500), 25).await;
    let sponsor = h.user(None).await;
    let buyer = h.user(Some(&sponsor)).await;
    assert_eq!(buyer.sponsor_id, Some(sponsor.id));

    let confirmation = h.confirmed_license(&buyer, &product).await;
    assert_eq!(confirmation.order.status, OrderStatus::Confirmed);
    assert_eq!(confirmation.license.order_id, confirmation.order.id);
    assert_eq!(confirmation.license.principal_usdt, dec!(500));

    let licenses = h.platform.licenses_for_user(buyer.id).await.unwrap();
    assert_eq!(licenses.len(), 1);

    let entries = h.platform.ledger_entries(buyer.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].direction, Direction::Debit);
    assert_eq!(entries[0].ref_type, RefType::Order);
    assert_eq!(entries[0].amount, dec!(500));

    let commissions = h
        .platform
        .commissions_for_order(confirmation.order.id)
        .await
        .unwrap();
    assert_eq!(commissions.len(), 1);
    assert_eq!(commissions[0].sponsor_id, sponsor.id);
    assert_eq!(commissions[0].amount_usdt, dec!(50));
    assert_eq!(commissions[0].status, CommissionStatus::Pending);

    // Pending commissions do not move the sponsor's balance.
    assert_eq!(h.platform.balance(sponsor.id).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn confirming_an_unsponsored_order_creates_no_commission() {
    let h = Harness::new();
    let (user, confirmation) = h.licensed_user(dec!(500)).await;

    assert!(confirmation.commission.is_none());
    assert!(
        h.platform
            .commissions_for_order(confirmation.order.id)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(h.platform.balance(user.id).await.unwrap(), dec!(-500));
}

#[tokio::test]
async fn license_principal_is_the_order_amount_not_the_current_price() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(500), 25).await;
    let user = h.user(None).await;

    let order = h.platform.create_order(user.id, product.id).await.unwrap();
    h.platform
        .update_product(
            product.id,
            ProductInput {
                name: product.name.clone(),
                price_usdt: dec!(750),
                daily_rate: product.daily_rate,
                duration_days: product.duration_days,
                cap_percentage: product.cap_percentage,
                cashback_cap: product.cashback_cap,
                potential_cap: product.potential_cap,
                active: true,
            },
            h.admin,
        )
        .await
        .unwrap();
    h.platform
        .submit_tx_hash(order.id, user.id, "0xfeed")
        .await
        .unwrap();
    let confirmation = h.platform.confirm_order(order.id, h.admin).await.unwrap();

    assert_eq!(confirmation.license.principal_usdt, dec!(500));
}

#[tokio::test]
async fn creating_an_order_schedules_its_expiry() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(100), 25).await;
    let user = h.user(None).await;

    let order = h.platform.create_order(user.id, product.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.expires_at, order.created_at + Duration::minutes(30));

    let tasks = h.queue.tasks.lock().unwrap().clone();
    assert_eq!(
        tasks,
        vec![(
            Task::ExpireOrder { order_id: order.id },
            StdDuration::from_secs(30 * 60)
        )]
    );
}

#[tokio::test]
async fn one_open_order_per_user() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(100), 25).await;
    let user = h.user(None).await;

    let first = h.platform.create_order(user.id, product.id).await.unwrap();
    let err = assert_err!(h.platform.create_order(user.id, product.id).await);
    assert_eq!(
        err.rule(),
        Some(&RuleViolation::OpenOrderExists {
            user_id: user.id,
            order_id: first.id
        })
    );

    h.platform
        .cancel_order(first.id, h.admin, Some("duplicate"))
        .await
        .unwrap();
    assert_ok!(h.platform.create_order(user.id, product.id).await);
}

#[tokio::test]
async fn expiry_leaves_paid_orders_alone() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(100), 25).await;
    let user = h.user(None).await;

    let order = h.platform.create_order(user.id, product.id).await.unwrap();
    h.platform
        .submit_tx_hash(order.id, user.id, "0x01")
        .await
        .unwrap();

    h.advance(Duration::minutes(45));
    assert!(!h.platform.expire_order(order.id).await.unwrap());
    let order = h.platform.order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.tx_hash.as_deref(), Some("0x01"));
}

#[tokio::test]
async fn expired_orders_no_longer_accept_payment() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(100), 25).await;
    let user = h.user(None).await;

    let order = h.platform.create_order(user.id, product.id).await.unwrap();
    assert!(h.platform.expire_order(order.id).await.unwrap());
    assert!(!h.platform.expire_order(order.id).await.unwrap());

    let err = assert_err!(h.platform.submit_tx_hash(order.id, user.id, "0x02").await);
    assert!(matches!(err, CoreError::InvalidState { .. }));
}

#[tokio::test]
async fn payment_after_the_deadline_is_rejected() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(100), 25).await;
    let user = h.user(None).await;

    let order = h.platform.create_order(user.id, product.id).await.unwrap();
    h.advance(Duration::minutes(31));

    let err = assert_err!(h.platform.submit_tx_hash(order.id, user.id, "0x03").await);
    assert_eq!(
        err.rule(),
        Some(&RuleViolation::OrderDeadlinePassed { order_id: order.id })
    );

    assert_eq!(h.platform.expire_overdue_orders().await.unwrap(), 1);
    assert_eq!(
        h.platform.order(order.id).await.unwrap().status,
        OrderStatus::Expired
    );
}

#[tokio::test]
async fn a_transaction_hash_pays_only_one_order() {
    let h = Harness::new();
    h.wallets(2).await;
    let product = h.product(dec!(100), 25).await;
    let alice = h.user(None).await;
    let bob = h.user(None).await;

    let a = h.platform.create_order(alice.id, product.id).await.unwrap();
    let b = h.platform.create_order(bob.id, product.id).await.unwrap();
    h.platform
        .submit_tx_hash(a.id, alice.id, "0xsame")
        .await
        .unwrap();

    let err = assert_err!(h.platform.submit_tx_hash(b.id, bob.id, "0xsame").await);
    assert_eq!(err.rule(), Some(&RuleViolation::DuplicateTxHash));

    // Someone else's order looks like a missing one.
    let err = assert_err!(h.platform.submit_tx_hash(b.id, alice.id, "0xother").await);
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn only_paid_orders_can_be_confirmed() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(100), 25).await;
    let user = h.user(None).await;

    let order = h.platform.create_order(user.id, product.id).await.unwrap();
    let err = assert_err!(h.platform.confirm_order(order.id, h.admin).await);
    match err {
        CoreError::InvalidState {
            current, expected, ..
        } => {
            assert_eq!(current, "pending");
            assert_eq!(expected, "paid");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.platform.licenses_for_user(user.id).await.unwrap().is_empty());
    assert!(h.platform.ledger_entries(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn orders_need_an_active_user_and_product() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(100), 25).await;
    let user = h.user(None).await;

    h.platform
        .set_user_status(user.id, UserStatus::Suspended, h.admin)
        .await
        .unwrap();
    let err = assert_err!(h.platform.create_order(user.id, product.id).await);
    assert_eq!(err.rule(), Some(&RuleViolation::InactiveUser { user_id: user.id }));

    let other = h.user(None).await;
    let input = ProductInput {
        name: "Retired".into(),
        price_usdt: dec!(10),
        daily_rate: dec!(0.08),
        duration_days: 25,
        cap_percentage: dec!(2),
        cashback_cap: Decimal::ZERO,
        potential_cap: Decimal::ZERO,
        active: false,
    };
    let retired = h.platform.create_product(input, h.admin).await.unwrap();
    let err = assert_err!(h.platform.create_order(other.id, retired.id).await);
    assert_eq!(
        err.rule(),
        Some(&RuleViolation::InactiveProduct {
            product_id: retired.id
        })
    );
}

#[tokio::test]
async fn order_creation_fails_cleanly_without_wallets() {
    let h = Harness::new();
    let product = h.product(dec!(100), 25).await;
    let user = h.user(None).await;

    let err = assert_err!(h.platform.create_order(user.id, product.id).await);
    assert!(matches!(err, CoreError::NoActiveWallets));
    assert!(h.platform.orders_for_user(user.id).await.unwrap().is_empty());
    assert!(h.queue.tasks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn wallets_are_handed_out_round_robin() {
    let h = Harness::new();
    let wallets = h.wallets(3).await;
    let product = h.product(dec!(100), 25).await;

    let mut addresses = HashSet::new();
    for _ in 0..3 {
        let user = h.user(None).await;
        let order = h.platform.create_order(user.id, product.id).await.unwrap();
        addresses.insert(order.wallet_address);
    }
    assert_eq!(addresses.len(), 3);

    let after = h.platform.wallets().await.unwrap();
    assert_eq!(after.len(), wallets.len());
    assert!(after.iter().all(|w| w.assigned_count == 1));

    // The fourth goes to the wallet used longest ago.
    h.advance(Duration::seconds(1));
    let next = h.platform.next_wallet_for_assignment().await.unwrap();
    assert_eq!(next.assigned_count, 2);
}

#[tokio::test]
async fn concurrent_orders_never_share_an_assignment_slot() {
    let h = Harness::new();
    h.wallets(2).await;
    let product = h.product(dec!(100), 25).await;
    let (a, b, c, d) = (
        h.user(None).await,
        h.user(None).await,
        h.user(None).await,
        h.user(None).await,
    );

    let (oa, ob, oc, od) = tokio::join!(
        h.platform.create_order(a.id, product.id),
        h.platform.create_order(b.id, product.id),
        h.platform.create_order(c.id, product.id),
        h.platform.create_order(d.id, product.id),
    );
    for order in [oa, ob, oc, od] {
        assert_ok!(order);
    }

    let wallets = h.platform.wallets().await.unwrap();
    let total: i64 = wallets.iter().map(|w| w.assigned_count).sum();
    assert_eq!(total, 4);
    assert!(wallets.iter().all(|w| w.assigned_count == 2));
}

#[tokio::test]
async fn inactive_wallets_are_skipped() {
    let h = Harness::new();
    let wallets = h.wallets(2).await;
    h.platform
        .set_wallet_status(wallets[0].id, WalletStatus::Inactive, h.admin)
        .await
        .unwrap();

    for _ in 0..3 {
        let wallet = h.platform.next_wallet_for_assignment().await.unwrap();
        assert_eq!(wallet.id, wallets[1].id);
    }

    h.platform
        .set_wallet_status(wallets[1].id, WalletStatus::Inactive, h.admin)
        .await
        .unwrap();
    let err = assert_err!(h.platform.next_wallet_for_assignment().await);
    assert!(matches!(err, CoreError::NoActiveWallets));
}

#[tokio::test]
async fn released_commission_credits_the_sponsor_once() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(500), 25).await;
    let sponsor = h.user(None).await;
    let buyer = h.user(Some(&sponsor)).await;
    let confirmation = h.confirmed_license(&buyer, &product).await;
    let commission = confirmation.commission.unwrap();

    let released = h
        .platform
        .release_commission(commission.id, h.admin)
        .await
        .unwrap();
    assert_eq!(released.status, CommissionStatus::Released);
    assert_eq!(released.resolved_by, Some(h.admin));
    assert!(released.resolved_at.is_some());

    let entries = h.platform.ledger_entries(sponsor.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].ref_type, RefType::ReferralCommission);
    assert_eq!(entries[0].ref_id, commission.id);
    assert_eq!(h.platform.balance(sponsor.id).await.unwrap(), dec!(50));

    let err = assert_err!(h.platform.release_commission(commission.id, h.admin).await);
    assert!(matches!(err, CoreError::InvalidState { .. }));
    assert_err!(h.platform.cancel_commission(commission.id, h.admin).await);
    assert_eq!(h.platform.balance(sponsor.id).await.unwrap(), dec!(50));
}

#[tokio::test]
async fn cancelled_commission_leaves_the_ledger_untouched() {
    let h = Harness::new();
    h.wallets(1).await;
    let product = h.product(dec!(500), 25).await;
    let sponsor = h.user(None).await;
    let buyer = h.user(Some(&sponsor)).await;
    let commission = h
        .confirmed_license(&buyer, &product)
        .await
        .commission
        .unwrap();

    let cancelled = h
        .platform
        .cancel_commission(commission.id, h.admin)
        .await
        .unwrap();
    assert_eq!(cancelled.status, CommissionStatus::Cancelled);
    assert!(h.platform.ledger_entries(sponsor.id).await.unwrap().is_empty());
}
