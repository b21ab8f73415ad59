mod common;

use common::Harness;
use license_ledger::{CoreError, ProductInput, RuleViolation, UserStatus};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::assert_err;

fn input(name: &str, price: Decimal, active: bool) -> ProductInput {
    ProductInput {
        name: name.to_string(),
        price_usdt: price,
        daily_rate: dec!(0.08),
        duration_days: 25,
        cap_percentage: dec!(2),
        cashback_cap: Decimal::ZERO,
        potential_cap: Decimal::ZERO,
        active,
    }
}

#[tokio::test]
async fn product_listing_can_hide_inactive_entries() {
    let h = Harness::new();
    h.platform
        .create_product(input("Starter", dec!(100), true), h.admin)
        .await
        .unwrap();
    h.platform
        .create_product(input("Legacy", dec!(50), false), h.admin)
        .await
        .unwrap();

    assert_eq!(h.platform.products(false).await.unwrap().len(), 2);
    let active = h.platform.products(true).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "Starter");
}

#[tokio::test]
async fn invalid_products_are_rejected() {
    let h = Harness::new();

    let err = assert_err!(
        h.platform
            .create_product(input("  ", dec!(100), true), h.admin)
            .await
    );
    assert!(matches!(err.rule(), Some(RuleViolation::InvalidInput(_))));

    let err = assert_err!(
        h.platform
            .create_product(input("Free", Decimal::ZERO, true), h.admin)
            .await
    );
    assert!(matches!(err.rule(), Some(RuleViolation::InvalidInput(_))));

    let mut zero_days = input("Instant", dec!(10), true);
    zero_days.duration_days = 0;
    assert_err!(h.platform.create_product(zero_days, h.admin).await);

    let mut endless = input("Forever", dec!(10), true);
    endless.duration_days = i32::MAX;
    let err = assert_err!(h.platform.create_product(endless, h.admin).await);
    assert!(matches!(err.rule(), Some(RuleViolation::InvalidInput(_))));
}

#[tokio::test]
async fn ordered_products_cannot_be_deleted() {
    let h = Harness::new();
    h.wallets(1).await;
    let unused = h.product(dec!(10), 25).await;
    let ordered = h.product(dec!(20), 25).await;
    let user = h.user(None).await;
    h.platform.create_order(user.id, ordered.id).await.unwrap();

    let err = assert_err!(h.platform.delete_product(ordered.id, h.admin).await);
    assert_eq!(
        err.rule(),
        Some(&RuleViolation::ProductInUse {
            product_id: ordered.id
        })
    );

    h.platform.delete_product(unused.id, h.admin).await.unwrap();
    let err = assert_err!(h.platform.product(unused.id).await);
    assert!(matches!(err, CoreError::NotFound { .. }));

    let trail = h.platform.audit_trail(unused.id).await.unwrap();
    let actions: Vec<&str> = trail.iter().map(|r| r.action.as_str()).collect();
    assert_eq!(actions, vec!["product.create", "product.delete"]);
}

#[tokio::test]
async fn registration_normalises_email_and_links_the_sponsor() {
    let h = Harness::new();
    let sponsor = h.user(None).await;
    assert_eq!(sponsor.ref_code.len(), 8);

    let user = h
        .platform
        .register_user(
            "  New.User@Example.COM ",
            Some(&sponsor.ref_code.to_lowercase()),
        )
        .await
        .unwrap();
    assert_eq!(user.email, "new.user@example.com");
    assert_eq!(user.sponsor_id, Some(sponsor.id));
    assert_ne!(user.ref_code, sponsor.ref_code);
    assert_eq!(user.status, UserStatus::Active);
}

#[tokio::test]
async fn registration_rejects_bad_input_and_unusable_sponsors() {
    let h = Harness::new();

    let err = assert_err!(h.platform.register_user("not-an-email", None).await);
    assert!(matches!(err.rule(), Some(RuleViolation::InvalidInput(_))));

    let err = assert_err!(
        h.platform
            .register_user("a@example.com", Some("NOPE0000"))
            .await
    );
    assert!(matches!(
        err,
        CoreError::NotFound {
            entity: "referral code",
            ..
        }
    ));

    let sponsor = h.user(None).await;
    h.platform
        .set_user_status(sponsor.id, UserStatus::Suspended, h.admin)
        .await
        .unwrap();
    let err = assert_err!(
        h.platform
            .register_user("b@example.com", Some(&sponsor.ref_code))
            .await
    );
    assert_eq!(
        err.rule(),
        Some(&RuleViolation::InactiveUser {
            user_id: sponsor.id
        })
    );

    // A blank code means no sponsor.
    let user = h
        .platform
        .register_user("c@example.com", Some("  "))
        .await
        .unwrap();
    assert_eq!(user.sponsor_id, None);
}

#[tokio::test]
async fn status_changes_keep_referred_users_intact() {
    let h = Harness::new();
    let sponsor = h.user(None).await;
    let referred = h.user(Some(&sponsor)).await;

    let deleted = h
        .platform
        .set_user_status(sponsor.id, UserStatus::Deleted, h.admin)
        .await
        .unwrap();
    assert_eq!(deleted.status, UserStatus::Deleted);

    let referred = h.platform.user(referred.id).await.unwrap();
    assert_eq!(referred.sponsor_id, Some(sponsor.id));
    assert_eq!(referred.status, UserStatus::Active);
}
