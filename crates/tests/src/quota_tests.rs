use bson::{DateTime, doc, oid::ObjectId};
use chrono::{Duration, Utc};
use voxrelay_services::quota::{QuotaError, QuotaService};

use crate::fixtures::test_app::TestApp;

#[tokio::test]
async fn missing_subscription_is_rejected() {
    let app = TestApp::spawn().await;
    let quota = QuotaService::new(&app.db);

    let result = quota.check_quota_availability(ObjectId::new()).await;
    assert!(matches!(result, Err(QuotaError::NoSubscription)));
}

#[tokio::test]
async fn inactive_subscription_is_rejected() {
    let app = TestApp::spawn().await;
    let org = app.seed_org("pro", "Pro", 500, true, 0.0).await;
    let quota = QuotaService::new(&app.db);

    app.db
        .collection::<bson::Document>("organization_subscriptions")
        .update_one(
            doc! { "_id": org.subscription_id },
            doc! { "$set": { "status": "canceled" } },
        )
        .await
        .unwrap();

    match quota.check_quota_availability(org.organization_id).await {
        Err(QuotaError::Exceeded { error, data }) => {
            assert_eq!(error, "Subscription is not active");
            assert_eq!(data.current_plan, "Pro");
            assert!(data.upgrade_required);
        }
        other => panic!("expected Exceeded, got: {other:?}"),
    }
}

#[tokio::test]
async fn lifetime_plan_reads_subscription_counter() {
    let app = TestApp::spawn().await;
    let org = app.seed_org("free", "Free", 60, false, 12.5).await;
    let quota = QuotaService::new(&app.db);

    let status = quota
        .check_quota_availability(org.organization_id)
        .await
        .unwrap();
    assert!(status.allowed);
    assert_eq!(status.used_minutes, 12.5);
    assert_eq!(status.remaining_minutes, 47.5);
    assert_eq!(status.quota_minutes, 60);
    assert_eq!(status.plan_name, "Free");
}

#[tokio::test]
async fn exhausted_quota_is_rejected_with_payload() {
    let app = TestApp::spawn().await;
    let org = app.seed_org("pro", "Pro", 10, true, 10.0).await;
    let quota = QuotaService::new(&app.db);

    match quota.check_quota_availability(org.organization_id).await {
        Err(QuotaError::Exceeded { data, .. }) => {
            assert_eq!(data.current_plan, "Pro");
            assert_eq!(data.quota_minutes, Some(10));
            assert_eq!(data.used_minutes, Some(10.0));
            assert!(data.upgrade_required);
        }
        other => panic!("expected Exceeded, got: {other:?}"),
    }
}

#[tokio::test]
async fn expired_period_rolls_forward_calendar_months() {
    let app = TestApp::spawn().await;
    let org = app.seed_org("pro", "Pro", 500, true, 0.0).await;
    let quota = QuotaService::new(&app.db);

    // Rewind the subscription two periods into the past, with heavy usage on
    // the stale period.
    let past_start = DateTime::from_chrono(Utc::now() - Duration::days(70));
    let past_end = DateTime::from_chrono(Utc::now() - Duration::days(40));
    app.db
        .collection::<bson::Document>("organization_subscriptions")
        .update_one(
            doc! { "_id": org.subscription_id },
            doc! { "$set": {
                "current_period_start": past_start,
                "current_period_end": past_end,
            }},
        )
        .await
        .unwrap();
    app.db
        .collection::<bson::Document>("usage_periods")
        .insert_one(doc! {
            "subscription_id": org.subscription_id,
            "period_start": past_start,
            "period_end": past_end,
            "usage_minutes": 120.0,
        })
        .await
        .unwrap();

    let status = quota
        .check_quota_availability(org.organization_id)
        .await
        .unwrap();

    // The stale period's usage does not count against the fresh one
    assert!(status.allowed);
    assert_eq!(status.used_minutes, 0.0);

    // The subscription now carries a period containing `now`
    let subscription = app
        .db
        .collection::<bson::Document>("organization_subscriptions")
        .find_one(doc! { "_id": org.subscription_id })
        .await
        .unwrap()
        .unwrap();
    let start = subscription.get_datetime("current_period_start").unwrap();
    let end = subscription.get_datetime("current_period_end").unwrap();
    let now = DateTime::now();
    assert!(*start <= now && now < *end);

    // And a fresh usage-period row exists for it
    let fresh = app
        .db
        .collection::<bson::Document>("usage_periods")
        .find_one(doc! {
            "subscription_id": org.subscription_id,
            "period_start": start,
        })
        .await
        .unwrap()
        .expect("fresh usage period missing");
    assert_eq!(fresh.get_f64("usage_minutes").unwrap(), 0.0);
}

#[tokio::test]
async fn record_usage_increments_lifetime_counter() {
    let app = TestApp::spawn().await;
    let org = app.seed_org("free", "Free", 60, false, 10.0).await;
    let quota = QuotaService::new(&app.db);

    // 90 s = 1.5 min
    quota.record_usage(org.organization_id, 90_000).await.unwrap();

    let subscription = app
        .db
        .collection::<bson::Document>("organization_subscriptions")
        .find_one(doc! { "_id": org.subscription_id })
        .await
        .unwrap()
        .unwrap();
    let used = subscription.get_f64("lifetime_usage_minutes").unwrap();
    assert!((used - 11.5).abs() < 1e-9, "unexpected usage: {used}");
}

#[tokio::test]
async fn record_usage_increments_current_period() {
    let app = TestApp::spawn().await;
    let org = app.seed_org("pro", "Pro", 500, true, 0.0).await;
    let quota = QuotaService::new(&app.db);

    quota.record_usage(org.organization_id, 30_000).await.unwrap();
    quota.record_usage(org.organization_id, 30_000).await.unwrap();

    let used = app.usage_minutes(&org).await;
    assert!((used - 1.0).abs() < 1e-9, "unexpected usage: {used}");
}

#[tokio::test]
async fn fractional_minutes_are_kept() {
    let app = TestApp::spawn().await;
    let org = app.seed_org("pro", "Pro", 500, true, 0.0).await;
    let quota = QuotaService::new(&app.db);

    // 3141 ms ≈ 0.05235 min
    quota.record_usage(org.organization_id, 3141).await.unwrap();

    let used = app.usage_minutes(&org).await;
    assert!((used - 3141.0 / 60_000.0).abs() < 1e-9, "unexpected usage: {used}");
}
