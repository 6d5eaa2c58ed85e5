use bson::{Bson, DateTime, doc, oid::ObjectId};
use chrono::{Months, Utc};

use super::test_app::TestApp;

/// Result of seeding an organization with a plan and an active subscription.
pub struct SeededOrg {
    pub organization_id: ObjectId,
    pub subscription_id: ObjectId,
    pub plan_id: ObjectId,
    pub user_id: ObjectId,
    pub token: String,
}

impl TestApp {
    pub async fn seed_plan(
        &self,
        slug: &str,
        name: &str,
        quota_minutes: i64,
        quota_resets_monthly: bool,
    ) -> ObjectId {
        let now = DateTime::now();
        let plan = doc! {
            "slug": slug,
            "name": name,
            "description": Bson::Null,
            "normal_price": 80_000_i64,
            "promo_price": Bson::Null,
            "is_promo": false,
            "payment_link": Bson::Null,
            "currency": "USD",
            "quota_minutes": quota_minutes,
            "quota_resets_monthly": quota_resets_monthly,
            "features": Bson::Null,
            "is_active": true,
            "price": 80_000_i64,
            "created_at": now,
            "updated_at": now,
        };

        let result = self
            .db
            .collection::<bson::Document>("subscription_plans")
            .insert_one(plan)
            .await
            .expect("Failed to seed plan");
        result.inserted_id.as_object_id().unwrap()
    }

    /// Seeds a plan, an organization subscription on it, and a session token
    /// for a user in that organization. For monthly plans, `used_minutes`
    /// lands in the current usage period; otherwise on the subscription.
    pub async fn seed_org(
        &self,
        slug: &str,
        plan_name: &str,
        quota_minutes: i64,
        quota_resets_monthly: bool,
        used_minutes: f64,
    ) -> SeededOrg {
        let plan_id = self
            .seed_plan(slug, plan_name, quota_minutes, quota_resets_monthly)
            .await;

        let organization_id = ObjectId::new();
        let user_id = ObjectId::new();

        let now = Utc::now();
        let period_start = DateTime::from_chrono(now);
        let period_end = DateTime::from_chrono(
            now.checked_add_months(Months::new(1)).unwrap(),
        );
        let created = DateTime::now();
        let lifetime_usage = if quota_resets_monthly { 0.0 } else { used_minutes };

        let subscription = doc! {
            "organization_id": organization_id,
            "plan_id": plan_id,
            "status": "active",
            "current_period_start": period_start,
            "current_period_end": period_end,
            "lifetime_usage_minutes": lifetime_usage,
            "canceled_at": Bson::Null,
            "created_at": created,
            "updated_at": created,
        };

        let result = self
            .db
            .collection::<bson::Document>("organization_subscriptions")
            .insert_one(subscription)
            .await
            .expect("Failed to seed subscription");
        let subscription_id = result.inserted_id.as_object_id().unwrap();

        if quota_resets_monthly && used_minutes > 0.0 {
            self.db
                .collection::<bson::Document>("usage_periods")
                .insert_one(doc! {
                    "subscription_id": subscription_id,
                    "period_start": period_start,
                    "period_end": period_end,
                    "usage_minutes": used_minutes,
                })
                .await
                .expect("Failed to seed usage period");
        }

        let token = self.session_token(&user_id, Some(&organization_id));

        SeededOrg {
            organization_id,
            subscription_id,
            plan_id,
            user_id,
            token,
        }
    }

    /// Total minutes currently recorded against the subscription, across the
    /// lifetime counter and all usage periods.
    pub async fn usage_minutes(&self, org: &SeededOrg) -> f64 {
        let subscription = self
            .db
            .collection::<bson::Document>("organization_subscriptions")
            .find_one(doc! { "_id": org.subscription_id })
            .await
            .expect("subscription lookup failed")
            .expect("subscription missing");
        let lifetime = subscription.get_f64("lifetime_usage_minutes").unwrap_or(0.0);

        let mut cursor = self
            .db
            .collection::<bson::Document>("usage_periods")
            .find(doc! { "subscription_id": org.subscription_id })
            .await
            .expect("usage period lookup failed");

        let mut period_total = 0.0;
        use futures::TryStreamExt;
        while let Some(period) = cursor.try_next().await.expect("usage period cursor failed") {
            period_total += period.get_f64("usage_minutes").unwrap_or(0.0);
        }

        lifetime + period_total
    }

    /// Polls until some usage lands for the subscription.
    pub async fn wait_for_usage(&self, org: &SeededOrg, above: f64) -> f64 {
        for _ in 0..100 {
            let used = self.usage_minutes(org).await;
            if used > above {
                return used;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        self.usage_minutes(org).await
    }
}
