use bson::{DateTime, oid::ObjectId};
use chrono::{Months, Utc};
use mongodb::Database;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use voxrelay_db::models::{OrganizationSubscription, SubscriptionStatus};

use crate::dao::{DaoError, PlanDao, SubscriptionDao, UsagePeriodDao};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaExceededData {
    pub current_plan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_minutes: Option<f64>,
    pub upgrade_required: bool,
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("No subscription found for organization")]
    NoSubscription,
    #[error("{error}")]
    Exceeded {
        error: String,
        data: QuotaExceededData,
    },
    #[error(transparent)]
    Dao(#[from] DaoError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub allowed: bool,
    pub remaining_minutes: f64,
    pub used_minutes: f64,
    pub quota_minutes: i64,
    pub plan_name: String,
}

/// Admission checks and usage accounting against the subscription store.
///
/// Monthly plans track usage in rolling `UsagePeriod` rows; lifetime plans
/// accumulate on the subscription itself. All increments are `$inc`-based so
/// concurrent session finalizations are race-safe.
pub struct QuotaService {
    subscriptions: SubscriptionDao,
    periods: UsagePeriodDao,
    plans: PlanDao,
}

impl QuotaService {
    pub fn new(db: &Database) -> Self {
        Self {
            subscriptions: SubscriptionDao::new(db),
            periods: UsagePeriodDao::new(db),
            plans: PlanDao::new(db),
        }
    }

    pub async fn check_quota_availability(
        &self,
        organization_id: ObjectId,
    ) -> Result<QuotaStatus, QuotaError> {
        let subscription = self
            .subscriptions
            .find_by_org(organization_id)
            .await?
            .ok_or(QuotaError::NoSubscription)?;
        let plan = self.plans.find_by_id(subscription.plan_id).await?;

        if subscription.status != SubscriptionStatus::Active {
            warn!(%organization_id, plan = %plan.name, "subscription inactive");
            return Err(QuotaError::Exceeded {
                error: "Subscription is not active".to_string(),
                data: QuotaExceededData {
                    current_plan: plan.name,
                    quota_minutes: Some(plan.quota_minutes),
                    used_minutes: None,
                    upgrade_required: true,
                },
            });
        }

        let used_minutes = if plan.quota_resets_monthly {
            let (period_start, period_end) = self.current_period(&subscription).await?;
            let subscription_id = subscription.id.ok_or(DaoError::NotFound)?;
            self.periods
                .find_or_create(subscription_id, period_start, period_end)
                .await?
                .usage_minutes
        } else {
            subscription.lifetime_usage_minutes
        };

        let remaining_minutes = plan.quota_minutes as f64 - used_minutes;
        if remaining_minutes <= 0.0 {
            warn!(
                %organization_id,
                plan = %plan.name,
                used_minutes,
                quota_minutes = plan.quota_minutes,
                "transcription quota exhausted"
            );
            return Err(QuotaError::Exceeded {
                error: format!("Transcription quota exhausted for plan {}", plan.name),
                data: QuotaExceededData {
                    current_plan: plan.name,
                    quota_minutes: Some(plan.quota_minutes),
                    used_minutes: Some(used_minutes),
                    upgrade_required: true,
                },
            });
        }

        debug!(
            %organization_id,
            plan = %plan.name,
            remaining_minutes,
            "quota check passed"
        );

        Ok(QuotaStatus {
            allowed: true,
            remaining_minutes,
            used_minutes,
            quota_minutes: plan.quota_minutes,
            plan_name: plan.name,
        })
    }

    pub async fn record_usage(
        &self,
        organization_id: ObjectId,
        duration_ms: u64,
    ) -> Result<(), QuotaError> {
        let minutes = duration_ms as f64 / 60_000.0;

        let subscription = self
            .subscriptions
            .find_by_org(organization_id)
            .await?
            .ok_or(QuotaError::NoSubscription)?;
        let subscription_id = subscription.id.ok_or(DaoError::NotFound)?;
        let plan = self.plans.find_by_id(subscription.plan_id).await?;

        if plan.quota_resets_monthly {
            let (period_start, period_end) = self.current_period(&subscription).await?;
            self.periods
                .inc_usage(subscription_id, period_start, period_end, minutes)
                .await?;
        } else {
            self.subscriptions
                .inc_lifetime_usage(subscription_id, minutes)
                .await?;
        }

        info!(%organization_id, minutes, "usage recorded");
        Ok(())
    }

    /// Resolves the current usage period, rolling `current_period_*` forward
    /// by whole calendar months when the stored period has expired.
    async fn current_period(
        &self,
        subscription: &OrganizationSubscription,
    ) -> Result<(DateTime, DateTime), QuotaError> {
        let subscription_id = subscription.id.ok_or(DaoError::NotFound)?;
        let now = Utc::now();

        let mut start = subscription.current_period_start.to_chrono();
        let mut end = subscription
            .current_period_end
            .map(|d| d.to_chrono())
            .unwrap_or_else(|| add_month(start));

        if now >= end {
            while now >= end {
                start = end;
                end = add_month(start);
            }
            self.subscriptions
                .set_current_period(
                    subscription_id,
                    DateTime::from_chrono(start),
                    DateTime::from_chrono(end),
                )
                .await?;
            info!(%subscription_id, period_start = %start, "usage period rolled forward");
        }

        Ok((DateTime::from_chrono(start), DateTime::from_chrono(end)))
    }
}

fn add_month(t: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    t.checked_add_months(Months::new(1))
        .unwrap_or(t + chrono::Duration::days(30))
}
