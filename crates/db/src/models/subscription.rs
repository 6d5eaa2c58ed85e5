use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSubscription {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub organization_id: ObjectId,
    pub plan_id: ObjectId,
    #[serde(default)]
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime,
    pub current_period_end: Option<DateTime>,
    /// Minutes consumed over the subscription lifetime; only meaningful for
    /// plans whose quota does not reset monthly.
    #[serde(default)]
    pub lifetime_usage_minutes: f64,
    pub canceled_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    PastDue,
    Canceled,
    Incomplete,
}

impl OrganizationSubscription {
    pub const COLLECTION: &'static str = "organization_subscriptions";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsagePeriod {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub subscription_id: ObjectId,
    pub period_start: DateTime,
    pub period_end: DateTime,
    #[serde(default)]
    pub usage_minutes: f64,
}

impl UsagePeriod {
    pub const COLLECTION: &'static str = "usage_periods";
}
