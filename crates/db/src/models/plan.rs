use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub normal_price: i64,
    pub promo_price: Option<i64>,
    #[serde(default)]
    pub is_promo: bool,
    pub payment_link: Option<String>,
    pub currency: String,
    pub quota_minutes: i64,
    pub quota_resets_monthly: bool,
    pub features: Option<bson::Bson>,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    /// Superseded by `normal_price`; present on rows written by older releases.
    #[serde(default)]
    pub price: i64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

fn default_is_active() -> bool {
    true
}

impl SubscriptionPlan {
    pub const COLLECTION: &'static str = "subscription_plans";
}
