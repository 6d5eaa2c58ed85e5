use bson::{DateTime, doc, oid::ObjectId};
use mongodb::{Collection, Database};
use voxrelay_db::models::{OrganizationSubscription, UsagePeriod};

use super::base::{DaoError, DaoResult, map_write_error};

pub struct SubscriptionDao {
    collection: Collection<OrganizationSubscription>,
}

impl SubscriptionDao {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(OrganizationSubscription::COLLECTION),
        }
    }

    pub async fn find_by_org(
        &self,
        organization_id: ObjectId,
    ) -> DaoResult<Option<OrganizationSubscription>> {
        Ok(self
            .collection
            .find_one(doc! { "organization_id": organization_id })
            .await?)
    }

    pub async fn set_current_period(
        &self,
        subscription_id: ObjectId,
        period_start: DateTime,
        period_end: DateTime,
    ) -> DaoResult<()> {
        self.collection
            .update_one(
                doc! { "_id": subscription_id },
                doc! {
                    "$set": {
                        "current_period_start": period_start,
                        "current_period_end": period_end,
                        "updated_at": DateTime::now(),
                    }
                },
            )
            .await?;
        Ok(())
    }

    /// Atomic on the datastore side; concurrent sessions may both record.
    pub async fn inc_lifetime_usage(
        &self,
        subscription_id: ObjectId,
        minutes: f64,
    ) -> DaoResult<()> {
        self.collection
            .update_one(
                doc! { "_id": subscription_id },
                doc! {
                    "$inc": { "lifetime_usage_minutes": minutes },
                    "$set": { "updated_at": DateTime::now() },
                },
            )
            .await?;
        Ok(())
    }
}

pub struct UsagePeriodDao {
    collection: Collection<UsagePeriod>,
}

impl UsagePeriodDao {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(UsagePeriod::COLLECTION),
        }
    }

    /// Find-or-create on the unique `(subscription_id, period_start)` key.
    /// The upsert makes concurrent rollovers converge on one row.
    pub async fn find_or_create(
        &self,
        subscription_id: ObjectId,
        period_start: DateTime,
        period_end: DateTime,
    ) -> DaoResult<UsagePeriod> {
        let filter = doc! {
            "subscription_id": subscription_id,
            "period_start": period_start,
        };

        self.collection
            .update_one(
                filter.clone(),
                doc! {
                    "$setOnInsert": {
                        "period_end": period_end,
                        "usage_minutes": 0.0_f64,
                    }
                },
            )
            .upsert(true)
            .await
            .map_err(map_write_error)?;

        self.collection
            .find_one(filter)
            .await?
            .ok_or(DaoError::NotFound)
    }

    pub async fn inc_usage(
        &self,
        subscription_id: ObjectId,
        period_start: DateTime,
        period_end: DateTime,
        minutes: f64,
    ) -> DaoResult<()> {
        self.collection
            .update_one(
                doc! {
                    "subscription_id": subscription_id,
                    "period_start": period_start,
                },
                doc! {
                    "$inc": { "usage_minutes": minutes },
                    "$setOnInsert": { "period_end": period_end },
                },
            )
            .upsert(true)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }
}
