use bson::{doc, oid::ObjectId};
use mongodb::{Collection, Database};
use voxrelay_db::models::SubscriptionPlan;

use super::base::{DaoError, DaoResult};

pub struct PlanDao {
    collection: Collection<SubscriptionPlan>,
}

impl PlanDao {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(SubscriptionPlan::COLLECTION),
        }
    }

    pub async fn find_by_id(&self, id: ObjectId) -> DaoResult<SubscriptionPlan> {
        self.collection
            .find_one(doc! { "_id": id })
            .await?
            .ok_or(DaoError::NotFound)
    }
}
