use bson::doc;
use mongodb::{Collection, Database};
use voxrelay_db::models::Transcription;

use super::base::DaoResult;

pub struct TranscriptionDao {
    collection: Collection<Transcription>,
}

impl TranscriptionDao {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(Transcription::COLLECTION),
        }
    }

    pub async fn find_by_id(&self, conversation_id: &str) -> DaoResult<Option<Transcription>> {
        Ok(self
            .collection
            .find_one(doc! { "_id": conversation_id })
            .await?)
    }

    pub async fn count_for_conversation(&self, conversation_id: &str) -> DaoResult<u64> {
        Ok(self
            .collection
            .count_documents(doc! { "_id": conversation_id })
            .await?)
    }
}
