use mongodb::{Database, IndexModel, options::IndexOptions};
use tracing::info;

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    // Subscription plans
    create_indexes(
        db,
        "subscription_plans",
        vec![
            index_unique(bson::doc! { "slug": 1 }),
            index(bson::doc! { "is_active": 1 }),
        ],
    )
    .await?;

    // Organization subscriptions
    create_indexes(
        db,
        "organization_subscriptions",
        vec![
            index_unique(bson::doc! { "organization_id": 1 }),
            index(bson::doc! { "plan_id": 1 }),
        ],
    )
    .await?;

    // Usage periods
    create_indexes(
        db,
        "usage_periods",
        vec![index_unique(
            bson::doc! { "subscription_id": 1, "period_start": 1 },
        )],
    )
    .await?;

    // Transcriptions (the primary key is the externally supplied conversation id)
    create_indexes(
        db,
        "transcriptions",
        vec![
            index(bson::doc! { "organization_id": 1, "status": 1 }),
            index(bson::doc! { "organization_id": 1, "created_at": -1 }),
        ],
    )
    .await?;

    info!("All indexes ensured");
    Ok(())
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

fn index_unique(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

async fn create_indexes(
    db: &Database,
    collection: &str,
    indexes: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    db.collection::<bson::Document>(collection)
        .create_indexes(indexes)
        .await?;
    info!(collection, "Indexes created");
    Ok(())
}
