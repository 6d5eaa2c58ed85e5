use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaoError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("BSON serialization error: {0}")]
    BsonSer(#[from] bson::ser::Error),
    #[error("BSON deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),
    #[error("Entity not found")]
    NotFound,
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
}

pub type DaoResult<T> = Result<T, DaoError>;

/// Maps MongoDB duplicate-key write failures to `DaoError::DuplicateKey`.
pub fn map_write_error(e: mongodb::error::Error) -> DaoError {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
        ref write_error,
    )) = *e.kind
    {
        if write_error.code == 11000 {
            return DaoError::DuplicateKey(write_error.message.clone());
        }
    }
    DaoError::Mongo(e)
}
