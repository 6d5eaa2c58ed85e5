use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// A durable transcription record. The primary key is the conversation id
/// supplied by the client at connect time, so periodic checkpoints and the
/// final write for one session always address the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(rename = "_id")]
    pub id: String,
    pub organization_id: ObjectId,
    pub duration_in_ms: i64,
    pub model_name: String,
    pub target_language: Option<String>,
    pub source_language: Option<String>,
    /// JSON-serialized list of finalized `{role, text, timestamp}` segments.
    pub transcription_result: Option<String>,
    pub translation_result: Option<String>,
    pub vocabularies: Option<bson::Bson>,
    #[serde(default)]
    pub status: TranscriptionStatus,
    #[serde(default = "default_version")]
    pub version: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranscriptionStatus {
    #[default]
    InProgress,
    Completed,
    NoData,
    Failed,
}

fn default_version() -> i32 {
    1
}

impl Transcription {
    pub const COLLECTION: &'static str = "transcriptions";
}

impl std::fmt::Display for TranscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TranscriptionStatus::InProgress => "IN_PROGRESS",
            TranscriptionStatus::Completed => "COMPLETED",
            TranscriptionStatus::NoData => "NO_DATA",
            TranscriptionStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}
