use serde::{Deserialize, Serialize};

/// Configuration frame sent as the first message on a new upstream stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamConfig {
    pub api_key: String,
    pub model: String,
    pub enable_language_identification: bool,
    pub enable_speaker_diarization: bool,
    pub enable_endpoint_detection: bool,
    pub audio_format: String,
    pub sample_rate: u32,
    pub num_channels: u32,
    pub translation: TranslationSetup,
    pub language_hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslationSetup {
    #[serde(rename = "type")]
    pub kind: String,
    pub target_language: String,
}

impl StreamConfig {
    pub fn new(
        api_key: &str,
        model: &str,
        sample_rate: u32,
        target_language: &str,
        source_language_hint: Option<&str>,
    ) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            enable_language_identification: true,
            enable_speaker_diarization: true,
            enable_endpoint_detection: true,
            audio_format: "pcm_s16le".to_string(),
            sample_rate,
            num_channels: 1,
            translation: TranslationSetup {
                kind: "one_way".to_string(),
                target_language: target_language.to_string(),
            },
            language_hints: source_language_hint
                .map(|hint| vec![hint.to_string()])
                .unwrap_or_default(),
        }
    }
}

/// An inbound message from the upstream provider. Every field is optional on
/// the wire; a message is an error envelope, a token batch, a completion
/// marker, or some combination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamMessage {
    #[serde(default)]
    pub tokens: Vec<Token>,
    pub detected_language: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub text: String,
    pub translation_status: Option<String>,
    #[serde(default)]
    pub is_final: bool,
    pub speaker: Option<u32>,
}
