use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::protocol::UpstreamMessage;

/// Sentinel token emitted by the upstream at utterance boundaries; carries no
/// transcript text.
const END_MARKER: &str = "<end>";

/// Which track a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Original,
    Translation,
}

/// A live token event fanned out to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    pub timestamp: i64,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
}

/// A finalized, speaker-attributed transcript segment. Consecutive final
/// tokens from the same speaker merge into one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSegment {
    pub role: String,
    pub text: String,
    /// Milliseconds since recording started.
    pub timestamp: u64,
}

#[derive(Debug)]
pub enum AccumulatorEvent {
    Result(TranslationResult),
    Error {
        code: Option<String>,
        message: String,
    },
    Finished,
}

/// Per-session transcript state built from the interleaved partial/final
/// token stream.
///
/// The live buffers are human-readable previews including non-final tokens;
/// only the finalized segment lists are ever persisted.
#[derive(Debug)]
pub struct TokenAccumulator {
    target_language: String,
    source_language: Option<String>,
    vocabularies: Option<serde_json::Value>,
    live_original: String,
    live_translation: String,
    final_original: Vec<TranscriptSegment>,
    final_translation: Vec<TranscriptSegment>,
    last_original_speaker: Option<u32>,
    last_translation_speaker: Option<u32>,
    has_received_data: bool,
    has_error: bool,
}

impl TokenAccumulator {
    pub fn new(target_language: String, vocabularies: Option<serde_json::Value>) -> Self {
        Self {
            target_language,
            source_language: None,
            vocabularies,
            live_original: String::new(),
            live_translation: String::new(),
            final_original: Vec::new(),
            final_translation: Vec::new(),
            last_original_speaker: None,
            last_translation_speaker: None,
            has_received_data: false,
            has_error: false,
        }
    }

    /// Applies one upstream message and returns the events to fan out.
    ///
    /// `recording_elapsed_ms` stamps finalized segments; `None` (recording
    /// never started) stamps them at 0.
    pub fn ingest(
        &mut self,
        msg: &UpstreamMessage,
        recording_elapsed_ms: Option<u64>,
    ) -> Vec<AccumulatorEvent> {
        if let Some(code) = &msg.error_code {
            // Accumulated data is kept; the final durable write still reads it.
            self.has_error = true;
            let message = msg
                .error_message
                .clone()
                .unwrap_or_else(|| format!("upstream error: {code}"));
            return vec![AccumulatorEvent::Error {
                code: Some(code.clone()),
                message,
            }];
        }

        let mut events = Vec::new();

        for token in &msg.tokens {
            if token.text.is_empty() || token.text == END_MARKER {
                continue;
            }

            let kind = if token.translation_status.as_deref() == Some("translation") {
                TrackKind::Translation
            } else {
                TrackKind::Original
            };

            self.has_received_data = true;

            if kind == TrackKind::Original && self.source_language.is_none() {
                if let Some(lang) = &msg.detected_language {
                    self.source_language = Some(lang.clone());
                }
            }

            {
                let (live, last_speaker, finals) = match kind {
                    TrackKind::Original => (
                        &mut self.live_original,
                        &mut self.last_original_speaker,
                        &mut self.final_original,
                    ),
                    TrackKind::Translation => (
                        &mut self.live_translation,
                        &mut self.last_translation_speaker,
                        &mut self.final_translation,
                    ),
                };

                if let Some(speaker) = token.speaker {
                    if *last_speaker != Some(speaker) {
                        if last_speaker.is_some() {
                            live.push_str("\n\n");
                        }
                        *last_speaker = Some(speaker);
                        live.push_str(&format!("Speaker {speaker}: "));
                    }
                }
                live.push_str(&token.text);

                if token.is_final {
                    if let Some(speaker) = token.speaker {
                        let role = format!("Speaker {speaker}");
                        match finals.last_mut() {
                            Some(last) if last.role == role => last.text.push_str(&token.text),
                            _ => finals.push(TranscriptSegment {
                                role,
                                text: token.text.clone(),
                                timestamp: recording_elapsed_ms.unwrap_or(0),
                            }),
                        }
                    }
                }
            }

            events.push(AccumulatorEvent::Result(TranslationResult {
                text: token.text.clone(),
                kind,
                language: self.target_language.clone(),
                source_language: self.source_language.clone(),
                timestamp: epoch_ms(),
                is_final: token.is_final,
                speaker: token.speaker,
            }));
        }

        if msg.finished {
            events.push(AccumulatorEvent::Finished);
        }

        events
    }

    /// Marks the session as failed without touching accumulated data. Used
    /// for transport-level failures that never produce an error envelope.
    pub fn mark_error(&mut self) {
        self.has_error = true;
    }

    pub fn has_received_data(&self) -> bool {
        self.has_received_data
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    pub fn source_language(&self) -> Option<&str> {
        self.source_language.as_deref()
    }

    pub fn vocabularies(&self) -> Option<&serde_json::Value> {
        self.vocabularies.as_ref()
    }

    pub fn live_original(&self) -> &str {
        &self.live_original
    }

    pub fn live_translation(&self) -> &str {
        &self.live_translation
    }

    /// True until any token (partial or final) has been appended.
    pub fn live_is_empty(&self) -> bool {
        self.live_original.is_empty() && self.live_translation.is_empty()
    }

    pub fn final_original(&self) -> &[TranscriptSegment] {
        &self.final_original
    }

    pub fn final_translation(&self) -> &[TranscriptSegment] {
        &self.final_translation
    }

    /// Finalized original segments as the JSON stored in the durable record.
    pub fn transcript_json(&self) -> String {
        serde_json::to_string(&self.final_original).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn translation_json(&self) -> String {
        serde_json::to_string(&self.final_translation).unwrap_or_else(|_| "[]".to_string())
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
