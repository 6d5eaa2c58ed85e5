use axum::extract::ws::{Message, WebSocket};
use bson::{Bson, doc, oid::ObjectId};
use futures::{SinkExt, stream::SplitSink};
use tracing::{debug, info, warn};

use voxrelay_db::models::{Transcription, TranscriptionStatus};
use voxrelay_services::write_queue::{
    DEFAULT_MAX_RETRIES, PRIORITY_FINAL, PRIORITY_PERIODIC, WriteKind, WriteOp,
};
use voxrelay_transcription::{
    AccumulatorEvent, RecordingMeter, TokenAccumulator, UpstreamAdapter, UpstreamEvent,
};

use crate::state::AppState;

/// Parameters resolved during the handshake.
pub struct SessionConnect {
    pub conversation_id: String,
    pub target_language: String,
    pub vocabularies: Option<serde_json::Value>,
    pub user_id: String,
    pub organization_id: ObjectId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveFlow {
    Continue,
    /// The live channel is done: upstream error, transport failure, or
    /// completion. The session stays alive until the client disconnects.
    Terminated,
}

/// All state owned by one connection task. Every mutation happens on that
/// task, so audio frames, upstream tokens, timer ticks and the disconnect
/// observe one linear order.
pub struct Session {
    state: AppState,
    conversation_id: String,
    organization_id: ObjectId,
    accumulator: TokenAccumulator,
    meter: RecordingMeter,
    adapter: UpstreamAdapter,
    forward_results: bool,
}

impl Session {
    pub fn new(state: AppState, connect: SessionConnect, adapter: UpstreamAdapter) -> Self {
        Self {
            state,
            conversation_id: connect.conversation_id,
            organization_id: connect.organization_id,
            accumulator: TokenAccumulator::new(connect.target_language, connect.vocabularies),
            meter: RecordingMeter::new(),
            adapter,
            forward_results: false,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn handle_control(&mut self, sink: &mut SplitSink<WebSocket, Message>, text: &str) {
        let parsed: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return,
        };
        let msg_type = parsed.get("type").and_then(|t| t.as_str()).unwrap_or("");

        match msg_type {
            "start_recording" => {
                self.meter.start();
                info!(conversation_id = %self.conversation_id, "recording started");
                send_event(
                    sink,
                    "recording:started",
                    serde_json::json!({
                        "conversationId": self.conversation_id,
                        "timestamp": bson::DateTime::now().timestamp_millis(),
                    }),
                )
                .await;
            }
            "stop_recording" => {
                self.meter.stop();
                // A pause durably checkpoints the transcript so far
                self.schedule_periodic_save().await;
                send_event(
                    sink,
                    "recording:stopped",
                    serde_json::json!({
                        "conversationId": self.conversation_id,
                        "durationMs": self.meter.current_duration_ms(),
                        "timestamp": bson::DateTime::now().timestamp_millis(),
                    }),
                )
                .await;
            }
            other => {
                debug!(conversation_id = %self.conversation_id, msg_type = other, "unknown control event");
            }
        }
    }

    pub async fn handle_audio(
        &mut self,
        sink: &mut SplitSink<WebSocket, Message>,
        frame: Vec<u8>,
    ) {
        if !self.meter.is_recording() {
            // Duration reflects recording time; audio outside a recording
            // segment is rejected, not silently billed.
            send_event(
                sink,
                "transcription:error",
                serde_json::json!({
                    "code": "RECORDING_NOT_STARTED",
                    "message": "Recording has not been started",
                    "conversationId": self.conversation_id,
                }),
            )
            .await;
            return;
        }

        if !self.forward_results {
            // Live events flow to the client from the first audio chunk on
            self.forward_results = true;
        }

        self.adapter.send_audio(frame).await;
    }

    pub async fn handle_upstream(
        &mut self,
        sink: &mut SplitSink<WebSocket, Message>,
        event: UpstreamEvent,
    ) -> LiveFlow {
        match event {
            UpstreamEvent::Message(msg) => {
                let events = self
                    .accumulator
                    .ingest(&msg, self.meter.recording_elapsed_ms());

                let mut flow = LiveFlow::Continue;
                for event in events {
                    match event {
                        AccumulatorEvent::Result(result) => {
                            if self.forward_results {
                                let payload = serde_json::to_value(&result)
                                    .unwrap_or(serde_json::Value::Null);
                                send_event(sink, "translation:result", payload).await;
                            }
                        }
                        AccumulatorEvent::Error { code, message } => {
                            warn!(
                                conversation_id = %self.conversation_id,
                                ?code,
                                %message,
                                "upstream reported an error"
                            );
                            if self.forward_results {
                                send_event(
                                    sink,
                                    "transcription:error",
                                    serde_json::json!({
                                        "message": message,
                                        "code": code,
                                        "conversationId": self.conversation_id,
                                    }),
                                )
                                .await;
                            }
                            flow = LiveFlow::Terminated;
                        }
                        AccumulatorEvent::Finished => {
                            info!(conversation_id = %self.conversation_id, "upstream finished");
                            if self.forward_results {
                                send_event(
                                    sink,
                                    "conversation:complete",
                                    serde_json::json!({
                                        "conversationId": self.conversation_id,
                                    }),
                                )
                                .await;
                            }
                            flow = LiveFlow::Terminated;
                        }
                    }
                }
                flow
            }
            UpstreamEvent::ConnectFailed(message) => {
                warn!(conversation_id = %self.conversation_id, %message, "upstream connect failed");
                self.accumulator.mark_error();
                if self.forward_results {
                    send_event(
                        sink,
                        "transcription:error",
                        serde_json::json!({
                            "message": format!("upstream connection failed: {message}"),
                            "code": "UPSTREAM_CONNECT_FAILED",
                            "conversationId": self.conversation_id,
                        }),
                    )
                    .await;
                }
                LiveFlow::Terminated
            }
            UpstreamEvent::TransportError(message) => {
                warn!(conversation_id = %self.conversation_id, %message, "upstream stream error");
                self.accumulator.mark_error();
                if self.forward_results {
                    send_event(
                        sink,
                        "transcription:error",
                        serde_json::json!({
                            "message": message,
                            "code": "UPSTREAM_STREAM_ERROR",
                            "conversationId": self.conversation_id,
                        }),
                    )
                    .await;
                }
                LiveFlow::Terminated
            }
            UpstreamEvent::Closed => {
                debug!(conversation_id = %self.conversation_id, "upstream closed");
                LiveFlow::Terminated
            }
        }
    }

    /// Checkpoints the in-progress transcript. Skipped while nothing has
    /// been transcribed yet.
    pub async fn schedule_periodic_save(&self) {
        if self.accumulator.live_is_empty() {
            debug!(conversation_id = %self.conversation_id, "skipping periodic save, no transcript yet");
            return;
        }
        if self.accumulator.target_language().is_empty() {
            warn!(conversation_id = %self.conversation_id, "skipping periodic save, missing target language");
            return;
        }

        let op = self.periodic_op();
        self.state.write_queue.enqueue(op).await;
    }

    /// Runs the disconnect sequence: close the upstream, write the final
    /// record, record usage, release the registration.
    pub async fn finalize(self) {
        if !self.state.sessions.begin_finalize(&self.conversation_id) {
            debug!(conversation_id = %self.conversation_id, "finalization already in progress");
            return;
        }

        // The periodic timer and the live subscription die with the
        // connection task; only the upstream needs an explicit close.
        self.adapter.close();

        let duration_ms = if self.meter.has_recorded() {
            self.meter.current_duration_ms()
        } else {
            0
        };

        if duration_ms == 0 {
            // The user never started recording: nothing to persist or bill
            info!(conversation_id = %self.conversation_id, "no recording segments, skipping durable write");
        } else if self.accumulator.target_language().is_empty() {
            warn!(conversation_id = %self.conversation_id, "missing target language, skipping durable write");
        } else {
            let status = if self.accumulator.has_received_data() {
                // Partial data survives upstream errors
                TranscriptionStatus::Completed
            } else if self.accumulator.has_error() {
                TranscriptionStatus::Failed
            } else {
                TranscriptionStatus::NoData
            };

            info!(
                conversation_id = %self.conversation_id,
                %status,
                duration_ms,
                "finalizing session"
            );

            let op = self.final_op(duration_ms, status);
            self.state.write_queue.enqueue(op).await;

            if let Err(e) = self
                .state
                .quota
                .record_usage(self.organization_id, duration_ms)
                .await
            {
                warn!(conversation_id = %self.conversation_id, %e, "failed to record usage");
            }
        }

        self.state.sessions.unregister(&self.conversation_id);
        self.state.sessions.end_finalize(&self.conversation_id);
        info!(conversation_id = %self.conversation_id, "session closed");
    }

    fn periodic_op(&self) -> WriteOp {
        let now = bson::DateTime::now();

        let insert = doc! {
            "_id": &self.conversation_id,
            "organization_id": self.organization_id,
            "model_name": &self.state.settings.upstream.model,
            "target_language": self.accumulator.target_language(),
            "source_language": opt_string(self.accumulator.source_language()),
            "version": 1_i32,
            "created_at": now,
        };
        let update = doc! {
            "duration_in_ms": self.meter.current_duration_ms() as i64,
            "transcription_result": self.accumulator.transcript_json(),
            "translation_result": self.accumulator.translation_json(),
            "vocabularies": self.vocabularies_bson(),
            "status": TranscriptionStatus::InProgress.to_string(),
            "updated_at": now,
        };

        WriteOp {
            id: self.conversation_id.clone(),
            kind: WriteKind::Upsert,
            collection: Transcription::COLLECTION.to_string(),
            // A checkpoint only ever creates or touches IN_PROGRESS rows; on
            // a finalized row the filter misses and the insert collides on
            // _id, so the checkpoint drops instead of downgrading the status.
            filter: doc! {
                "_id": &self.conversation_id,
                "status": TranscriptionStatus::InProgress.to_string(),
            },
            insert,
            update,
            priority: PRIORITY_PERIODIC,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    fn final_op(&self, duration_ms: u64, status: TranscriptionStatus) -> WriteOp {
        let now = bson::DateTime::now();

        let (transcript, translation, vocabularies) = if self.accumulator.has_received_data() {
            (
                Bson::String(self.accumulator.transcript_json()),
                Bson::String(self.accumulator.translation_json()),
                self.vocabularies_bson(),
            )
        } else {
            (Bson::Null, Bson::Null, Bson::Null)
        };

        let insert = doc! {
            "_id": &self.conversation_id,
            "organization_id": self.organization_id,
            "model_name": &self.state.settings.upstream.model,
            "version": 1_i32,
            "created_at": now,
        };
        let update = doc! {
            "duration_in_ms": duration_ms as i64,
            "transcription_result": transcript,
            "translation_result": translation,
            "vocabularies": vocabularies,
            "status": status.to_string(),
            "target_language": self.accumulator.target_language(),
            "source_language": opt_string(self.accumulator.source_language()),
            "updated_at": now,
        };

        WriteOp {
            id: self.conversation_id.clone(),
            kind: WriteKind::Upsert,
            collection: Transcription::COLLECTION.to_string(),
            filter: doc! { "_id": &self.conversation_id },
            insert,
            update,
            priority: PRIORITY_FINAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    fn vocabularies_bson(&self) -> Bson {
        self.accumulator
            .vocabularies()
            .and_then(|v| bson::to_bson(v).ok())
            .unwrap_or(Bson::Null)
    }
}

fn opt_string(value: Option<&str>) -> Bson {
    value
        .map(|s| Bson::String(s.to_string()))
        .unwrap_or(Bson::Null)
}

/// Sends one `{type, data}` event frame; delivery is best-effort.
pub(crate) async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &str,
    data: serde_json::Value,
) {
    let msg = serde_json::json!({ "type": event, "data": data });
    let text = serde_json::to_string(&msg).unwrap_or_default();
    if let Err(e) = sink.send(Message::text(text)).await {
        debug!(%e, event, "failed to send event to client");
    }
}
