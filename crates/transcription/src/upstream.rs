use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::protocol::{StreamConfig, UpstreamMessage};

const AUDIO_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection settings for the upstream speech-to-text provider.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub sample_rate: u32,
    pub connect_timeout_secs: u64,
}

/// Per-session parameters for one upstream stream.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub conversation_id: String,
    pub target_language: String,
    pub source_language_hint: Option<String>,
}

#[derive(Debug)]
pub enum UpstreamEvent {
    Message(UpstreamMessage),
    ConnectFailed(String),
    TransportError(String),
    Closed,
}

/// Owns one streaming duplex connection to the speech provider.
///
/// `open` spawns the connection task and returns immediately; audio sent
/// before the handshake completes queues on the bounded channel, so the
/// first `send_audio` effectively awaits the open. All writes serialize
/// through the connection task (single writer).
pub struct UpstreamAdapter {
    conversation_id: String,
    audio_tx: mpsc::Sender<Vec<u8>>,
    close_tx: watch::Sender<bool>,
}

impl UpstreamAdapter {
    pub fn open(
        config: UpstreamConfig,
        request: OpenRequest,
    ) -> (Self, mpsc::Receiver<UpstreamEvent>) {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);

        let conversation_id = request.conversation_id.clone();
        tokio::spawn(run_connection(config, request, audio_rx, events_tx, close_rx));

        (
            Self {
                conversation_id,
                audio_tx,
                close_tx,
            },
            events_rx,
        )
    }

    /// Forwards one raw PCM frame. Dropped with a warning when the
    /// connection is gone (failed handshake or closed stream).
    pub async fn send_audio(&self, frame: Vec<u8>) {
        if self.audio_tx.send(frame).await.is_err() {
            warn!(
                conversation_id = %self.conversation_id,
                "upstream connection not open, dropping audio frame"
            );
        }
    }

    /// Gracefully closes the upstream stream. Double-close is a no-op.
    pub fn close(&self) {
        let was_closed = self.close_tx.send_replace(true);
        if !was_closed {
            debug!(conversation_id = %self.conversation_id, "upstream close requested");
        }
    }
}

async fn run_connection(
    config: UpstreamConfig,
    request: OpenRequest,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    events_tx: mpsc::Sender<UpstreamEvent>,
    mut close_rx: watch::Receiver<bool>,
) {
    let conversation_id = request.conversation_id;

    let stream_config = StreamConfig::new(
        &config.api_key,
        &config.model,
        config.sample_rate,
        &request.target_language,
        request.source_language_hint.as_deref(),
    );
    let config_frame = match serde_json::to_string(&stream_config) {
        Ok(frame) => frame,
        Err(e) => {
            let _ = events_tx
                .send(UpstreamEvent::ConnectFailed(e.to_string()))
                .await;
            return;
        }
    };

    let connect = tokio::time::timeout(
        Duration::from_secs(config.connect_timeout_secs),
        connect_async(config.endpoint.as_str()),
    );
    let ws = match connect.await {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => {
            warn!(%conversation_id, %e, "upstream connect failed");
            let _ = events_tx
                .send(UpstreamEvent::ConnectFailed(e.to_string()))
                .await;
            return;
        }
        Err(_) => {
            warn!(%conversation_id, "upstream connect timed out");
            let _ = events_tx
                .send(UpstreamEvent::ConnectFailed("connect timed out".to_string()))
                .await;
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();

    // The configuration frame must precede any audio.
    if let Err(e) = sink.send(Message::Text(config_frame.into())).await {
        warn!(%conversation_id, %e, "failed to send upstream configuration");
        let _ = events_tx
            .send(UpstreamEvent::ConnectFailed(e.to_string()))
            .await;
        return;
    }

    info!(%conversation_id, "upstream stream opened");

    loop {
        tokio::select! {
            frame = audio_rx.recv() => match frame {
                Some(bytes) => {
                    if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                        warn!(%conversation_id, %e, "upstream audio send failed");
                        let _ = events_tx
                            .send(UpstreamEvent::TransportError(e.to_string()))
                            .await;
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<UpstreamMessage>(&text) {
                        Ok(parsed) => {
                            if events_tx.send(UpstreamEvent::Message(parsed)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(%conversation_id, %e, "unparseable upstream frame"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events_tx.send(UpstreamEvent::Closed).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%conversation_id, %e, "upstream transport error");
                    let _ = events_tx
                        .send(UpstreamEvent::TransportError(e.to_string()))
                        .await;
                    break;
                }
            },
            changed = close_rx.changed() => {
                // A dropped adapter counts as a close
                if changed.is_err() || *close_rx.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    debug!(%conversation_id, "upstream connection task exiting");
}
