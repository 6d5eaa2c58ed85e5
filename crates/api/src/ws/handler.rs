use std::time::Duration;

use axum::{
    extract::{Query, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::{HeaderMap, header},
    response::Response,
};
use bson::oid::ObjectId;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use voxrelay_services::quota::QuotaError;
use voxrelay_transcription::upstream::{OpenRequest, UpstreamAdapter, UpstreamConfig};

use crate::state::AppState;
use crate::ws::session::{self, LiveFlow, Session, SessionConnect};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    pub conversation_id: String,
    pub target_language: String,
    pub vocabularies: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // Verify the session cookie before accepting the WebSocket. Auth
    // failures close silently; no detail leaks to the client.
    let Some(token) = session_cookie(&headers) else {
        return unauthorized();
    };
    let claims = match state.auth.verify_session_token(&token) {
        Ok(claims) => claims,
        Err(_) => return unauthorized(),
    };

    let Some(org_hex) = claims.active_organization_id else {
        warn!(user_id = %claims.sub, "session has no active organization");
        return unauthorized();
    };
    let organization_id = match ObjectId::parse_str(&org_hex) {
        Ok(id) => id,
        Err(_) => {
            warn!(user_id = %claims.sub, "invalid organization id in session");
            return unauthorized();
        }
    };

    if params.conversation_id.is_empty() || params.target_language.is_empty() {
        return bad_request();
    }

    let vocabularies = params.vocabularies.as_deref().and_then(|raw| {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%e, "malformed vocabularies parameter, ignoring");
                None
            }
        }
    });

    let connect = SessionConnect {
        conversation_id: params.conversation_id,
        target_language: params.target_language,
        vocabularies,
        user_id: claims.sub,
        organization_id,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, connect))
}

async fn handle_socket(socket: WebSocket, state: AppState, connect: SessionConnect) {
    info!(
        conversation_id = %connect.conversation_id,
        user_id = %connect.user_id,
        "session connected"
    );

    let (mut sink, mut stream) = socket.split();

    // Quota admission gates the handshake; the upstream stream is only
    // opened for admitted sessions.
    match state
        .quota
        .check_quota_availability(connect.organization_id)
        .await
    {
        Ok(status) => {
            debug!(
                conversation_id = %connect.conversation_id,
                plan = %status.plan_name,
                remaining_minutes = status.remaining_minutes,
                "quota admitted"
            );
        }
        Err(QuotaError::Exceeded { error, data }) => {
            warn!(conversation_id = %connect.conversation_id, %error, "quota exceeded");
            let payload = serde_json::json!({
                "error": error,
                "data": data,
            });
            session::send_event(&mut sink, "quota:exceeded", payload).await;
            let _ = sink.close().await;
            return;
        }
        Err(e) => {
            warn!(conversation_id = %connect.conversation_id, %e, "quota check failed");
            let _ = sink.close().await;
            return;
        }
    }

    let upstream_config = UpstreamConfig {
        endpoint: state.settings.upstream.endpoint.clone(),
        api_key: state.settings.upstream.api_key.clone(),
        model: state.settings.upstream.model.clone(),
        sample_rate: state.settings.upstream.sample_rate,
        connect_timeout_secs: state.settings.upstream.connect_timeout_secs,
    };
    let (adapter, mut upstream_rx) = UpstreamAdapter::open(
        upstream_config,
        OpenRequest {
            conversation_id: connect.conversation_id.clone(),
            target_language: connect.target_language.clone(),
            source_language_hint: None,
        },
    );

    state
        .sessions
        .register(&connect.conversation_id, connect.organization_id);

    let mut session = Session::new(state.clone(), connect, adapter);

    let mut save_timer = tokio::time::interval(Duration::from_secs(
        state.settings.app.periodic_save_interval_secs,
    ));
    save_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    save_timer.tick().await; // the first tick completes immediately

    let mut upstream_open = true;

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    session.handle_control(&mut sink, &text).await;
                }
                Some(Ok(Message::Binary(frame))) => {
                    session.handle_audio(&mut sink, frame.to_vec()).await;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(conversation_id = %session.conversation_id(), %e, "client socket error");
                    break;
                }
                _ => {}
            },
            event = upstream_rx.recv(), if upstream_open => match event {
                Some(event) => {
                    if session.handle_upstream(&mut sink, event).await == LiveFlow::Terminated {
                        upstream_open = false;
                    }
                }
                None => upstream_open = false,
            },
            _ = save_timer.tick() => {
                session.schedule_periodic_save().await;
            }
        }
    }

    session.finalize().await;
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|cookie| {
            cookie
                .trim()
                .strip_prefix("session_token=")
                .map(|s| s.to_string())
        })
}

fn unauthorized() -> Response {
    Response::builder()
        .status(401)
        .body("Unauthorized".into())
        .unwrap()
}

fn bad_request() -> Response {
    Response::builder()
        .status(400)
        .body("Missing session parameters".into())
        .unwrap()
}
