use std::net::SocketAddr;
use std::time::Duration;

use bson::{Document, doc, oid::ObjectId};
use futures::{SinkExt, StreamExt};
use mongodb::{Client, Database, options::ClientOptions};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{Message, client::IntoClientRequest},
};
use voxrelay_api::{build_router, state::AppState};
use voxrelay_config::Settings;
use voxrelay_db::indexes::ensure_indexes;
use voxrelay_services::AuthService;

use super::mock_upstream::MockUpstream;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running test application with its own MongoDB database and a scripted
/// mock upstream STT server.
pub struct TestApp {
    pub addr: SocketAddr,
    pub base_url: String,
    pub db: Database,
    pub settings: Settings,
    pub client: reqwest::Client,
    pub auth: AuthService,
    pub upstream: MockUpstream,
}

impl TestApp {
    /// Spawn a new test server connected to the test MongoDB.
    ///
    /// Requires a running MongoDB; set VOXRELAY__DATABASE__URL to override
    /// the connection string. Each test gets a unique database for isolation.
    pub async fn spawn() -> Self {
        Self::spawn_with_settings(|_| {}).await
    }

    /// Spawn a test server with customized settings.
    ///
    /// The `mutator` closure receives a `&mut Settings` after defaults are
    /// applied, allowing tests to tweak specific fields (e.g. the periodic
    /// save interval).
    pub async fn spawn_with_settings(mutator: impl FnOnce(&mut Settings)) -> Self {
        let db_name = format!("voxrelay_test_{}", uuid::Uuid::new_v4().simple());

        let mut settings = test_settings();
        if let Ok(url) = std::env::var("VOXRELAY__DATABASE__URL") {
            settings.database.url = url;
        }
        settings.database.name = db_name.clone();

        let upstream = MockUpstream::spawn().await;
        settings.upstream.endpoint = upstream.ws_url();

        mutator(&mut settings);

        let client_options = ClientOptions::parse(&settings.database.url)
            .await
            .expect("Failed to parse MongoDB URL");
        let mongo_client =
            Client::with_options(client_options).expect("Failed to create MongoDB client");
        let db = mongo_client.database(&db_name);

        ensure_indexes(&db).await.expect("Failed to create indexes");

        let app_state = AppState::new(db.clone(), settings.clone());
        let app = build_router(app_state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base_url = format!("http://{}", addr);
        let client = reqwest::Client::new();
        let auth = AuthService::new(settings.auth.clone());

        Self {
            addr,
            base_url,
            db,
            settings,
            client,
            auth,
            upstream,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Mints a session cookie value with the account service's claim layout.
    pub fn session_token(&self, user_id: &ObjectId, organization_id: Option<&ObjectId>) -> String {
        let org_hex = organization_id.map(|id| id.to_hex());
        self.auth
            .issue_session_token(&user_id.to_hex(), org_hex.as_deref(), 3600)
            .expect("Failed to mint session token")
    }

    pub async fn connect_ws(
        &self,
        token: &str,
        conversation_id: &str,
        target_language: &str,
    ) -> WsClient {
        let query = format!(
            "conversationId={}&targetLanguage={}",
            conversation_id, target_language
        );
        self.try_connect_ws(Some(token), &query)
            .await
            .expect("WS connect failed")
    }

    /// Raw connect for rejection tests; `query` is appended verbatim.
    pub async fn try_connect_ws(
        &self,
        token: Option<&str>,
        query: &str,
    ) -> Result<WsClient, tokio_tungstenite::tungstenite::Error> {
        let url = format!("ws://{}/ws?{}", self.addr, query);
        let mut request = url.into_client_request()?;
        if let Some(token) = token {
            request.headers_mut().insert(
                "Cookie",
                format!("session_token={token}").parse().unwrap(),
            );
        }
        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(ws)
    }

    pub async fn active_sessions(&self) -> u64 {
        let health: serde_json::Value = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .expect("health request failed")
            .json()
            .await
            .expect("health response not json");
        health["active_sessions"].as_u64().unwrap()
    }

    /// Polls until the session count drops to zero (finalization done).
    pub async fn wait_for_idle(&self) {
        for _ in 0..100 {
            if self.active_sessions().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("sessions never went idle");
    }

    pub async fn find_transcription(&self, conversation_id: &str) -> Option<Document> {
        self.db
            .collection::<Document>("transcriptions")
            .find_one(doc! { "_id": conversation_id })
            .await
            .expect("transcription lookup failed")
    }

    /// Polls until a transcription row exists for the conversation.
    pub async fn wait_for_transcription(&self, conversation_id: &str) -> Option<Document> {
        for _ in 0..100 {
            if let Some(row) = self.find_transcription(conversation_id).await {
                return Some(row);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None
    }

    /// Polls until the row reaches the given status.
    pub async fn wait_for_status(&self, conversation_id: &str, status: &str) -> Option<Document> {
        for _ in 0..100 {
            if let Some(row) = self.find_transcription(conversation_id).await {
                if row.get_str("status") == Ok(status) {
                    return Some(row);
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let db = self.db.clone();
        // Best effort cleanup: drop the test database
        tokio::spawn(async move {
            let _ = db.drop().await;
        });
    }
}

/// Reads the next `{type, data}` event frame, skipping non-text frames.
pub async fn next_event(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed while waiting for event")
            .expect("socket error while waiting for event");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("event frame is not valid JSON");
        }
    }
}

pub async fn send_control(ws: &mut WsClient, event: &str) {
    let frame = serde_json::json!({ "type": event }).to_string();
    ws.send(Message::Text(frame.into()))
        .await
        .expect("failed to send control event");
}

pub async fn send_audio(ws: &mut WsClient, frame: Vec<u8>) {
    ws.send(Message::Binary(frame.into()))
        .await
        .expect("failed to send audio frame");
}

fn test_settings() -> Settings {
    Settings {
        app: voxrelay_config::AppSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec![],
            periodic_save_interval_secs: 60,
        },
        database: voxrelay_config::DatabaseSettings {
            url: "mongodb://localhost:27017".to_string(),
            name: "voxrelay_test".to_string(),
            max_pool_size: Some(5),
            min_pool_size: Some(1),
        },
        auth: voxrelay_config::AuthSettings {
            session_secret: "test-secret-key-for-session-signing-32".to_string(),
            issuer: "voxrelay".to_string(),
        },
        upstream: voxrelay_config::UpstreamSettings {
            api_key: "test-upstream-key".to_string(),
            endpoint: "ws://127.0.0.1:1".to_string(),
            model: "stt-rt-v3".to_string(),
            sample_rate: 16000,
            connect_timeout_secs: 2,
        },
    }
}
