use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    pub upstream: UpstreamSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// How often a connected session checkpoints its transcript to the database.
    pub periodic_save_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub name: String,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub session_secret: String,
    pub issuer: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub sample_rate: u32,
    pub connect_timeout_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("VOXRELAY"),
            )
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 3000)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("app.periodic_save_interval_secs", 60)?
            .set_default("database.url", "mongodb://localhost:27017")?
            .set_default("database.name", "voxrelay")?
            .set_default("auth.session_secret", "change-me-in-production")?
            .set_default("auth.issuer", "voxrelay")?
            .set_default("upstream.api_key", "")?
            .set_default(
                "upstream.endpoint",
                "wss://stt-rt.soniox.com/transcribe-websocket",
            )?
            .set_default("upstream.model", "stt-rt-v3")?
            .set_default("upstream.sample_rate", 16000)?
            .set_default("upstream.connect_timeout_secs", 10)?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("Failed to load default settings")
    }
}
