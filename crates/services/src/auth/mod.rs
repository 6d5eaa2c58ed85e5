use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use voxrelay_config::AuthSettings;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Claims carried by the session cookie. Sessions are issued by the account
/// service; this side only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String, // user_id
    pub active_organization_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

pub struct AuthService {
    settings: AuthSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(settings: AuthSettings) -> Self {
        let encoding_key = EncodingKey::from_secret(settings.session_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(settings.session_secret.as_bytes());
        Self {
            settings,
            encoding_key,
            decoding_key,
        }
    }

    pub fn verify_session_token(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.settings.issuer]);

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }

    /// Mints a session token with the same claims layout the account service
    /// uses. Test fixtures rely on this; the relay itself never issues tokens.
    pub fn issue_session_token(
        &self,
        user_id: &str,
        active_organization_id: Option<&str>,
        ttl_secs: i64,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            active_organization_id: active_organization_id.map(|s| s.to_string()),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
            iss: self.settings.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}
