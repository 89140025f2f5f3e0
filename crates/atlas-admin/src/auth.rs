//! Credentials for the Admin API and the per-request authorization
//! derived from them

use broker_core::SecretString;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::error::{AdminError, AdminResult};
use crate::types::TokenResponse;

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token endpoint does not report one
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// How the client authenticates
#[derive(Clone)]
pub enum AdminAuth {
    /// Pre-issued access token
    Bearer(SecretString),
    /// Service account exchanged for short-lived tokens via OAuth
    /// client credentials
    ServiceAccount {
        client_id: String,
        client_secret: SecretString,
    },
    /// Programmatic API key, answered with HTTP digest authentication
    ApiKey {
        public_key: String,
        private_key: SecretString,
    },
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminAuth::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            AdminAuth::ServiceAccount { client_id, .. } => f
                .debug_struct("ServiceAccount")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .finish(),
            AdminAuth::ApiKey { public_key, .. } => f
                .debug_struct("ApiKey")
                .field("public_key", public_key)
                .field("private_key", &"[REDACTED]")
                .finish(),
        }
    }
}

/// What a single request carries
pub(crate) enum RequestAuth {
    Bearer(SecretString),
    /// Answer the server's digest challenge with these credentials
    Digest {
        username: String,
        password: SecretString,
    },
}

struct CachedToken {
    token: SecretString,
    refresh_at: Instant,
}

/// Hands out request credentials, exchanging service-account credentials
/// for a bearer token when the cached one is missing or about to expire
pub(crate) struct TokenSource {
    auth: AdminAuth,
    token_url: Url,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(auth: AdminAuth, token_url: Url) -> Self {
        Self {
            auth,
            token_url,
            cached: Mutex::new(None),
        }
    }

    pub async fn credentials(&self, http: &reqwest::Client) -> AdminResult<RequestAuth> {
        let (client_id, client_secret) = match &self.auth {
            AdminAuth::Bearer(token) => return Ok(RequestAuth::Bearer(token.clone())),
            AdminAuth::ApiKey {
                public_key,
                private_key,
            } => {
                return Ok(RequestAuth::Digest {
                    username: public_key.clone(),
                    password: private_key.clone(),
                })
            }
            AdminAuth::ServiceAccount {
                client_id,
                client_secret,
            } => (client_id, client_secret),
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(RequestAuth::Bearer(token.token.clone()));
            }
        }

        debug!("Requesting access token for service account {}", client_id);

        let response = http
            .post(self.token_url.clone())
            .basic_auth(client_id, Some(client_secret.expose()))
            .header("Accept", "application/json")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdminError::AuthError(format!(
                "token endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let token = SecretString::new(body.access_token);

        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        });

        Ok(RequestAuth::Bearer(token))
    }

    /// Drop the cached token so the next request fetches a new one
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
