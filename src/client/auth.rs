//! Destination authentication
//!
//! Google APIs accept a bearer token. It either comes pre-issued or is
//! obtained by signing a JWT with a service account key and exchanging it
//! at the key's token endpoint.

use crate::config::SheetsCredentials;
use crate::error::DestinationError;
use eyre::{Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Fields of a service account key file that token exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"***")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Read a key file downloaded from the Google Cloud console.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read service account key {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse service account key {}", path.display()))
    }
}

#[derive(Debug)]
pub enum Auth {
    /// Exchange a signed JWT for short-lived access tokens
    ServiceAccount(ServiceAccountKey),
    /// Use a pre-issued bearer token as-is
    Token(String),
    /// Don't send credentials (emulators, tests)
    None,
}

impl Auth {
    pub fn from_credentials(credentials: &SheetsCredentials) -> Result<Self> {
        Ok(match credentials {
            SheetsCredentials::ServiceAccountFile(path) => {
                Self::ServiceAccount(ServiceAccountKey::read(path)?)
            }
            SheetsCredentials::AccessToken(token) => Self::Token(token.clone()),
            SheetsCredentials::None => Self::None,
        })
    }
}

impl std::fmt::Display for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceAccount(key) => write!(f, "ServiceAccount ({})", key.client_email),
            Self::Token(_) => write!(f, "Token"),
            Self::None => write!(f, "None"),
        }
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Hands out bearer tokens, refreshing service account tokens as needed.
pub struct Authenticator {
    auth: Auth,
    encoding_key: Option<EncodingKey>,
    cached: tokio::sync::Mutex<Option<CachedToken>>,
}

impl Authenticator {
    pub fn try_new(auth: Auth) -> Result<Self> {
        let encoding_key = match &auth {
            Auth::ServiceAccount(key) => Some(
                EncodingKey::from_rsa_pem(key.private_key.as_bytes())
                    .context("Service account private key is not a valid RSA PEM")?,
            ),
            _ => None,
        };
        Ok(Self {
            auth,
            encoding_key,
            cached: tokio::sync::Mutex::new(None),
        })
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Current bearer token, or `None` when no credentials are configured.
    pub async fn bearer(&self, http: &Client) -> Result<Option<String>, DestinationError> {
        let key = match &self.auth {
            Auth::None => return Ok(None),
            Auth::Token(token) => return Ok(Some(token.clone())),
            Auth::ServiceAccount(key) => key,
        };

        // Held across the exchange so concurrent callers share one refresh
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(Some(token.value.clone()));
        }

        let token = self.exchange(http, key).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(Some(value))
    }

    async fn exchange(
        &self,
        http: &Client,
        key: &ServiceAccountKey,
    ) -> Result<CachedToken, DestinationError> {
        let encoding_key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| DestinationError::Protocol("missing signing key".to_string()))?;

        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let claims = Claims {
            iss: &key.client_email,
            scope: SHEETS_SCOPE,
            aud: &key.token_uri,
            iat,
            exp: iat + TOKEN_LIFETIME.as_secs(),
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, encoding_key)
            .map_err(|e| DestinationError::Protocol(format!("failed to sign token request: {}", e)))?;

        log::debug!("Requesting access token for {}", key.client_email);
        let response = http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(super::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match super::classify_status(status.as_u16(), message) {
                // Any 4xx from the token endpoint means the key itself is bad
                DestinationError::Rejected { status, message } => {
                    DestinationError::Auth { status, message }
                }
                other => other,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DestinationError::Protocol(format!("invalid token response: {}", e)))?;
        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(TOKEN_LIFETIME);

        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        })
    }
}
