//! Process settings read from the environment
//!
//! Values usually come from a `.env` file loaded by the binary before
//! [`Settings::from_env`] runs. Every variable except the spreadsheet and
//! the database password has a default.

use crate::error::ConfigError;
use crate::pool::PoolOptions;
use crate::publish::QuotaConfig;
use crate::resilience::RetryPolicy;
use regex::Regex;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

static SPREADSHEET_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/spreadsheets/d/([A-Za-z0-9_-]+)").expect("valid regex"));

pub const DEFAULT_SHEETS_API_URL: &str = "https://sheets.googleapis.com/";
pub const DEFAULT_SOURCES_FILE: &str = "config/sources.yml";

/// How the destination client authenticates.
#[derive(Clone, PartialEq)]
pub enum SheetsCredentials {
    /// Google service account key file (JSON)
    ServiceAccountFile(PathBuf),
    /// Pre-issued OAuth access token
    AccessToken(String),
    /// No authentication, for emulators
    None,
}

impl std::fmt::Debug for SheetsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceAccountFile(path) => write!(f, "ServiceAccountFile({})", path.display()),
            Self::AccessToken(_) => write!(f, "AccessToken(***)"),
            Self::None => write!(f, "None"),
        }
    }
}

/// Connection parameters shared by every source unless overridden.
#[derive(Clone, PartialEq)]
pub struct DatabaseDefaults {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for DatabaseDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseDefaults")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Everything the service needs besides the source list.
#[derive(Debug, Clone)]
pub struct Settings {
    pub spreadsheet_id: String,
    pub sheets_api_url: Url,
    pub sheets_credentials: SheetsCredentials,
    pub database: DatabaseDefaults,
    pub sources_file: PathBuf,
    pub interval: Duration,
    pub cycle_timeout: Option<Duration>,
    pub pool: PoolOptions,
    pub close_grace: Duration,
    pub command_timeout: Duration,
    pub retry: RetryPolicy,
    pub quota: QuotaConfig,
    pub slow_extract: Option<Duration>,
    pub slow_publish: Option<Duration>,
}

impl Settings {
    /// Read settings from process environment variables.
    ///
    /// Expected environment variables:
    /// - SPREADSHEET_ID or SPREADSHEET_URL (required)
    /// - DB_PASSWORD (required)
    /// - DB_HOST, DB_PORT, DB_USER, SOURCES_FILE, UPDATE_INTERVAL_MINUTES,
    ///   CYCLE_TIMEOUT_SECS, POOL_*, RETRY_*, QUOTA_*, SLOW_* (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let spreadsheet_id = match (get("SPREADSHEET_ID"), get("SPREADSHEET_URL")) {
            (Some(id), _) => id,
            (None, Some(url)) => spreadsheet_id_from_url(&url).ok_or_else(|| ConfigError::Invalid {
                key: "SPREADSHEET_URL",
                value: url.clone(),
                reason: "expected a .../spreadsheets/d/<id>/... URL".to_string(),
            })?,
            (None, None) => return Err(ConfigError::Missing("SPREADSHEET_ID")),
        };

        let api_url = get("SHEETS_API_URL").unwrap_or_else(|| DEFAULT_SHEETS_API_URL.to_string());
        let sheets_api_url = Url::parse(&api_url).map_err(|e| ConfigError::Invalid {
            key: "SHEETS_API_URL",
            value: api_url.clone(),
            reason: e.to_string(),
        })?;

        let sheets_credentials = match (get("GOOGLE_SERVICE_ACCOUNT_FILE"), get("SHEETS_ACCESS_TOKEN")) {
            (Some(path), _) => SheetsCredentials::ServiceAccountFile(PathBuf::from(path)),
            (None, Some(token)) => SheetsCredentials::AccessToken(token),
            (None, None) => SheetsCredentials::None,
        };

        let database = DatabaseDefaults {
            host: get("DB_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&get, "DB_PORT", 5432)?,
            user: get("DB_USER").unwrap_or_else(|| "postgres".to_string()),
            password: get("DB_PASSWORD").ok_or(ConfigError::Missing("DB_PASSWORD"))?,
        };

        let interval_minutes: u64 = parse_or(&get, "UPDATE_INTERVAL_MINUTES", 60)?;
        if interval_minutes == 0 {
            return Err(invalid("UPDATE_INTERVAL_MINUTES", "0", "must be at least 1"));
        }

        let pool = PoolOptions {
            min_size: parse_or(&get, "POOL_MIN_SIZE", 2)?,
            max_size: parse_or(&get, "POOL_MAX_SIZE", 10)?,
            acquire_timeout: Duration::from_secs(parse_or(&get, "POOL_ACQUIRE_TIMEOUT_SECS", 30)?),
        };
        pool.validate().map_err(|reason| {
            invalid("POOL_MAX_SIZE", &pool.max_size.to_string(), &reason)
        })?;

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", 3)?,
            base_delay: Duration::from_millis(parse_or(&get, "RETRY_BASE_DELAY_MS", 1000)?),
            jitter: Duration::from_millis(parse_or(&get, "RETRY_JITTER_MS", 500)?),
            ..RetryPolicy::default()
        };
        if retry.max_attempts == 0 {
            return Err(invalid("RETRY_MAX_ATTEMPTS", "0", "must be at least 1"));
        }

        let quota = QuotaConfig {
            requests: parse_or(&get, "QUOTA_REQUESTS", 60)?,
            window: Duration::from_secs(parse_or(&get, "QUOTA_WINDOW_SECS", 60)?),
        };
        quota
            .validate()
            .map_err(|reason| invalid("QUOTA_REQUESTS", &quota.requests.to_string(), &reason))?;

        Ok(Self {
            spreadsheet_id,
            sheets_api_url,
            sheets_credentials,
            database,
            sources_file: PathBuf::from(
                get("SOURCES_FILE").unwrap_or_else(|| DEFAULT_SOURCES_FILE.to_string()),
            ),
            interval: Duration::from_secs(interval_minutes * 60),
            cycle_timeout: parse_optional_secs(&get, "CYCLE_TIMEOUT_SECS")?,
            pool,
            close_grace: Duration::from_secs(parse_or(&get, "POOL_CLOSE_GRACE_SECS", 10)?),
            command_timeout: Duration::from_secs(parse_or(&get, "DB_COMMAND_TIMEOUT_SECS", 60)?),
            retry,
            quota,
            slow_extract: parse_optional_secs(&get, "SLOW_EXTRACT_SECS")?
                .or(Some(Duration::from_secs(10))),
            slow_publish: parse_optional_secs(&get, "SLOW_PUBLISH_SECS")?
                .or(Some(Duration::from_secs(10))),
        })
    }
}

/// Extract the spreadsheet ID from a Google Sheets URL.
pub fn spreadsheet_id_from_url(url: &str) -> Option<String> {
    SPREADSHEET_URL
        .captures(url)
        .map(|caps| caps[1].to_string())
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        None => Ok(default),
    }
}

fn parse_optional_secs<G>(get: &G, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => {
            let secs: f64 = raw.parse().map_err(|e: std::num::ParseFloatError| {
                invalid(key, &raw, &e.to_string())
            })?;
            Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|e| invalid(key, &raw, &e.to_string()))
        }
        None => Ok(None),
    }
}
