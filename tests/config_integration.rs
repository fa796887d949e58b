//! Integration tests for loading settings and the sources file
//!
//! Tests touching process environment variables run serially.

use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tabsync::config::{Settings, SheetsCredentials, load_sources};
use tabsync::error::ConfigError;
use tempfile::NamedTempFile;

const KEYS: &[&str] = &[
    "SPREADSHEET_ID",
    "SPREADSHEET_URL",
    "SHEETS_API_URL",
    "GOOGLE_SERVICE_ACCOUNT_FILE",
    "SHEETS_ACCESS_TOKEN",
    "DB_HOST",
    "DB_PORT",
    "DB_USER",
    "DB_PASSWORD",
    "SOURCES_FILE",
    "UPDATE_INTERVAL_MINUTES",
    "CYCLE_TIMEOUT_SECS",
    "POOL_MIN_SIZE",
    "POOL_MAX_SIZE",
    "QUOTA_REQUESTS",
    "QUOTA_WINDOW_SECS",
];

fn reset_env(pairs: &[(&str, &str)]) {
    unsafe {
        for key in KEYS {
            std::env::remove_var(key);
        }
        for (key, value) in pairs {
            std::env::set_var(key, value);
        }
    }
}

fn sources_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_settings_from_env() {
    reset_env(&[
        (
            "SPREADSHEET_URL",
            "https://docs.google.com/spreadsheets/d/1AbC-dEf_123/edit#gid=0",
        ),
        ("SHEETS_ACCESS_TOKEN", "ya29.token"),
        ("DB_HOST", "db.internal"),
        ("DB_PASSWORD", "secret"),
        ("UPDATE_INTERVAL_MINUTES", "15"),
        ("CYCLE_TIMEOUT_SECS", "600"),
        ("QUOTA_REQUESTS", "100"),
    ]);

    let settings = Settings::from_env().unwrap();

    assert_eq!(settings.spreadsheet_id, "1AbC-dEf_123");
    assert_eq!(
        settings.sheets_credentials,
        SheetsCredentials::AccessToken("ya29.token".to_string())
    );
    assert_eq!(settings.database.host, "db.internal");
    assert_eq!(settings.interval, Duration::from_secs(15 * 60));
    assert_eq!(settings.cycle_timeout, Some(Duration::from_secs(600)));
    assert_eq!(settings.quota.requests, 100);

    // The password never shows up in debug output
    assert!(!format!("{:?}", settings).contains("secret"));
}

#[test]
#[serial]
fn test_missing_spreadsheet_is_fatal() {
    reset_env(&[("DB_PASSWORD", "secret")]);

    assert!(matches!(
        Settings::from_env(),
        Err(ConfigError::Missing("SPREADSHEET_ID"))
    ));
}

#[test]
#[serial]
fn test_invalid_pool_size_is_fatal() {
    reset_env(&[
        ("SPREADSHEET_ID", "abc"),
        ("DB_PASSWORD", "secret"),
        ("POOL_MIN_SIZE", "8"),
        ("POOL_MAX_SIZE", "4"),
    ]);

    let err = Settings::from_env().unwrap_err();
    assert!(err.to_string().contains("POOL_MAX_SIZE"), "{}", err);
}

#[test]
#[serial]
fn test_load_sources_from_file() {
    let file = sources_file(
        r#"
defaults:
  query: SELECT id, username, created_at FROM users ORDER BY id
sources:
  - name: alpha
    tab: Alpha
  - name: beta
    database: beta_prod
    tab: Beta
    column_range: "A:F"
    status_cell: H1
    max_connections: 1
  - name: retired
    tab: Retired
    enabled: false
"#,
    );
    reset_env(&[
        ("SPREADSHEET_ID", "abc"),
        ("DB_PASSWORD", "secret"),
        ("DB_USER", "reader"),
        ("SOURCES_FILE", file.path().to_str().unwrap()),
    ]);

    let settings = Settings::from_env().unwrap();
    let sources = load_sources(&settings).unwrap();

    let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    let alpha = &sources[0];
    assert_eq!(alpha.connection.database, "alpha");
    assert_eq!(alpha.connection.user, "reader");
    assert_eq!(alpha.layout.column_range.width(), 18);
    assert!(alpha.query.starts_with("SELECT id"));

    let beta = &sources[1];
    assert_eq!(beta.connection.to_string(), "reader@127.0.0.1:5432/beta_prod");
    assert_eq!(beta.layout.column_range.width(), 6);
    assert_eq!(beta.layout.status_cell.as_deref(), Some("H1"));
    assert_eq!(beta.pool.max_size, 1);
    assert_eq!(beta.pool.min_size, 1);
}

#[test]
#[serial]
fn test_duplicate_tabs_are_rejected() {
    let file = sources_file(
        r#"
sources:
  - name: alpha
    tab: Shared
    query: SELECT 1
  - name: beta
    tab: Shared
    query: SELECT 2
"#,
    );
    reset_env(&[
        ("SPREADSHEET_ID", "abc"),
        ("DB_PASSWORD", "secret"),
        ("SOURCES_FILE", file.path().to_str().unwrap()),
    ]);

    let settings = Settings::from_env().unwrap();
    match load_sources(&settings) {
        Err(ConfigError::DuplicateTab { tab, first, second }) => {
            assert_eq!(tab, "Shared");
            assert_eq!(first, "alpha");
            assert_eq!(second, "beta");
        }
        other => panic!("unexpected result: {:?}", other.map(|s| s.len())),
    }
}

#[test]
#[serial]
fn test_missing_sources_file() {
    reset_env(&[
        ("SPREADSHEET_ID", "abc"),
        ("DB_PASSWORD", "secret"),
        ("SOURCES_FILE", "/nonexistent/sources.yml"),
    ]);

    let settings = Settings::from_env().unwrap();
    assert!(matches!(load_sources(&settings), Err(ConfigError::Io { .. })));
}
