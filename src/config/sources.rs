//! Source definitions loaded from a YAML file
//!
//! Example format:
//! ```yaml
//! defaults:
//!   query: SELECT id, username, created_at FROM users ORDER BY id
//!   column_range: "A:R"
//! sources:
//!   - name: alpha
//!     tab: Alpha
//!   - name: beta
//!     database: beta_prod
//!     tab: Beta
//!     column_range: "A:F"
//!     max_connections: 4
//! ```

use super::{ColumnRange, DatabaseDefaults, Settings};
use crate::error::ConfigError;
use crate::pool::PoolOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_COLUMN_RANGE: &str = "A:R";
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Parameters needed to open a connection to one source.
#[derive(Clone, PartialEq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl std::fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

/// Where and how a source's rows land in its tab.
#[derive(Debug, Clone, PartialEq)]
pub struct TabLayout {
    /// 1-based row where the header is written
    pub start_row: u32,
    pub column_range: ColumnRange,
    /// Clear leftover rows below the freshly written data
    pub clear_tail: bool,
    /// Cell that receives a "last updated" line, e.g. `T1`
    pub status_cell: Option<String>,
}

/// One configured source. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub connection: ConnectionParams,
    pub query: String,
    pub tab: String,
    pub layout: TabLayout,
    pub pool: PoolOptions,
    /// Capacity of the per-source transform cache (0 disables it)
    pub cache_capacity: usize,
}

/// Raw sources file as written by users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesFile {
    #[serde(default)]
    pub defaults: SourceDefaults,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

/// Values applied to every entry that does not set them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceDefaults {
    pub query: Option<String>,
    pub column_range: Option<String>,
    pub start_row: Option<u32>,
    pub clear_tail: Option<bool>,
}

/// A single source entry in the sources file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceEntry {
    pub name: String,
    pub tab: String,
    pub database: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub query: Option<String>,
    pub start_row: Option<u32>,
    pub column_range: Option<String>,
    pub clear_tail: Option<bool>,
    pub status_cell: Option<String>,
    pub min_connections: Option<u32>,
    pub max_connections: Option<u32>,
    pub cache_capacity: Option<usize>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl SourcesFile {
    /// Read and parse a sources file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate entries and resolve them against the shared defaults.
    ///
    /// Disabled entries are skipped. Order is preserved.
    pub fn resolve(
        &self,
        database: &DatabaseDefaults,
        pool: &PoolOptions,
    ) -> Result<Vec<SourceConfig>, ConfigError> {
        let mut configs: Vec<SourceConfig> = Vec::new();
        let mut tabs: HashMap<String, String> = HashMap::new();

        for entry in self.sources.iter().filter(|e| e.enabled) {
            let config = entry.resolve(&self.defaults, database, pool)?;

            if configs.iter().any(|c| c.name == config.name) {
                return Err(ConfigError::DuplicateSource(config.name));
            }
            if let Some(first) = tabs.insert(config.tab.clone(), config.name.clone()) {
                return Err(ConfigError::DuplicateTab {
                    tab: config.tab,
                    first,
                    second: config.name,
                });
            }

            configs.push(config);
        }

        if configs.is_empty() {
            return Err(ConfigError::NoSources);
        }

        Ok(configs)
    }
}

impl SourceEntry {
    fn resolve(
        &self,
        defaults: &SourceDefaults,
        database: &DatabaseDefaults,
        pool: &PoolOptions,
    ) -> Result<SourceConfig, ConfigError> {
        let name = self.name.trim().to_string();
        let invalid = |reason: String| ConfigError::InvalidSource {
            source_name: name.clone(),
            reason,
        };

        if name.is_empty() {
            return Err(ConfigError::InvalidSource {
                source_name: "<unnamed>".to_string(),
                reason: "name must not be empty".to_string(),
            });
        }
        let tab = self.tab.trim().to_string();
        if tab.is_empty() {
            return Err(invalid("tab must not be empty".to_string()));
        }

        let query = self
            .query
            .as_ref()
            .or(defaults.query.as_ref())
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| invalid("no query given and no default query configured".to_string()))?;

        let column_range: ColumnRange = self
            .column_range
            .as_deref()
            .or(defaults.column_range.as_deref())
            .unwrap_or(DEFAULT_COLUMN_RANGE)
            .parse()
            .map_err(invalid)?;

        let start_row = self.start_row.or(defaults.start_row).unwrap_or(1);
        if start_row == 0 {
            return Err(invalid("start_row is 1-based".to_string()));
        }

        let pool = PoolOptions {
            min_size: self.min_connections.unwrap_or(pool.min_size),
            max_size: self.max_connections.unwrap_or(pool.max_size),
            acquire_timeout: pool.acquire_timeout,
        };
        // A per-source max below the global min shrinks the min with it
        let pool = PoolOptions {
            min_size: pool.min_size.min(pool.max_size),
            ..pool
        };
        pool.validate().map_err(invalid)?;

        Ok(SourceConfig {
            connection: ConnectionParams {
                host: self.host.clone().unwrap_or_else(|| database.host.clone()),
                port: self.port.unwrap_or(database.port),
                database: self.database.clone().unwrap_or_else(|| name.clone()),
                user: self.user.clone().unwrap_or_else(|| database.user.clone()),
                password: self
                    .password
                    .clone()
                    .unwrap_or_else(|| database.password.clone()),
            },
            query,
            tab,
            layout: TabLayout {
                start_row,
                column_range,
                clear_tail: self.clear_tail.or(defaults.clear_tail).unwrap_or(true),
                status_cell: self.status_cell.clone().filter(|c| !c.trim().is_empty()),
            },
            pool,
            cache_capacity: self.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            name,
        })
    }
}

/// Load the sources file named by the settings.
pub fn load_sources(settings: &Settings) -> Result<Vec<SourceConfig>, ConfigError> {
    let file = SourcesFile::read(&settings.sources_file)?;
    let sources = file.resolve(&settings.database, &settings.pool)?;
    log::info!(
        "Loaded {} source(s) from {}",
        sources.len(),
        settings.sources_file.display()
    );
    Ok(sources)
}
