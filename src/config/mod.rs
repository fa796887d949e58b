//! Configuration: process settings from the environment, sources from YAML

mod column_range;
mod settings;
mod sources;

pub use column_range::{ColumnRange, column_index, column_letter};
pub use settings::{
    DEFAULT_SHEETS_API_URL, DEFAULT_SOURCES_FILE, DatabaseDefaults, Settings, SheetsCredentials,
    spreadsheet_id_from_url,
};
pub use sources::{
    ConnectionParams, DEFAULT_CACHE_CAPACITY, DEFAULT_COLUMN_RANGE, SourceConfig, SourceDefaults,
    SourceEntry, SourcesFile, TabLayout, load_sources,
};
