//! Query extraction from a pooled connection

use crate::error::{DbError, DbErrorKind, ExtractionError};
use crate::pool::{Connector, PooledConnection};
use chrono::{NaiveDate, NaiveDateTime};

/// A single typed value returned by a source.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision numeric kept as its canonical text
    Decimal(String),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Json(serde_json::Value),
}

/// Raw result of one statement as returned by a [`Connection`](crate::pool::Connection).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Header plus ordered rows extracted from one source.
///
/// The header is always present, even when the query matched no rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ExtractionResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Runs a source's query on a checked-out connection.
///
/// Exactly one statement per call and no retries: callers wrap
/// [`extract`](Self::extract) in a [`Resilience`](crate::resilience::Resilience)
/// policy.
#[derive(Debug, Clone)]
pub struct Extractor {
    source_name: String,
}

impl Extractor {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Execute `query` and return its header and rows.
    ///
    /// # Errors
    /// Returns an [`ExtractionError`] wrapping the database failure. The
    /// cause tells transient failures (connection loss, timeout) apart
    /// from permanent ones (bad query, undecodable value).
    pub async fn extract<C: Connector>(
        &self,
        connection: &mut PooledConnection<C>,
        query: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        let RowSet { columns, rows } = connection
            .query(query)
            .await
            .map_err(|cause| ExtractionError::new(&self.source_name, cause))?;

        if columns.is_empty() {
            return Err(self.decode_error("query returned no columns".to_string()));
        }
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(self.decode_error(format!(
                "row {} has {} values but the header has {} columns",
                index,
                row.len(),
                columns.len()
            )));
        }

        log::debug!(
            "[{}] Extracted {} row(s) x {} column(s)",
            self.source_name,
            rows.len(),
            columns.len()
        );

        Ok(ExtractionResult {
            header: columns,
            rows,
        })
    }

    fn decode_error(&self, message: String) -> ExtractionError {
        ExtractionError::new(&self.source_name, DbError::new(DbErrorKind::Decode, message))
    }
}
