//! PostgreSQL connector backed by sqlx
//!
//! Pooling is handled by [`ConnectionPool`](crate::pool::ConnectionPool),
//! so this works on bare `PgConnection`s rather than sqlx's own pool.

use crate::config::ConnectionParams;
use crate::error::{DbError, DbErrorKind};
use crate::etl::{Cell, RowSet};
use crate::pool::{Connection, Connector};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column, ConnectOptions, Executor, Row, Statement, TypeInfo, ValueRef};
use std::time::Duration;

/// Opens connections to one PostgreSQL database.
#[derive(Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
    command_timeout: Duration,
}

impl PgConnector {
    pub fn new(params: &ConnectionParams, command_timeout: Duration) -> Self {
        let options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .database(&params.database)
            .username(&params.user)
            .password(&params.password)
            .application_name(env!("CARGO_PKG_NAME"))
            .log_statements(log::LevelFilter::Trace);

        Self {
            options,
            command_timeout,
        }
    }
}

impl Connector for PgConnector {
    type Connection = PgSession;

    async fn connect(&self) -> Result<PgSession, DbError> {
        let connection = self
            .options
            .connect()
            .await
            .map_err(|e| DbError::new(DbErrorKind::Connect, e.to_string()))?;
        Ok(PgSession {
            connection,
            command_timeout: self.command_timeout,
            broken: false,
        })
    }
}

/// One open PostgreSQL connection.
pub struct PgSession {
    connection: PgConnection,
    command_timeout: Duration,
    broken: bool,
}

impl PgSession {
    async fn fetch(&mut self, sql: &str) -> Result<RowSet, DbError> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut self.connection)
            .await
            .map_err(map_error)?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => {
                // No row to read the header from, ask the server instead
                let statement = (&mut self.connection)
                    .prepare(sql)
                    .await
                    .map_err(map_error)?;
                statement
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            }
        };

        let rows = rows
            .iter()
            .map(|row| (0..columns.len()).map(|i| decode_cell(row, i)).collect())
            .collect::<Result<Vec<Vec<Cell>>, DbError>>()?;

        Ok(RowSet { columns, rows })
    }
}

impl Connection for PgSession {
    async fn query(&mut self, sql: &str) -> Result<RowSet, DbError> {
        let timeout = self.command_timeout;
        let result = match tokio::time::timeout(timeout, self.fetch(sql)).await {
            Ok(result) => result,
            Err(_) => Err(DbError::new(
                DbErrorKind::Timeout,
                format!("statement exceeded {:?}", timeout),
            )),
        };

        // An interrupted exchange leaves the wire protocol in an unknown state
        if let Err(e) = &result
            && e.breaks_connection()
        {
            self.broken = true;
        }
        result
    }

    fn is_healthy(&self) -> bool {
        !self.broken
    }

    async fn close(self) {
        if let Err(e) = sqlx::Connection::close(self.connection).await {
            log::debug!("Error while closing connection: {}", e);
        }
    }
}

fn map_error(error: sqlx::Error) -> DbError {
    let kind = match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => DbErrorKind::ConnectionLost,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // query_canceled (statement_timeout)
            Some("57014") => DbErrorKind::Timeout,
            // admin_shutdown, crash_shutdown, cannot_connect_now
            Some("57P01" | "57P02" | "57P03") => DbErrorKind::ConnectionLost,
            Some(code) if code.starts_with("08") => DbErrorKind::ConnectionLost,
            _ => DbErrorKind::Query,
        },
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::TypeNotFound { .. } => DbErrorKind::Decode,
        _ => DbErrorKind::Query,
    };
    DbError::new(kind, error.to_string())
}

fn decode_cell(row: &PgRow, index: usize) -> Result<Cell, DbError> {
    let raw = row.try_get_raw(index).map_err(map_error)?;
    if raw.is_null() {
        return Ok(Cell::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let cell = match type_name.as_str() {
        "BOOL" => Cell::Bool(row.try_get(index).map_err(map_error)?),
        "INT2" => Cell::Int(row.try_get::<i16, _>(index).map_err(map_error)?.into()),
        "INT4" => Cell::Int(row.try_get::<i32, _>(index).map_err(map_error)?.into()),
        "INT8" => Cell::Int(row.try_get(index).map_err(map_error)?),
        "FLOAT4" => Cell::Float(row.try_get::<f32, _>(index).map_err(map_error)?.into()),
        "FLOAT8" => Cell::Float(row.try_get(index).map_err(map_error)?),
        "NUMERIC" => match row.try_get::<Decimal, _>(index) {
            Ok(value) => Cell::Decimal(value.to_string()),
            // NaN and values beyond Decimal's range
            Err(_) => Cell::Text(format!("<{}>", type_name)),
        },
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            Cell::Text(row.try_get_unchecked(index).map_err(map_error)?)
        }
        "DATE" => Cell::Date(row.try_get::<NaiveDate, _>(index).map_err(map_error)?),
        "TIMESTAMP" => Cell::Timestamp(row.try_get::<NaiveDateTime, _>(index).map_err(map_error)?),
        "TIMESTAMPTZ" => Cell::Timestamp(
            row.try_get::<DateTime<Utc>, _>(index)
                .map_err(map_error)?
                .naive_utc(),
        ),
        "JSON" | "JSONB" => Cell::Json(row.try_get::<JsonValue, _>(index).map_err(map_error)?),
        "UUID" => Cell::Text(row.try_get::<Uuid, _>(index).map_err(map_error)?.to_string()),
        // Enums, citext, domains and friends arrive as text; anything
        // binary gets a placeholder
        other => row
            .try_get_unchecked::<String, _>(index)
            .map(Cell::Text)
            .unwrap_or_else(|_| Cell::Text(format!("<{}>", other))),
    };

    Ok(cell)
}
