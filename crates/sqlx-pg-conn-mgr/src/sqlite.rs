//! SQLite sessions over `sqlx::SqliteConnection`
//!
//! Gives the pool a file-backed database that needs no server, which is
//! what the crate's own tests run against. SQL must use `$n` or `?`
//! placeholders that SQLite understands.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::query::Query;
use sqlx::sqlite::{
   Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow,
};
use sqlx::{Column, ConnectOptions, Connection as _, Row as _};
use tracing::debug;

use crate::decode::sqlite_to_json;
use crate::driver::{ConnectionFactory, Driver, Row};
use crate::{Error, Result};

/// Opens sessions on one SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteFactory {
   options: SqliteConnectOptions,
}

impl SqliteFactory {
   /// Create the database file if missing and use WAL journaling so
   /// readers do not block the writer.
   pub fn new(path: impl AsRef<Path>) -> Self {
      Self::with_options(
         SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal),
      )
   }

   pub fn with_options(options: SqliteConnectOptions) -> Self {
      Self { options }
   }
}

#[async_trait]
impl ConnectionFactory for SqliteFactory {
   async fn connect(&self) -> Result<Box<dyn Driver>> {
      let mut conn = self.options.connect().await.map_err(Error::Connect)?;

      sqlx::query("PRAGMA encoding = 'UTF-8'")
         .execute(&mut conn)
         .await
         .map_err(Error::Connect)?;

      debug!(
         "Opened SQLite session on {}",
         self.options.get_filename().display()
      );
      Ok(Box::new(SqliteDriver { conn }))
   }
}

struct SqliteDriver {
   conn: SqliteConnection,
}

#[async_trait]
impl Driver for SqliteDriver {
   async fn run(&mut self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>> {
      let mut query = sqlx::query(sql);
      for value in params {
         query = bind_value(query, value);
      }

      let rows = query
         .fetch_all(&mut self.conn)
         .await
         .map_err(Error::Statement)?;

      rows.iter().map(decode_row).collect()
   }

   async fn close(self: Box<Self>) -> Result<()> {
      self.conn.close().await.map_err(Error::Connect)
   }
}

/// Bind a JSON value to a query parameter.
///
/// Arrays and objects are stored as their JSON text.
fn bind_value<'q>(
   query: Query<'q, Sqlite, SqliteArguments<'q>>,
   value: &JsonValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   match value {
      JsonValue::Null => query.bind(None::<String>),
      JsonValue::Bool(b) => query.bind(*b),
      JsonValue::Number(n) => {
         if let Some(i) = n.as_i64() {
            query.bind(i)
         } else {
            query.bind(n.as_f64().unwrap_or_default())
         }
      }
      JsonValue::String(s) => query.bind(s.clone()),
      JsonValue::Array(_) | JsonValue::Object(_) => query.bind(value.to_string()),
   }
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
   let mut decoded = Row::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let value = row.try_get_raw(i).map_err(Error::Statement)?;
      decoded.insert(column.name().to_string(), sqlite_to_json(value)?);
   }
   Ok(decoded)
}
