//! Error types for sqlx-pg-conn-mgr

use std::time::Duration;

use thiserror::Error;

/// Errors that may occur when working with sqlx-pg-conn-mgr
#[derive(Error, Debug)]
pub enum Error {
   /// Malformed connection URL or DSN, or an invalid pool size.
   ///
   /// Raised while building a pool; the construction attempt is abandoned.
   #[error("configuration error: {0}")]
   Configuration(String),

   /// No connection became available under the configured acquire policy.
   ///
   /// Recoverable: the caller may retry once other scopes release.
   #[error("connection pool exhausted: all {max_connections} connections are checked out{}", waited_suffix(.waited))]
   PoolExhausted {
      max_connections: u32,
      waited: Option<Duration>,
   },

   /// The database rejected or failed a statement (syntax, constraint, ...).
   #[error("statement failed: {0}")]
   Statement(#[source] sqlx::Error),

   /// Establishing or closing a database session failed.
   #[error("connection failed: {0}")]
   Connect(#[source] sqlx::Error),

   /// A pool invariant was violated by the caller (e.g. releasing a
   /// connection that this pool never handed out).
   #[error("pool protocol violation: {0}")]
   PoolProtocol(String),

   /// Pool has been closed and cannot hand out connections
   #[error("connection pool has been closed")]
   PoolClosed,

   /// Column type that cannot be mapped to a JSON value.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),
}

fn waited_suffix(waited: &Option<Duration>) -> String {
   match waited {
      Some(d) => format!(" (waited {}ms)", d.as_millis()),
      None => String::new(),
   }
}

impl Error {
   /// Machine-readable code for this error.
   ///
   /// Statement errors carry the SQLSTATE (or SQLite result code) when the
   /// database reported one.
   pub fn error_code(&self) -> String {
      match self {
         Error::Configuration(_) => "CONFIGURATION_ERROR".to_string(),
         Error::PoolExhausted { .. } => "POOL_EXHAUSTED".to_string(),
         Error::Statement(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("STATEMENT_ERROR_{}", code);
            }
            "STATEMENT_ERROR".to_string()
         }
         Error::Connect(_) => "CONNECT_ERROR".to_string(),
         Error::PoolProtocol(_) => "POOL_PROTOCOL_ERROR".to_string(),
         Error::PoolClosed => "POOL_CLOSED".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
      }
   }

   /// Returns true if the database rejected a statement.
   pub fn is_statement_error(&self) -> bool {
      matches!(self, Error::Statement(_))
   }
}
