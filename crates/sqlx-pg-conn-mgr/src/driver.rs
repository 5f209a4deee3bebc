//! Seams between the pool and a concrete database driver

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::Result;

/// A result row: column name to value, in column order
pub type Row = IndexMap<String, JsonValue>;

/// One live database session
///
/// Implementations run statements exactly as given; transaction
/// bookkeeping (implicit `BEGIN`, autocommit) is layered on top by
/// [`Connection`](crate::Connection).
#[async_trait]
pub trait Driver: Send {
   /// Run one statement with positional parameters and return its rows.
   ///
   /// Statements that produce no rows return an empty vector. Database
   /// failures map to `Error::Statement`.
   async fn run(&mut self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>>;

   /// Close the session gracefully
   async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens new driver sessions for a pool
///
/// Sessions come back fully configured: text encoding is applied by the
/// factory right after the driver connects.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
   /// Establish a new session, mapping failures to `Error::Connect`
   async fn connect(&self) -> Result<Box<dyn Driver>>;
}
