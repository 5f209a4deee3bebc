//! Cursor over one connection's statement results

use std::collections::VecDeque;

use serde_json::Value as JsonValue;

use crate::Result;
use crate::connection::Connection;
use crate::driver::Row;

/// Runs statements on a borrowed connection and hands out their rows
///
/// Each [`execute`](Self::execute) replaces the pending rows with the new
/// statement's result. Rows are consumed in order by the `fetch*` methods
/// or by iterating; once consumed they are gone.
///
/// # Example
///
/// ```no_run
/// # async fn example(conn: &mut sqlx_pg_conn_mgr::Connection) -> sqlx_pg_conn_mgr::Result<()> {
/// use serde_json::json;
///
/// let mut cursor = conn.cursor();
/// cursor.execute("SELECT * FROM foo WHERE bar = $1", &[json!("baz")]).await?;
/// if let Some(row) = cursor.fetchone() {
///     println!("{}", row["bar"]);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Cursor<'c> {
   conn: &'c mut Connection,
   rows: VecDeque<Row>,
   rowcount: Option<usize>,
}

impl<'c> Cursor<'c> {
   pub(crate) fn new(conn: &'c mut Connection) -> Self {
      Self {
         conn,
         rows: VecDeque::new(),
         rowcount: None,
      }
   }

   /// Run a statement, discarding any rows still pending from the last one
   pub async fn execute(&mut self, sql: &str, params: &[JsonValue]) -> Result<()> {
      self.rows.clear();
      self.rowcount = None;

      let rows = self.conn.execute(sql, params).await?;
      self.rowcount = Some(rows.len());
      self.rows = rows.into();
      Ok(())
   }

   /// Next pending row, or `None` when the result is exhausted
   pub fn fetchone(&mut self) -> Option<Row> {
      self.rows.pop_front()
   }

   /// Up to `size` pending rows
   pub fn fetchmany(&mut self, size: usize) -> Vec<Row> {
      let take = size.min(self.rows.len());
      self.rows.drain(..take).collect()
   }

   /// All pending rows
   pub fn fetchall(&mut self) -> Vec<Row> {
      self.rows.drain(..).collect()
   }

   /// Rows produced by the last statement, `None` before the first execute
   pub fn rowcount(&self) -> Option<usize> {
      self.rowcount
   }

   /// The connection this cursor runs on
   pub fn connection(&mut self) -> &mut Connection {
      &mut *self.conn
   }
}

impl Iterator for Cursor<'_> {
   type Item = Row;

   fn next(&mut self) -> Option<Row> {
      self.fetchone()
   }
}

#[cfg(test)]
mod tests {
   use serde_json::json;

   use crate::connection::Connection;
   use crate::testing::ScriptedDriver;

   #[tokio::test]
   async fn test_fetch_consumes_rows() {
      let (driver, _log) = ScriptedDriver::new();
      let mut conn = Connection::new(1, Box::new(driver));
      let mut cursor = conn.cursor();

      assert_eq!(cursor.rowcount(), None);
      assert!(cursor.fetchone().is_none());

      cursor.execute("SELECT $1", &[json!("baz")]).await.unwrap();
      assert_eq!(cursor.rowcount(), Some(1));

      let row = cursor.fetchone().unwrap();
      assert_eq!(row["value"], json!("baz"));
      assert!(cursor.fetchone().is_none());
      assert!(cursor.fetchall().is_empty());
   }

   #[tokio::test]
   async fn test_execute_replaces_pending_rows() {
      let (driver, _log) = ScriptedDriver::new();
      let mut conn = Connection::new(1, Box::new(driver));
      let mut cursor = conn.cursor();

      cursor.execute("SELECT $1", &[json!(1)]).await.unwrap();
      cursor.execute("SELECT $1", &[json!(2)]).await.unwrap();

      let rows: Vec<_> = cursor.by_ref().collect();
      assert_eq!(rows.len(), 1);
      assert_eq!(rows[0]["value"], json!(2));
      assert_eq!(cursor.fetchmany(5).len(), 0);
   }

   #[tokio::test]
   async fn test_failed_execute_clears_rowcount() {
      let (driver, _log) = ScriptedDriver::new();
      let mut conn = Connection::new(1, Box::new(driver));
      let mut cursor = conn.cursor();

      cursor.execute("SELECT 1", &[]).await.unwrap();
      assert!(cursor.execute("FAIL", &[]).await.is_err());
      assert_eq!(cursor.rowcount(), None);
      assert!(cursor.fetchone().is_none());
   }
}
