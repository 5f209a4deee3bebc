use std::vec::IntoIter;

use sqlx_pg_conn_mgr::Row;

/// Rows returned by [`Postgres::fetchall`](crate::Postgres::fetchall)
///
/// Single pass: each row is yielded once and an exhausted `Rows` stays
/// empty. The connection that produced them is already back in the pool.
#[derive(Debug, Default)]
pub struct Rows {
   inner: IntoIter<Row>,
}

impl Rows {
   pub(crate) fn new(rows: Vec<Row>) -> Self {
      Self {
         inner: rows.into_iter(),
      }
   }
}

impl Iterator for Rows {
   type Item = Row;

   fn next(&mut self) -> Option<Row> {
      self.inner.next()
   }

   fn size_hint(&self) -> (usize, Option<usize>) {
      self.inner.size_hint()
   }
}

impl ExactSizeIterator for Rows {}
