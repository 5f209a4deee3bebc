//! Connection wrapper carrying autocommit and transaction state

use std::fmt;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::cursor::Cursor;
use crate::driver::{Driver, Row};
use crate::{Error, Result};

/// A database session with DB-API style transaction control
///
/// New connections start in autocommit mode: every statement is its own
/// transaction. With autocommit off, the first statement opens a
/// transaction implicitly and it stays open until [`commit`](Self::commit)
/// or [`rollback`](Self::rollback).
///
/// Connections handed out by a [`Pool`](crate::Pool) are always at rest
/// (autocommit on, no open transaction).
pub struct Connection {
   id: u64,
   driver: Box<dyn Driver>,
   autocommit: bool,
   in_transaction: bool,
}

impl Connection {
   pub(crate) fn new(id: u64, driver: Box<dyn Driver>) -> Self {
      Self {
         id,
         driver,
         autocommit: true,
         in_transaction: false,
      }
   }

   /// Identifier unique within the owning pool
   pub fn id(&self) -> u64 {
      self.id
   }

   pub fn autocommit(&self) -> bool {
      self.autocommit
   }

   /// Returns true while an implicitly opened transaction is pending
   pub fn in_transaction(&self) -> bool {
      self.in_transaction
   }

   /// Turn autocommit on or off
   ///
   /// Fails with `Error::PoolProtocol` while a transaction is open; commit
   /// or roll back first.
   pub fn set_autocommit(&mut self, autocommit: bool) -> Result<()> {
      if self.in_transaction && autocommit != self.autocommit {
         return Err(Error::PoolProtocol(format!(
            "cannot change autocommit on connection {} inside an open transaction",
            self.id
         )));
      }
      self.autocommit = autocommit;
      Ok(())
   }

   /// Create a cursor for running statements on this connection
   pub fn cursor(&mut self) -> Cursor<'_> {
      Cursor::new(self)
   }

   /// Run one statement and return its rows
   ///
   /// Opens a transaction first when autocommit is off and none is pending.
   pub async fn execute(&mut self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>> {
      if !self.autocommit && !self.in_transaction {
         self.driver.run("BEGIN", &[]).await?;
         self.in_transaction = true;
      }
      self.driver.run(sql, params).await
   }

   /// Commit the pending transaction; a no-op when none is open
   pub async fn commit(&mut self) -> Result<()> {
      if !self.in_transaction {
         return Ok(());
      }
      self.driver.run("COMMIT", &[]).await?;
      self.in_transaction = false;
      debug!(connection = self.id, "Transaction committed");
      Ok(())
   }

   /// Roll back the pending transaction; a no-op when none is open
   pub async fn rollback(&mut self) -> Result<()> {
      if !self.in_transaction {
         return Ok(());
      }
      self.driver.run("ROLLBACK", &[]).await?;
      self.in_transaction = false;
      debug!(connection = self.id, "Transaction rolled back");
      Ok(())
   }

   /// At rest means safe to hand to the next borrower
   pub(crate) fn is_at_rest(&self) -> bool {
      self.autocommit && !self.in_transaction
   }

   pub(crate) async fn close(self) -> Result<()> {
      debug!(connection = self.id, "Closing connection");
      self.driver.close().await
   }
}

impl fmt::Debug for Connection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Connection")
         .field("id", &self.id)
         .field("autocommit", &self.autocommit)
         .field("in_transaction", &self.in_transaction)
         .finish_non_exhaustive()
   }
}
