//! In-memory driver used by unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};

use crate::driver::{ConnectionFactory, Driver, Row};
use crate::{Error, Result};

/// Shared record of every statement a scripted driver saw
#[derive(Clone, Default)]
pub(crate) struct StatementLog(Arc<Mutex<Vec<String>>>);

impl StatementLog {
   pub(crate) fn statements(&self) -> Vec<String> {
      self.0.lock().clone()
   }
}

/// Statements containing `FAIL` error out; `SELECT` returns one row
/// echoing the first parameter (or 1).
pub(crate) struct ScriptedDriver {
   log: StatementLog,
   closes: Arc<AtomicUsize>,
}

impl ScriptedDriver {
   pub(crate) fn new() -> (Self, StatementLog) {
      let log = StatementLog::default();
      let driver = Self {
         log: log.clone(),
         closes: Arc::new(AtomicUsize::new(0)),
      };
      (driver, log)
   }
}

#[async_trait]
impl Driver for ScriptedDriver {
   async fn run(&mut self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>> {
      self.log.0.lock().push(sql.to_string());

      if sql.contains("FAIL") {
         return Err(Error::Statement(sqlx::Error::Protocol(format!(
            "scripted failure: {sql}"
         ))));
      }

      if sql.starts_with("SELECT") {
         let mut row = Row::new();
         row.insert(
            "value".to_string(),
            params.first().cloned().unwrap_or(json!(1)),
         );
         return Ok(vec![row]);
      }

      Ok(Vec::new())
   }

   async fn close(self: Box<Self>) -> Result<()> {
      self.closes.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }
}

/// Factory counting the sessions it opens and closes
#[derive(Default)]
pub(crate) struct ScriptedFactory {
   pub(crate) log: StatementLog,
   pub(crate) connects: Arc<AtomicUsize>,
   pub(crate) closes: Arc<AtomicUsize>,
   pub(crate) refuse: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
   async fn connect(&self) -> Result<Box<dyn Driver>> {
      if self.refuse.load(Ordering::SeqCst) {
         return Err(Error::Connect(sqlx::Error::PoolTimedOut));
      }
      self.connects.fetch_add(1, Ordering::SeqCst);
      Ok(Box::new(ScriptedDriver {
         log: self.log.clone(),
         closes: Arc::clone(&self.closes),
      }))
   }
}
