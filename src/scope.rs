//! Shared acquire/release skeleton behind every scoped operation

use sqlx_pg_conn_mgr::{Connection, Pool, PooledConnection};
use tracing::{debug, error, warn};

use crate::Result;

/// How a scope treats the transaction when it exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
   /// Autocommit stays on; each statement commits on its own
   Autocommit,

   /// Commit when the body succeeds, roll back when it fails
   Transaction,

   /// The body commits explicitly; whatever is still open is rolled back
   Manual,
}

impl ScopeKind {
   fn transactional(self) -> bool {
      !matches!(self, ScopeKind::Autocommit)
   }
}

/// One checked-out connection for the lifetime of a scope
///
/// Always leave through [`finish`](Self::finish). If the scope future is
/// dropped instead, the pooled connection guard still checks the connection
/// in, and the pool discards it when it was not restored to autocommit.
pub(crate) struct Scope {
   pool: Pool,
   kind: ScopeKind,
   conn: PooledConnection,
}

impl Scope {
   pub(crate) async fn enter(pool: &Pool, kind: ScopeKind) -> Result<Self> {
      let mut conn = pool.acquire().await?;
      if kind.transactional() {
         conn.set_autocommit(false)?;
      }

      debug!(connection = conn.id(), ?kind, "Entered scope");
      Ok(Self {
         pool: pool.clone(),
         kind,
         conn,
      })
   }

   pub(crate) fn connection(&mut self) -> &mut Connection {
      &mut self.conn
   }

   /// Resolve the body's outcome, restore autocommit and release
   ///
   /// The body's error always wins; a cleanup failure after a failed body
   /// is only logged. When the body succeeded, a failed commit or release
   /// is returned instead of the value.
   pub(crate) async fn finish<T, E>(self, outcome: std::result::Result<T, E>) -> std::result::Result<T, E>
   where
      E: From<crate::Error>,
   {
      let exited = self.exit(outcome.is_ok()).await;

      match (outcome, exited) {
         (Ok(value), Ok(())) => Ok(value),
         (Ok(_), Err(e)) => Err(e.into()),
         (Err(e), Ok(())) => Err(e),
         (Err(e), Err(cleanup)) => {
            error!("Scope cleanup failed after error: {}", cleanup);
            Err(e)
         }
      }
   }

   async fn exit(self, succeeded: bool) -> Result<()> {
      let Scope {
         pool,
         kind,
         mut conn,
      } = self;
      let id = conn.id();

      let resolved = match (kind, succeeded) {
         (ScopeKind::Autocommit, _) => Ok(()),
         (ScopeKind::Transaction, true) => match conn.commit().await {
            Ok(()) => Ok(()),
            // the transaction is still pending on our side
            Err(e) => {
               if let Err(rollback) = conn.rollback().await {
                  warn!(connection = id, "Rollback after failed commit: {}", rollback);
               }
               Err(e)
            }
         },
         (ScopeKind::Transaction, false) | (ScopeKind::Manual, _) => conn.rollback().await,
      };

      // still open only when the rollback itself failed; the pool then
      // closes the connection instead of reusing it
      if !conn.in_transaction() {
         conn.set_autocommit(true)?;
      }

      debug!(connection = id, ?kind, succeeded, "Exited scope");

      let released = pool.release(conn);
      resolved?;
      Ok(released?)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_only_autocommit_scopes_keep_autocommit() {
      assert!(!ScopeKind::Autocommit.transactional());
      assert!(ScopeKind::Transaction.transactional());
      assert!(ScopeKind::Manual.transactional());
   }
}
