use serde_json::Value as JsonValue;
use sqlx_pg_conn_mgr::{
   Connection, ConnectionFactory, ConnectionParams, Cursor, PgFactory, Pool, PoolConfig,
   PoolStatus, Row,
};
use tracing::debug;

use crate::rows::Rows;
use crate::scope::{Scope, ScopeKind};
use crate::{Error, Result};

/// Scoped access to a pooled PostgreSQL database
///
/// Every operation checks a connection out, runs, and returns it to the
/// pool on all exit paths. Connections always go back with autocommit on
/// and no transaction open.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct Postgres {
   pool: Pool,
}

impl Postgres {
   /// Connect using a `postgres://` URL or a key=value DSN
   ///
   /// Opens `min_connections` sessions before returning. Uses
   /// [`PoolConfig::default`] when `config` is `None`.
   ///
   /// # Example
   ///
   /// ```no_run
   /// # use postgres_scoped::{PoolConfig, Postgres};
   /// # async fn example() -> postgres_scoped::Result<()> {
   /// let db = Postgres::connect("postgres://jdoe@localhost/testdb", None).await?;
   /// let db = Postgres::connect("dbname=testdb user=jdoe", Some(PoolConfig::new(1, 4))).await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn connect(conninfo: &str, config: Option<PoolConfig>) -> Result<Self> {
      let params: ConnectionParams = conninfo.parse()?;
      debug!("Connecting to {}", params);
      Self::with_factory(PgFactory::new(params), config).await
   }

   /// Build the pool over any session factory
   pub async fn with_factory(
      factory: impl ConnectionFactory,
      config: Option<PoolConfig>,
   ) -> Result<Self> {
      let pool = Pool::connect(factory, config.unwrap_or_default()).await?;
      Ok(Self { pool })
   }

   /// Run a statement and discard its rows
   pub async fn execute(&self, sql: &str, params: &[JsonValue]) -> Result<()> {
      self.get_cursor(sql, params, async |_| Ok(())).await
   }

   /// First row of the result, or `None` when the statement matched nothing
   pub async fn fetchone(&self, sql: &str, params: &[JsonValue]) -> Result<Option<Row>> {
      self
         .get_cursor(sql, params, async |cursor| Ok(cursor.fetchone()))
         .await
   }

   /// All rows of the result
   ///
   /// The connection is released before this returns.
   pub async fn fetchall(&self, sql: &str, params: &[JsonValue]) -> Result<Rows> {
      self
         .get_cursor(sql, params, async |cursor| Ok(Rows::new(cursor.fetchall())))
         .await
   }

   /// Run a statement in autocommit mode and hand its cursor to `body`
   ///
   /// A failing statement releases the connection before its error is
   /// returned; `body` is not called.
   ///
   /// # Example
   ///
   /// ```no_run
   /// # use postgres_scoped::Postgres;
   /// # use serde_json::json;
   /// # async fn example(db: &Postgres) -> postgres_scoped::Result<()> {
   /// let names = db
   ///    .get_cursor("SELECT name FROM users WHERE active = $1", &[json!(true)], async |cursor| {
   ///       Ok::<_, postgres_scoped::Error>(cursor.map(|row| row["name"].clone()).collect::<Vec<_>>())
   ///    })
   ///    .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn get_cursor<T, E>(
      &self,
      sql: &str,
      params: &[JsonValue],
      body: impl AsyncFnOnce(&mut Cursor<'_>) -> std::result::Result<T, E>,
   ) -> std::result::Result<T, E>
   where
      E: From<Error>,
   {
      let mut scope = Scope::enter(&self.pool, ScopeKind::Autocommit).await?;

      let outcome = {
         let mut cursor = scope.connection().cursor();
         match cursor.execute(sql, params).await {
            Ok(()) => body(&mut cursor).await,
            Err(e) => Err(Error::from(e).into()),
         }
      };

      scope.finish(outcome).await
   }

   /// Run `body` inside one transaction
   ///
   /// Commits when `body` returns `Ok`, rolls back when it returns `Err`.
   ///
   /// # Example
   ///
   /// ```no_run
   /// # use postgres_scoped::Postgres;
   /// # use serde_json::json;
   /// # async fn example(db: &Postgres) -> postgres_scoped::Result<()> {
   /// db.get_transaction(async |cursor| {
   ///    cursor.execute("UPDATE accounts SET balance = balance - $1 WHERE id = $2", &[json!(10), json!(1)]).await?;
   ///    cursor.execute("UPDATE accounts SET balance = balance + $1 WHERE id = $2", &[json!(10), json!(2)]).await?;
   ///    Ok::<_, postgres_scoped::Error>(())
   /// })
   /// .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn get_transaction<T, E>(
      &self,
      body: impl AsyncFnOnce(&mut Cursor<'_>) -> std::result::Result<T, E>,
   ) -> std::result::Result<T, E>
   where
      E: From<Error>,
   {
      let mut scope = Scope::enter(&self.pool, ScopeKind::Transaction).await?;

      let outcome = {
         let mut cursor = scope.connection().cursor();
         body(&mut cursor).await
      };

      scope.finish(outcome).await
   }

   /// Hand a connection with autocommit off to `body`
   ///
   /// `body` must call [`Connection::commit`] for its work to persist;
   /// anything still uncommitted when it returns is rolled back, whether
   /// it succeeded or not.
   ///
   /// # Example
   ///
   /// ```no_run
   /// # use postgres_scoped::Postgres;
   /// # use serde_json::json;
   /// # async fn example(db: &Postgres) -> postgres_scoped::Result<()> {
   /// db.get_connection(async |conn| {
   ///    conn.execute("INSERT INTO audit (event) VALUES ($1)", &[json!("start")]).await?;
   ///    conn.commit().await?;
   ///
   ///    // Rolled back on exit
   ///    conn.execute("DELETE FROM audit", &[]).await?;
   ///    Ok::<_, postgres_scoped::Error>(())
   /// })
   /// .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn get_connection<T, E>(
      &self,
      body: impl AsyncFnOnce(&mut Connection) -> std::result::Result<T, E>,
   ) -> std::result::Result<T, E>
   where
      E: From<Error>,
   {
      let mut scope = Scope::enter(&self.pool, ScopeKind::Manual).await?;
      let outcome = body(scope.connection()).await;
      scope.finish(outcome).await
   }

   /// The underlying pool, for direct `acquire` / `release`
   pub fn pool(&self) -> &Pool {
      &self.pool
   }

   /// Current pool occupancy
   pub fn status(&self) -> PoolStatus {
      self.pool.status()
   }

   /// Close the pool; connections still checked out close on release
   pub async fn close(&self) {
      self.pool.close().await;
   }
}
