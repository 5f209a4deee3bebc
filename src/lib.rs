//! # postgres-scoped
//!
//! Scoped access to a pooled PostgreSQL database. Every operation borrows a
//! connection from a bounded pool and returns it on all exit paths, with
//! autocommit restored and no transaction left open.
//!
//! ## Disciplines
//!
//! - **[`Postgres::get_cursor`]**: autocommit; each statement commits on its own.
//!   [`execute`](Postgres::execute), [`fetchone`](Postgres::fetchone) and
//!   [`fetchall`](Postgres::fetchall) are built on it
//! - **[`Postgres::get_transaction`]**: commit when the body succeeds, roll back
//!   when it fails
//! - **[`Postgres::get_connection`]**: the body drives the transaction and must
//!   commit explicitly; anything left open is rolled back
//!
//! ## Usage
//!
//! ```no_run
//! use postgres_scoped::Postgres;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> postgres_scoped::Result<()> {
//!     let db = Postgres::connect("postgres://jdoe@localhost/testdb", None).await?;
//!
//!     db.execute("CREATE TABLE foo (bar text)", &[]).await?;
//!     db.execute("INSERT INTO foo (bar) VALUES ($1)", &[json!("baz")]).await?;
//!
//!     for row in db.fetchall("SELECT * FROM foo ORDER BY bar", &[]).await? {
//!         println!("{}", row["bar"]);
//!     }
//!
//!     db.close().await;
//!     Ok(())
//! }
//! ```
//!
mod error;
mod rows;
mod scope;
mod wrapper;

pub use error::{Error, Result};
pub use rows::Rows;
pub use scope::ScopeKind;
pub use wrapper::Postgres;

// Re-export connection manager types used in the public API
pub use sqlx_pg_conn_mgr::{
   AcquirePolicy, Connection, ConnectionFactory, ConnectionParams, Cursor, Driver, PgFactory,
   PoolConfig, PoolStatus, Row, SqliteFactory,
};
