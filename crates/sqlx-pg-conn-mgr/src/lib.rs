//! # sqlx-pg-conn-mgr
//!
//! A bounded connection pool over SQLx sessions with DB-API style
//! transaction control, built for PostgreSQL.
//!
//! ## Core Types
//!
//! - **[`Pool`]**: Bounded pool of reusable sessions
//! - **[`PoolConfig`]**: Pool bounds and the [`AcquirePolicy`] used under saturation
//! - **[`PooledConnection`]**: RAII guard for a checked-out [`Connection`]
//! - **[`Connection`]**: Session with autocommit and transaction state
//! - **[`Cursor`]**: Runs statements on a connection and yields [`Row`]s
//! - **[`ConnectionParams`]**: Parsed `postgres://` URL or key=value DSN
//! - **[`Error`]**: Error type for pool and database operations
//!
//! ## Architecture
//!
//! - **Bounded checkout**: A semaphore caps live connections at `max_connections`
//! - **Eager minimum**: `min_connections` sessions are opened when the pool is built
//! - **Clean reuse**: Only connections in autocommit mode with no open transaction
//!   return to the idle list; anything else is closed on release
//! - **Pluggable sessions**: [`PgFactory`] opens PostgreSQL sessions, [`SqliteFactory`]
//!   opens file-backed SQLite sessions for local use and tests
//!
//! ## Usage
//!
//! ```no_run
//! use serde_json::json;
//! use sqlx_pg_conn_mgr::{ConnectionParams, PgFactory, Pool, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> sqlx_pg_conn_mgr::Result<()> {
//!     let params = ConnectionParams::parse("postgres://jdoe@localhost/testdb")?;
//!     let pool = Pool::connect(PgFactory::new(params), PoolConfig::default()).await?;
//!
//!     let mut conn = pool.acquire().await?;
//!     conn.set_autocommit(false)?;
//!
//!     let mut cursor = conn.cursor();
//!     cursor.execute("INSERT INTO foo (bar) VALUES ($1)", &[json!("baz")]).await?;
//!     conn.commit().await?;
//!     conn.set_autocommit(true)?;
//!
//!     // Returned to the idle list for the next borrower
//!     pool.release(conn)?;
//!
//!     pool.close().await;
//!     Ok(())
//! }
//! ```
//!
mod config;
mod connection;
mod cursor;
mod decode;
mod driver;
mod error;
mod params;
mod pool;
mod postgres;
mod sqlite;

#[cfg(test)]
mod testing;

// Re-export public types
pub use config::{AcquirePolicy, PoolConfig};
pub use connection::Connection;
pub use cursor::Cursor;
pub use driver::{ConnectionFactory, Driver, Row};
pub use error::Error;
pub use params::{ConnectionParams, DEFAULT_PORT};
pub use pool::{Pool, PoolStatus, PooledConnection};
pub use postgres::PgFactory;
pub use sqlite::SqliteFactory;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
