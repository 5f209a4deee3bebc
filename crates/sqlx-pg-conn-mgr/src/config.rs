//! Configuration for the bounded connection pool

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What `Pool::acquire` does when every connection is checked out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcquirePolicy {
   /// Wait until another scope releases a connection
   #[default]
   Wait,

   /// Wait at most this long, then fail with `Error::PoolExhausted`
   Timeout(Duration),

   /// Fail with `Error::PoolExhausted` immediately
   NoWait,
}

/// Configuration for a connection [`Pool`](crate::Pool)
///
/// # Examples
///
/// ```
/// use sqlx_pg_conn_mgr::{AcquirePolicy, PoolConfig};
/// use std::time::Duration;
///
/// // Use defaults (1..=10 connections, block on saturation)
/// let config = PoolConfig::default();
///
/// // Override the bounds only
/// let config = PoolConfig::new(2, 4);
///
/// // Bounded wait on saturation
/// let config = PoolConfig {
///     acquire_policy: AcquirePolicy::Timeout(Duration::from_secs(5)),
///     ..PoolConfig::new(0, 8)
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
   /// Connections opened eagerly when the pool is built
   ///
   /// Default: 1
   pub min_connections: u32,

   /// Upper bound on live connections (idle plus checked out)
   ///
   /// Default: 10
   pub max_connections: u32,

   /// Behavior of `acquire` under saturation
   ///
   /// Default: [`AcquirePolicy::Wait`]
   #[serde(default)]
   pub acquire_policy: AcquirePolicy,
}

impl PoolConfig {
   /// Config with the given bounds and the default acquire policy
   pub fn new(min_connections: u32, max_connections: u32) -> Self {
      Self {
         min_connections,
         max_connections,
         acquire_policy: AcquirePolicy::default(),
      }
   }

   /// Check the bounds before any connection is opened
   pub fn validate(&self) -> Result<()> {
      if self.max_connections == 0 {
         return Err(Error::Configuration(
            "max_connections must be at least 1".to_string(),
         ));
      }
      if self.min_connections > self.max_connections {
         return Err(Error::Configuration(format!(
            "min_connections ({}) exceeds max_connections ({})",
            self.min_connections, self.max_connections
         )));
      }
      Ok(())
   }
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self::new(1, 10)
   }
}
