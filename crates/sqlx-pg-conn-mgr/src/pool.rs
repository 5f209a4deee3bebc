//! Bounded, thread-safe pool of database connections

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, error, trace, warn};

use crate::config::{AcquirePolicy, PoolConfig};
use crate::connection::Connection;
use crate::driver::ConnectionFactory;
use crate::{Error, Result};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Bounded pool of [`Connection`]s
///
/// At most `max_connections` connections are live at any time. A
/// connection is either idle in the pool or checked out by exactly one
/// [`PooledConnection`]; idle connections are always at rest (autocommit
/// on, no open transaction).
///
/// Cloning is cheap and yields a handle to the same pool.
///
/// # Example
///
/// ```no_run
/// use sqlx_pg_conn_mgr::{ConnectionParams, PgFactory, Pool, PoolConfig};
///
/// # async fn example() -> sqlx_pg_conn_mgr::Result<()> {
/// let params = ConnectionParams::parse("postgres://jdoe@localhost/testdb")?;
/// let pool = Pool::connect(PgFactory::new(params), PoolConfig::new(1, 10)).await?;
///
/// let mut conn = pool.acquire().await?;
/// conn.execute("SELECT 1", &[]).await?;
/// pool.release(conn)?;
///
/// pool.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pool {
   shared: Arc<SharedPool>,
}

struct SharedPool {
   id: u64,
   factory: Box<dyn ConnectionFactory>,
   config: PoolConfig,

   /// One permit per connection that may be checked out
   permits: Arc<Semaphore>,

   /// Free list and counters; never held across an await
   state: Mutex<PoolState>,

   next_connection_id: AtomicU64,
}

#[derive(Default)]
struct PoolState {
   idle: Vec<Connection>,
   checked_out: HashSet<u64>,

   /// Idle plus checked out plus connections being opened
   live: u32,

   closed: bool,
}

/// Point-in-time snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
   pub live: u32,
   pub idle: u32,
   pub checked_out: u32,
   pub max_connections: u32,
}

impl Pool {
   /// Build a pool and eagerly open `min_connections` connections
   ///
   /// Fails with `Error::Configuration` when the bounds are invalid, or
   /// with the factory's error if an initial connection cannot be opened.
   pub async fn connect(factory: impl ConnectionFactory, config: PoolConfig) -> Result<Self> {
      config.validate()?;

      let pool = Self {
         shared: Arc::new(SharedPool {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            factory: Box::new(factory),
            permits: Arc::new(Semaphore::new(config.max_connections as usize)),
            state: Mutex::new(PoolState::default()),
            next_connection_id: AtomicU64::new(1),
            config,
         }),
      };

      for _ in 0..pool.shared.config.min_connections {
         match pool.shared.open_connection().await {
            Ok(conn) => {
               let mut state = pool.shared.state.lock();
               state.live += 1;
               state.idle.push(conn);
            }
            Err(e) => {
               pool.close().await;
               return Err(e);
            }
         }
      }

      debug!(
         pool = pool.shared.id,
         min_connections = pool.shared.config.min_connections,
         max_connections = pool.shared.config.max_connections,
         "Connection pool ready"
      );

      Ok(pool)
   }

   /// Check out a connection
   ///
   /// Reuses an idle connection when one exists, otherwise opens a new one
   /// if fewer than `max_connections` are live. Under saturation the
   /// configured [`AcquirePolicy`] decides whether to wait, wait with a
   /// deadline, or fail with `Error::PoolExhausted`.
   pub async fn acquire(&self) -> Result<PooledConnection> {
      let permit = self.acquire_permit().await?;
      let shared = &self.shared;

      let reused = {
         let mut state = shared.state.lock();
         if state.closed {
            return Err(Error::PoolClosed);
         }
         let reused = state.idle.pop();
         match &reused {
            Some(conn) => {
               state.checked_out.insert(conn.id());
            }
            None => state.live += 1,
         }
         reused
      };

      let conn = match reused {
         Some(conn) => conn,
         None => {
            let mut slot = LiveSlot {
               state: &shared.state,
               armed: true,
            };
            let conn = shared.open_connection().await?;
            shared.state.lock().checked_out.insert(conn.id());
            slot.armed = false;
            conn
         }
      };

      trace!(pool = shared.id, connection = conn.id(), "Connection checked out");

      Ok(PooledConnection {
         conn: Some(conn),
         pool: Arc::clone(shared),
         _permit: permit,
      })
   }

   /// Return a connection to the pool
   ///
   /// A connection that is not at rest (autocommit off or a transaction
   /// still open) is closed instead of being made available again.
   /// Releasing into a pool other than the one that handed the connection
   /// out is an `Error::PoolProtocol`; the connection then goes back to its
   /// own pool.
   pub fn release(&self, mut conn: PooledConnection) -> Result<()> {
      if !Arc::ptr_eq(&self.shared, &conn.pool) {
         return Err(Error::PoolProtocol(format!(
            "connection {} was not checked out from pool {}",
            conn.id(),
            self.shared.id
         )));
      }

      match conn.conn.take() {
         Some(inner) => self.shared.check_in(inner),
         None => Err(Error::PoolProtocol(
            "connection was already released".to_string(),
         )),
      }
   }

   /// Current occupancy
   pub fn status(&self) -> PoolStatus {
      let state = self.shared.state.lock();
      PoolStatus {
         live: state.live,
         idle: state.idle.len() as u32,
         checked_out: state.checked_out.len() as u32,
         max_connections: self.shared.config.max_connections,
      }
   }

   /// The validated configuration this pool was built with
   pub fn config(&self) -> &PoolConfig {
      &self.shared.config
   }

   pub fn is_closed(&self) -> bool {
      self.shared.state.lock().closed
   }

   /// Close the pool
   ///
   /// Idle connections are closed now; checked-out connections are closed
   /// when they come back. Pending and future `acquire` calls fail with
   /// `Error::PoolClosed`. Calling this more than once is harmless.
   pub async fn close(&self) {
      let idle = {
         let mut state = self.shared.state.lock();
         if state.closed {
            return;
         }
         state.closed = true;
         let idle = std::mem::take(&mut state.idle);
         state.live -= idle.len() as u32;
         idle
      };

      self.shared.permits.close();

      for conn in idle {
         if let Err(e) = conn.close().await {
            warn!(pool = self.shared.id, "Failed to close idle connection: {}", e);
         }
      }

      debug!(pool = self.shared.id, "Connection pool closed");
   }

   async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
      let permits = Arc::clone(&self.shared.permits);
      let max_connections = self.shared.config.max_connections;

      match self.shared.config.acquire_policy {
         AcquirePolicy::Wait => permits.acquire_owned().await.map_err(|_| Error::PoolClosed),
         AcquirePolicy::NoWait => permits.try_acquire_owned().map_err(|e| match e {
            TryAcquireError::Closed => Error::PoolClosed,
            TryAcquireError::NoPermits => Error::PoolExhausted {
               max_connections,
               waited: None,
            },
         }),
         AcquirePolicy::Timeout(limit) => {
            match tokio::time::timeout(limit, permits.acquire_owned()).await {
               Ok(permit) => permit.map_err(|_| Error::PoolClosed),
               Err(_) => Err(Error::PoolExhausted {
                  max_connections,
                  waited: Some(limit),
               }),
            }
         }
      }
   }
}

impl fmt::Debug for Pool {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Pool")
         .field("id", &self.shared.id)
         .field("status", &self.status())
         .finish()
   }
}

impl SharedPool {
   async fn open_connection(&self) -> Result<Connection> {
      let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
      let driver = self.factory.connect().await?;
      debug!(pool = self.id, connection = id, "Opened connection");
      Ok(Connection::new(id, driver))
   }

   fn check_in(&self, conn: Connection) -> Result<()> {
      let id = conn.id();
      let dropped = {
         let mut state = self.state.lock();
         if !state.checked_out.remove(&id) {
            return Err(Error::PoolProtocol(format!(
               "connection {} is not checked out from pool {}",
               id, self.id
            )));
         }

         if state.closed || !conn.is_at_rest() {
            state.live -= 1;
            Some((conn, state.closed))
         } else {
            state.idle.push(conn);
            None
         }
      };

      match dropped {
         None => trace!(pool = self.id, connection = id, "Connection checked in"),
         Some((conn, pool_closed)) => {
            if !pool_closed {
               warn!(
                  pool = self.id,
                  connection = id,
                  autocommit = conn.autocommit(),
                  in_transaction = conn.in_transaction(),
                  "Discarding connection returned without being restored to rest"
               );
            }
            discard(conn);
         }
      }

      Ok(())
   }
}

/// Close a connection in the background when a runtime is available,
/// otherwise drop it (the driver tears the session down)
fn discard(conn: Connection) {
   match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
         handle.spawn(async move {
            if let Err(e) = conn.close().await {
               debug!("Failed to close discarded connection: {}", e);
            }
         });
      }
      Err(_) => drop(conn),
   }
}

/// Gives back a reserved live slot if opening a connection fails or the
/// acquiring future is dropped mid-connect
struct LiveSlot<'a> {
   state: &'a Mutex<PoolState>,
   armed: bool,
}

impl Drop for LiveSlot<'_> {
   fn drop(&mut self) {
      if self.armed {
         self.state.lock().live -= 1;
      }
   }
}

/// A connection checked out of a [`Pool`]
///
/// Derefs to [`Connection`]. Hand it back with [`Pool::release`]; if it is
/// dropped instead, it is checked in the same way.
pub struct PooledConnection {
   conn: Option<Connection>,
   pool: Arc<SharedPool>,

   // Dropped after `conn` is checked in, so a woken waiter finds it idle
   _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
   type Target = Connection;

   fn deref(&self) -> &Self::Target {
      self
         .conn
         .as_ref()
         .expect("connection is present until the guard is released")
   }
}

impl DerefMut for PooledConnection {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self
         .conn
         .as_mut()
         .expect("connection is present until the guard is released")
   }
}

impl Drop for PooledConnection {
   fn drop(&mut self) {
      if let Some(conn) = self.conn.take()
         && let Err(e) = self.pool.check_in(conn)
      {
         error!("Failed to check in dropped connection: {}", e);
      }
   }
}

impl fmt::Debug for PooledConnection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("PooledConnection")
         .field("pool", &self.pool.id)
         .field("conn", &self.conn)
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use std::sync::atomic::AtomicUsize;
   use std::time::Duration;

   use super::*;
   use crate::testing::ScriptedFactory;

   fn config(min: u32, max: u32, policy: AcquirePolicy) -> PoolConfig {
      PoolConfig {
         acquire_policy: policy,
         ..PoolConfig::new(min, max)
      }
   }

   #[tokio::test]
   async fn test_min_connections_opened_eagerly() {
      let factory = ScriptedFactory::default();
      let connects = Arc::clone(&factory.connects);

      let pool = Pool::connect(factory, PoolConfig::new(2, 5)).await.unwrap();

      assert_eq!(pool.config(), &PoolConfig::new(2, 5));
      assert_eq!(connects.load(Ordering::SeqCst), 2);
      assert_eq!(
         pool.status(),
         PoolStatus {
            live: 2,
            idle: 2,
            checked_out: 0,
            max_connections: 5,
         }
      );
   }

   #[tokio::test]
   async fn test_invalid_config_rejected_before_connecting() {
      let factory = ScriptedFactory::default();
      let connects = Arc::clone(&factory.connects);

      let err = Pool::connect(factory, PoolConfig::new(3, 1)).await.unwrap_err();

      assert!(matches!(err, Error::Configuration(_)));
      assert_eq!(connects.load(Ordering::SeqCst), 0);
   }

   #[tokio::test]
   async fn test_initial_connect_failure_propagates() {
      let factory = ScriptedFactory::default();
      factory.refuse.store(true, Ordering::SeqCst);

      let err = Pool::connect(factory, PoolConfig::new(1, 2)).await.unwrap_err();
      assert!(matches!(err, Error::Connect(_)));
   }

   #[tokio::test]
   async fn test_idle_connection_reused() {
      let factory = ScriptedFactory::default();
      let connects = Arc::clone(&factory.connects);
      let pool = Pool::connect(factory, PoolConfig::new(1, 3)).await.unwrap();

      let conn = pool.acquire().await.unwrap();
      let first_id = conn.id();
      assert_eq!(pool.status().checked_out, 1);
      assert_eq!(pool.status().idle, 0);
      pool.release(conn).unwrap();

      let conn = pool.acquire().await.unwrap();
      assert_eq!(conn.id(), first_id);
      assert_eq!(connects.load(Ordering::SeqCst), 1);
   }

   #[tokio::test]
   async fn test_no_wait_policy_exhausts_at_max() {
      let pool = Pool::connect(
         ScriptedFactory::default(),
         config(0, 2, AcquirePolicy::NoWait),
      )
      .await
      .unwrap();

      let a = pool.acquire().await.unwrap();
      let b = pool.acquire().await.unwrap();
      assert_ne!(a.id(), b.id());

      let err = pool.acquire().await.unwrap_err();
      assert!(matches!(
         err,
         Error::PoolExhausted {
            max_connections: 2,
            waited: None
         }
      ));
      assert_eq!(pool.status().live, 2);

      pool.release(a).unwrap();
      assert!(pool.acquire().await.is_ok());
   }

   #[tokio::test]
   async fn test_timeout_policy_gives_up() {
      let limit = Duration::from_millis(30);
      let pool = Pool::connect(
         ScriptedFactory::default(),
         config(1, 1, AcquirePolicy::Timeout(limit)),
      )
      .await
      .unwrap();

      let _held = pool.acquire().await.unwrap();
      let err = pool.acquire().await.unwrap_err();

      assert!(matches!(err, Error::PoolExhausted { waited: Some(w), .. } if w == limit));
   }

   #[tokio::test]
   async fn test_waiter_wakes_on_release() {
      let factory = ScriptedFactory::default();
      let connects = Arc::clone(&factory.connects);
      let pool = Pool::connect(factory, PoolConfig::new(1, 1)).await.unwrap();

      let held = pool.acquire().await.unwrap();
      let held_id = held.id();

      let waiter = {
         let pool = pool.clone();
         tokio::spawn(async move { pool.acquire().await.map(|conn| conn.id()) })
      };

      tokio::time::sleep(Duration::from_millis(20)).await;
      assert!(!waiter.is_finished(), "acquire should block while saturated");

      pool.release(held).unwrap();

      let woken_id = waiter.await.unwrap().unwrap();
      assert_eq!(woken_id, held_id);
      assert_eq!(connects.load(Ordering::SeqCst), 1);
   }

   #[tokio::test]
   async fn test_dropped_guard_checks_in() {
      let pool = Pool::connect(ScriptedFactory::default(), PoolConfig::new(1, 2))
         .await
         .unwrap();

      {
         let _conn = pool.acquire().await.unwrap();
         assert_eq!(pool.status().checked_out, 1);
      }

      assert_eq!(pool.status().idle, 1);
      assert_eq!(pool.status().checked_out, 0);
   }

   #[tokio::test]
   async fn test_dirty_connection_discarded() {
      let factory = ScriptedFactory::default();
      let connects = Arc::clone(&factory.connects);
      let pool = Pool::connect(factory, PoolConfig::new(1, 2)).await.unwrap();

      let mut conn = pool.acquire().await.unwrap();
      let dirty_id = conn.id();
      conn.set_autocommit(false).unwrap();
      conn.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
      pool.release(conn).unwrap();

      assert_eq!(
         pool.status(),
         PoolStatus {
            live: 0,
            idle: 0,
            checked_out: 0,
            max_connections: 2,
         }
      );

      let conn = pool.acquire().await.unwrap();
      assert_ne!(conn.id(), dirty_id);
      assert!(conn.autocommit());
      assert_eq!(connects.load(Ordering::SeqCst), 2);
   }

   #[tokio::test]
   async fn test_release_into_other_pool_is_protocol_error() {
      let pool_a = Pool::connect(ScriptedFactory::default(), PoolConfig::new(1, 1))
         .await
         .unwrap();
      let pool_b = Pool::connect(ScriptedFactory::default(), PoolConfig::new(1, 1))
         .await
         .unwrap();

      let conn = pool_a.acquire().await.unwrap();
      let err = pool_b.release(conn).unwrap_err();

      assert!(matches!(err, Error::PoolProtocol(_)));
      assert_eq!(pool_a.status().idle, 1);
      assert_eq!(pool_a.status().checked_out, 0);
      assert_eq!(pool_b.status().idle, 1);
   }

   #[tokio::test]
   async fn test_failed_connect_frees_slot() {
      let factory = ScriptedFactory::default();
      let refuse = Arc::clone(&factory.refuse);
      let pool = Pool::connect(factory, config(0, 1, AcquirePolicy::NoWait))
         .await
         .unwrap();

      refuse.store(true, Ordering::SeqCst);
      assert!(matches!(pool.acquire().await, Err(Error::Connect(_))));
      assert_eq!(pool.status().live, 0);

      refuse.store(false, Ordering::SeqCst);
      let conn = pool.acquire().await.unwrap();
      assert_eq!(pool.status().live, 1);
      drop(conn);
   }

   #[tokio::test]
   async fn test_close() {
      let factory = ScriptedFactory::default();
      let closes = Arc::clone(&factory.closes);
      let pool = Pool::connect(factory, PoolConfig::new(2, 3)).await.unwrap();

      let checked_out = pool.acquire().await.unwrap();
      pool.close().await;

      assert!(pool.is_closed());
      assert_eq!(closes.load(Ordering::SeqCst), 1);
      assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));

      pool.release(checked_out).unwrap();
      assert_eq!(pool.status().live, 0);
      assert_eq!(pool.status().idle, 0);

      // closing twice is a no-op
      pool.close().await;
   }

   #[tokio::test]
   async fn test_close_wakes_waiters() {
      let pool = Pool::connect(ScriptedFactory::default(), PoolConfig::new(1, 1))
         .await
         .unwrap();
      let held = pool.acquire().await.unwrap();

      let waiter = {
         let pool = pool.clone();
         tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
      };
      tokio::time::sleep(Duration::from_millis(10)).await;

      pool.close().await;

      assert!(matches!(waiter.await.unwrap(), Err(Error::PoolClosed)));
      drop(held);
   }

   #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
   async fn test_checkouts_never_exceed_max() {
      let factory = ScriptedFactory::default();
      let connects = Arc::clone(&factory.connects);
      let pool = Pool::connect(factory, PoolConfig::new(0, 3)).await.unwrap();

      let active = Arc::new(AtomicUsize::new(0));
      let max_seen = Arc::new(AtomicUsize::new(0));

      let handles: Vec<_> = (0..12)
         .map(|_| {
            let (pool, active, max_seen) =
               (pool.clone(), Arc::clone(&active), Arc::clone(&max_seen));

            tokio::spawn(async move {
               for _ in 0..10 {
                  let conn = pool.acquire().await.unwrap();
                  max_seen.fetch_max(active.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
                  assert!(pool.status().checked_out <= 3);

                  tokio::task::yield_now().await;

                  active.fetch_sub(1, Ordering::SeqCst);
                  pool.release(conn).unwrap();
               }
            })
         })
         .collect();

      for handle in handles {
         handle.await.unwrap();
      }

      assert!(max_seen.load(Ordering::SeqCst) <= 3);
      assert!(connects.load(Ordering::SeqCst) <= 3);
      assert_eq!(pool.status().checked_out, 0);
      assert_eq!(pool.status().live, pool.status().idle);
   }
}
