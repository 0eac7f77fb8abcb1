use super::connection::{Connection, ConnectionRole};
use super::engine::Engine;
use crate::error::StorageError;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Authenticated,
    Service,
}

impl PoolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolKind::Authenticated => "authenticated",
            PoolKind::Service => "service",
        }
    }

    fn role(self) -> ConnectionRole {
        match self {
            PoolKind::Authenticated => ConnectionRole::Authenticated,
            PoolKind::Service => ConnectionRole::Service,
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub kind: PoolKind,
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub closed: bool,
}

/// Fixed-size pool of engine connections. The semaphore bounds concurrent
/// borrowers; the idle list holds the connections themselves.
#[derive(Debug)]
pub struct ConnectionPool {
    kind: PoolKind,
    size: usize,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    released: Notify,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(
        kind: PoolKind,
        size: usize,
        acquire_timeout: Duration,
        engine: &Arc<Engine>,
    ) -> Arc<Self> {
        let idle = (0..size)
            .map(|idx| Connection::new(idx as u64 + 1, kind.role(), Arc::clone(engine)))
            .collect();
        Arc::new(Self {
            kind,
            size,
            idle: Mutex::new(idle),
            permits: Arc::new(Semaphore::new(size)),
            released: Notify::new(),
            acquire_timeout,
        })
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Waits at most the configured timeout for a connection.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, StorageError> {
        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StorageError::PoolClosed { pool: self.kind }),
            Err(_) => {
                let waited_ms = self.acquire_timeout.as_millis() as u64;
                warn!(pool = %self.kind, waited_ms, "connection acquire timed out");
                return Err(StorageError::PoolTimeout {
                    pool: self.kind,
                    waited_ms,
                });
            }
        };
        let mut conn = self
            .idle
            .lock()
            .pop()
            .ok_or(StorageError::PoolClosed { pool: self.kind })?;
        if !conn.is_clean() {
            error!(
                pool = %self.kind,
                connection_id = conn.id(),
                "dirty connection found in idle list; resetting"
            );
            conn.reset();
        }
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Rejects new borrowers. Borrowed connections still return normally.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn status(&self) -> PoolStatus {
        let idle = self.idle.lock().len();
        PoolStatus {
            kind: self.kind,
            size: self.size,
            idle,
            in_use: self.size.saturating_sub(idle),
            closed: self.permits.is_closed(),
        }
    }

    /// Resolves once every connection is back in the idle list.
    pub async fn drained(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();
            if self.status().in_use == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, mut conn: Connection) {
        conn.rollback();
        conn.reset();
        self.idle.lock().push(conn);
        self.released.notify_waiters();
    }
}

/// Exclusive borrow of a pooled connection. Dropping it on any path, including
/// task cancellation and panic unwinding, rolls back, clears the trusted
/// settings and returns the connection before the permit is released.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.kind)
            .field("connection_id", &self.conn.as_ref().map(Connection::id))
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
