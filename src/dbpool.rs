//! Fixed-size, eagerly-initialized database connection pool.
//!
//! `N` live handles are opened at startup (any single failure is fatal, not a
//! per-request error), `acquire` gates on a counting semaphore before taking a handle
//! from the free list under a mutex, and the scoped lease ([`PooledConnection`])
//! returns the handle to the free list and posts the semaphore on `Drop` — covering
//! panics and early returns alike.
//!
//! [`DbPool`] is generic over the handle type so the free-list/semaphore bookkeeping can
//! be exercised in tests without a live database; [`connect`] is the concrete
//! constructor that actually dials MySQL.

use std::sync::{Arc, Mutex};

use mysql::{Conn, OptsBuilder};

use crate::config::Config;
use crate::sync::Semaphore;

/// Database connection parameters, split out of [`Config`] so [`connect`] doesn't need
/// the whole startup configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
    pub max_conn: u32,
}

impl From<&Config> for DbConfig {
    fn from(config: &Config) -> Self {
        DbConfig {
            url: config.db_url.clone(),
            user: config.db_user.clone(),
            password: config.db_password.clone(),
            database: config.db_database.clone(),
            port: config.db_port,
            max_conn: config.db_max_conn,
        }
    }
}

#[derive(Debug)]
pub struct DbPool<C> {
    free: Mutex<Vec<C>>,
    permits: Semaphore,
}

impl<C> DbPool<C> {
    /// Builds a pool from already-open handles.
    pub fn new(handles: Vec<C>) -> Arc<Self> {
        let permits = Semaphore::new(handles.len());
        Arc::new(DbPool { free: Mutex::new(handles), permits })
    }

    /// Leases a connection, blocking until one is free.
    pub fn acquire(self: &Arc<Self>) -> PooledConnection<C> {
        self.permits.wait();
        let conn = self.free.lock().unwrap().pop().expect("pool free-list/semaphore count diverged");
        PooledConnection { pool: Arc::clone(self), conn: Some(conn) }
    }

    /// Connections currently sitting idle in the free list. Diagnostic only.
    pub fn available(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    fn release(&self, conn: C) {
        self.free.lock().unwrap().push(conn);
        self.permits.post();
    }
}

/// Eagerly opens `config.max_conn` MySQL connections. A single failure aborts the whole
/// pool: a partially-initialized pool is a startup failure, not a degraded one. The
/// failing connection's index (1-based, matching `total`) is returned alongside the
/// underlying error so the caller can report "which one" of the configured connections
/// failed.
pub fn connect(config: &DbConfig) -> Result<Arc<DbPool<Conn>>, (u32, mysql::Error)> {
    let mut handles = Vec::with_capacity(config.max_conn as usize);
    for index in 0..config.max_conn {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.url.clone()))
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()))
            .tcp_port(config.port);
        match Conn::new(opts) {
            Ok(conn) => handles.push(conn),
            Err(e) => return Err((index + 1, e)),
        }
    }
    Ok(DbPool::new(handles))
}

/// RAII lease over one pooled connection. Returns the connection and posts the
/// semaphore on every exit path, including unwinding.
#[derive(Debug)]
pub struct PooledConnection<C> {
    pool: Arc<DbPool<C>>,
    conn: Option<C>,
}

impl<C> std::ops::Deref for PooledConnection<C> {
    type Target = C;
    fn deref(&self) -> &C {
        self.conn.as_ref().unwrap()
    }
}

impl<C> std::ops::DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().unwrap()
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_and_drop_conserves_the_free_list() {
        let pool = DbPool::new(vec![1u32, 2, 3]);
        assert_eq!(pool.available(), 3);

        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.available(), 1);

        drop(a);
        drop(b);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn acquire_blocks_until_a_handle_is_released() {
        let pool = DbPool::new(vec![1u32]);
        let lease = pool.acquire();
        assert_eq!(pool.available(), 0);

        let pool2 = Arc::clone(&pool);
        let acquired = Arc::new(AtomicUsize::new(0));
        let acquired2 = Arc::clone(&acquired);
        let handle = thread::spawn(move || {
            let _lease = pool2.acquire();
            acquired2.store(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);

        drop(lease);
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }
}
