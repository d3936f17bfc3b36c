use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use duckdb::Connection;
use tracebase_core::config::StorageConfig;
use tracebase_core::error::{Result, TracebaseError};

/// A bounded pool of DuckDB connections.
///
/// Every pool member is cloned from one root handle, so all of them address
/// the same database. That matters for `:memory:` databases, where
/// independently opened connections would each get a private one.
/// Acquisition blocks up to the configured timeout when the pool is
/// exhausted; that blocking is the adapter's backpressure.
pub struct ConnectionPool {
    conns: Mutex<Vec<Connection>>,
    available: Condvar,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    pub fn open(cfg: &StorageConfig) -> Result<Self> {
        let root = if cfg.db_path == Path::new(":memory:") {
            Connection::open_in_memory()
                .map_err(|e| TracebaseError::Store(format!("failed to open in-memory db: {e}")))?
        } else {
            if let Some(parent) = cfg.db_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| TracebaseError::Io(format!("failed to create db dir: {e}")))?;
            }
            Connection::open(&cfg.db_path)
                .map_err(|e| TracebaseError::Store(format!("failed to open duckdb: {e}")))?
        };

        root.execute_batch("PRAGMA threads=4;")
            .map_err(|e| TracebaseError::Store(format!("failed to set pragmas: {e}")))?;

        if let Some(schema) = &cfg.schema {
            validate_schema_name(schema)?;
            root.execute_batch(&format!("CREATE SCHEMA IF NOT EXISTS {schema};"))
                .map_err(|e| TracebaseError::Store(format!("failed to create schema: {e}")))?;
        }

        let size = cfg.pool_size.max(1);
        let mut conns = Vec::with_capacity(size);
        for _ in 1..size {
            let clone = root
                .try_clone()
                .map_err(|e| TracebaseError::Store(format!("failed to clone connection: {e}")))?;
            conns.push(clone);
        }
        conns.push(root);

        // USE is per-session, so every member switches, not just the root.
        if let Some(schema) = &cfg.schema {
            for conn in &conns {
                conn.execute_batch(&format!("USE {schema};"))
                    .map_err(|e| TracebaseError::Store(format!("failed to use schema: {e}")))?;
            }
        }

        Ok(Self {
            conns: Mutex::new(conns),
            available: Condvar::new(),
            acquire_timeout: cfg.acquire_timeout,
        })
    }

    /// Takes a connection, blocking up to the acquire timeout when none is
    /// free. The guard returns it on drop, on every exit path.
    pub fn acquire(&self) -> Result<PooledConn<'_>> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut conns = self.conns.lock().expect("pool mutex poisoned");
        loop {
            if let Some(conn) = conns.pop() {
                return Ok(PooledConn {
                    conn: Some(conn),
                    pool: self,
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TracebaseError::Store(format!(
                    "no database connection available within {:?}",
                    self.acquire_timeout
                )));
            }
            let (guard, _timed_out) = self
                .available
                .wait_timeout(conns, remaining)
                .expect("pool mutex poisoned");
            conns = guard;
        }
    }

    fn release(&self, conn: Connection) {
        let mut conns = self.conns.lock().expect("pool mutex poisoned");
        conns.push(conn);
        drop(conns);
        self.available.notify_one();
    }
}

fn validate_schema_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(TracebaseError::Config(format!(
            "schema name must be a plain identifier: {name}"
        )))
    }
}

/// RAII guard over one pooled connection.
pub struct PooledConn<'a> {
    conn: Option<Connection>,
    pool: &'a ConnectionPool,
}

impl Deref for PooledConn<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection already returned")
    }
}

impl DerefMut for PooledConn<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already returned")
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
