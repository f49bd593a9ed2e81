//! Small blocking SQLite connection pool.
//!
//! # Invariants
//! - The pool mutex is held only to check a connection in or out.
//! - In-memory stores share exactly one connection, so `max_size` is 1.
//! - A connection is integrity-checked once, when the pool is created.

use crate::config::StoreLocation;
use crate::db::{open_db, open_db_in_memory, verify_integrity, DbResult};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

const DEFAULT_FILE_POOL_SIZE: usize = 4;

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

pub(crate) struct ConnectionPool {
    location: StoreLocation,
    max_size: usize,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl ConnectionPool {
    /// Opens the first connection (running migrations and integrity checks).
    pub(crate) fn open(location: StoreLocation) -> DbResult<Self> {
        let first = open_location(&location)?;
        verify_integrity(&first)?;

        let max_size = match location {
            StoreLocation::InMemory => 1,
            StoreLocation::File(_) => DEFAULT_FILE_POOL_SIZE,
        };

        Ok(Self {
            location,
            max_size,
            state: Mutex::new(PoolState {
                idle: vec![first],
                open: 1,
            }),
            returned: Condvar::new(),
        })
    }

    /// Checks out a connection, blocking while all are in use.
    pub(crate) fn get(&self) -> DbResult<PooledConnection<'_>> {
        let mut state = self.lock_state();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
            if state.open < self.max_size {
                state.open += 1;
                drop(state);
                return match open_location(&self.location) {
                    Ok(conn) => Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    }),
                    Err(err) => {
                        self.lock_state().open -= 1;
                        self.returned.notify_one();
                        Err(err)
                    }
                };
            }
            state = self
                .returned
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn location(&self) -> &StoreLocation {
        &self.location
    }

    fn check_in(&self, conn: Connection) {
        self.lock_state().idle.push(conn);
        self.returned.notify_one();
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_location(location: &StoreLocation) -> DbResult<Connection> {
    match location {
        StoreLocation::File(path) => open_db(path),
        StoreLocation::InMemory => open_db_in_memory(),
    }
}

/// Connection checked out of a `ConnectionPool`; returned on drop.
pub(crate) struct PooledConnection<'pool> {
    pool: &'pool ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pooled connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn);
        }
    }
}
