//! Connection pool: one session per open transaction.
//!
//! A `may_postgres::Client` is a single server session, so two units of work
//! sharing one would interleave their `BEGIN`/`COMMIT`. [`PgPool`] lends
//! each transaction a session of its own and takes it back once the
//! transaction is committed, rolled back or dropped. Sessions are opened
//! lazily up to `max_connections`; beyond that `begin` waits up to the pool
//! timeout for one to come back.
//!
//! Waiting uses `may::sync` primitives so a blocked unit of work parks its
//! coroutine instead of the worker thread.

use crate::config::DatabaseConfig;
use crate::connection::{self, ConnectionError};
use crate::executor::{Database, DbError, Executor, Row, TransactionHandle};
use crate::transaction::{IsolationLevel, Transaction, TransactionError};
use may::sync::{Condvar, Mutex};
use may_postgres::types::ToSql;
use may_postgres::Client;
use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bookkeeping for the sessions of one pool.
#[derive(Debug)]
struct Slots<C> {
    idle: Vec<C>,
    /// Sessions opened and not yet discarded, idle or lent
    open: usize,
    max: usize,
}

enum Take<C> {
    Idle(C),
    /// A slot was reserved; the caller opens the session
    Reserved,
    Full,
}

impl<C> Slots<C> {
    fn new(max: usize) -> Self {
        Self {
            idle: Vec::new(),
            open: 0,
            max,
        }
    }

    fn take(&mut self) -> Take<C> {
        if let Some(conn) = self.idle.pop() {
            Take::Idle(conn)
        } else if self.open < self.max {
            self.open += 1;
            Take::Reserved
        } else {
            Take::Full
        }
    }

    /// Return a lent session. A broken one frees its slot instead.
    fn give_back(&mut self, conn: C, healthy: bool) {
        if healthy {
            self.idle.push(conn);
        } else {
            self.forget();
        }
    }

    fn forget(&mut self) {
        self.open = self.open.saturating_sub(1);
    }
}

struct Shared {
    url: String,
    acquire_timeout: Duration,
    slots: Mutex<Slots<Client>>,
    returned: Condvar,
}

impl Shared {
    fn acquire(&self) -> Result<Client, ConnectionError> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut slots = self.lock()?;
        loop {
            match slots.take() {
                Take::Idle(client) => return Ok(client),
                Take::Reserved => {
                    drop(slots);
                    return connection::connect(&self.url).inspect_err(|_| {
                        if let Ok(mut slots) = self.slots.lock() {
                            slots.forget();
                        }
                        self.returned.notify_one();
                    });
                }
                Take::Full => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ConnectionError::PoolExhausted {
                            max_connections: slots.max,
                            waited: self.acquire_timeout,
                        });
                    }
                    let (guard, _) = self
                        .returned
                        .wait_timeout(slots, deadline - now)
                        .map_err(|_| poisoned())?;
                    slots = guard;
                }
            }
        }
    }

    fn release(&self, client: Client, healthy: bool) {
        match self.slots.lock() {
            Ok(mut slots) => slots.give_back(client, healthy),
            Err(_) => log::error!("connection pool lock poisoned, dropping session"),
        }
        self.returned.notify_one();
    }

    fn lock(&self) -> Result<may::sync::MutexGuard<'_, Slots<Client>>, ConnectionError> {
        self.slots.lock().map_err(|_| poisoned())
    }
}

fn poisoned() -> ConnectionError {
    ConnectionError::InvalidPool("pool lock poisoned".to_string())
}

/// Pooled [`Database`] over `may_postgres`.
///
/// ```no_run
/// use berth::adapter::PostgresAdapter;
/// use berth::config::DatabaseConfig;
/// use berth::environment::EnvironmentManager;
/// use berth::pool::PgPool;
/// use berth::schema::{ModelDescriptor, Registry};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPool::new(&DatabaseConfig::load()?)?;
/// let registry = Registry::builder().model(ModelDescriptor::new("Person")).build()?;
/// let manager = EnvironmentManager::new(Arc::new(pool), Arc::new(PostgresAdapter::new()), Arc::new(registry));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PgPool {
    shared: Arc<Shared>,
}

impl PgPool {
    /// Build a pool from `config`. No session is opened yet.
    ///
    /// # Errors
    ///
    /// `InvalidConnectionString` for a malformed url, `InvalidPool` when
    /// `max_connections` is zero.
    pub fn new(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        connection::validate_connection_string(&config.url)?;
        if config.max_connections == 0 {
            return Err(ConnectionError::InvalidPool(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                url: config.url.clone(),
                acquire_timeout: config.acquire_timeout(),
                slots: Mutex::new(Slots::new(config.max_connections)),
                returned: Condvar::new(),
            }),
        })
    }

    pub fn max_connections(&self) -> usize {
        self.shared.lock().map(|slots| slots.max).unwrap_or_default()
    }

    /// Sessions currently open, idle or lent.
    pub fn open_connections(&self) -> usize {
        self.shared.lock().map(|slots| slots.open).unwrap_or_default()
    }

    /// Borrow a session and run `SELECT 1` on it.
    ///
    /// # Errors
    ///
    /// Connection errors; a session failing the check is discarded.
    pub fn check_health(&self) -> Result<bool, ConnectionError> {
        let client = self.shared.acquire()?;
        let result = connection::check_connection_health(&client);
        self.shared.release(client, matches!(result, Ok(true)));
        result
    }
}

impl Database for PgPool {
    fn begin(&self, isolation_level: IsolationLevel) -> Result<Box<dyn TransactionHandle>, TransactionError> {
        let client = self
            .shared
            .acquire()
            .map_err(|e| TransactionError::Connection(e.to_string()))?;
        match Transaction::new_with_isolation(client.clone(), isolation_level) {
            Ok(transaction) => Ok(Box::new(PooledTransaction {
                transaction: Some(transaction),
                client: Some(client),
                shared: Arc::clone(&self.shared),
                broken: Cell::new(false),
            })),
            Err(err) => {
                self.shared.release(client, !is_lost_session(&err));
                Err(err)
            }
        }
    }
}

/// A transaction holding its session until it is closed.
struct PooledTransaction {
    transaction: Option<Transaction>,
    client: Option<Client>,
    shared: Arc<Shared>,
    /// Set once the session failed below the SQL level
    broken: Cell<bool>,
}

impl PooledTransaction {
    fn open(&self) -> Result<&Transaction, DbError> {
        self.transaction
            .as_ref()
            .ok_or_else(|| DbError::Other("Transaction is closed".to_string()))
    }

    fn note<T>(&self, result: &Result<T, DbError>) {
        if let Err(err) = result {
            if err.is_lost_session() {
                self.broken.set(true);
            }
        }
    }

    fn close(
        &mut self,
        finish: impl FnOnce(Transaction) -> Result<(), TransactionError>,
    ) -> Result<(), TransactionError> {
        let transaction = self.transaction.take().ok_or(TransactionError::TransactionClosed)?;
        let result = finish(transaction);
        if let Err(err) = &result {
            if is_lost_session(err) {
                self.broken.set(true);
            }
        }
        result
    }
}

fn is_lost_session(err: &TransactionError) -> bool {
    matches!(err, TransactionError::Database(db) if db.is_lost_session())
}

impl Executor for PooledTransaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        let result = self.open()?.execute(query, params);
        self.note(&result);
        result
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        let result = self.open()?.query_all(query, params);
        self.note(&result);
        result
    }
}

impl TransactionHandle for PooledTransaction {
    fn commit(mut self: Box<Self>) -> Result<(), TransactionError> {
        self.close(Transaction::commit)
    }

    fn rollback(mut self: Box<Self>) -> Result<(), TransactionError> {
        self.close(Transaction::rollback)
    }
}

impl Drop for PooledTransaction {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            log::warn!("pooled transaction dropped while open, rolling back");
            if let Err(err) = self.close(Transaction::rollback) {
                log::error!("rollback on drop failed: {err}");
                self.broken.set(true);
            }
        }
        if let Some(client) = self.client.take() {
            self.shared.release(client, !self.broken.get());
        }
    }
}
