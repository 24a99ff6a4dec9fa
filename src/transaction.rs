//! Transaction Module
//!
//! Provides transaction support over `may_postgres`.
//!
//! This module provides:
//! - Transaction type that implements [`Executor`] and [`TransactionHandle`]
//! - Transaction isolation levels
//! - Commit/rollback operations, with rollback on drop for transactions
//!   that were never closed (errors, panics unwinding through a unit of work)

use crate::executor::{instrumented, DbError, Executor, Row, TransactionHandle};
use may_postgres::types::ToSql;
use may_postgres::Client;
use serde::Deserialize;
use std::fmt;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Read uncommitted (not supported by PostgreSQL, maps to ReadCommitted)
    ReadUncommitted,
    /// Read committed
    ReadCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Serializable (default for units of work)
    #[default]
    Serializable,
}

impl IsolationLevel {
    /// Convert to PostgreSQL SQL syntax
    pub fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Statement opening a transaction at this level.
    pub fn begin_sql(self) -> String {
        format!("BEGIN ISOLATION LEVEL {}", self.to_sql())
    }
}

/// Transaction error type
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionError {
    /// Error from the database while beginning, committing or rolling back
    Database(DbError),
    /// No session could be obtained to open the transaction
    Connection(String),
    /// Transaction already committed or rolled back
    TransactionClosed,
    /// Other transaction errors
    Other(String),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Database(e) => write!(f, "{}", e),
            TransactionError::Connection(s) => write!(f, "Connection unavailable: {}", s),
            TransactionError::TransactionClosed => {
                write!(f, "Transaction has already been committed or rolled back")
            }
            TransactionError::Other(s) => write!(f, "Transaction error: {}", s),
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<DbError> for TransactionError {
    fn from(err: DbError) -> Self {
        TransactionError::Database(err)
    }
}

impl From<may_postgres::Error> for TransactionError {
    fn from(err: may_postgres::Error) -> Self {
        TransactionError::Database(err.into())
    }
}

impl From<TransactionError> for DbError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Database(e) => e,
            TransactionError::Connection(s) => DbError::Other(s),
            TransactionError::TransactionClosed => DbError::Other("Transaction closed".to_string()),
            TransactionError::Other(s) => DbError::Other(s),
        }
    }
}

/// A database transaction on a `may_postgres` session.
///
/// The session must not carry another transaction while this one is open;
/// units of work get theirs from [`crate::pool::PgPool`].
///
/// ```no_run
/// use berth::config::DatabaseConfig;
/// use berth::executor::{Database, Executor};
/// use berth::pool::PgPool;
/// use berth::transaction::IsolationLevel;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPool::new(&DatabaseConfig::default())?;
/// let transaction = pool.begin(IsolationLevel::Serializable)?;
/// transaction.execute("INSERT INTO users (name) VALUES ($1)", &[&"Alice"])?;
/// transaction.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction {
    client: Client,
    closed: bool,
}

impl Transaction {
    /// Create a new transaction with a specific isolation level
    pub(crate) fn new_with_isolation(
        client: Client,
        isolation_level: IsolationLevel,
    ) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        client
            .execute(isolation_level.begin_sql().as_str(), &[])
            .map_err(TransactionError::from)?;

        Ok(Self {
            client,
            closed: false,
        })
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction has already been committed or rolled back,
    /// or if the server rejects the commit.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        // Closed even on failure: a failed COMMIT leaves nothing to roll back.
        self.closed = true;
        self.client
            .execute("COMMIT", &[])
            .map_err(TransactionError::from)?;
        Ok(())
    }

    /// Rollback the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction has already been committed or rolled back.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.closed = true;
        self.client
            .execute("ROLLBACK", &[])
            .map_err(TransactionError::from)?;
        Ok(())
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("transaction dropped while open, rolling back");
            if let Err(e) = self.client.execute("ROLLBACK", &[]) {
                log::error!("rollback on drop failed: {e}");
            }
        }
    }
}

impl Executor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        if self.closed {
            return Err(DbError::Other("Transaction is closed".to_string()));
        }
        instrumented(query, || self.client.execute(query, params))
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        if self.closed {
            return Err(DbError::Other("Transaction is closed".to_string()));
        }
        let rows = instrumented(query, || self.client.query(query, params))?;
        rows.iter().map(Row::from_postgres).collect()
    }
}

impl TransactionHandle for Transaction {
    fn commit(self: Box<Self>) -> Result<(), TransactionError> {
        Transaction::commit(*self)
    }

    fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
        Transaction::rollback(*self)
    }
}
