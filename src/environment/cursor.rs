//! Cursor: the statement primitives of one unit of work.

use crate::adapter::DbAdapter;
use crate::error::OrmError;
use crate::executor::{DbError, Row, TransactionHandle};
use crate::query::Statement;
use crate::value_conversion::with_converted_params;
use std::sync::Arc;

/// Owns the transaction of an [`Environment`](super::Environment).
///
/// Statements are sent in program order, one at a time. The transaction is
/// closed by [`Cursor::commit`] or [`Cursor::rollback`]; dropping a cursor
/// that was never closed rolls it back.
pub struct Cursor {
    transaction: Box<dyn TransactionHandle>,
    adapter: Arc<dyn DbAdapter>,
}

impl Cursor {
    pub fn new(transaction: Box<dyn TransactionHandle>, adapter: Arc<dyn DbAdapter>) -> Self {
        Self {
            transaction,
            adapter,
        }
    }

    /// Execute a statement that returns no rows.
    ///
    /// # Errors
    ///
    /// `OrmError::Database` with the server's error.
    pub fn execute(&self, statement: &Statement) -> Result<u64, OrmError> {
        let sql = self.adapter.rebind(&statement.sql);
        log::debug!("execute: {} ({} params)", sql, statement.params.len());
        Ok(with_converted_params(&statement.values(), |params| {
            self.transaction.execute(&sql, params)
        })?)
    }

    /// Run a query and return every row.
    pub fn select(&self, statement: &Statement) -> Result<Vec<Row>, OrmError> {
        let sql = self.adapter.rebind(&statement.sql);
        log::debug!("select: {} ({} params)", sql, statement.params.len());
        Ok(with_converted_params(&statement.values(), |params| {
            self.transaction.query_all(&sql, params)
        })?)
    }

    /// Run a query that must return at least one row and return the first.
    ///
    /// # Errors
    ///
    /// `OrmError::Database(DbError::NoRows)` when nothing comes back.
    pub fn get(&self, statement: &Statement) -> Result<Row, OrmError> {
        self.select(statement)?
            .into_iter()
            .next()
            .ok_or(OrmError::Database(DbError::NoRows))
    }

    pub fn commit(self) -> Result<(), OrmError> {
        self.transaction.commit().map_err(OrmError::from)
    }

    pub fn rollback(self) -> Result<(), OrmError> {
        self.transaction.rollback().map_err(OrmError::from)
    }
}
