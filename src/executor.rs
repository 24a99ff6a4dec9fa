//! Executor Module
//!
//! Provides the [`Executor`] trait that abstracts statement execution over `may_postgres`,
//! and the [`Database`] trait that opens transactions.
//!
//! Everything above this layer (cursors, environments) talks to the database
//! exclusively through these two traits, so tests can substitute an in-memory
//! implementation.

use crate::value::Value;
use may_postgres::types::{ToSql, Type};
use may_postgres::Error as PostgresError;
use std::fmt;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Executor error type
#[derive(Debug, Clone, PartialEq)]
pub enum DbError {
    /// Error reported by the server, with its SQLSTATE when available
    Postgres {
        sqlstate: Option<String>,
        message: String,
    },
    /// A single row was expected but none was returned
    NoRows,
    /// Query execution error
    Query(String),
    /// Row parsing/conversion error
    Parse(String),
    /// Other execution errors
    Other(String),
}

impl DbError {
    /// SQLSTATE code reported by the server, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            DbError::Postgres { sqlstate, .. } => sqlstate.as_deref(),
            _ => None,
        }
    }

    /// A driver error without SQLSTATE: the session itself failed (closed
    /// socket, protocol error) rather than the statement.
    pub fn is_lost_session(&self) -> bool {
        matches!(self, DbError::Postgres { sqlstate: None, .. })
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Postgres {
                sqlstate: Some(code),
                message,
            } => write!(f, "PostgreSQL error [{code}]: {message}"),
            DbError::Postgres {
                sqlstate: None,
                message,
            } => write!(f, "PostgreSQL error: {message}"),
            DbError::NoRows => write!(f, "Query error: no rows returned"),
            DbError::Query(s) => write!(f, "Query error: {s}"),
            DbError::Parse(s) => write!(f, "Parse error: {s}"),
            DbError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<PostgresError> for DbError {
    fn from(err: PostgresError) -> Self {
        DbError::Postgres {
            sqlstate: err.code().map(|state| state.code().to_string()),
            message: err.to_string(),
        }
    }
}

/// A result row with named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from parallel column/value vectors.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Value at a column index.
    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Iterate `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Convert a `may_postgres` row, decoding each column by its server type.
    pub(crate) fn from_postgres(row: &may_postgres::Row) -> Result<Self, DbError> {
        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (idx, column) in row.columns().iter().enumerate() {
            columns.push(column.name().to_string());
            values.push(decode_column(row, idx, column.type_())?);
        }
        Ok(Self { columns, values })
    }
}

fn decode_column(row: &may_postgres::Row, idx: usize, ty: &Type) -> Result<Value, DbError> {
    let parse_err = |e: PostgresError| DbError::Parse(format!("column {idx}: {e}"));
    let value = match ty.name() {
        "bool" => row.try_get::<_, Option<bool>>(idx).map_err(parse_err)?.into(),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(parse_err)?
            .map(|v| Value::Integer(i64::from(v)))
            .unwrap_or(Value::Null),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(parse_err)?
            .map(|v| Value::Integer(i64::from(v)))
            .unwrap_or(Value::Null),
        "int8" => row.try_get::<_, Option<i64>>(idx).map_err(parse_err)?.into(),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(parse_err)?
            .map(|v| Value::Float(f64::from(v)))
            .unwrap_or(Value::Null),
        "float8" => row.try_get::<_, Option<f64>>(idx).map_err(parse_err)?.into(),
        "text" | "varchar" | "bpchar" | "name" => {
            row.try_get::<_, Option<String>>(idx).map_err(parse_err)?.into()
        }
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map_err(parse_err)?
            .into(),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map_err(parse_err)?
            .into(),
        "_int8" => row
            .try_get::<_, Option<Vec<i64>>>(idx)
            .map_err(parse_err)?
            .map(Value::RelationIds)
            .unwrap_or(Value::Null),
        _ => {
            return Err(DbError::Parse(format!(
                "unsupported column type {} at index {idx}",
                ty.name()
            )))
        }
    };
    Ok(value)
}

/// Statement execution against one transaction.
///
/// Implemented by [`crate::transaction::Transaction`], the pooled
/// transactions of [`crate::pool::PgPool`] and the in-memory test double.
/// Statements use the dialect's native placeholders (`$1`, `$2`, ...).
///
/// ```no_run
/// use berth::config::DatabaseConfig;
/// use berth::executor::{Database, Executor};
/// use berth::pool::PgPool;
/// use berth::transaction::IsolationLevel;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transaction = PgPool::new(&DatabaseConfig::default())?.begin(IsolationLevel::ReadCommitted)?;
/// let deleted = transaction.execute("DELETE FROM users WHERE id = $1", &[&42i64])?;
/// let rows = transaction.query_all("SELECT id FROM users", &[])?;
/// transaction.rollback()?;
/// # Ok(())
/// # }
/// ```
pub trait Executor {
    /// Execute a SQL statement and return the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError>;

    /// Execute a query and return exactly one row.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NoRows` when the query returns nothing, or the
    /// underlying error if execution fails.
    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError> {
        self.query_all(query, params)?
            .into_iter()
            .next()
            .ok_or(DbError::NoRows)
    }

    /// Execute a query and return all rows.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query execution fails.
    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError>;
}

/// A transaction opened by a [`Database`].
///
/// Dropping an open transaction rolls it back.
pub trait TransactionHandle: Executor {
    /// Commit all work done in this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails (including serialization failures
    /// detected at commit time).
    fn commit(self: Box<Self>) -> Result<(), crate::transaction::TransactionError>;

    /// Discard all work done in this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback statement fails.
    fn rollback(self: Box<Self>) -> Result<(), crate::transaction::TransactionError>;
}

/// Source of transactions, shared by concurrent units of work.
///
/// Transactions opened concurrently must not share a server session;
/// [`crate::pool::PgPool`] gives each one its own.
pub trait Database: Send + Sync {
    /// Open a transaction at the given isolation level.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError` if the transaction cannot be started.
    fn begin(
        &self,
        isolation_level: crate::transaction::IsolationLevel,
    ) -> Result<Box<dyn TransactionHandle>, crate::transaction::TransactionError>;
}

/// Run a statement against a client with the shared span/metrics bookkeeping.
pub(crate) fn instrumented<T>(
    query: &str,
    run: impl FnOnce() -> Result<T, PostgresError>,
) -> Result<T, DbError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::execute_query_span(query).entered();

    log::debug!("sql: {query}");
    let start = Instant::now();
    let result = run().map_err(|e| {
        #[cfg(feature = "metrics")]
        METRICS.record_query_error();
        DbError::from(e)
    });

    let duration = start.elapsed();
    #[cfg(feature = "metrics")]
    METRICS.record_query(duration);
    #[cfg(not(feature = "metrics"))]
    let _ = duration;

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_display() {
        let err = DbError::Query("test error".to_string());
        assert!(err.to_string().contains("Query error"));

        let err = DbError::Postgres {
            sqlstate: Some("40001".into()),
            message: "could not serialize access".into(),
        };
        assert_eq!(
            err.to_string(),
            "PostgreSQL error [40001]: could not serialize access"
        );
    }

    #[test]
    fn test_db_error_sqlstate() {
        let err = DbError::Postgres {
            sqlstate: Some("23505".into()),
            message: "duplicate key".into(),
        };
        assert_eq!(err.sqlstate(), Some("23505"));
        assert_eq!(DbError::Other("x".into()).sqlstate(), None);
    }

    #[test]
    fn test_lost_session_has_no_sqlstate() {
        let lost = DbError::Postgres {
            sqlstate: None,
            message: "connection closed".into(),
        };
        assert!(lost.is_lost_session());
        let conflict = DbError::Postgres {
            sqlstate: Some("40001".into()),
            message: "could not serialize access".into(),
        };
        assert!(!conflict.is_lost_session());
        assert!(!DbError::NoRows.is_lost_session());
    }

    #[test]
    fn test_row_lookup_by_name_and_index() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Integer(1), Value::Text("John".into())],
        );
        assert_eq!(row.get("name"), Some(&Value::Text("John".into())));
        assert_eq!(row.get_index(0), Some(&Value::Integer(1)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_row_iter_pairs() {
        let row = Row::new(vec!["a".into()], vec![Value::Bool(true)]);
        let pairs: Vec<_> = row.iter().collect();
        assert_eq!(pairs, vec![("a", &Value::Bool(true))]);
    }
}
