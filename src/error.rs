//! Error taxonomy.
//!
//! Compile-time failures ([`ResolutionError`], [`ConditionError`]) are raised
//! before any SQL reaches the database. Execution failures travel as
//! [`OrmError::Database`] until the unit-of-work boundary classifies them as
//! [`OrmError::Conflict`] (retried) or [`OrmError::Constraint`] (surfaced).

use crate::adapter::DbAdapter;
use crate::condition::Operator;
use crate::executor::DbError;
use crate::transaction::TransactionError;
use crate::value::Kind;
use std::fmt;

/// A field path could not be resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    UnknownModel(String),
    UnknownField { model: String, segment: String },
    /// A non-terminal segment names a field that is not a relation
    NotARelation { model: String, segment: String },
    /// Related-field substitution did not terminate
    DelegationCycle { model: String, path: String, limit: usize },
    EmptyPath { model: String },
    /// The field has no column on the model's table
    NotAColumn { model: String, field: String },
    /// A relation field is missing the metadata needed to join it
    IncompleteRelation { model: String, field: String },
    NothingToWrite { model: String },
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::UnknownModel(model) => write!(f, "Unknown model '{}'", model),
            ResolutionError::UnknownField { model, segment } => {
                write!(f, "Unknown field '{}' in model '{}'", segment, model)
            }
            ResolutionError::NotARelation { model, segment } => write!(
                f,
                "Field '{}' in model '{}' is not a relation and cannot be traversed",
                segment, model
            ),
            ResolutionError::DelegationCycle { model, path, limit } => write!(
                f,
                "Related field substitution for '{}' in model '{}' exceeded {} steps",
                path, model, limit
            ),
            ResolutionError::EmptyPath { model } => {
                write!(f, "Empty field path on model '{}'", model)
            }
            ResolutionError::NotAColumn { model, field } => write!(
                f,
                "Field '{}' of model '{}' is not stored as a column",
                field, model
            ),
            ResolutionError::IncompleteRelation { model, field } => write!(
                f,
                "Relation field '{}' of model '{}' lacks join metadata",
                field, model
            ),
            ResolutionError::NothingToWrite { model } => {
                write!(f, "No column values to write on model '{}'", model)
            }
        }
    }
}

impl std::error::Error for ResolutionError {}

/// A condition is malformed or cannot be compiled as built.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionError {
    OperatorNotApplicable { operator: Operator, kind: Kind },
    /// The argument kind does not fit the field it is compared with
    KindMismatch { field: String, expected: Kind, found: Kind },
    UnknownOperator(String),
    MalformedDomain(String),
    /// Deferred argument or `child_of` left in a condition handed to the compiler
    Unprepared { field: String, operator: Operator },
    InvalidOrder(String),
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionError::OperatorNotApplicable { operator, kind } => write!(
                f,
                "Operator '{}' cannot be applied to {} values",
                operator, kind
            ),
            ConditionError::KindMismatch { field, expected, found } => write!(
                f,
                "Field '{}' expects {} values, got {}",
                field, expected, found
            ),
            ConditionError::UnknownOperator(op) => write!(f, "Unknown operator '{}'", op),
            ConditionError::MalformedDomain(msg) => write!(f, "Malformed domain: {}", msg),
            ConditionError::Unprepared { field, operator } => write!(
                f,
                "Predicate '{} {}' must be prepared in an environment before compilation",
                field, operator
            ),
            ConditionError::InvalidOrder(clause) => write!(f, "Invalid order clause '{}'", clause),
        }
    }
}

impl std::error::Error for ConditionError {}

/// Top-level error type.
#[derive(Debug, Clone)]
pub enum OrmError {
    Resolution(ResolutionError),
    Condition(ConditionError),
    /// Serialization conflicts persisted through every retry
    Conflict { attempts: u32, source: DbError },
    /// SQL error not classified as a conflict
    Constraint(DbError),
    Recursion { depth: u32, limit: u32 },
    /// Unclassified execution error inside a unit of work
    Database(DbError),
    Transaction(TransactionError),
    Config(String),
    /// Error raised by business code running inside a unit of work
    Other(String),
}

impl OrmError {
    /// Database error carried by this error, if any.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            OrmError::Database(e) | OrmError::Constraint(e) => Some(e),
            OrmError::Conflict { source, .. } => Some(source),
            OrmError::Transaction(TransactionError::Database(e)) => Some(e),
            _ => None,
        }
    }

    /// Whether this is an unclassified database error that the adapter
    /// reports as a serialization conflict. Failures to open a transaction
    /// (`OrmError::Transaction`) never are.
    pub fn is_conflict(&self, adapter: &dyn DbAdapter) -> bool {
        match self {
            OrmError::Database(e) => adapter.is_serialization_conflict(e),
            _ => false,
        }
    }
}

impl fmt::Display for OrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrmError::Resolution(e) => write!(f, "Resolution error: {}", e),
            OrmError::Condition(e) => write!(f, "Condition error: {}", e),
            OrmError::Conflict { attempts, source } => write!(
                f,
                "Serialization conflict persisted after {} attempts: {}",
                attempts, source
            ),
            OrmError::Constraint(e) => write!(f, "Constraint error: {}", e),
            OrmError::Recursion { depth, limit } => write!(
                f,
                "Max recursion depth exceeded ({} > {})",
                depth, limit
            ),
            OrmError::Database(e) => write!(f, "Database error: {}", e),
            OrmError::Transaction(e) => write!(f, "Transaction error: {}", e),
            OrmError::Config(msg) => write!(f, "Configuration error: {}", msg),
            OrmError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for OrmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrmError::Resolution(e) => Some(e),
            OrmError::Condition(e) => Some(e),
            OrmError::Conflict { source, .. } => Some(source),
            OrmError::Constraint(e) | OrmError::Database(e) => Some(e),
            OrmError::Transaction(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ResolutionError> for OrmError {
    fn from(err: ResolutionError) -> Self {
        OrmError::Resolution(err)
    }
}

impl From<ConditionError> for OrmError {
    fn from(err: ConditionError) -> Self {
        OrmError::Condition(err)
    }
}

impl From<DbError> for OrmError {
    fn from(err: DbError) -> Self {
        OrmError::Database(err)
    }
}

impl From<TransactionError> for OrmError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Database(e) => OrmError::Database(e),
            other => OrmError::Transaction(other),
        }
    }
}

impl From<config::ConfigError> for OrmError {
    fn from(err: config::ConfigError) -> Self {
        OrmError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_names_model_and_segment() {
        let err = ResolutionError::UnknownField {
            model: "Person".into(),
            segment: "Nmae".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Person"));
        assert!(msg.contains("Nmae"));
    }

    #[test]
    fn test_transaction_database_error_unwraps_to_database() {
        let db = DbError::Query("boom".into());
        let err: OrmError = TransactionError::Database(db.clone()).into();
        assert!(matches!(err, OrmError::Database(ref e) if *e == db));
    }

    #[test]
    fn test_recursion_error_display() {
        let err = OrmError::Recursion { depth: 101, limit: 100 };
        assert!(err.to_string().contains("Max recursion depth exceeded"));
    }

    #[test]
    fn test_db_error_accessor() {
        let db = DbError::Other("x".into());
        assert_eq!(OrmError::Constraint(db.clone()).db_error(), Some(&db));
        assert_eq!(OrmError::Other("y".into()).db_error(), None);
    }
}
