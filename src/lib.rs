//! # Berth
//!
//! Relation-aware query compiler and serializable unit-of-work environment
//! for PostgreSQL on the `may` coroutine runtime.
//!
//! - [`condition`]: filter trees over dotted field paths, with a prefix
//!   notation domain format for transport
//! - [`schema`]: the model/field registry and field path resolution
//! - [`query`]: join planning and SQL compilation
//! - [`environment`]: transactional units of work with conflict retry
//! - [`pool`]: one PostgreSQL session per open transaction

pub mod adapter;
pub mod condition;
pub mod config;
pub mod connection;
pub mod environment;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod query;
pub mod schema;
pub mod transaction;
pub mod value;
pub(crate) mod value_conversion;

#[cfg(test)]
mod test_helpers;

pub use adapter::{DbAdapter, PostgresAdapter};
pub use condition::{Condition, DomainTerm, FieldPath, Operator};
pub use environment::{Environment, EnvironmentManager};
pub use error::{ConditionError, OrmError, ResolutionError};
pub use pool::PgPool;
pub use query::{Query, QueryCompiler, Statement};
pub use schema::{FieldDescriptor, FieldType, ModelDescriptor, Registry};
pub use value::{Kind, Value};
