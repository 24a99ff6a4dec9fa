//! SQL dialect adapters.
//!
//! Everything dialect-specific the compiler and the environment need goes
//! through [`DbAdapter`]: operator rendering, identifier quoting, column
//! types, identifier limits, the recursive descendant query used by
//! `child_of`, placeholder rebinding and conflict classification.

pub mod postgres;

pub use postgres::PostgresAdapter;

use crate::condition::Operator;
use crate::executor::DbError;
use crate::schema::FieldDescriptor;
use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;

pub trait DbAdapter: Send + Sync {
    /// SQL operator for `op` and the argument to bind with it.
    ///
    /// Substring operators wrap the argument in wildcards here. Null and
    /// list arguments never reach this method.
    fn operator_sql(&self, op: Operator, arg: Value) -> (String, Value);

    fn quote_identifier(&self, name: &str) -> String;

    /// Column type of a stored field.
    fn column_type(&self, field: &FieldDescriptor) -> String;

    /// Column type plus nullability, as used in `CREATE TABLE`.
    fn column_definition(&self, field: &FieldDescriptor) -> String {
        let ty = self.column_type(field);
        if field.required || field.json == "id" {
            format!("{ty} NOT NULL")
        } else {
            ty
        }
    }

    /// Longest identifier the dialect accepts.
    fn max_identifier_length(&self) -> usize;

    /// Query returning `id` for the record bound to its single placeholder
    /// and every record below it through `parent_column`.
    fn recursive_descendants_query(&self, table: &str, parent_column: &str) -> String;

    /// Whether a failed unit of work should be retried.
    fn is_serialization_conflict(&self, err: &DbError) -> bool;

    /// Rewrite `?` placeholders to the dialect's syntax.
    fn rebind(&self, sql: &str) -> String;

    /// Clause appended to an `INSERT` to return the new id.
    fn returning_id(&self) -> String;

    fn create_sequence_sql(&self, name: &str, increment: i64, start: i64) -> String;

    fn alter_sequence_sql(&self, name: &str, increment: i64, restart: Option<i64>) -> String;

    fn drop_sequence_sql(&self, name: &str) -> String;

    fn next_sequence_value_sql(&self, name: &str) -> String;
}

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Whether `name` can be embedded in SQL text as an identifier without
/// escaping (sequence names are not bindable parameters).
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("invoice_seq"));
        assert!(is_valid_identifier("_x1"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("a; DROP TABLE x"));
        assert!(!is_valid_identifier(""));
    }
}
