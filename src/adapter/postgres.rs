//! PostgreSQL dialect.

use super::DbAdapter;
use crate::condition::Operator;
use crate::executor::DbError;
use crate::schema::{FieldDescriptor, FieldType};
use crate::value::Value;

/// SQLSTATE `serialization_failure`.
pub const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE `deadlock_detected`.
pub const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdapter;

impl PostgresAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn wildcard(arg: Value) -> Value {
    match arg {
        Value::Text(s) => Value::Text(format!("%{s}%")),
        other => other,
    }
}

impl DbAdapter for PostgresAdapter {
    fn operator_sql(&self, op: Operator, arg: Value) -> (String, Value) {
        let sql = match op {
            Operator::Equals | Operator::ChildOf => "=",
            Operator::NotEquals => "!=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Lower => "<",
            Operator::LowerOrEqual => "<=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
            Operator::Contains => return ("LIKE".to_string(), wildcard(arg)),
            Operator::NotContains => return ("NOT LIKE".to_string(), wildcard(arg)),
            Operator::IContains => return ("ILIKE".to_string(), wildcard(arg)),
            Operator::NotIContains => return ("NOT ILIKE".to_string(), wildcard(arg)),
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
        };
        (sql.to_string(), arg)
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn column_type(&self, field: &FieldDescriptor) -> String {
        if field.json == "id" {
            return "bigserial".to_string();
        }
        match field.field_type {
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Integer | FieldType::Many2One | FieldType::One2One => "bigint".to_string(),
            FieldType::Float => "double precision".to_string(),
            FieldType::Char => match field.size {
                Some(size) => format!("varchar({size})"),
                None => "varchar".to_string(),
            },
            FieldType::Text => "text".to_string(),
            FieldType::Date => "date".to_string(),
            FieldType::DateTime => "timestamp without time zone".to_string(),
            // No column of their own.
            FieldType::One2Many | FieldType::Rev2One | FieldType::Many2Many => String::new(),
        }
    }

    fn max_identifier_length(&self) -> usize {
        63
    }

    fn recursive_descendants_query(&self, table: &str, parent_column: &str) -> String {
        let table = self.quote_identifier(table);
        let parent = self.quote_identifier(parent_column);
        format!(
            "WITH RECURSIVE \"descendants\"(\"id\") AS (\
             SELECT \"id\" FROM {table} WHERE \"id\" = ? \
             UNION \
             SELECT {table}.\"id\" FROM {table} \
             INNER JOIN \"descendants\" ON {table}.{parent} = \"descendants\".\"id\") \
             SELECT \"id\" FROM \"descendants\""
        )
    }

    fn is_serialization_conflict(&self, err: &DbError) -> bool {
        matches!(err.sqlstate(), Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED))
    }

    fn rebind(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0;
        for ch in sql.chars() {
            if ch == '?' {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            } else {
                out.push(ch);
            }
        }
        out
    }

    fn returning_id(&self) -> String {
        " RETURNING \"id\"".to_string()
    }

    fn create_sequence_sql(&self, name: &str, increment: i64, start: i64) -> String {
        format!(
            "CREATE SEQUENCE {} INCREMENT BY {} START WITH {}",
            self.quote_identifier(name),
            increment,
            start
        )
    }

    fn alter_sequence_sql(&self, name: &str, increment: i64, restart: Option<i64>) -> String {
        let mut sql = format!(
            "ALTER SEQUENCE {} INCREMENT BY {}",
            self.quote_identifier(name),
            increment
        );
        if let Some(restart) = restart {
            sql.push_str(&format!(" RESTART WITH {restart}"));
        }
        sql
    }

    fn drop_sequence_sql(&self, name: &str) -> String {
        format!("DROP SEQUENCE IF EXISTS {}", self.quote_identifier(name))
    }

    fn next_sequence_value_sql(&self, name: &str) -> String {
        format!(
            "SELECT nextval('{}') AS \"value\"",
            self.quote_identifier(name).replace('\'', "''")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_sql_wildcards_substring_operators() {
        let adapter = PostgresAdapter::new();
        assert_eq!(
            adapter.operator_sql(Operator::IContains, "jo".into()),
            ("ILIKE".to_string(), Value::Text("%jo%".into()))
        );
        assert_eq!(
            adapter.operator_sql(Operator::Like, "jo%".into()),
            ("LIKE".to_string(), Value::Text("jo%".into()))
        );
        assert_eq!(adapter.operator_sql(Operator::NotEquals, true.into()).0, "!=");
    }

    #[test]
    fn test_rebind_numbers_placeholders() {
        let adapter = PostgresAdapter::new();
        assert_eq!(
            adapter.rebind("\"a\" = ? AND \"b\" IN (?, ?)"),
            "\"a\" = $1 AND \"b\" IN ($2, $3)"
        );
    }

    #[test]
    fn test_conflict_classification() {
        let adapter = PostgresAdapter::new();
        let conflict = DbError::Postgres {
            sqlstate: Some("40001".into()),
            message: "could not serialize".into(),
        };
        let unique = DbError::Postgres {
            sqlstate: Some("23505".into()),
            message: "duplicate key".into(),
        };
        assert!(adapter.is_serialization_conflict(&conflict));
        assert!(!adapter.is_serialization_conflict(&unique));
        assert!(!adapter.is_serialization_conflict(&DbError::NoRows));
    }

    #[test]
    fn test_column_types() {
        let adapter = PostgresAdapter::new();
        assert_eq!(
            adapter.column_definition(&FieldDescriptor::new("Name", FieldType::Char).with_size(64).required()),
            "varchar(64) NOT NULL"
        );
        assert_eq!(
            adapter.column_definition(&FieldDescriptor::many2one("Manager", "Person")),
            "bigint"
        );
        assert_eq!(
            adapter.column_definition(&FieldDescriptor::id_field()),
            "bigserial NOT NULL"
        );
    }

    #[test]
    fn test_recursive_query_has_one_placeholder() {
        let sql = PostgresAdapter::new().recursive_descendants_query("category", "parent_id");
        assert_eq!(sql.matches('?').count(), 1);
        assert!(sql.starts_with("WITH RECURSIVE"));
        assert!(sql.contains("\"category\".\"parent_id\" = \"descendants\".\"id\""));
    }

    #[test]
    fn test_sequence_sql() {
        let adapter = PostgresAdapter::new();
        assert_eq!(
            adapter.create_sequence_sql("inv_seq", 1, 100),
            "CREATE SEQUENCE \"inv_seq\" INCREMENT BY 1 START WITH 100"
        );
        assert_eq!(
            adapter.alter_sequence_sql("inv_seq", 2, Some(5)),
            "ALTER SEQUENCE \"inv_seq\" INCREMENT BY 2 RESTART WITH 5"
        );
        assert_eq!(
            adapter.next_sequence_value_sql("inv_seq"),
            "SELECT nextval('\"inv_seq\"') AS \"value\""
        );
    }
}
