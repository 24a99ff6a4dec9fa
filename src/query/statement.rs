//! Compiled statements.

use crate::value::Value;
use std::fmt;

/// SQL text with `?` placeholders and the values bound to them, in order.
///
/// Placeholders are rewritten to the dialect's syntax by
/// [`DbAdapter::rebind`](crate::adapter::DbAdapter::rebind) right before
/// execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Parameters as SeaQuery values for binding.
    pub fn values(&self) -> sea_query::Values {
        sea_query::Values(self.params.iter().cloned().map(sea_query::Value::from).collect())
    }

    pub fn placeholder_count(&self) -> usize {
        self.sql.matches('?').count()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
            write!(f, " [{}]", params.join(", "))?;
        }
        Ok(())
    }
}
