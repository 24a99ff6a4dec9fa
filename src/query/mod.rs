//! Queries and their compilation to SQL.
//!
//! A [`Query`] names a base model and carries two independent conditions:
//! the caller's own filter and a context filter that is ANDed in only when
//! a statement is compiled "with context". [`QueryCompiler`] turns a query
//! into [`Statement`]s.
//!
//! ```
//! use berth::condition::Condition;
//! use berth::query::Query;
//!
//! let query = Query::new("Person")
//!     .filter(Condition::new().field("Age").greater_or_equal(18))
//!     .order("name desc, id")
//!     .unwrap()
//!     .limit(10);
//! assert_eq!(query.order_fields().len(), 2);
//! ```

pub mod compiler;
pub mod join;
pub mod statement;
pub(crate) mod where_clause;

pub use compiler::QueryCompiler;
pub use join::{plan_joins, ColumnRef, JoinPlan, TableJoin};
pub use statement::Statement;

use crate::condition::{Condition, FieldPath};
use crate::error::ConditionError;
use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Field values keyed by field name or json name.
pub type FieldMap = BTreeMap<String, Value>;

static ORDER_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([a-z_][a-z0-9_.]*)(?:\s+(asc|desc))?\s*$")
        .expect("order pattern is valid")
});

/// One `ORDER BY` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderField {
    pub path: FieldPath,
    pub descending: bool,
}

impl OrderField {
    pub fn asc(path: impl Into<FieldPath>) -> Self {
        Self {
            path: path.into(),
            descending: false,
        }
    }

    pub fn desc(path: impl Into<FieldPath>) -> Self {
        Self {
            path: path.into(),
            descending: true,
        }
    }

    /// Parse `"name desc, manager_id.name, id asc"`.
    ///
    /// # Errors
    ///
    /// `ConditionError::InvalidOrder` naming the first malformed item.
    pub fn parse_list(clause: &str) -> Result<Vec<OrderField>, ConditionError> {
        if clause.trim().is_empty() {
            return Ok(Vec::new());
        }
        clause.split(',')
            .map(|item| {
                let caps = ORDER_ITEM
                    .captures(item)
                    .ok_or_else(|| ConditionError::InvalidOrder(item.trim().to_string()))?;
                let descending = caps
                    .get(2)
                    .is_some_and(|dir| dir.as_str().eq_ignore_ascii_case("desc"));
                Ok(OrderField {
                    path: FieldPath::parse(&caps[1]),
                    descending,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    model: String,
    condition: Condition,
    context_condition: Condition,
    limit: Option<u64>,
    offset: u64,
    group_fields: Vec<FieldPath>,
    order_fields: Vec<OrderField>,
    context_order: Vec<OrderField>,
}

impl Query {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            condition: Condition::new(),
            context_condition: Condition::new(),
            limit: None,
            offset: 0,
            group_fields: Vec::new(),
            order_fields: Vec::new(),
            context_order: Vec::new(),
        }
    }

    /// AND `cond` into the query's filter.
    pub fn filter(mut self, cond: Condition) -> Self {
        self.condition = std::mem::take(&mut self.condition).intersect(cond);
        self
    }

    /// AND `cond` into the context filter.
    pub fn context_filter(mut self, cond: Condition) -> Self {
        self.context_condition = std::mem::take(&mut self.context_condition).intersect(cond);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn group_by(mut self, path: impl Into<FieldPath>) -> Self {
        self.group_fields.push(path.into());
        self
    }

    pub fn order_by(mut self, field: OrderField) -> Self {
        self.order_fields.push(field);
        self
    }

    /// Append the items of an order string such as `"name desc, id"`.
    ///
    /// # Errors
    ///
    /// `ConditionError::InvalidOrder` for a malformed item.
    pub fn order(mut self, clause: &str) -> Result<Self, ConditionError> {
        self.order_fields.extend(OrderField::parse_list(clause)?);
        Ok(self)
    }

    /// Ordering applied inside the distinct subquery, after the id.
    pub fn context_order_by(mut self, field: OrderField) -> Self {
        self.context_order.push(field);
        self
    }

    /// A copy restricted to the given record ids.
    pub fn for_ids(&self, ids: &[i64]) -> Query {
        self.clone()
            .filter(Condition::new().field("id").is_in(Value::RelationIds(ids.to_vec())))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn context_condition(&self) -> &Condition {
        &self.context_condition
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> u64 {
        self.offset
    }

    pub fn group_fields(&self) -> &[FieldPath] {
        &self.group_fields
    }

    pub fn order_fields(&self) -> &[OrderField] {
        &self.order_fields
    }

    pub fn context_order(&self) -> &[OrderField] {
        &self.context_order
    }

    /// The filter, with the context filter ANDed in when asked for.
    pub fn effective_condition(&self, with_context: bool) -> Condition {
        if with_context {
            self.condition.clone().intersect(self.context_condition.clone())
        } else {
            self.condition.clone()
        }
    }

    pub(crate) fn with_condition(&self, condition: Condition) -> Query {
        let mut query = self.clone();
        query.condition = condition;
        query
    }

    pub(crate) fn with_context_condition(&self, condition: Condition) -> Query {
        let mut query = self.clone();
        query.context_condition = condition;
        query
    }
}
