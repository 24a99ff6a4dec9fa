//! Rewrites applied to a condition before compilation.
//!
//! Deferred arguments are evaluated against the environment, and `child_of`
//! predicates become `in` over the descendant closure of their argument.

use super::Environment;
use crate::condition::{Argument, Condition, Operator, Predicate};
use crate::error::OrmError;
use crate::query::{Query, Statement};
use crate::schema::resolve;
use crate::value::Value;

impl Environment {
    /// Both conditions of `query`, prepared.
    pub(crate) fn prepare_query(&self, query: &Query) -> Result<Query, OrmError> {
        let condition = self.prepare_condition(query.model(), query.condition())?;
        let context = self.prepare_condition(query.model(), query.context_condition())?;
        Ok(query.with_condition(condition).with_context_condition(context))
    }

    pub(crate) fn prepare_condition(&self, model: &str, cond: &Condition) -> Result<Condition, OrmError> {
        cond.validate()?;
        let mut predicates = Vec::with_capacity(cond.len());
        for pred in cond.predicates() {
            predicates.push(self.prepare_predicate(model, pred)?);
        }
        Ok(Condition::from_predicates(predicates))
    }

    fn prepare_predicate(&self, model: &str, pred: &Predicate) -> Result<Predicate, OrmError> {
        let value = match pred.argument() {
            Argument::Condition(sub) => {
                return Ok(pred.with_condition(self.prepare_condition(model, sub)?));
            }
            Argument::Deferred(deferred) => deferred.evaluate(self)?,
            Argument::Value(value) => value.clone(),
        };
        if pred.operator() == Operator::ChildOf {
            return self.expand_child_of(model, pred, value);
        }
        Ok(pred.rewritten(pred.operator(), value))
    }

    /// `path child_of ids` becomes `path in descendants(ids)` when the
    /// target model has a parent field, and `path = ids` otherwise.
    fn expand_child_of(&self, model: &str, pred: &Predicate, value: Value) -> Result<Predicate, OrmError> {
        let path = resolve(&self.registry, model, pred.path(), self.config.max_path_substitutions)?;
        let terminal = path.terminal();
        let target_name = terminal
            .field
            .relation
            .clone()
            .unwrap_or_else(|| terminal.model.clone());
        let target = self.registry.model(&target_name)?;

        let Some(parent) = target.parent_field() else {
            log::debug!("{} has no parent field, child_of on {} compares ids", target_name, pred.path());
            return Ok(pred.rewritten(Operator::Equals, value));
        };

        let sql = self
            .adapter
            .recursive_descendants_query(target.table(), &parent.json);
        let mut ids: Vec<i64> = Vec::new();
        for root in value.into_elements() {
            let Some(root) = root.as_id() else {
                continue;
            };
            let rows = self
                .cursor
                .select(&Statement::new(sql.clone(), vec![Value::RelationId(root)]))?;
            for row in rows {
                if let Some(id) = row.get("id").and_then(Value::as_id) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(pred.rewritten(Operator::In, Value::RelationIds(ids)))
    }
}
