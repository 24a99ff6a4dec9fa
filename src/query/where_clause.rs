//! WHERE clause compilation.
//!
//! Leaf rules, for a column `c`:
//!
//! | predicate | SQL |
//! |---|---|
//! | `= null`, relation `= 0` | `c IS NULL` |
//! | `!= null` | `c IS NOT NULL` |
//! | `= false` / `= ""` on a non-relation | `(c IS NULL OR c = <zero of c>)` |
//! | `!= false` / `!= ""` on a non-relation | `(c IS NOT NULL AND c != <zero of c>)` |
//! | `= false` / `= ""` on a date column | `c IS NULL` |
//! | negative operator | `(c IS NULL OR c op ?)` |
//! | `in []` / `not in []` | `1 = 0` / `1 = 1` |

use super::join::JoinPlan;
use crate::adapter::DbAdapter;
use crate::condition::{Argument, Condition, Operator, Predicate};
use crate::error::{ConditionError, OrmError};
use crate::schema::{resolve, FieldType, Registry, ResolvedPath};
use crate::value::{Kind, Value};

const ALWAYS_FALSE: &str = "1 = 0";
const ALWAYS_TRUE: &str = "1 = 1";

pub(crate) struct WhereCompiler<'a> {
    pub registry: &'a Registry,
    pub adapter: &'a dyn DbAdapter,
    pub model: &'a str,
    pub max_substitutions: usize,
}

impl WhereCompiler<'_> {
    pub fn resolve(&self, pred: &Predicate) -> Result<ResolvedPath, OrmError> {
        Ok(resolve(self.registry, self.model, pred.path(), self.max_substitutions)?)
    }

    /// Add the joins every leaf of `cond` needs.
    pub fn register(&self, cond: &Condition, plan: &mut JoinPlan) -> Result<(), OrmError> {
        for pred in cond.predicates() {
            match pred.argument() {
                Argument::Condition(sub) => self.register(sub, plan)?,
                _ => {
                    let path = self.resolve(pred)?;
                    plan.add_path(self.registry, &path)?;
                }
            }
        }
        Ok(())
    }

    /// Render `cond` against a plan that already holds its joins.
    /// Parameters are appended to `params` in placeholder order.
    pub fn compile(
        &self,
        cond: &Condition,
        plan: &mut JoinPlan,
        params: &mut Vec<Value>,
    ) -> Result<String, OrmError> {
        let runs = cond.runs();
        let several = runs.len() > 1;
        let mut rendered = Vec::with_capacity(runs.len());
        for run in runs {
            let mut parts = Vec::with_capacity(run.len());
            for pred in run {
                parts.push(self.compile_predicate(pred, plan, params)?);
            }
            let sql = parts.join(" AND ");
            if several && run.len() > 1 {
                rendered.push(format!("({sql})"));
            } else {
                rendered.push(sql);
            }
        }
        Ok(rendered.join(" OR "))
    }

    fn compile_predicate(
        &self,
        pred: &Predicate,
        plan: &mut JoinPlan,
        params: &mut Vec<Value>,
    ) -> Result<String, OrmError> {
        let sql = match pred.argument() {
            Argument::Condition(sub) => format!("({})", self.compile(sub, plan, params)?),
            Argument::Deferred(_) => {
                return Err(unprepared(pred).into());
            }
            Argument::Value(value) => self.compile_leaf(pred, value.clone(), plan, params)?,
        };
        if pred.is_not() {
            Ok(format!("NOT ({sql})"))
        } else {
            Ok(sql)
        }
    }

    fn compile_leaf(
        &self,
        pred: &Predicate,
        value: Value,
        plan: &mut JoinPlan,
        params: &mut Vec<Value>,
    ) -> Result<String, OrmError> {
        let path = self.resolve(pred)?;
        let column = plan.add_path(self.registry, &path)?;
        let col = plan.render_column(self.adapter, &column);
        let field = &path.terminal().field;
        let is_relation = field.field_type.is_relation();

        let field_kind = compared_kind(field.field_type);
        let mut op = pred.operator();
        if op == Operator::ChildOf {
            return Err(unprepared(pred).into());
        }

        // Domains spell "unset" as `false` or `""` whatever the column kind.
        if value.is_zero_scalar() {
            if is_relation {
                return Ok(null_test(&col, op));
            }
            if matches!(op, Operator::Equals | Operator::NotEquals) {
                return Ok(match Value::zero_of(field_kind) {
                    Some(zero) => {
                        params.push(zero);
                        if op == Operator::Equals {
                            format!("({col} IS NULL OR {col} = ?)")
                        } else {
                            format!("({col} IS NOT NULL AND {col} != ?)")
                        }
                    }
                    None => null_test(&col, op),
                });
            }
        }

        let value = value.coerce_to(field_kind);
        check_kind(&pred.path().json_path(), field_kind, &value)?;

        if value.kind().is_list() {
            op = match op {
                Operator::Equals => Operator::In,
                Operator::NotEquals => Operator::NotIn,
                other => other,
            };
        }

        if matches!(op, Operator::In | Operator::NotIn) {
            let elements = if value.is_null() {
                Vec::new()
            } else {
                value.into_elements()
            };
            if elements.is_empty() {
                return Ok(if op == Operator::In { ALWAYS_FALSE } else { ALWAYS_TRUE }.to_string());
            }
            let marks = vec!["?"; elements.len()].join(", ");
            params.extend(elements);
            return Ok(if op == Operator::In {
                format!("{col} IN ({marks})")
            } else {
                format!("({col} IS NULL OR {col} NOT IN ({marks}))")
            });
        }

        if value.is_null() || (is_relation && value.is_absent_relation()) {
            return Ok(null_test(&col, op));
        }

        let (op_sql, arg) = self.adapter.operator_sql(op, value);
        params.push(arg);
        if op.is_negative() {
            Ok(format!("({col} IS NULL OR {col} {op_sql} ?)"))
        } else {
            Ok(format!("{col} {op_sql} ?"))
        }
    }
}

/// Kind a predicate on this field compares against. To-many relations are
/// compared element-wise against target ids.
fn compared_kind(field_type: FieldType) -> Kind {
    match field_type.kind() {
        Kind::RelationList => Kind::Relation,
        other => other,
    }
}

fn compatible(expected: Kind, found: Kind) -> bool {
    match (expected, found) {
        (_, Kind::Null) => true,
        (a, b) if a == b => true,
        (Kind::Relation, Kind::RelationList | Kind::Integer) => true,
        (Kind::Integer, Kind::Relation | Kind::RelationList) => true,
        (Kind::Float, Kind::Integer) => true,
        (_, Kind::List) => true,
        _ => false,
    }
}

fn check_kind(field: &str, expected: Kind, value: &Value) -> Result<(), ConditionError> {
    let found = value.kind();
    if !compatible(expected, found) {
        return Err(ConditionError::KindMismatch {
            field: field.to_string(),
            expected,
            found,
        });
    }
    if let Value::List(items) = value {
        for item in items {
            let item_kind = item.kind();
            if !item_kind.is_list() && !compatible(expected, item_kind) {
                return Err(ConditionError::KindMismatch {
                    field: field.to_string(),
                    expected,
                    found: item_kind,
                });
            }
        }
    }
    Ok(())
}

fn null_test(col: &str, op: Operator) -> String {
    if op.is_negative() {
        format!("{col} IS NOT NULL")
    } else {
        format!("{col} IS NULL")
    }
}

fn unprepared(pred: &Predicate) -> ConditionError {
    ConditionError::Unprepared {
        field: pred.path().json_path(),
        operator: pred.operator(),
    }
}
