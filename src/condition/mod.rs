//! Conditions: the boolean filter tree compiled into WHERE clauses.
//!
//! A [`Condition`] is an ordered list of [`Predicate`]s. Consecutive
//! predicates are ANDed; a predicate flagged `is_or` starts a new run, and
//! runs are ORed together. Brackets are expressed by nesting a whole
//! condition as a single predicate.
//!
//! ```
//! use berth::condition::Condition;
//!
//! let cond = Condition::new()
//!     .field("Name").equals("John")
//!     .or().field("Name").equals("Jane");
//! assert_eq!(cond.len(), 2);
//! ```

pub mod domain;
pub mod field_name;
pub mod operator;

pub use domain::DomainTerm;
pub use field_name::{FieldName, FieldPath};
pub use operator::Operator;

use crate::environment::Environment;
use crate::error::{ConditionError, OrmError};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

type DeferredFn = dyn Fn(&Environment) -> Result<Value, OrmError> + Send + Sync;

/// An argument computed against the environment when the query runs.
#[derive(Clone)]
pub struct DeferredValue(Arc<DeferredFn>);

impl DeferredValue {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Environment) -> Result<Value, OrmError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn evaluate(&self, env: &Environment) -> Result<Value, OrmError> {
        (self.0)(env)
    }
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeferredValue(..)")
    }
}

/// What a predicate compares against.
#[derive(Debug, Clone)]
pub enum Argument {
    Value(Value),
    Deferred(DeferredValue),
    /// Bracketed sub-expression
    Condition(Condition),
}

/// One leaf comparison or one bracketed sub-condition.
#[derive(Debug, Clone)]
pub struct Predicate {
    path: FieldPath,
    operator: Operator,
    argument: Argument,
    is_or: bool,
    is_not: bool,
}

impl Predicate {
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn argument(&self) -> &Argument {
        &self.argument
    }

    pub fn is_or(&self) -> bool {
        self.is_or
    }

    pub fn is_not(&self) -> bool {
        self.is_not
    }

    /// Whether this predicate carries a nested condition.
    pub fn is_cond(&self) -> bool {
        matches!(self.argument, Argument::Condition(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.argument {
            Argument::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match &self.argument {
            Argument::Condition(c) => Some(c),
            _ => None,
        }
    }

    /// Same flags and path with a new operator and literal argument.
    pub(crate) fn rewritten(&self, operator: Operator, value: Value) -> Predicate {
        Predicate {
            path: self.path.clone(),
            operator,
            argument: Argument::Value(value),
            is_or: self.is_or,
            is_not: self.is_not,
        }
    }

    /// Same flags with a replacement nested condition.
    pub(crate) fn with_condition(&self, condition: Condition) -> Predicate {
        Predicate {
            path: FieldPath::default(),
            operator: self.operator,
            argument: Argument::Condition(condition),
            is_or: self.is_or,
            is_not: self.is_not,
        }
    }
}

/// An ordered predicate list with AND/OR run semantics.
///
/// Builder misuse (an operator applied to a value kind it does not accept)
/// is recorded on the condition and reported by [`Condition::validate`],
/// which the compiler calls before rendering anything.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    predicates: Vec<Predicate>,
    errors: Vec<ConditionError>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Start an ANDed predicate.
    pub fn and(self) -> ConditionStart {
        ConditionStart::new(self, false, false)
    }

    /// Start a predicate opening a new OR run.
    pub fn or(self) -> ConditionStart {
        ConditionStart::new(self, true, false)
    }

    pub fn and_not(self) -> ConditionStart {
        ConditionStart::new(self, false, true)
    }

    pub fn or_not(self) -> ConditionStart {
        ConditionStart::new(self, true, true)
    }

    /// Shorthand for `and().field(path)`.
    pub fn field(self, path: impl Into<FieldPath>) -> ConditionField {
        self.and().field(path)
    }

    pub fn and_cond(self, other: Condition) -> Condition {
        self.and().condition(other)
    }

    pub fn or_cond(self, other: Condition) -> Condition {
        self.or().condition(other)
    }

    pub fn and_not_cond(self, other: Condition) -> Condition {
        self.and_not().condition(other)
    }

    pub fn or_not_cond(self, other: Condition) -> Condition {
        self.or_not().condition(other)
    }

    /// AND two conditions, bracketing any side that has OR runs.
    pub fn intersect(self, other: Condition) -> Condition {
        let bracket = |c: Condition| {
            if c.has_or() {
                Condition::new().and_cond(c)
            } else {
                c
            }
        };
        let left = bracket(self);
        let mut right = bracket(other);
        right.set_first_or(false);
        left.concat(right)
    }

    /// First builder error recorded anywhere in the tree.
    ///
    /// # Errors
    ///
    /// Returns the recorded `ConditionError`.
    pub fn validate(&self) -> Result<(), ConditionError> {
        if let Some(err) = self.errors.first() {
            return Err(err.clone());
        }
        self.predicates
            .iter()
            .filter_map(Predicate::condition)
            .try_for_each(Condition::validate)
    }

    /// Predicates grouped into AND runs. The runs are ORed.
    pub fn runs(&self) -> Vec<&[Predicate]> {
        split_runs(&self.predicates)
    }

    /// Whether the condition has more than one OR run.
    pub(crate) fn has_or(&self) -> bool {
        self.predicates.iter().skip(1).any(|p| p.is_or)
    }

    /// Evaluate with `leaf` deciding each leaf predicate. Empty is true.
    pub fn evaluate_with(&self, leaf: &dyn Fn(&Predicate) -> bool) -> bool {
        if self.is_empty() {
            return true;
        }
        self.runs().into_iter().any(|run| {
            run.iter().all(|pred| {
                let inner = match &pred.argument {
                    Argument::Condition(sub) => sub.evaluate_with(leaf),
                    _ => leaf(pred),
                };
                inner != pred.is_not
            })
        })
    }

    /// Paths of every leaf predicate, nested ones included.
    pub fn leaf_paths(&self) -> Vec<&FieldPath> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        for pred in &self.predicates {
            match &pred.argument {
                Argument::Condition(sub) => sub.collect_paths(out),
                _ => out.push(&pred.path),
            }
        }
    }

    pub(crate) fn from_predicates(predicates: Vec<Predicate>) -> Condition {
        Condition {
            predicates,
            errors: Vec::new(),
        }
    }

    fn push(mut self, pred: Predicate) -> Condition {
        self.predicates.push(pred);
        self
    }

    fn record(mut self, err: ConditionError) -> Condition {
        self.errors.push(err);
        self
    }

    /// Append `other`'s predicates and errors. The first appended predicate
    /// keeps its own `is_or` flag.
    pub(crate) fn concat(mut self, other: Condition) -> Condition {
        self.predicates.extend(other.predicates);
        self.errors.extend(other.errors);
        self
    }

    pub(crate) fn set_first_or(&mut self, is_or: bool) {
        if let Some(first) = self.predicates.first_mut() {
            first.is_or = is_or;
        }
    }
}

pub(crate) fn split_runs(preds: &[Predicate]) -> Vec<&[Predicate]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for (idx, pred) in preds.iter().enumerate() {
        if idx > start && pred.is_or {
            runs.push(&preds[start..idx]);
            start = idx;
        }
    }
    if start < preds.len() {
        runs.push(&preds[start..]);
    }
    runs
}

/// A predicate being built: flags chosen, field not yet.
#[derive(Debug)]
pub struct ConditionStart {
    cond: Condition,
    is_or: bool,
    is_not: bool,
}

impl ConditionStart {
    fn new(cond: Condition, is_or: bool, is_not: bool) -> Self {
        Self { cond, is_or, is_not }
    }

    pub fn field(self, path: impl Into<FieldPath>) -> ConditionField {
        ConditionField {
            start: self,
            path: path.into(),
        }
    }

    /// Append `sub` as a bracketed predicate. Empty conditions add nothing.
    pub fn condition(self, sub: Condition) -> Condition {
        if sub.is_empty() {
            return self.cond.concat(Condition {
                predicates: Vec::new(),
                errors: sub.errors,
            });
        }
        let pred = Predicate {
            path: FieldPath::default(),
            operator: Operator::Equals,
            argument: Argument::Condition(sub),
            is_or: self.is_or,
            is_not: self.is_not,
        };
        self.cond.push(pred)
    }
}

/// A predicate being built: field chosen, operator not yet.
#[derive(Debug)]
pub struct ConditionField {
    start: ConditionStart,
    path: FieldPath,
}

impl ConditionField {
    /// Compare with `op` against a literal.
    ///
    /// An operator that does not accept the value's kind is recorded as an
    /// error on the returned condition instead of adding a predicate.
    pub fn apply(self, op: Operator, value: impl Into<Value>) -> Condition {
        let value = value.into();
        if !op.accepts(value.kind()) {
            return self.start.cond.record(ConditionError::OperatorNotApplicable {
                operator: op,
                kind: value.kind(),
            });
        }
        self.push(op, Argument::Value(value))
    }

    /// Compare with `op` against a value computed when the query runs.
    pub fn apply_deferred(self, op: Operator, value: DeferredValue) -> Condition {
        self.push(op, Argument::Deferred(value))
    }

    fn push(self, operator: Operator, argument: Argument) -> Condition {
        let ConditionStart { cond, is_or, is_not } = self.start;
        cond.push(Predicate {
            path: self.path,
            operator,
            argument,
            is_or,
            is_not,
        })
    }

    pub fn equals(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::Equals, value)
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::NotEquals, value)
    }

    pub fn greater(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::Greater, value)
    }

    pub fn greater_or_equal(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::GreaterOrEqual, value)
    }

    pub fn lower(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::Lower, value)
    }

    pub fn lower_or_equal(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::LowerOrEqual, value)
    }

    /// Raw `LIKE` pattern.
    pub fn like(self, pattern: impl Into<Value>) -> Condition {
        self.apply(Operator::Like, pattern)
    }

    /// Raw `ILIKE` pattern.
    pub fn ilike(self, pattern: impl Into<Value>) -> Condition {
        self.apply(Operator::ILike, pattern)
    }

    pub fn contains(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::Contains, value)
    }

    pub fn not_contains(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::NotContains, value)
    }

    pub fn icontains(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::IContains, value)
    }

    pub fn not_icontains(self, value: impl Into<Value>) -> Condition {
        self.apply(Operator::NotIContains, value)
    }

    pub fn is_in(self, values: impl Into<Value>) -> Condition {
        self.apply(Operator::In, values)
    }

    pub fn not_in(self, values: impl Into<Value>) -> Condition {
        self.apply(Operator::NotIn, values)
    }

    pub fn child_of(self, id: impl Into<Value>) -> Condition {
        self.apply(Operator::ChildOf, id)
    }

    pub fn is_null(self) -> Condition {
        self.apply(Operator::Equals, Value::Null)
    }

    pub fn is_not_null(self) -> Condition {
        self.apply(Operator::NotEquals, Value::Null)
    }
}
