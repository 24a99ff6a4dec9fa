//! Prefix-notation domains.
//!
//! A domain is a flat list of terms: `"|"`, `"&"`, `"!"` operators and
//! `[key, operator, argument]` leaves, read by a standard binary prefix
//! parser. Several top-level expressions are implicitly ANDed.
//!
//! `a AND b OR c` serializes as `["|", "&", a, b, c]`.

use super::{split_runs, Argument, Condition, FieldPath, Operator, Predicate};
use crate::error::{ConditionError, OrmError};
use crate::schema::{domain_key, Registry};
use crate::value::Value;
use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

/// One token of a prefix-notation domain.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainTerm {
    Or,
    And,
    Not,
    Leaf {
        key: String,
        operator: Operator,
        argument: Value,
    },
}

impl DomainTerm {
    pub fn leaf(key: impl Into<String>, operator: Operator, argument: impl Into<Value>) -> Self {
        DomainTerm::Leaf {
            key: key.into(),
            operator,
            argument: argument.into(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            DomainTerm::Or => JsonValue::from("|"),
            DomainTerm::And => JsonValue::from("&"),
            DomainTerm::Not => JsonValue::from("!"),
            DomainTerm::Leaf {
                key,
                operator,
                argument,
            } => JsonValue::Array(vec![
                JsonValue::from(key.as_str()),
                JsonValue::from(operator.token()),
                argument.to_json(),
            ]),
        }
    }

    /// # Errors
    ///
    /// `MalformedDomain` for anything other than an operator string or a
    /// three-element leaf, `UnknownOperator` for an unknown leaf operator.
    pub fn from_json(json: &JsonValue) -> Result<Self, ConditionError> {
        match json {
            JsonValue::String(s) => match s.as_str() {
                "|" => Ok(DomainTerm::Or),
                "&" => Ok(DomainTerm::And),
                "!" => Ok(DomainTerm::Not),
                other => Err(ConditionError::MalformedDomain(format!(
                    "unexpected token '{other}'"
                ))),
            },
            JsonValue::Array(items) if items.len() == 3 => {
                let key = items[0].as_str().ok_or_else(|| {
                    ConditionError::MalformedDomain(format!("leaf key must be a string: {json}"))
                })?;
                let op = items[1].as_str().ok_or_else(|| {
                    ConditionError::MalformedDomain(format!("leaf operator must be a string: {json}"))
                })?;
                Ok(DomainTerm::Leaf {
                    key: key.to_string(),
                    operator: Operator::from_token(op)?,
                    argument: Value::from_json(&items[2]),
                })
            }
            other => Err(ConditionError::MalformedDomain(format!(
                "unexpected term {other}"
            ))),
        }
    }
}

impl Serialize for DomainTerm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DomainTerm::Leaf {
                key,
                operator,
                argument,
            } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(key)?;
                seq.serialize_element(operator.token())?;
                seq.serialize_element(&argument.to_json())?;
                seq.end()
            }
            op => op.to_json().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DomainTerm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        DomainTerm::from_json(&json).map_err(D::Error::custom)
    }
}

impl Condition {
    /// Flatten into prefix notation.
    ///
    /// # Errors
    ///
    /// Returns `ConditionError::Unprepared` when a predicate still carries a
    /// deferred argument; evaluate it in an environment first.
    pub fn serialize(&self) -> Result<Vec<DomainTerm>, ConditionError> {
        let mut out = Vec::new();
        serialize_predicates::<ConditionError>(&self.predicates, &mut out, &|path: &FieldPath| {
            Ok(path.json_path())
        })?;
        Ok(out)
    }

    /// Like [`serialize`](Self::serialize), with keys spelled by the registry
    /// as json names of `model` (`Manager` becomes `manager_id`).
    ///
    /// # Errors
    ///
    /// `OrmError::Resolution` for a path that does not exist on `model`, and
    /// the errors of [`serialize`](Self::serialize).
    pub fn serialize_for(&self, registry: &Registry, model: &str) -> Result<Vec<DomainTerm>, OrmError> {
        let mut out = Vec::new();
        serialize_predicates::<OrmError>(&self.predicates, &mut out, &|path: &FieldPath| {
            Ok(domain_key(registry, model, path)?)
        })?;
        Ok(out)
    }

    /// Rebuild a condition from prefix notation.
    ///
    /// # Errors
    ///
    /// `MalformedDomain` when an operator lacks operands, and the builder
    /// error of any leaf whose operator rejects its argument.
    pub fn deserialize(terms: &[DomainTerm]) -> Result<Condition, ConditionError> {
        let mut parser = Parser { terms, pos: 0 };
        let mut result = Condition::new();
        while parser.pos < terms.len() {
            let expr = parser.expr()?;
            result = result.intersect(expr.into_condition());
        }
        result.validate()?;
        Ok(result)
    }

    pub fn to_domain_json(&self) -> Result<JsonValue, ConditionError> {
        Ok(JsonValue::Array(
            self.serialize()?.iter().map(DomainTerm::to_json).collect(),
        ))
    }

    /// # Errors
    ///
    /// `MalformedDomain` when `json` is not an array of terms.
    pub fn from_domain_json(json: &JsonValue) -> Result<Condition, ConditionError> {
        let items = json
            .as_array()
            .ok_or_else(|| ConditionError::MalformedDomain(format!("expected a list: {json}")))?;
        let terms = items
            .iter()
            .map(DomainTerm::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        Condition::deserialize(&terms)
    }
}

fn serialize_predicates<E: From<ConditionError>>(
    preds: &[Predicate],
    out: &mut Vec<DomainTerm>,
    key: &dyn Fn(&FieldPath) -> Result<String, E>,
) -> Result<(), E> {
    let cond_runs = split_runs(preds);
    for (i, run) in cond_runs.iter().enumerate() {
        if i + 1 < cond_runs.len() {
            out.push(DomainTerm::Or);
        }
        for (j, pred) in run.iter().enumerate() {
            if j + 1 < run.len() {
                out.push(DomainTerm::And);
            }
            serialize_predicate(pred, out, key)?;
        }
    }
    Ok(())
}

fn serialize_predicate<E: From<ConditionError>>(
    pred: &Predicate,
    out: &mut Vec<DomainTerm>,
    key: &dyn Fn(&FieldPath) -> Result<String, E>,
) -> Result<(), E> {
    if pred.is_not {
        out.push(DomainTerm::Not);
    }
    match &pred.argument {
        Argument::Condition(sub) => serialize_predicates(&sub.predicates, out, key),
        Argument::Value(value) => {
            out.push(DomainTerm::Leaf {
                key: key(&pred.path)?,
                operator: pred.operator,
                argument: value.clone(),
            });
            Ok(())
        }
        Argument::Deferred(_) => Err(ConditionError::Unprepared {
            field: pred.path.json_path(),
            operator: pred.operator,
        }
        .into()),
    }
}

enum Expr {
    Leaf {
        key: String,
        operator: Operator,
        argument: Value,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

struct Parser<'a> {
    terms: &'a [DomainTerm],
    pos: usize,
}

impl Parser<'_> {
    fn expr(&mut self) -> Result<Expr, ConditionError> {
        let term = self.terms.get(self.pos).ok_or_else(|| {
            ConditionError::MalformedDomain("operator is missing an operand".to_string())
        })?;
        self.pos += 1;
        Ok(match term {
            DomainTerm::Or => Expr::Or(Box::new(self.expr()?), Box::new(self.expr()?)),
            DomainTerm::And => Expr::And(Box::new(self.expr()?), Box::new(self.expr()?)),
            DomainTerm::Not => Expr::Not(Box::new(self.expr()?)),
            DomainTerm::Leaf {
                key,
                operator,
                argument,
            } => Expr::Leaf {
                key: key.clone(),
                operator: *operator,
                argument: argument.clone(),
            },
        })
    }
}

impl Expr {
    fn into_condition(self) -> Condition {
        match self {
            Expr::Leaf {
                key,
                operator,
                argument,
            } => Condition::new()
                .field(FieldPath::parse(&key))
                .apply(operator, argument),
            Expr::Not(inner) => match *inner {
                Expr::Leaf {
                    key,
                    operator,
                    argument,
                } => Condition::new()
                    .and_not()
                    .field(FieldPath::parse(&key))
                    .apply(operator, argument),
                Expr::Not(double) => double.into_condition(),
                other => Condition::new().and_not_cond(other.into_condition()),
            },
            Expr::And(a, b) => a.into_condition().intersect(b.into_condition()),
            Expr::Or(a, b) => {
                let mut right = b.into_condition();
                right.set_first_or(true);
                let left = a.into_condition();
                if left.is_empty() {
                    right.set_first_or(false);
                }
                left.concat(right)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_of(cond: &Condition) -> JsonValue {
        cond.to_domain_json().unwrap()
    }

    #[test]
    fn test_single_predicate() {
        let cond = Condition::new().and().field("Age").greater_or_equal(12);
        assert_eq!(json_of(&cond), json!([["age", ">=", 12]]));
    }

    #[test]
    fn test_or_of_two_predicates() {
        let cond = Condition::new()
            .field("Name").equals("John")
            .or().field("Name").equals("Jane");
        assert_eq!(
            json_of(&cond),
            json!(["|", ["name", "=", "John"], ["name", "=", "Jane"]])
        );
    }

    #[test]
    fn test_and_run_gets_and_tokens() {
        let cond = Condition::new()
            .field("A").equals(1)
            .field("B").equals(2)
            .or().field("C").equals(3);
        assert_eq!(
            json_of(&cond),
            json!(["|", "&", ["a", "=", 1], ["b", "=", 2], ["c", "=", 3]])
        );
    }

    #[test]
    fn test_negation_and_nesting() {
        let cond = Condition::new()
            .field("A").equals(1)
            .and_not_cond(Condition::new().field("B").equals(2).or().field("C").equals(3));
        assert_eq!(
            json_of(&cond),
            json!(["&", ["a", "=", 1], "!", "|", ["b", "=", 2], ["c", "=", 3]])
        );
    }

    #[test]
    fn test_deferred_argument_is_not_serializable() {
        let cond = Condition::new()
            .field("Uid")
            .apply_deferred(Operator::Equals, crate::condition::DeferredValue::new(|env| Ok(env.uid().into())));
        assert!(matches!(cond.serialize(), Err(ConditionError::Unprepared { .. })));
    }

    #[test]
    fn test_serialize_for_uses_storage_names() {
        use crate::schema::{FieldDescriptor, FieldType, ModelDescriptor};
        let registry = Registry::builder()
            .model(
                ModelDescriptor::new("Person")
                    .field(FieldDescriptor::new("Name", FieldType::Char))
                    .field(FieldDescriptor::many2one("Manager", "Person")),
            )
            .build()
            .unwrap();
        let cond = Condition::new()
            .field("Manager").equals(Value::Null)
            .or().field("Manager.Name").equals("Ann");
        let terms = cond.serialize_for(&registry, "Person").unwrap();
        let json: Vec<JsonValue> = terms.iter().map(DomainTerm::to_json).collect();
        assert_eq!(
            JsonValue::Array(json),
            json!(["|", ["manager_id", "=", null], ["manager_id.name", "=", "Ann"]])
        );

        let err = Condition::new().field("Nickname").equals("x").serialize_for(&registry, "Person");
        assert!(matches!(err, Err(OrmError::Resolution(_))));
    }

    #[test]
    fn test_parse_implicit_and_at_top_level() {
        let cond = Condition::from_domain_json(&json!([["a", "=", 1], ["b", "=", 2]])).unwrap();
        assert_eq!(cond.len(), 2);
        assert!(!cond.predicates()[1].is_or());
    }

    #[test]
    fn test_parse_rejects_missing_operand() {
        let err = Condition::from_domain_json(&json!(["|", ["a", "=", 1]])).unwrap_err();
        assert!(matches!(err, ConditionError::MalformedDomain(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        let err = Condition::from_domain_json(&json!([["a", "~~", 1]])).unwrap_err();
        assert_eq!(err, ConditionError::UnknownOperator("~~".into()));
    }

    #[test]
    fn test_and_of_or_is_bracketed() {
        let cond = Condition::from_domain_json(&json!([
            "&", "|", ["a", "=", 1], ["b", "=", 2], ["c", "=", 3]
        ]))
        .unwrap();
        assert_eq!(cond.len(), 2);
        assert!(cond.predicates()[0].is_cond());
    }

    #[test]
    fn test_term_serde() {
        let terms: Vec<DomainTerm> =
            serde_json::from_value(json!(["!", ["name", "ilike", "jo"]])).unwrap();
        assert_eq!(terms[0], DomainTerm::Not);
        assert_eq!(terms[1], DomainTerm::leaf("name", Operator::IContains, "jo"));
        assert_eq!(
            serde_json::to_value(&terms).unwrap(),
            json!(["!", ["name", "ilike", "jo"]])
        );
    }

    /// Truth assignments over the distinct leaf keys of a condition,
    /// encoded in the argument: a leaf is true when its key's bit is set.
    fn eval(cond: &Condition, bits: u32, keys: &[&str]) -> bool {
        cond.evaluate_with(&|pred: &Predicate| {
            let key = pred.path().json_path();
            let idx = keys.iter().position(|k| *k == key).unwrap();
            bits & (1 << idx) != 0
        })
    }

    #[test]
    fn test_round_trip_preserves_evaluation() {
        let keys = ["a", "b", "c", "d"];
        let leaf = |k: &str| Condition::new().field(k).equals(1);
        let cases = vec![
            leaf("a"),
            leaf("a").or().field("b").equals(1),
            leaf("a").field("b").equals(1).or().field("c").equals(1),
            leaf("a").or().field("b").equals(1).field("c").equals(1),
            leaf("a").and_not().field("b").equals(1).or_not().field("c").equals(1),
            leaf("a").and_cond(leaf("b").or().field("c").equals(1)),
            leaf("a")
                .or_not_cond(leaf("b").field("c").equals(1))
                .field("d").equals(1),
            Condition::new()
                .and_not_cond(leaf("a").or_cond(leaf("b").and_not_cond(leaf("c"))))
                .or().field("d").equals(1),
        ];
        for cond in cases {
            let terms = cond.serialize().unwrap();
            let parsed = Condition::deserialize(&terms).unwrap();
            for bits in 0..16 {
                assert_eq!(
                    eval(&cond, bits, &keys),
                    eval(&parsed, bits, &keys),
                    "terms {terms:?} bits {bits:04b}"
                );
            }
            assert_eq!(parsed.serialize().unwrap().is_empty(), cond.is_empty());
        }
    }
}
