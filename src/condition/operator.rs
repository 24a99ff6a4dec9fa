//! Comparison operators.

use crate::error::ConditionError;
use crate::value::Kind;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEqual,
    Lower,
    LowerOrEqual,
    /// Raw `LIKE` pattern supplied by the caller
    Like,
    /// Raw `ILIKE` pattern supplied by the caller
    ILike,
    /// Substring match, case sensitive
    Contains,
    NotContains,
    /// Substring match, case insensitive
    IContains,
    NotIContains,
    In,
    NotIn,
    /// Record or any of its descendants through the parent relation
    ChildOf,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::Greater,
        Operator::GreaterOrEqual,
        Operator::Lower,
        Operator::LowerOrEqual,
        Operator::Like,
        Operator::ILike,
        Operator::Contains,
        Operator::NotContains,
        Operator::IContains,
        Operator::NotIContains,
        Operator::In,
        Operator::NotIn,
        Operator::ChildOf,
    ];

    /// Token used in serialized domains.
    pub fn token(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Lower => "<",
            Operator::LowerOrEqual => "<=",
            Operator::Like => "=like",
            Operator::ILike => "=ilike",
            Operator::Contains => "like",
            Operator::NotContains => "not like",
            Operator::IContains => "ilike",
            Operator::NotIContains => "not ilike",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::ChildOf => "child_of",
        }
    }

    /// Parse a domain token.
    ///
    /// # Errors
    ///
    /// Returns `ConditionError::UnknownOperator` for unrecognised tokens.
    pub fn from_token(token: &str) -> Result<Self, ConditionError> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.token() == token)
            .ok_or_else(|| ConditionError::UnknownOperator(token.to_string()))
    }

    /// Negative operators also match rows where the column is NULL.
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            Operator::NotEquals | Operator::NotContains | Operator::NotIContains | Operator::NotIn
        )
    }

    /// Whether the operator can compare against values of `kind`.
    /// Null is accepted by every operator.
    pub fn accepts(self, kind: Kind) -> bool {
        if kind == Kind::Null {
            return true;
        }
        match self {
            Operator::Equals | Operator::NotEquals | Operator::In | Operator::NotIn => true,
            Operator::Greater
            | Operator::GreaterOrEqual
            | Operator::Lower
            | Operator::LowerOrEqual => kind.is_ordered(),
            Operator::Like
            | Operator::ILike
            | Operator::Contains
            | Operator::NotContains
            | Operator::IContains
            | Operator::NotIContains => kind == Kind::Text,
            Operator::ChildOf => matches!(
                kind,
                Kind::Integer | Kind::Relation | Kind::RelationList | Kind::List
            ),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
