//! Filter documents
//!
//! A filter document maps column names to conditions and is stored as JSON
//! text. It is only interpreted when a query is composed:
//!
//! ```json
//! {
//!   "user_id": 42,
//!   "status": ["active", "trial"],
//!   "name": { "ilike": "%ann%" },
//!   "created_at": { "min": "2024-01-01", "max": null }
//! }
//! ```
//!
//! A `null` operand means "not set" and produces no predicate, which is what
//! generated templates rely on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Condition attached to one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterCondition {
    /// Operator object, e.g. `{"min": 1, "max": 10}`
    Operators(BTreeMap<String, Value>),

    /// Membership shorthand, e.g. `["a", "b"]`
    List(Vec<Value>),

    /// Equality shorthand, e.g. `42`
    Scalar(Value),
}

impl FilterCondition {
    /// An operator object with no operators
    pub fn empty() -> Self {
        Self::Operators(BTreeMap::new())
    }

    /// An operator object whose operators are all unset
    pub fn unset(operators: &[&str]) -> Self {
        Self::Operators(
            operators
                .iter()
                .map(|op| (op.to_string(), Value::Null))
                .collect(),
        )
    }
}

/// Comparison emitted for one predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    ILike,
    In,
}

impl PredicateOp {
    /// Parse an operator key from a filter document
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "=" | "eq" => Some(Self::Eq),
            "!=" | "<>" | "ne" => Some(Self::NotEq),
            "<" | "lt" => Some(Self::Lt),
            "<=" | "lte" | "max" => Some(Self::LtEq),
            ">" | "gt" => Some(Self::Gt),
            ">=" | "gte" | "min" => Some(Self::GtEq),
            "like" => Some(Self::Like),
            "ilike" => Some(Self::ILike),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    /// SQL operator text
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::In => "IN",
        }
    }

    /// Short suffix used to build parameter names
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::NotEq => "ne",
            Self::Lt => "lt",
            Self::LtEq => "lte",
            Self::Gt => "gt",
            Self::GtEq => "gte",
            Self::Like => "like",
            Self::ILike => "ilike",
            Self::In => "in",
        }
    }
}

/// One predicate derived from a filter document
#[derive(Debug, Clone, PartialEq)]
pub struct FilterPredicate {
    pub column: String,
    pub op: PredicateOp,
    /// One value, or several for `In`
    pub values: Vec<Value>,
}

/// Errors raised while reading a filter document
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Filter document is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Unknown filter operator '{operator}' for column '{column}'")]
    UnknownOperator { column: String, operator: String },

    #[error("Operator '{operator}' for column '{column}' expects a scalar value")]
    ExpectedScalar { column: String, operator: String },
}

/// Column name -> condition mapping
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterDocument {
    conditions: BTreeMap<String, FilterCondition>,
}

impl FilterDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document from JSON text; blank text is an empty document
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }

        serde_json::from_str(text).map_err(|e| FilterError::InvalidJson(e.to_string()))
    }

    /// Add or replace the condition for a column
    pub fn insert(&mut self, column: impl Into<String>, condition: FilterCondition) {
        self.conditions.insert(column.into(), condition);
    }

    /// Get the condition for a column
    pub fn get(&self, column: &str) -> Option<&FilterCondition> {
        self.conditions.get(column)
    }

    /// Column names in the document
    pub fn columns(&self) -> Vec<&str> {
        self.conditions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Serialize to pretty JSON
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Turn the document into predicates, skipping unset operands
    pub fn predicates(&self) -> Result<Vec<FilterPredicate>, FilterError> {
        let mut predicates = Vec::new();

        for (column, condition) in &self.conditions {
            match condition {
                FilterCondition::Scalar(Value::Null) => {}
                FilterCondition::Scalar(value) => predicates.push(FilterPredicate {
                    column: column.clone(),
                    op: PredicateOp::Eq,
                    values: vec![value.clone()],
                }),
                FilterCondition::List(values) => {
                    if let Some(predicate) = Self::membership(column, values) {
                        predicates.push(predicate);
                    }
                }
                FilterCondition::Operators(operators) => {
                    for (key, operand) in operators {
                        let op = PredicateOp::from_key(key).ok_or_else(|| {
                            FilterError::UnknownOperator {
                                column: column.clone(),
                                operator: key.clone(),
                            }
                        })?;

                        match (op, operand) {
                            (_, Value::Null) => {}
                            (PredicateOp::In, Value::Array(values)) => {
                                if let Some(predicate) = Self::membership(column, values) {
                                    predicates.push(predicate);
                                }
                            }
                            (_, Value::Array(_)) | (_, Value::Object(_)) => {
                                return Err(FilterError::ExpectedScalar {
                                    column: column.clone(),
                                    operator: key.clone(),
                                });
                            }
                            (op, value) => predicates.push(FilterPredicate {
                                column: column.clone(),
                                op,
                                values: vec![value.clone()],
                            }),
                        }
                    }
                }
            }
        }

        Ok(predicates)
    }

    fn membership(column: &str, values: &[Value]) -> Option<FilterPredicate> {
        let values: Vec<Value> = values.iter().filter(|v| !v.is_null()).cloned().collect();
        if values.is_empty() {
            return None;
        }

        Some(FilterPredicate {
            column: column.to_string(),
            op: PredicateOp::In,
            values,
        })
    }
}
