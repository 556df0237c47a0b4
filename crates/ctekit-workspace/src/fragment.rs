//! Fragments and their execution results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Index of a fragment in its workspace arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FragmentId(pub(crate) usize);

impl FragmentId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role of a fragment in composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    /// Top-level query; never inlined into another fragment
    Main,

    /// Named subquery rendered as a CTE definition
    Cte,
}

impl std::fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Cte => write!(f, "cte"),
        }
    }
}

/// Outcome of running a composed statement, recorded by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub sql: String,
    pub params: Vec<Value>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn new(sql: impl Into<String>, params: Vec<Value>, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            sql: sql.into(),
            params,
            columns,
            rows,
            executed_at: Utc::now(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// One editable SQL fragment
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub(crate) id: FragmentId,
    pub(crate) kind: FragmentKind,
    pub(crate) name: String,
    pub(crate) body: String,
    pub(crate) dependencies: Vec<FragmentId>,
    pub(crate) columns: Option<Vec<String>>,
    pub(crate) original_body: Option<String>,
    pub(crate) last_result: Option<ExecutionResult>,
}

impl Fragment {
    pub(crate) fn new(id: FragmentId, kind: FragmentKind, name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            body: body.into(),
            dependencies: Vec::new(),
            columns: None,
            original_body: None,
            last_result: None,
        }
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn is_main(&self) -> bool {
        self.kind == FragmentKind::Main
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current SQL body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Direct dependencies in declaration order
    pub fn dependencies(&self) -> &[FragmentId] {
        &self.dependencies
    }

    /// Declared output columns, if known
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Body as it was before any editing
    pub fn original_body(&self) -> Option<&str> {
        self.original_body.as_deref()
    }

    pub fn last_result(&self) -> Option<&ExecutionResult> {
        self.last_result.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execution_result_serializes_timestamp() {
        let result = ExecutionResult::new(
            "SELECT $1",
            vec![json!(1)],
            vec!["value".to_string()],
            vec![vec![json!(1)]],
        );
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(result.row_count(), 1);
        assert!(value["executed_at"].is_string());
    }
}
