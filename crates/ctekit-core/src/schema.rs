//! Column and table schema types

use serde::{Deserialize, Serialize};

/// A column that can appear in a filter predicate or filter template
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectableColumn {
    /// Output name (alias if present)
    pub name: String,

    /// SQL expression that produces the column, usable inside WHERE
    pub expression: String,

    /// Relation the column was taken from (CTE or table), if known
    pub source: Option<String>,
}

impl SelectableColumn {
    /// Create a column whose expression is its own name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            expression: name.clone(),
            name,
            source: None,
        }
    }

    /// Set the underlying expression
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    /// Set the source relation
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Columns referenced from one physical table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name as written in the query
    pub name: String,

    /// Referenced column names, in first-reference order
    pub columns: Vec<String>,
}

impl TableSchema {
    /// Create an empty schema for a table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column if it is not present yet
    pub fn add_column(&mut self, column: impl Into<String>) {
        let column = column.into();
        if !self.columns.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
            self.columns.push(column);
        }
    }

    /// Check whether a column is referenced
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_schema_dedupes_columns() {
        let mut schema = TableSchema::new("users");
        schema.add_column("id");
        schema.add_column("name");
        schema.add_column("ID");

        assert_eq!(schema.columns, vec!["id", "name"]);
        assert!(schema.has_column("Name"));
    }

    #[test]
    fn selectable_column_builder() {
        let column = SelectableColumn::new("user_id")
            .with_expression("u.id")
            .with_source("u");

        assert_eq!(column.name, "user_id");
        assert_eq!(column.expression, "u.id");
        assert_eq!(column.source.as_deref(), Some("u"));
    }
}
