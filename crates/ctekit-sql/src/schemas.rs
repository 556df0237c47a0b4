//! Physical table schema collection
//!
//! Walks a query and records every non-CTE table it reads, together with the
//! columns referenced from it. Unqualified column references are attributed
//! only when the SELECT reads exactly one relation.

use crate::engine::EngineError;
use ctekit_core::TableSchema;
use sqlparser::ast::{visit_expressions, Expr, Query, Select, SelectItem, SetExpr, TableFactor};
use std::collections::HashSet;
use std::ops::ControlFlow;

/// A physical table in a FROM clause
struct PhysicalTable {
    /// Lowercased alias, or the last name part when unaliased
    qualifier: String,
    name: String,
}

/// Collects table schemas referenced by a query
pub struct SchemaCollector;

impl SchemaCollector {
    /// Collect schemas in first-seen order
    pub fn collect(query: &Query) -> Result<Vec<TableSchema>, EngineError> {
        let mut tables = Vec::new();
        Self::walk_query(query, &HashSet::new(), &mut tables)?;
        Ok(tables)
    }

    fn walk_query(query: &Query, outer: &HashSet<String>, tables: &mut Vec<TableSchema>) -> Result<(), EngineError> {
        let mut ctes = outer.clone();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                ctes.insert(cte.alias.name.value.to_lowercase());
            }
            for cte in &with.cte_tables {
                Self::walk_query(&cte.query, &ctes, tables)?;
            }
        }

        Self::walk_set_expr(&query.body, &ctes, tables)
    }

    fn walk_set_expr(body: &SetExpr, ctes: &HashSet<String>, tables: &mut Vec<TableSchema>) -> Result<(), EngineError> {
        match body {
            SetExpr::Select(select) => Self::walk_select(select, ctes, tables),
            SetExpr::Query(query) => Self::walk_query(query, ctes, tables),
            SetExpr::SetOperation { left, right, .. } => {
                Self::walk_set_expr(left, ctes, tables)?;
                Self::walk_set_expr(right, ctes, tables)
            }
            _ => Ok(()),
        }
    }

    fn walk_select(select: &Select, ctes: &HashSet<String>, tables: &mut Vec<TableSchema>) -> Result<(), EngineError> {
        let factors = select
            .from
            .iter()
            .flat_map(|twj| std::iter::once(&twj.relation).chain(twj.joins.iter().map(|j| &j.relation)));

        let mut physical = Vec::new();
        let mut relation_count = 0;

        for factor in factors {
            match factor {
                TableFactor::Table { name, alias, .. } => {
                    relation_count += 1;
                    let Some(last) = name.0.last().map(|i| i.value.to_lowercase()) else {
                        continue;
                    };
                    if ctes.contains(&last) {
                        continue;
                    }

                    let table = name.to_string();
                    entry(tables, &table);
                    physical.push(PhysicalTable {
                        qualifier: alias.as_ref().map(|a| a.name.value.to_lowercase()).unwrap_or(last),
                        name: table,
                    });
                }
                TableFactor::Derived { subquery, .. } => {
                    relation_count += 1;
                    Self::walk_query(subquery, ctes, tables)?;
                }
                _ => relation_count += 1,
            }
        }

        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => {
                    if let Some(table) = physical.first() {
                        return Err(EngineError::WildcardUnresolved(table.name.clone()));
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = name.0.last().map(|i| i.value.to_lowercase());
                    if let Some(table) = physical.iter().find(|t| Some(&t.qualifier) == qualifier.as_ref()) {
                        return Err(EngineError::WildcardUnresolved(table.name.clone()));
                    }
                }
                _ => {}
            }
        }

        let single = if relation_count == 1 { physical.first() } else { None };

        let _ = visit_expressions(select, |expr| {
            match expr {
                Expr::Identifier(ident) => {
                    if let Some(table) = single {
                        entry(tables, &table.name).add_column(&ident.value);
                    }
                }
                Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                    let qualifier = parts[parts.len() - 2].value.to_lowercase();
                    if let Some(table) = physical.iter().find(|t| t.qualifier == qualifier) {
                        entry(tables, &table.name).add_column(&parts[parts.len() - 1].value);
                    }
                }
                _ => {}
            }
            ControlFlow::<()>::Continue(())
        });

        Ok(())
    }
}

fn entry<'t>(tables: &'t mut Vec<TableSchema>, name: &str) -> &'t mut TableSchema {
    let index = match tables.iter().position(|t| t.name == name) {
        Some(index) => index,
        None => {
            tables.push(TableSchema::new(name));
            tables.len() - 1
        }
    };
    &mut tables[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlParser;
    use pretty_assertions::assert_eq;
    use sqlparser::ast::Statement;

    fn collect(sql: &str) -> Result<Vec<TableSchema>, EngineError> {
        let statements = SqlParser::new().parse(sql).unwrap();
        let Statement::Query(query) = &statements[0] else {
            panic!("expected query");
        };
        SchemaCollector::collect(query)
    }

    fn column_names(table: &TableSchema) -> Vec<&str> {
        table.columns.iter().map(String::as_str).collect()
    }

    #[test]
    fn single_table_attributes_unqualified_columns() {
        let tables = collect("SELECT id, email FROM users WHERE active = true").unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "users");
        assert_eq!(column_names(&tables[0]), vec!["id", "email", "active"]);
    }

    #[test]
    fn joins_use_aliases() {
        let tables = collect(
            "SELECT u.id, o.total FROM users u JOIN orders o ON o.user_id = u.id",
        )
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["users", "orders"]);
        assert_eq!(column_names(&tables[0]), vec!["id"]);
        assert_eq!(column_names(&tables[1]), vec!["total", "user_id"]);
    }

    #[test]
    fn ctes_are_not_physical_tables() {
        let tables = collect(
            "WITH recent AS (SELECT id, created_at FROM orders) SELECT id FROM recent",
        )
        .unwrap();

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "orders");
        assert_eq!(column_names(&tables[0]), vec!["id", "created_at"]);
    }

    #[test]
    fn wildcard_on_physical_table_is_unresolved() {
        assert!(matches!(
            collect("SELECT * FROM users"),
            Err(EngineError::WildcardUnresolved(name)) if name == "users"
        ));
        assert!(collect("WITH t AS (SELECT 1 AS n) SELECT * FROM t").is_ok());
    }
}
