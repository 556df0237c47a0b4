//! Selectable column collection
//!
//! Finds the columns a WHERE clause on the outermost SELECT can refer to:
//! projected columns, plus (in upstream mode) every output column of CTEs and
//! derived tables in its FROM clause. Wildcards over CTEs are expanded
//! through CTE chains.

use crate::engine::{ColumnCollectOptions, DedupeMode};
use ctekit_core::SelectableColumn;
use sqlparser::ast::{Cte, Expr, Query, Select, SelectItem, SetExpr, TableFactor};
use std::collections::{HashMap, HashSet};

type CteScope<'q> = HashMap<String, &'q Cte>;

/// A relation in a FROM clause, as seen from the enclosing SELECT
struct Relation {
    /// Alias or the relation name
    qualifier: String,
    columns: Option<Vec<String>>,
}

/// Collects selectable columns from a query
pub struct ColumnCollector;

impl ColumnCollector {
    /// Collect columns for the outermost SELECT of `query`
    pub fn collect(query: &Query, options: ColumnCollectOptions) -> Vec<SelectableColumn> {
        let scope = Self::scope_with(&CteScope::new(), query);
        let Some(select) = first_select(&query.body) else {
            return Vec::new();
        };

        let mut visiting = HashSet::new();
        let relations = Self::relations(select, &scope, &mut visiting);

        let mut columns = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    if let Some(column) = Self::named_expr(expr) {
                        columns.push(column);
                    }
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    columns.push(Self::aliased_expr(expr, &alias.value));
                }
                SelectItem::Wildcard(_) if options.upstream => {
                    for relation in &relations {
                        columns.extend(Self::qualified(relation));
                    }
                }
                SelectItem::QualifiedWildcard(name, _) if options.upstream => {
                    let qualifier = name.0.last().map(|i| i.value.to_lowercase());
                    for relation in &relations {
                        if Some(relation.qualifier.to_lowercase()) == qualifier {
                            columns.extend(Self::qualified(relation));
                        }
                    }
                }
                _ => {}
            }
        }

        if options.upstream {
            for relation in &relations {
                columns.extend(Self::qualified(relation));
            }
        }

        Self::dedupe(columns, options.dedupe)
    }

    /// Output column names of a query, resolving wildcards through CTEs.
    /// `None` when the output depends on a table whose columns are unknown.
    fn output_columns<'q>(
        query: &'q Query,
        outer: &CteScope<'q>,
        visiting: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        let scope = Self::scope_with(outer, query);
        let select = first_select(&query.body)?;
        let relations = Self::relations(select, &scope, visiting);

        let mut names = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    names.push(Self::named_expr(expr)?.name);
                }
                SelectItem::ExprWithAlias { alias, .. } => names.push(alias.value.clone()),
                SelectItem::Wildcard(_) => {
                    for relation in &relations {
                        names.extend(relation.columns.clone()?);
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = name.0.last()?.value.to_lowercase();
                    let relation = relations
                        .iter()
                        .find(|r| r.qualifier.to_lowercase() == qualifier)?;
                    names.extend(relation.columns.clone()?);
                }
            }
        }

        Some(names)
    }

    fn cte_columns<'q>(
        cte: &'q Cte,
        scope: &CteScope<'q>,
        visiting: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        if !cte.alias.columns.is_empty() {
            return Some(cte.alias.columns.iter().map(|c| c.to_string()).collect());
        }

        let key = cte.alias.name.value.to_lowercase();
        // recursive CTE: stop at re-entry
        if !visiting.insert(key.clone()) {
            return None;
        }
        let columns = Self::output_columns(&cte.query, scope, visiting);
        visiting.remove(&key);
        columns
    }

    fn relations<'q>(
        select: &'q Select,
        scope: &CteScope<'q>,
        visiting: &mut HashSet<String>,
    ) -> Vec<Relation> {
        let factors = select
            .from
            .iter()
            .flat_map(|twj| std::iter::once(&twj.relation).chain(twj.joins.iter().map(|j| &j.relation)));

        let mut relations = Vec::new();
        for factor in factors {
            match factor {
                TableFactor::Table { name, alias, .. } => {
                    let Some(table) = name.0.last().map(|i| i.value.clone()) else {
                        continue;
                    };
                    let columns = scope
                        .get(&table.to_lowercase())
                        .copied()
                        .and_then(|cte| Self::cte_columns(cte, scope, visiting));
                    let qualifier = alias.as_ref().map(|a| a.name.value.clone()).unwrap_or(table);
                    relations.push(Relation {
                        qualifier,
                        columns,
                    });
                }
                TableFactor::Derived { subquery, alias: Some(alias), .. } => {
                    let columns = if alias.columns.is_empty() {
                        Self::output_columns(subquery, scope, visiting)
                    } else {
                        Some(alias.columns.iter().map(|c| c.to_string()).collect())
                    };
                    relations.push(Relation {
                        qualifier: alias.name.value.clone(),
                        columns,
                    });
                }
                _ => {}
            }
        }

        relations
    }

    fn scope_with<'q>(outer: &CteScope<'q>, query: &'q Query) -> CteScope<'q> {
        let mut scope = outer.clone();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                scope.insert(cte.alias.name.value.to_lowercase(), cte);
            }
        }
        scope
    }

    fn named_expr(expr: &Expr) -> Option<SelectableColumn> {
        let (name, qualifier) = match expr {
            Expr::Identifier(ident) => (ident.value.clone(), None),
            Expr::CompoundIdentifier(parts) if parts.len() > 1 => (
                parts.last()?.value.clone(),
                parts.get(parts.len() - 2).map(|i| i.value.clone()),
            ),
            _ => return None,
        };

        let mut column = SelectableColumn::new(name).with_expression(expr.to_string());
        if let Some(source) = qualifier {
            column = column.with_source(source);
        }
        Some(column)
    }

    fn aliased_expr(expr: &Expr, alias: &str) -> SelectableColumn {
        let column = SelectableColumn::new(alias).with_expression(expr.to_string());
        match Self::named_expr(expr).and_then(|c| c.source) {
            Some(source) => column.with_source(source),
            None => column,
        }
    }

    fn qualified(relation: &Relation) -> Vec<SelectableColumn> {
        relation
            .columns
            .iter()
            .flatten()
            .map(|name| {
                SelectableColumn::new(name.clone())
                    .with_expression(format!("{}.{}", relation.qualifier, name))
                    .with_source(relation.qualifier.clone())
            })
            .collect()
    }

    fn dedupe(columns: Vec<SelectableColumn>, mode: DedupeMode) -> Vec<SelectableColumn> {
        let mut seen = HashSet::new();
        columns
            .into_iter()
            .filter(|column| {
                let key = match mode {
                    DedupeMode::NameOnly => (column.name.to_lowercase(), None),
                    DedupeMode::NameAndSource => (
                        column.name.to_lowercase(),
                        column.source.as_ref().map(|s| s.to_lowercase()),
                    ),
                };
                seen.insert(key)
            })
            .collect()
    }
}

/// The leftmost SELECT of a set expression
pub(crate) fn first_select(body: &SetExpr) -> Option<&Select> {
    match body {
        SetExpr::Select(select) => Some(select),
        SetExpr::Query(query) => first_select(&query.body),
        SetExpr::SetOperation { left, .. } => first_select(left),
        _ => None,
    }
}
