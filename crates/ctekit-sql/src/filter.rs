//! Filter injection
//!
//! Turns a [`FilterDocument`] into WHERE predicates on the outermost SELECT.
//! Values never reach the SQL text; each one becomes a named placeholder and
//! is stored in the query's bindings.

use crate::columns::ColumnCollector;
use crate::engine::{ColumnCollectOptions, EngineError, ParsedQuery};
use crate::parser::SqlParser;
use ctekit_core::{FilterDocument, FilterPredicate, PredicateOp, SelectableColumn};
use serde_json::Value;
use sqlparser::ast::{visit_expressions, BinaryOperator, Expr, GroupByExpr, Select, SelectItem, SetExpr, Statement};
use std::collections::BTreeMap;
use std::ops::ControlFlow;

/// Rewrites parsed queries with filter predicates
pub struct FilterBuilder<'a> {
    parser: &'a SqlParser,
}

impl<'a> FilterBuilder<'a> {
    pub fn new(parser: &'a SqlParser) -> Self {
        Self { parser }
    }

    /// Apply every predicate in `document` to `query`.
    ///
    /// Predicates go into the outermost SELECT's WHERE clause unless they
    /// filter its result: an output column of a grouped, distinct or
    /// windowed SELECT, or any column of a set operation. Those are applied
    /// through a `SELECT * FROM (..) AS filtered` wrapper.
    pub fn apply(&self, query: ParsedQuery, document: &FilterDocument) -> Result<ParsedQuery, EngineError> {
        let predicates = document.predicates()?;
        if predicates.is_empty() {
            return Ok(query);
        }

        let Statement::Query(inner) = query.statement() else {
            return Err(EngineError::NotAQuery);
        };

        let select = match inner.body.as_ref() {
            SetExpr::Select(select) => Some(select.as_ref()),
            _ => None,
        };
        let filters_result = select.map(is_aggregated).unwrap_or(true);
        let columns = ColumnCollector::collect(inner, ColumnCollectOptions::upstream());

        let mut bindings = query.bindings().clone();
        let mut inside: Option<Expr> = None;
        let mut outside: Option<Expr> = None;

        for predicate in &predicates {
            let wrapped = match select {
                Some(select) => filters_result && projects(select, &predicate.column),
                None => true,
            };

            let Some(target) = self.resolve_target(&columns, &predicate.column, wrapped) else {
                tracing::warn!(column = %predicate.column, "Skipping filter on unusable column name");
                continue;
            };

            let expr = self.predicate_expr(&target, predicate, &mut bindings)?;
            tracing::debug!(column = %predicate.column, predicate = %expr, wrapped, "Adding filter predicate");

            let slot = if wrapped { &mut outside } else { &mut inside };
            *slot = Some(match slot.take() {
                Some(left) => and(left, expr),
                None => expr,
            });
        }

        if inside.is_none() && outside.is_none() {
            return Ok(query);
        }

        let mut statement = query.statement().clone();
        if let Some(condition) = inside {
            if let Statement::Query(inner) = &mut statement {
                if let SetExpr::Select(select) = inner.body.as_mut() {
                    select.selection = Some(match select.selection.take() {
                        Some(existing) => and(Expr::Nested(Box::new(existing)), condition),
                        None => condition,
                    });
                }
            }
        }

        if let Some(condition) = outside {
            let sql = format!("SELECT * FROM ({}) AS filtered WHERE {}", statement, condition);
            let mut statements = self.parser.parse(&sql)?;
            if statements.len() != 1 {
                return Err(EngineError::StatementCount(statements.len()));
            }
            statement = statements.remove(0);
        }

        Ok(ParsedQuery::new(statement.to_string(), statement).with_bindings(bindings))
    }

    /// SQL text the predicate is written against.
    ///
    /// Known columns use their source expression (or the output name when
    /// wrapped). Unknown columns are used verbatim if they are a plain or
    /// dotted identifier and skipped otherwise.
    fn resolve_target(&self, columns: &[SelectableColumn], column: &str, wrap: bool) -> Option<String> {
        let known = columns.iter().find(|c| c.name.eq_ignore_ascii_case(column));

        match known {
            Some(known) if wrap => Some(known.name.clone()),
            Some(known) => Some(known.expression.clone()),
            None => match self.parser.parse_expr(column) {
                Ok(Expr::Identifier(_)) | Ok(Expr::CompoundIdentifier(_)) => {
                    tracing::debug!(column, "Filter column not found in query; using it verbatim");
                    Some(column.to_string())
                }
                _ => None,
            },
        }
    }

    fn predicate_expr(
        &self,
        target: &str,
        predicate: &FilterPredicate,
        bindings: &mut BTreeMap<String, Value>,
    ) -> Result<Expr, EngineError> {
        let placeholders: Vec<String> = predicate
            .values
            .iter()
            .map(|value| {
                let name = unique_param(bindings, &predicate.column, predicate.op);
                bindings.insert(name.clone(), value.clone());
                format!(":{}", name)
            })
            .collect();

        let text = match predicate.op {
            PredicateOp::In => format!("{} IN ({})", target, placeholders.join(", ")),
            op => format!("{} {} {}", target, op.sql(), placeholders.join(", ")),
        };

        Ok(self.parser.parse_expr(&text)?)
    }
}

/// Aggregate functions recognised without a catalog
const AGGREGATES: &[&str] = &[
    "count", "sum", "avg", "min", "max", "array_agg", "string_agg", "group_concat", "listagg",
    "bool_and", "bool_or", "every", "any_value", "stddev", "stddev_pop", "stddev_samp", "variance",
    "var_pop", "var_samp", "median", "percentile_cont", "percentile_disc", "json_agg", "jsonb_agg",
];

/// Whether WHERE would change what the SELECT computes rather than filter
/// its rows: GROUP BY, HAVING, DISTINCT, or aggregate and window calls
fn is_aggregated(select: &Select) -> bool {
    let grouped = match &select.group_by {
        GroupByExpr::All(_) => true,
        GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
    };

    grouped
        || select.having.is_some()
        || select.distinct.is_some()
        || select.projection.iter().any(|item| match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => has_aggregate(expr),
            _ => false,
        })
}

fn has_aggregate(expr: &Expr) -> bool {
    visit_expressions(expr, |e| match e {
        Expr::Function(function) if function.over.is_some() => ControlFlow::Break(()),
        Expr::Function(function) => {
            let name = function
                .name
                .0
                .last()
                .map(|ident| ident.value.to_lowercase())
                .unwrap_or_default();
            if AGGREGATES.contains(&name.as_str()) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
        _ => ControlFlow::Continue(()),
    })
    .is_break()
}

/// Whether `column` is an output name of the SELECT
fn projects(select: &Select, column: &str) -> bool {
    select.projection.iter().any(|item| match item {
        SelectItem::ExprWithAlias { alias, .. } => alias.value.eq_ignore_ascii_case(column),
        SelectItem::UnnamedExpr(Expr::Identifier(ident)) => ident.value.eq_ignore_ascii_case(column),
        SelectItem::UnnamedExpr(Expr::CompoundIdentifier(idents)) => idents
            .last()
            .map(|ident| ident.value.eq_ignore_ascii_case(column))
            .unwrap_or(false),
        SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => true,
        _ => false,
    })
}

fn and(left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op: BinaryOperator::And,
        right: Box::new(right),
    }
}

/// `{column}_{op}`, suffixed with a counter when already bound
fn unique_param(bindings: &BTreeMap<String, Value>, column: &str, op: PredicateOp) -> String {
    let mut base: String = column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if base.starts_with(|c: char| c.is_ascii_digit()) {
        base.insert_str(0, "p_");
    }

    let base = format!("{}_{}", base, op.suffix());
    if !bindings.contains_key(&base) {
        return base;
    }

    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|name| !bindings.contains_key(name))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn filtered(sql: &str, filter: &str) -> ParsedQuery {
        let parser = SqlParser::new();
        let statement = parser.parse(sql).unwrap().remove(0);
        let document = FilterDocument::parse(filter).unwrap();
        FilterBuilder::new(&parser)
            .apply(ParsedQuery::new(sql, statement), &document)
            .unwrap()
    }

    #[test]
    fn scalar_filter_becomes_equality() {
        let query = filtered("SELECT user_id, name FROM users", r#"{"user_id": 5}"#);

        assert_eq!(query.to_sql(), "SELECT user_id, name FROM users WHERE user_id = :user_id_eq");
        assert_eq!(query.bindings().get("user_id_eq"), Some(&json!(5)));
    }

    #[test]
    fn existing_where_is_kept() {
        let query = filtered(
            "SELECT id, name FROM users WHERE active = true",
            r#"{"name": {"ilike": "%ann%"}}"#,
        );

        assert_eq!(
            query.to_sql(),
            "SELECT id, name FROM users WHERE (active = true) AND name ILIKE :name_ilike"
        );
    }

    #[test]
    fn range_and_list_operators() {
        let query = filtered(
            "SELECT id, status, created_at FROM orders",
            r#"{"created_at": {"min": "2024-01-01", "max": null}, "status": ["open", "held"]}"#,
        );

        assert_eq!(
            query.to_sql(),
            "SELECT id, status, created_at FROM orders \
             WHERE created_at >= :created_at_gte AND status IN (:status_in, :status_in_2)"
        );
        assert_eq!(query.bindings().len(), 3);
        assert_eq!(query.bindings().get("status_in_2"), Some(&json!("held")));
    }

    #[test]
    fn qualified_source_expression_is_used() {
        let query = filtered("SELECT u.id AS user_id FROM users AS u", r#"{"user_id": 1}"#);
        assert_eq!(
            query.to_sql(),
            "SELECT u.id AS user_id FROM users AS u WHERE u.id = :user_id_eq"
        );
    }

    #[test]
    fn unset_filters_leave_query_untouched() {
        let sql = "SELECT id FROM users";
        let query = filtered(sql, r#"{"id": {"=": null}, "name": {"ilike": null}}"#);
        assert_eq!(query.to_sql(), sql);
        assert!(query.bindings().is_empty());
    }

    #[test]
    fn unsafe_column_names_are_skipped() {
        let sql = "SELECT id FROM users";
        let query = filtered(sql, r#"{"1 = 1 OR id": 3}"#);
        assert_eq!(query.to_sql(), sql);
    }

    #[test]
    fn set_operations_are_wrapped() {
        let query = filtered(
            "SELECT id FROM a UNION ALL SELECT id FROM b",
            r#"{"id": {">": 10}}"#,
        );
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM (SELECT id FROM a UNION ALL SELECT id FROM b) AS filtered WHERE id > :id_gt"
        );
    }

    #[test]
    fn aggregate_outputs_are_filtered_outside_the_select() {
        let query = filtered(
            "SELECT user_id, count(*) AS order_count FROM orders GROUP BY user_id",
            r#"{"order_count": {">": 5}, "order_state": "open"}"#,
        );
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM (SELECT user_id, count(*) AS order_count FROM orders \
             WHERE order_state = :order_state_eq GROUP BY user_id) AS filtered \
             WHERE order_count > :order_count_gt"
        );
    }

    #[test]
    fn window_and_distinct_outputs_are_wrapped() {
        let windowed = filtered(
            "SELECT order_id, row_number() OVER (ORDER BY placed_at) AS seq_no FROM orders",
            r#"{"seq_no": 1}"#,
        );
        assert!(windowed.to_sql().ends_with(") AS filtered WHERE seq_no = :seq_no_eq"));

        let distinct = filtered("SELECT DISTINCT region FROM stores", r#"{"region": "north"}"#);
        assert_eq!(
            distinct.to_sql(),
            "SELECT * FROM (SELECT DISTINCT region FROM stores) AS filtered WHERE region = :region_eq"
        );
    }

    #[test]
    fn param_names_avoid_existing_bindings() {
        let bindings = BTreeMap::from([("id_eq".to_string(), json!(1))]);
        assert_eq!(unique_param(&bindings, "id", PredicateOp::Eq), "id_eq_2");
        assert_eq!(unique_param(&bindings, "Order Date", PredicateOp::Gt), "order_date_gt");
        assert_eq!(unique_param(&bindings, "1st", PredicateOp::Eq), "p_1st_eq");
    }
}
