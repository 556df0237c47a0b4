//! Identifier reference scanning
//!
//! Token-level scan used to decide which CTEs a SQL body mentions. It does not
//! need the body to parse as a full statement, so it works on CTE bodies and
//! on half-edited fragments alike.

use sqlparser::ast::{visit_relations, Query, SetExpr};
use sqlparser::dialect::Dialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::BTreeSet;
use std::ops::ControlFlow;

/// Collects identifier words from SQL text
pub struct ReferenceScanner;

impl ReferenceScanner {
    /// Lowercased words in the SQL. Keywords are kept because a CTE may be
    /// named after a non-reserved keyword.
    pub fn scan(dialect: &dyn Dialect, sql: &str) -> Result<BTreeSet<String>, String> {
        let tokens = Tokenizer::new(dialect, sql)
            .tokenize()
            .map_err(|e| e.to_string())?;

        let names = tokens
            .into_iter()
            .filter_map(|token| match token {
                Token::Word(word) => Some(word.value.to_lowercase()),
                _ => None,
            })
            .collect();

        Ok(names)
    }

    /// Check whether `name` appears as an identifier in the SQL
    pub fn mentions(dialect: &dyn Dialect, sql: &str, name: &str) -> Result<bool, String> {
        Ok(Self::scan(dialect, sql)?.contains(&name.to_lowercase()))
    }

    /// Whether a branch after the first of the query's set operation reads
    /// from the unqualified relation `name`. A plain SELECT over a table of
    /// the same name is a shadowing reference, not recursion.
    pub fn is_self_recursive(query: &Query, name: &str) -> bool {
        later_branches_read(&query.body, name)
    }
}

fn later_branches_read(set: &SetExpr, name: &str) -> bool {
    match set {
        SetExpr::SetOperation { left, right, .. } => later_branches_read(left, name) || reads_relation(right, name),
        SetExpr::Query(query) => later_branches_read(&query.body, name),
        _ => false,
    }
}

fn reads_relation(set: &SetExpr, name: &str) -> bool {
    visit_relations(set, |relation| match relation.0.as_slice() {
        [ident] if ident.value.eq_ignore_ascii_case(name) => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    })
    .is_break()
}
