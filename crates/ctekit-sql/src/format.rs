//! Formatting and parameterization
//!
//! Serializes a statement with a chosen parameter style. Placeholders are
//! rewritten on the AST; keyword case and identifier quoting are applied on
//! the token stream of the serialized text.

use crate::engine::FormattedSql;
use ctekit_core::{FormatOptions, IdentifierQuoting, KeywordCase, ParameterStyle};
use serde_json::Value as ParamValue;
use sqlparser::ast::{
    visit_expressions_mut, Expr, Ident, ObjectName, Query, SelectItem, SetExpr, Statement, TableAlias, TableFactor,
    Value, Visit, Visitor,
};
use sqlparser::dialect::Dialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::{BTreeMap, HashSet};
use std::ops::ControlFlow;

/// Statement formatter
pub struct SqlFormatter<'a> {
    dialect: &'a dyn Dialect,
    quote: char,
}

impl<'a> SqlFormatter<'a> {
    /// Create a formatter; `quote` is used when identifiers must be quoted
    pub fn new(dialect: &'a dyn Dialect, quote: char) -> Self {
        Self { dialect, quote }
    }

    /// Format a statement, returning SQL and the flat parameter list
    pub fn format(
        &self,
        statement: &Statement,
        bindings: &BTreeMap<String, ParamValue>,
        options: &FormatOptions,
    ) -> Result<FormattedSql, String> {
        let mut statement = statement.clone();
        let (params, labels) = rewrite_placeholders(&mut statement, bindings, options.parameter_style);

        let sql = statement.to_string();
        let identifiers = IdentifierSpellings::collect(&statement);
        let sql = self.apply_token_options(&sql, &identifiers, options)?;

        Ok(FormattedSql { sql, params, labels })
    }

    /// Words spelled like an identifier of the statement are identifiers,
    /// even when sqlparser also knows them as keywords (`name`, `status`)
    fn apply_token_options(
        &self,
        sql: &str,
        identifiers: &HashSet<String>,
        options: &FormatOptions,
    ) -> Result<String, String> {
        let needs_pass = options.keyword_case != KeywordCase::Preserve
            || options.identifier_quoting == IdentifierQuoting::Always;
        if !needs_pass {
            return Ok(sql.to_string());
        }

        let mut tokens = Tokenizer::new(self.dialect, sql)
            .with_unescape(false)
            .tokenize()
            .map_err(|e| e.to_string())?;

        for i in 0..tokens.len() {
            // `:name` placeholders keep their spelling
            if i > 0 && matches!(tokens[i - 1], Token::Colon | Token::AtSign) {
                continue;
            }
            let is_call = next_significant(&tokens, i + 1) == Some(&Token::LParen);

            if let Token::Word(word) = &mut tokens[i] {
                if word.quote_style.is_some() {
                    continue;
                }

                let is_identifier = identifiers.contains(&word.value);
                if word.keyword != Keyword::NoKeyword && !is_identifier {
                    match options.keyword_case {
                        KeywordCase::Upper => word.value = word.value.to_uppercase(),
                        KeywordCase::Lower => word.value = word.value.to_lowercase(),
                        KeywordCase::Preserve => {}
                    }
                } else if options.identifier_quoting == IdentifierQuoting::Always && !is_call {
                    word.quote_style = Some(self.quote);
                }
            }
        }

        Ok(tokens.iter().map(ToString::to_string).collect())
    }
}

/// Unquoted identifier spellings used anywhere in a statement
#[derive(Default)]
struct IdentifierSpellings {
    words: HashSet<String>,
}

impl IdentifierSpellings {
    fn collect(statement: &Statement) -> HashSet<String> {
        let mut spellings = Self::default();
        let _ = statement.visit(&mut spellings);
        spellings.words
    }

    fn add(&mut self, ident: &Ident) {
        if ident.quote_style.is_none() {
            self.words.insert(ident.value.clone());
        }
    }

    fn add_alias(&mut self, alias: &TableAlias) {
        self.add(&alias.name);
        for column in &alias.columns {
            self.add(&column.name);
        }
    }

    fn add_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in &select.projection {
                    match item {
                        SelectItem::ExprWithAlias { alias, .. } => self.add(alias),
                        SelectItem::QualifiedWildcard(name, _) => name.0.iter().for_each(|ident| self.add(ident)),
                        _ => {}
                    }
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.add_set_expr(left);
                self.add_set_expr(right);
            }
            _ => {}
        }
    }
}

impl Visitor for IdentifierSpellings {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.add_alias(&cte.alias);
            }
        }
        self.add_set_expr(&query.body);
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        relation.0.iter().for_each(|ident| self.add(ident));
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<()> {
        if let TableFactor::Table { alias: Some(alias), .. } | TableFactor::Derived { alias: Some(alias), .. } =
            table_factor
        {
            self.add_alias(alias);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        match expr {
            Expr::Identifier(ident) => self.add(ident),
            Expr::CompoundIdentifier(idents) => idents.iter().for_each(|ident| self.add(ident)),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn next_significant(tokens: &[Token], from: usize) -> Option<&Token> {
    tokens
        .iter()
        .skip(from)
        .find(|token| !matches!(token, Token::Whitespace(_)))
}

/// Placeholder key without its sigil (`:name` -> `name`, `$2` -> `2`, `?` -> ``)
fn placeholder_key(placeholder: &str) -> &str {
    placeholder.trim_start_matches(|c| matches!(c, ':' | '$' | '@' | '?'))
}

fn is_named(key: &str) -> bool {
    !key.is_empty() && !key.chars().all(|c| c.is_ascii_digit())
}

/// Rewrite every placeholder in traversal order and build the parameter list
/// with the placeholder each value binds to.
///
/// Named: `:key`, params hold one value per distinct key in first-occurrence
/// order. Indexed: `$1..$n`, one param per occurrence.
fn rewrite_placeholders(
    statement: &mut Statement,
    bindings: &BTreeMap<String, ParamValue>,
    style: ParameterStyle,
) -> (Vec<ParamValue>, Vec<String>) {
    let mut params = Vec::new();
    let mut labels: Vec<String> = Vec::new();

    let _ = visit_expressions_mut(statement, |expr| {
        if let Expr::Value(Value::Placeholder(placeholder)) = expr {
            let key = placeholder_key(placeholder).to_string();
            let value = bindings.get(&key).cloned().unwrap_or(ParamValue::Null);

            match style {
                ParameterStyle::Indexed => {
                    params.push(value);
                    *placeholder = format!("${}", params.len());
                    labels.push(placeholder.clone());
                }
                ParameterStyle::Named if is_named(&key) => {
                    *placeholder = format!(":{}", key);
                    if !labels.contains(placeholder) {
                        labels.push(placeholder.clone());
                        params.push(value);
                    }
                }
                ParameterStyle::Named => {
                    labels.push(placeholder.clone());
                    params.push(value);
                }
            }
        }
        ControlFlow::<()>::Continue(())
    });

    (params, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlParser;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn statement(sql: &str) -> Statement {
        SqlParser::new().parse(sql).unwrap().remove(0)
    }

    fn formatted(sql: &str, bindings: BTreeMap<String, ParamValue>, options: FormatOptions) -> FormattedSql {
        let parser = SqlParser::new();
        SqlFormatter::new(parser.dialect(), '"')
            .format(&statement(sql), &bindings, &options)
            .unwrap()
    }

    fn format(sql: &str, bindings: BTreeMap<String, ParamValue>, options: FormatOptions) -> (String, Vec<ParamValue>) {
        let formatted = formatted(sql, bindings, options);
        (formatted.sql, formatted.params)
    }

    #[test]
    fn named_style_dedupes_keys() {
        let bindings = BTreeMap::from([("id".to_string(), json!(5))]);
        let (sql, params) = format(
            "SELECT * FROM t WHERE a = :id OR b = :id OR c = :other",
            bindings,
            FormatOptions::display(),
        );

        assert_eq!(sql, "SELECT * FROM t WHERE a = :id OR b = :id OR c = :other");
        assert_eq!(params, vec![json!(5), ParamValue::Null]);
    }

    #[test]
    fn labels_name_the_placeholder_of_each_param() {
        let sql = "SELECT * FROM t WHERE a = :id OR b = :id OR c = :other";

        let named = formatted(sql, BTreeMap::new(), FormatOptions::display());
        assert_eq!(named.labels, vec![":id", ":other"]);

        let indexed = formatted(sql, BTreeMap::new(), FormatOptions::execution());
        assert_eq!(indexed.labels, vec!["$1", "$2", "$3"]);
    }

    #[test]
    fn indexed_style_numbers_each_occurrence() {
        let bindings = BTreeMap::from([("id".to_string(), json!(5))]);
        let (sql, params) = format(
            "SELECT * FROM t WHERE a = :id OR b = :id",
            bindings,
            FormatOptions::execution(),
        );

        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 OR b = $2");
        assert_eq!(params, vec![json!(5), json!(5)]);
    }

    #[test]
    fn lower_keywords_keep_placeholders_and_strings() {
        let options = FormatOptions {
            keyword_case: KeywordCase::Lower,
            ..FormatOptions::display()
        };
        let (sql, _) = format(
            "SELECT name FROM t WHERE note = 'O''Brien' AND id = :user_id",
            BTreeMap::new(),
            options,
        );

        assert_eq!(sql, "select name from t where note = 'O''Brien' and id = :user_id");
    }

    #[test]
    fn keyword_spelled_columns_stay_identifiers() {
        let (sql, _) = format(
            "SELECT user_id, name, status FROM users WHERE status = 'open'",
            BTreeMap::new(),
            FormatOptions::display(),
        );
        assert_eq!(sql, "SELECT user_id, name, status FROM users WHERE status = 'open'");

        let options = FormatOptions {
            identifier_quoting: IdentifierQuoting::Always,
            ..FormatOptions::display()
        };
        let (sql, _) = format("SELECT users.name FROM users", BTreeMap::new(), options);
        assert_eq!(sql, "SELECT \"users\".\"name\" FROM \"users\"");
    }

    #[test]
    fn always_quote_identifiers() {
        let options = FormatOptions {
            identifier_quoting: IdentifierQuoting::Always,
            ..FormatOptions::display()
        };
        let (sql, _) = format(
            "SELECT app_users.user_id, normalize_email(app_users.email) FROM app_users",
            BTreeMap::new(),
            options,
        );

        assert_eq!(
            sql,
            "SELECT \"app_users\".\"user_id\", normalize_email(\"app_users\".\"email\") FROM \"app_users\""
        );
    }
}
