//! SQL parsing using datafusion-sqlparser-rs
//!
//! Parses SQL into AST and provides error handling with diagnostics.

use ctekit_core::{Diagnostic, DiagnosticCode, DialectConfig, Location, Severity};
use regex::Regex;
use sqlparser::ast::{Expr, Statement};
use sqlparser::dialect::{
    BigQueryDialect, Dialect, DuckDbDialect, GenericDialect, PostgreSqlDialect, SQLiteDialect,
    SnowflakeDialect,
};
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use std::sync::OnceLock;

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect>,
}

impl SqlParser {
    /// Create a new SQL parser with the default (generic) dialect
    pub fn new() -> Self {
        Self {
            dialect: Box::new(GenericDialect {}),
        }
    }

    /// Create a parser from a dialect config
    pub fn from_dialect(dialect: DialectConfig) -> Self {
        let dialect: Box<dyn Dialect> = match dialect {
            DialectConfig::Ansi => Box::new(GenericDialect {}),
            DialectConfig::Postgres => Box::new(PostgreSqlDialect {}),
            DialectConfig::BigQuery => Box::new(BigQueryDialect {}),
            DialectConfig::Snowflake => Box::new(SnowflakeDialect {}),
            DialectConfig::DuckDb => Box::new(DuckDbDialect {}),
            DialectConfig::Sqlite => Box::new(SQLiteDialect {}),
        };

        Self { dialect }
    }

    /// The dialect used for parsing and tokenizing
    pub fn dialect(&self) -> &dyn Dialect {
        &*self.dialect
    }

    /// Parse SQL string into statements
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParseError> {
        Parser::parse_sql(&*self.dialect, sql).map_err(|error| ParseError {
            sql: sql.to_string(),
            error,
        })
    }

    /// Parse a standalone expression; trailing input is an error
    pub fn parse_expr(&self, sql: &str) -> Result<Expr, ParseError> {
        let to_error = |error| ParseError {
            sql: sql.to_string(),
            error,
        };

        let mut parser = Parser::new(&*self.dialect)
            .try_with_sql(sql)
            .map_err(to_error)?;
        let expr = parser.parse_expr().map_err(to_error)?;

        let next = parser.peek_token();
        if next.token != Token::EOF {
            return Err(to_error(ParserError::ParserError(format!(
                "Unexpected trailing input after expression: {}",
                next.token
            ))));
        }

        Ok(expr)
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// SQL parsing error with diagnostic information
#[derive(Debug)]
pub struct ParseError {
    /// SQL string that failed to parse
    pub sql: String,

    /// Parser error from sqlparser
    pub error: ParserError,
}

impl ParseError {
    /// Line and column reported by the parser, if any
    pub fn position(&self) -> Option<(usize, usize)> {
        static POSITION: OnceLock<Regex> = OnceLock::new();
        let re = POSITION.get_or_init(|| {
            Regex::new(r"(?i)line:?\s*(\d+),\s*column:?\s*(\d+)").expect("valid position regex")
        });

        let message = self.error.to_string();
        let caps = re.captures(&message)?;
        let line = caps.get(1)?.as_str().parse().ok()?;
        let column = caps.get(2)?.as_str().parse().ok()?;
        Some((line, column))
    }

    /// Convert to a diagnostic for the given fragment
    pub fn to_diagnostic(&self, fragment: &str) -> Diagnostic {
        let location = match self.position() {
            Some((line, column)) => Location::with_position(fragment, line, column),
            None => Location::new(fragment),
        };

        Diagnostic::new(
            DiagnosticCode::FragmentParseError,
            Severity::Error,
            format!("Failed to parse SQL: {}", self.error),
        )
        .with_location(location)
        .with_sql(self.sql.clone())
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SQL parse error: {}", self.error)
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_select() {
        let parser = SqlParser::new();
        let statements = parser.parse("SELECT id, name FROM users WHERE active = true").unwrap();
        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0], Statement::Query(_)));
    }

    #[test]
    fn parse_with_cte() {
        let parser = SqlParser::new();
        let sql = r#"
            WITH active_users AS (
                SELECT * FROM users WHERE active = true
            )
            SELECT id, name FROM active_users
        "#;

        assert!(parser.parse(sql).is_ok());
    }

    #[test]
    fn parse_invalid_sql() {
        let parser = SqlParser::new();
        let error = parser.parse("SELECT FROM WHERE").unwrap_err();

        let diag = error.to_diagnostic("main");
        assert_eq!(diag.code, DiagnosticCode::FragmentParseError);
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.location.unwrap().fragment, "main");
        assert_eq!(diag.sql.as_deref(), Some("SELECT FROM WHERE"));
    }

    #[test]
    fn parse_error_reports_position() {
        let parser = SqlParser::new();
        let error = parser.parse("SELECT a\nFROM t WHERE )").unwrap_err();

        let (line, _) = error.position().unwrap();
        assert_eq!(line, 2);
        assert_eq!(error.to_diagnostic("main").location.unwrap().line, Some(2));
    }

    #[test]
    fn parse_expression() {
        let parser = SqlParser::new();
        assert!(parser.parse_expr("u.id = :user_id").is_ok());
        assert!(parser.parse_expr("a = 1 b").is_err());
    }

    #[test]
    fn different_dialects() {
        let sql = "SELECT id FROM users";

        for dialect in [
            DialectConfig::Ansi,
            DialectConfig::Postgres,
            DialectConfig::BigQuery,
            DialectConfig::Snowflake,
            DialectConfig::DuckDb,
            DialectConfig::Sqlite,
        ] {
            assert!(SqlParser::from_dialect(dialect).parse(sql).is_ok());
        }
    }
}
