//! SQL engine capability
//!
//! Everything the workspace needs from a SQL library sits behind
//! [`SqlEngine`]. The workspace never touches sqlparser types directly, so a
//! different dialect library can be plugged in by implementing this trait.

use crate::columns::ColumnCollector;
use crate::filter::FilterBuilder;
use crate::format::SqlFormatter;
use crate::parser::{ParseError, SqlParser};
use crate::references::ReferenceScanner;
use crate::schemas::SchemaCollector;
use ctekit_core::{DialectConfig, FilterDocument, FilterError, FormatOptions, SelectableColumn, TableSchema};
use serde_json::Value;
use sqlparser::ast::{Query, Statement};
use std::collections::{BTreeMap, BTreeSet};

/// How collected columns are de-duplicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DedupeMode {
    /// Same-named columns collapse to the first one
    #[default]
    NameOnly,

    /// Same name from different relations is kept
    NameAndSource,
}

/// Options for selectable column collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnCollectOptions {
    /// Include columns exposed by CTEs and derived tables in FROM
    pub upstream: bool,

    pub dedupe: DedupeMode,
}

impl ColumnCollectOptions {
    /// Upstream collection with name-only de-duplication
    pub fn upstream() -> Self {
        Self {
            upstream: true,
            dedupe: DedupeMode::NameOnly,
        }
    }
}

/// A parsed statement plus the values bound to its named placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    sql: String,
    statement: Statement,
    bindings: BTreeMap<String, Value>,
}

impl ParsedQuery {
    pub(crate) fn new(sql: impl Into<String>, statement: Statement) -> Self {
        Self {
            sql: sql.into(),
            statement,
            bindings: BTreeMap::new(),
        }
    }

    pub(crate) fn with_bindings(mut self, bindings: BTreeMap<String, Value>) -> Self {
        self.bindings = bindings;
        self
    }

    /// SQL text the statement was parsed from
    pub fn source_sql(&self) -> &str {
        &self.sql
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// The statement as a query, if it is one
    pub fn query(&self) -> Option<&Query> {
        match &self.statement {
            Statement::Query(query) => Some(query.as_ref()),
            _ => None,
        }
    }

    /// Values bound to named placeholders (key without sigil)
    pub fn bindings(&self) -> &BTreeMap<String, Value> {
        &self.bindings
    }

    /// Serialize the statement without formatting options
    pub fn to_sql(&self) -> String {
        self.statement.to_string()
    }
}

/// Formatter output
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedSql {
    pub sql: String,
    pub params: Vec<Value>,

    /// Placeholder each param binds to, as written in `sql`
    pub labels: Vec<String>,
}

/// One CTE split out of a full statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteDefinition {
    pub name: String,
    /// Declared column list (`name(a, b) AS ...`), empty when absent
    pub columns: Vec<String>,
    pub body: String,
}

/// A full statement split into its CTEs and the remaining main body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedQuery {
    pub ctes: Vec<CteDefinition>,
    pub main_body: String,
    pub recursive: bool,
}

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Expected exactly one statement, found {0}")]
    StatementCount(usize),

    #[error("Statement is not a query")]
    NotAQuery,

    #[error("Tokenizer error: {0}")]
    Tokenize(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Cannot resolve SELECT * on table '{0}' without a known schema")]
    WildcardUnresolved(String),

    /// Failure reported by the engine implementation itself
    #[error("Engine failure: {0}")]
    Backend(String),
}

impl EngineError {
    /// The underlying parse error, if this is one
    pub fn as_parse_error(&self) -> Option<&ParseError> {
        match self {
            Self::Parse(error) => Some(error),
            _ => None,
        }
    }
}

/// SQL processing capability used by the workspace
#[async_trait::async_trait]
pub trait SqlEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Parse exactly one statement
    async fn parse(&self, sql: &str) -> Result<ParsedQuery, EngineError>;

    /// Serialize with the given options
    async fn format(&self, query: &ParsedQuery, options: &FormatOptions) -> Result<FormattedSql, EngineError>;

    /// Columns usable in a filter on the outermost SELECT
    async fn collect_selectable_columns(
        &self,
        query: &ParsedQuery,
        options: ColumnCollectOptions,
    ) -> Result<Vec<SelectableColumn>, EngineError>;

    /// Parse `sql` and inject the document's predicates as bound parameters
    async fn build_filtered_query(&self, sql: &str, filter: &FilterDocument) -> Result<ParsedQuery, EngineError>;

    /// Physical tables and the columns referenced from them
    async fn collect_schemas(&self, query: &ParsedQuery) -> Result<Vec<TableSchema>, EngineError>;

    /// Lowercased words mentioned in `sql`; the text need not parse
    async fn referenced_names(&self, sql: &str) -> Result<BTreeSet<String>, EngineError>;

    /// Split a statement into its top-level CTEs and main body
    async fn decompose(&self, query: &ParsedQuery) -> Result<DecomposedQuery, EngineError>;

    /// Whether the body of CTE `name` reads from `name` in a later branch of
    /// a set operation, the shape a recursive CTE takes. Bodies that do not
    /// parse are not recursive.
    async fn is_recursive_body(&self, name: &str, body: &str) -> Result<bool, EngineError>;
}

/// [`SqlEngine`] backed by sqlparser
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlParserEngine {
    dialect: DialectConfig,
}

impl SqlParserEngine {
    pub fn new(dialect: DialectConfig) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> DialectConfig {
        self.dialect
    }

    fn parser(&self) -> SqlParser {
        SqlParser::from_dialect(self.dialect)
    }

    fn identifier_quote(&self) -> char {
        match self.dialect {
            DialectConfig::BigQuery => '`',
            _ => '"',
        }
    }

    fn parse_one(&self, sql: &str) -> Result<ParsedQuery, EngineError> {
        let mut statements = self.parser().parse(sql)?;
        if statements.len() != 1 {
            return Err(EngineError::StatementCount(statements.len()));
        }
        Ok(ParsedQuery::new(sql, statements.remove(0)))
    }
}

#[async_trait::async_trait]
impl SqlEngine for SqlParserEngine {
    fn name(&self) -> &'static str {
        "sqlparser"
    }

    async fn parse(&self, sql: &str) -> Result<ParsedQuery, EngineError> {
        self.parse_one(sql)
    }

    async fn format(&self, query: &ParsedQuery, options: &FormatOptions) -> Result<FormattedSql, EngineError> {
        let parser = self.parser();
        SqlFormatter::new(parser.dialect(), self.identifier_quote())
            .format(query.statement(), query.bindings(), options)
            .map_err(EngineError::Format)
    }

    async fn collect_selectable_columns(
        &self,
        query: &ParsedQuery,
        options: ColumnCollectOptions,
    ) -> Result<Vec<SelectableColumn>, EngineError> {
        let query = query.query().ok_or(EngineError::NotAQuery)?;
        Ok(ColumnCollector::collect(query, options))
    }

    async fn build_filtered_query(&self, sql: &str, filter: &FilterDocument) -> Result<ParsedQuery, EngineError> {
        let parsed = self.parse_one(sql)?;
        let parser = self.parser();
        FilterBuilder::new(&parser).apply(parsed, filter)
    }

    async fn collect_schemas(&self, query: &ParsedQuery) -> Result<Vec<TableSchema>, EngineError> {
        let query = query.query().ok_or(EngineError::NotAQuery)?;
        SchemaCollector::collect(query)
    }

    async fn referenced_names(&self, sql: &str) -> Result<BTreeSet<String>, EngineError> {
        let parser = self.parser();
        ReferenceScanner::scan(parser.dialect(), sql).map_err(EngineError::Tokenize)
    }

    async fn decompose(&self, query: &ParsedQuery) -> Result<DecomposedQuery, EngineError> {
        let query = query.query().ok_or(EngineError::NotAQuery)?;

        let (ctes, recursive) = match &query.with {
            Some(with) => (
                with.cte_tables
                    .iter()
                    .map(|cte| CteDefinition {
                        name: cte.alias.name.value.clone(),
                        columns: cte.alias.columns.iter().map(|c| c.to_string()).collect(),
                        body: cte.query.to_string(),
                    })
                    .collect(),
                with.recursive,
            ),
            None => (Vec::new(), false),
        };

        let mut main = query.clone();
        main.with = None;

        Ok(DecomposedQuery {
            ctes,
            main_body: main.to_string(),
            recursive,
        })
    }

    async fn is_recursive_body(&self, name: &str, body: &str) -> Result<bool, EngineError> {
        let parsed = match self.parse_one(body) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::debug!(cte = name, %error, "CTE body does not parse; treating it as non-recursive");
                return Ok(false);
            }
        };

        Ok(parsed
            .query()
            .map(|query| ReferenceScanner::is_self_recursive(query, name))
            .unwrap_or(false))
    }
}
