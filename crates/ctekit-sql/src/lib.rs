//! SQL parsing and analysis
//!
//! This crate handles:
//! - Parsing SQL using datafusion-sqlparser-rs
//! - The `SqlEngine` capability used by the fragment workspace
//! - Formatting with named or indexed parameters
//! - Collecting selectable columns (optionally through upstream CTEs)
//! - Collecting referenced table schemas
//! - Injecting filter predicates from a filter document
//! - A recording mock engine for tests

pub mod parser;
pub mod engine;
pub mod format;
pub mod columns;
pub mod schemas;
pub mod filter;
pub mod references;
pub mod mock;

pub use parser::{SqlParser, ParseError};
pub use engine::{
    SqlEngine, SqlParserEngine, ParsedQuery, FormattedSql, EngineError,
    ColumnCollectOptions, DedupeMode, CteDefinition, DecomposedQuery,
};
pub use format::SqlFormatter;
pub use columns::ColumnCollector;
pub use schemas::SchemaCollector;
pub use filter::FilterBuilder;
pub use references::ReferenceScanner;
pub use mock::{MockEngine, EngineOperation, EngineCall};
