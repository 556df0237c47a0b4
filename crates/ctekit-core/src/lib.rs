//! ctekit Core
//!
//! Core domain model with stable, versioned types shared by the SQL engine,
//! the fragment workspace and the CLI.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod schema;
pub mod report;
pub mod config;
pub mod format;
pub mod filter;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use schema::{TableSchema, SelectableColumn};
pub use report::{ValidationReport, ReportSummary, ReportVersion, FragmentEntry, FragmentStatus};
pub use config::{Config, ConfigError, DialectConfig, CompositionConfig, CyclePolicy, FormattingConfig};
pub use format::{FormatOptions, ParameterStyle, KeywordCase, IdentifierQuoting};
pub use filter::{FilterDocument, FilterCondition, FilterPredicate, PredicateOp, FilterError};
