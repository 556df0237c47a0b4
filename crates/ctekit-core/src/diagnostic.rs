//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Fragment composition (1xxx)
    /// A fragment (or its composed statement) failed to parse
    FragmentParseError,

    /// Composing a fragment with its dependencies failed
    FragmentCompositionError,

    /// The fragment graph contains a dependency cycle
    FragmentCyclicDependency,

    // Schema collection (2xxx)
    /// Collecting table schemas from a composed fragment failed
    SchemaCollectionError,

    /// SELECT * against a table whose columns are unknown
    SchemaWildcardUnresolved,

    // General warnings (9xxx)
    /// General informational message
    Info,

    /// General warning message
    Warning,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FragmentParseError => "FRAGMENT_PARSE_ERROR",
            Self::FragmentCompositionError => "FRAGMENT_COMPOSITION_ERROR",
            Self::FragmentCyclicDependency => "FRAGMENT_CYCLIC_DEPENDENCY",
            Self::SchemaCollectionError => "SCHEMA_COLLECTION_ERROR",
            Self::SchemaWildcardUnresolved => "SCHEMA_WILDCARD_UNRESOLVED",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - the fragment cannot be composed or validated
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Location of a diagnostic inside a fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Fragment name
    pub fragment: String,

    /// Optional line number (1-indexed, within the SQL that was parsed)
    pub line: Option<usize>,

    /// Optional column number (1-indexed)
    pub column: Option<usize>,
}

impl Location {
    /// Create a location pointing at a whole fragment
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            line: None,
            column: None,
        }
    }

    /// Create a location with line and column
    pub fn with_position(fragment: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            fragment: fragment.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{}:{}:{}", self.fragment, line, column),
            (Some(line), None) => write!(f, "{}:{}", self.fragment, line),
            _ => write!(f, "{}", self.fragment),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// SQL text that produced the diagnostic, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    /// Fragments that depend on the failing one
    pub impact: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            sql: None,
            impact: Vec::new(),
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach the SQL text
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Set downstream impact
    pub fn with_impact(mut self, impact: Vec<String>) -> Self {
        self.impact = impact;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        assert_eq!(DiagnosticCode::FragmentParseError.as_str(), "FRAGMENT_PARSE_ERROR");
        assert_eq!(DiagnosticCode::FragmentCyclicDependency.as_str(), "FRAGMENT_CYCLIC_DEPENDENCY");
        assert_eq!(DiagnosticCode::SchemaWildcardUnresolved.to_string(), "SCHEMA_WILDCARD_UNRESOLVED");
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::new(
            DiagnosticCode::SchemaCollectionError,
            Severity::Error,
            "Could not collect schemas",
        )
        .with_location(Location::with_position("active_users", 3, 12));

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("SCHEMA_COLLECTION_ERROR"));
        assert!(json.contains("error"));
        assert!(!json.contains("\"sql\""));
    }

    #[test]
    fn location_display() {
        assert_eq!(Location::new("main").to_string(), "main");
        assert_eq!(Location::with_position("main", 2, 7).to_string(), "main:2:7");
    }
}
