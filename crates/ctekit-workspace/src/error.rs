//! Workspace and composition errors

use crate::fragment::{FragmentId, FragmentKind};
use ctekit_core::{Diagnostic, DiagnosticCode, Location, Severity};
use ctekit_sql::EngineError;

/// What went wrong while composing a fragment
#[derive(Debug, thiserror::Error)]
pub enum CompositionErrorKind {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Cyclic dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Unknown fragment {0}")]
    UnknownFragment(FragmentId),
}

/// Composition failure with the context it happened in
#[derive(Debug, thiserror::Error)]
#[error(
    "Failed to compose '{fragment}' ({dependency_count} dependencies, fixture: {has_fixture}, filter: {has_filter}): {kind}"
)]
pub struct CompositionError {
    pub fragment: String,
    pub dependency_count: usize,
    pub has_fixture: bool,
    pub has_filter: bool,

    /// Composed SQL, when composition got that far
    pub sql: Option<String>,

    #[source]
    pub kind: CompositionErrorKind,
}

impl CompositionError {
    /// Convert to a diagnostic located at the fragment
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = match &self.kind {
            CompositionErrorKind::Engine(EngineError::Parse(error)) => error.to_diagnostic(&self.fragment),
            CompositionErrorKind::CyclicDependency { path } => Diagnostic::new(
                DiagnosticCode::FragmentCyclicDependency,
                Severity::Error,
                self.kind.to_string(),
            )
            .with_location(Location::new(&self.fragment))
            .with_impact(path.clone()),
            _ => Diagnostic::new(
                DiagnosticCode::FragmentCompositionError,
                Severity::Error,
                self.to_string(),
            )
            .with_location(Location::new(&self.fragment)),
        };

        match &self.sql {
            Some(sql) => diagnostic.with_sql(sql.clone()),
            None => diagnostic,
        }
    }
}

/// Workspace editing and persistence errors
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("A {kind} fragment named '{name}' already exists")]
    DuplicateName { kind: FragmentKind, name: String },

    #[error("Unknown fragment {0}")]
    UnknownFragment(FragmentId),

    #[error("Fragment '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("'{fragment}' already depends on '{dependency}'")]
    DuplicateDependency { fragment: String, dependency: String },

    #[error("'{0}' is a main fragment and cannot be a dependency")]
    MainDependency(String),

    #[error("Unsupported snapshot version {0}")]
    UnsupportedSnapshotVersion(u32),

    #[error("Snapshot serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decompose statement: {0}")]
    Decompose(#[from] EngineError),
}
