//! Fragment workspace
//!
//! This crate handles:
//! - The fragment arena and its editing operations
//! - Dependency collection (DAG) with an explicit cycle policy
//! - WITH-clause composition and test-data fixture injection
//! - Dynamic SQL generation with filters and parameter styles
//! - Graph statistics, filter templates and schema validation
//! - Snapshots and decomposition of a full statement into fragments

pub mod fragment;
pub mod error;
pub mod dag;
pub mod fixture;
pub mod compose;
pub mod template;
pub mod workspace;
pub mod snapshot;

pub use fragment::{Fragment, FragmentId, FragmentKind, ExecutionResult};
pub use error::{CompositionError, CompositionErrorKind, WorkspaceError};
pub use dag::{DependencyCollector, DependencyCycle};
pub use fixture::{TestDataFixture, FixtureDefinitions};
pub use compose::WithComposer;
pub use template::{FilterTemplateGenerator, TemplateGenerationFailure, default_template};
pub use workspace::{
    Workspace, DynamicSqlResult, WorkspaceStatistics, FragmentValidation, SchemaValidation,
    MAIN_FRAGMENT_NAME,
};
pub use snapshot::{WorkspaceSnapshot, FragmentSnapshot, SNAPSHOT_VERSION};
