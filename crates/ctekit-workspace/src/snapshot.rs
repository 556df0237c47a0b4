//! Workspace snapshots
//!
//! JSON persistence of a workspace. Dependencies are stored by name and
//! re-linked after every fragment has been created, so the file order of
//! fragments does not matter.

use crate::error::WorkspaceError;
use crate::fixture::TestDataFixture;
use crate::fragment::FragmentKind;
use crate::workspace::Workspace;
use ctekit_core::{Config, FormatOptions};
use ctekit_sql::SqlEngine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentSnapshot {
    pub kind: FragmentKind,
    pub name: String,
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_body: Option<String>,

    /// Dependency names in declaration order
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Serialized workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub version: u32,
    pub fragments: Vec<FragmentSnapshot>,

    #[serde(default)]
    pub test_data: TestDataFixture,

    #[serde(default)]
    pub filter: String,

    #[serde(default)]
    pub formatting: FormatOptions,

    /// Set when the decomposed statement opened with `WITH RECURSIVE`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recursive: bool,
}

impl WorkspaceSnapshot {
    pub fn from_json(json: &str) -> Result<Self, WorkspaceError> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(WorkspaceError::UnsupportedSnapshotVersion(snapshot.version));
        }
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String, WorkspaceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, WorkspaceError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), WorkspaceError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl Workspace {
    /// Capture the workspace; execution results are not persisted
    pub fn snapshot(&self) -> WorkspaceSnapshot {
        let fragments = self
            .fragments()
            .iter()
            .map(|fragment| FragmentSnapshot {
                kind: fragment.kind(),
                name: fragment.name().to_string(),
                body: fragment.body().to_string(),
                columns: fragment.columns().map(<[String]>::to_vec),
                original_body: fragment.original_body().map(str::to_string),
                dependencies: fragment
                    .dependencies()
                    .iter()
                    .filter_map(|&dep| self.fragment(dep))
                    .map(|dep| dep.name().to_string())
                    .collect(),
            })
            .collect();

        WorkspaceSnapshot {
            version: SNAPSHOT_VERSION,
            fragments,
            test_data: self.test_data().clone(),
            filter: self.filter().to_string(),
            formatting: *self.format_options(),
            recursive: self.is_recursive(),
        }
    }

    /// Rebuild a workspace in two passes: create every fragment, then link
    /// dependencies by name, preferring CTE names over Main names
    pub fn from_snapshot(
        snapshot: &WorkspaceSnapshot,
        engine: Arc<dyn SqlEngine>,
        config: Config,
    ) -> Result<Self, WorkspaceError> {
        let mut workspace = Workspace::new(engine, config);
        workspace.set_format_options(snapshot.formatting);
        workspace.set_test_data(snapshot.test_data.clone());
        workspace.set_filter(snapshot.filter.clone());
        workspace.set_recursive(snapshot.recursive);

        let mut ids = Vec::with_capacity(snapshot.fragments.len());
        for fragment in &snapshot.fragments {
            let id = workspace.add_fragment(fragment.kind, &fragment.name, &fragment.body)?;
            workspace.set_columns(id, fragment.columns.clone())?;
            workspace.set_original_body(id, fragment.original_body.clone())?;
            ids.push(id);
        }

        for (fragment, &id) in snapshot.fragments.iter().zip(&ids) {
            for name in &fragment.dependencies {
                let Some(dep) = workspace.fragment_by_name(name).map(|f| f.id()) else {
                    tracing::warn!(fragment = %fragment.name, dependency = %name, "Skipping unknown dependency");
                    continue;
                };
                if let Err(error) = workspace.add_dependency(id, dep) {
                    tracing::warn!(fragment = %fragment.name, dependency = %name, %error, "Skipping dependency");
                }
            }
        }

        Ok(workspace)
    }
}
