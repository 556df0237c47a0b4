//! Fragment validation report (report.json)
//!
//! One entry per fragment with the physical tables its composed statement
//! reads, plus the diagnostics of the fragments that failed. The file layout
//! is versioned; new fields are only ever added.

use crate::config::DialectConfig;
use crate::diagnostic::{Diagnostic, Severity};
use crate::schema::TableSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Report layout version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    pub major: u32,
    pub minor: u32,
}

impl ReportVersion {
    /// Version written by this build
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 1 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Whether a fragment composed and had its tables collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentStatus {
    Passed,
    Failed,
}

/// Validation outcome of one fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentEntry {
    pub fragment: String,
    pub status: FragmentStatus,

    /// Physical tables read by the composed fragment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub fragments_checked: usize,
    pub fragments_failed: usize,

    /// Distinct physical tables across every passing fragment
    pub tables_read: usize,

    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
}

/// Workspace validation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub version: ReportVersion,

    /// RFC 3339
    pub timestamp: String,

    /// Dialect the fragments were parsed with
    pub dialect: DialectConfig,

    pub summary: ReportSummary,
    pub fragments: Vec<FragmentEntry>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn new(dialect: DialectConfig) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            dialect,
            summary: ReportSummary::default(),
            fragments: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Record a fragment whose tables were collected
    pub fn record_passed(&mut self, fragment: impl Into<String>, tables: &[TableSchema]) {
        self.fragments.push(FragmentEntry {
            fragment: fragment.into(),
            status: FragmentStatus::Passed,
            tables: tables.iter().map(|table| table.name.clone()).collect(),
        });

        self.summary.fragments_checked += 1;
        self.summary.tables_read = self.tables().len();
    }

    /// Record a fragment that failed, with the diagnostic explaining why
    pub fn record_failed(&mut self, fragment: impl Into<String>, diagnostic: Diagnostic) {
        self.fragments.push(FragmentEntry {
            fragment: fragment.into(),
            status: FragmentStatus::Failed,
            tables: Vec::new(),
        });

        self.summary.fragments_checked += 1;
        self.summary.fragments_failed += 1;
        self.add_diagnostic(diagnostic);
    }

    fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.summary.errors += 1,
            Severity::Warn => self.summary.warnings += 1,
            Severity::Info => self.summary.info += 1,
        }
        self.diagnostics.push(diagnostic);
    }

    /// Names of failed fragments, in validation order
    pub fn failed_fragments(&self) -> Vec<&str> {
        self.fragments
            .iter()
            .filter(|entry| entry.status == FragmentStatus::Failed)
            .map(|entry| entry.fragment.as_str())
            .collect()
    }

    /// Distinct physical tables, compared case-insensitively
    pub fn tables(&self) -> BTreeSet<String> {
        self.fragments
            .iter()
            .flat_map(|entry| entry.tables.iter())
            .map(|table| table.to_lowercase())
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new(DialectConfig::default())
    }
}
