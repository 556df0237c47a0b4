//! Configuration schema (ctekit.toml)

use serde::{Deserialize, Serialize};
use crate::format::{FormatOptions, IdentifierQuoting, KeywordCase, ParameterStyle};

/// SQL dialect configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectConfig {
    /// Generic ANSI SQL
    #[default]
    Ansi,

    /// PostgreSQL SQL dialect
    Postgres,

    /// BigQuery SQL dialect
    BigQuery,

    /// Snowflake SQL dialect
    Snowflake,

    /// DuckDB SQL dialect
    DuckDb,

    /// SQLite SQL dialect
    Sqlite,
}

/// What the dependency collector does when it meets a dependency cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePolicy {
    /// Fail composition with a cyclic dependency error
    #[default]
    Reject,

    /// Drop the back-edge and keep composing
    Skip,
}

/// Composition behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositionConfig {
    /// Cycle handling in the dependency collector
    #[serde(default)]
    pub cycle_policy: CyclePolicy,

    /// Only inline CTEs that the target body references (directly or through
    /// other referenced CTEs). Off means every graph dependency is inlined.
    #[serde(default)]
    pub prune_unreferenced_ctes: bool,
}

/// Formatting preferences (the parameter style is chosen per call)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormattingConfig {
    #[serde(default)]
    pub keyword_case: KeywordCase,

    #[serde(default)]
    pub identifier_quoting: IdentifierQuoting,
}

impl FormattingConfig {
    /// Build the options for one format call
    pub fn options(&self, parameter_style: ParameterStyle) -> FormatOptions {
        FormatOptions {
            parameter_style,
            keyword_case: self.keyword_case,
            identifier_quoting: self.identifier_quoting,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    /// SQL dialect
    #[serde(default)]
    pub dialect: DialectConfig,

    /// Formatting preferences
    #[serde(default)]
    pub formatting: FormattingConfig,

    /// Composition behavior
    #[serde(default)]
    pub composition: CompositionConfig,
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.dialect, DialectConfig::Ansi);
        assert_eq!(config.composition.cycle_policy, CyclePolicy::Reject);
        assert!(!config.composition.prune_unreferenced_ctes);
        assert_eq!(config.formatting.keyword_case, KeywordCase::Upper);
    }

    #[test]
    fn parse_full_config() {
        let config = Config::from_toml(
            r#"
            dialect = "postgres"

            [formatting]
            keyword_case = "lower"
            identifier_quoting = "always"

            [composition]
            cycle_policy = "skip"
            prune_unreferenced_ctes = true
            "#,
        )
        .unwrap();

        assert_eq!(config.dialect, DialectConfig::Postgres);
        assert_eq!(config.formatting.keyword_case, KeywordCase::Lower);
        assert_eq!(config.formatting.identifier_quoting, IdentifierQuoting::Always);
        assert_eq!(config.composition.cycle_policy, CyclePolicy::Skip);
        assert!(config.composition.prune_unreferenced_ctes);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config = Config::from_toml("dialect = \"duckdb\"").unwrap();
        assert_eq!(config.dialect, DialectConfig::DuckDb);
        assert_eq!(config.composition, CompositionConfig::default());
    }

    #[test]
    fn invalid_config_is_parse_error() {
        let err = Config::from_toml("dialect = \"cobol\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn formatting_options_carry_style() {
        let formatting = FormattingConfig {
            keyword_case: KeywordCase::Lower,
            identifier_quoting: IdentifierQuoting::Preserve,
        };
        let options = formatting.options(ParameterStyle::Indexed);
        assert_eq!(options.parameter_style, ParameterStyle::Indexed);
        assert_eq!(options.keyword_case, KeywordCase::Lower);
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config, parsed);
    }
}
