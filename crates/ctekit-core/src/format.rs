//! Formatting options shared by the engine and the workspace

use serde::{Deserialize, Serialize};

/// How bound parameters are rendered in formatted SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterStyle {
    /// `:name` placeholders, for display and editing
    #[default]
    Named,

    /// `$1`, `$2`, ... one index per placeholder, for execution
    Indexed,
}

/// Keyword casing applied when formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordCase {
    #[default]
    Upper,
    Lower,
    /// Keep whatever the serializer emits
    Preserve,
}

/// Identifier quoting applied when formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierQuoting {
    /// Quote only identifiers that were quoted in the source
    #[default]
    Preserve,

    /// Double-quote every non-keyword identifier
    Always,
}

/// Full set of options for one `format` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatOptions {
    #[serde(default)]
    pub parameter_style: ParameterStyle,

    #[serde(default)]
    pub keyword_case: KeywordCase,

    #[serde(default)]
    pub identifier_quoting: IdentifierQuoting,
}

impl FormatOptions {
    /// Options for human display (named placeholders)
    pub fn display() -> Self {
        Self::default()
    }

    /// Options for the execution engine (indexed placeholders)
    pub fn execution() -> Self {
        Self {
            parameter_style: ParameterStyle::Indexed,
            ..Self::default()
        }
    }

    /// Override the parameter style
    pub fn with_parameter_style(mut self, parameter_style: ParameterStyle) -> Self {
        self.parameter_style = parameter_style;
        self
    }
}
