//! Filter template generation
//!
//! Suggests a filter document for a query from its selectable columns, so a
//! user starts from the right keys with every operand unset.

use ctekit_core::{FilterCondition, FilterDocument};
use ctekit_sql::{ColumnCollectOptions, DedupeMode, EngineError, SqlEngine};
use serde_json::json;

/// Reasons a template could not be derived from the query
#[derive(Debug, thiserror::Error)]
pub enum TemplateGenerationFailure {
    #[error("No main fragment to derive a filter template from")]
    NoMainFragment,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Query exposes no selectable columns")]
    NoColumns,

    #[error("Failed to serialize template: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Default template used whenever generation fails
pub fn default_template() -> String {
    format!("{:#}", json!({"id": {"=": null}, "name": {"ilike": null}}))
}

/// Template condition for a column name; first matching rule wins
pub fn condition_for(column: &str) -> FilterCondition {
    let column = column.to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|needle| column.contains(needle));

    if column.contains("id") {
        FilterCondition::unset(&["="])
    } else if contains_any(&["name", "title", "description"]) {
        FilterCondition::unset(&["ilike"])
    } else if contains_any(&["date", "time", "created", "updated"]) {
        FilterCondition::unset(&["min", "max"])
    } else {
        FilterCondition::empty()
    }
}

/// Derives filter templates through a [`SqlEngine`]
pub struct FilterTemplateGenerator<'e> {
    engine: &'e dyn SqlEngine,
}

impl<'e> FilterTemplateGenerator<'e> {
    pub fn new(engine: &'e dyn SqlEngine) -> Self {
        Self { engine }
    }

    /// Pretty JSON template for `sql`; falls back to [`default_template`]
    pub async fn generate(&self, sql: Option<&str>) -> String {
        match self.try_generate(sql).await {
            Ok(template) => template,
            Err(error) => {
                tracing::warn!(%error, "Using default filter template");
                default_template()
            }
        }
    }

    pub async fn try_generate(&self, sql: Option<&str>) -> Result<String, TemplateGenerationFailure> {
        let sql = sql.ok_or(TemplateGenerationFailure::NoMainFragment)?;
        let query = self.engine.parse(sql).await?;

        let options = ColumnCollectOptions {
            upstream: true,
            dedupe: DedupeMode::NameOnly,
        };
        let columns = self.engine.collect_selectable_columns(&query, options).await?;
        if columns.is_empty() {
            return Err(TemplateGenerationFailure::NoColumns);
        }

        let mut document = FilterDocument::new();
        for column in &columns {
            document.insert(column.name.clone(), condition_for(&column.name));
        }

        Ok(document.to_json_pretty()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctekit_sql::SqlParserEngine;
    use pretty_assertions::assert_eq;

    #[test]
    fn column_rules_in_priority_order() {
        assert_eq!(condition_for("user_id"), FilterCondition::unset(&["="]));
        assert_eq!(condition_for("Display_Name"), FilterCondition::unset(&["ilike"]));
        assert_eq!(condition_for("updated_at"), FilterCondition::unset(&["min", "max"]));
        assert_eq!(condition_for("amount"), FilterCondition::empty());
        // "id" is checked before the name rule
        assert_eq!(condition_for("video_title"), FilterCondition::unset(&["="]));
    }

    #[tokio::test]
    async fn template_has_one_key_per_column() {
        let engine = SqlParserEngine::default();
        let template = FilterTemplateGenerator::new(&engine)
            .generate(Some("SELECT user_id, name FROM users"))
            .await;

        let document = FilterDocument::parse(&template).unwrap();
        assert_eq!(document.columns(), vec!["name", "user_id"]);
        assert_eq!(document.get("name"), Some(&FilterCondition::unset(&["ilike"])));
    }

    #[tokio::test]
    async fn failures_fall_back_to_default() {
        let engine = SqlParserEngine::default();
        let generator = FilterTemplateGenerator::new(&engine);

        assert_eq!(generator.generate(None).await, default_template());
        assert_eq!(generator.generate(Some("SELECT FROM WHERE")).await, default_template());
        assert_eq!(generator.generate(Some("SELECT 1 + 1")).await, default_template());
    }

    #[test]
    fn default_template_is_a_valid_document() {
        let document = FilterDocument::parse(&default_template()).unwrap();
        assert_eq!(document.columns(), vec!["id", "name"]);
        assert!(document.predicates().unwrap().is_empty());
    }
}
