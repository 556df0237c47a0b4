//! Integration tests for the sqlparser-backed engine

use ctekit_core::{DialectConfig, FilterDocument, FormatOptions, ParameterStyle};
use ctekit_sql::{ColumnCollectOptions, EngineError, SqlEngine, SqlParserEngine};
use pretty_assertions::assert_eq;
use serde_json::json;

const INVOICE_REPORT: &str = r#"
    WITH paid_invoices AS (
        SELECT invoice_id, customer_id, amount FROM invoices WHERE is_paid = true
    ),
    customer_totals AS (
        SELECT customer_id, sum(amount) AS paid_total FROM paid_invoices GROUP BY customer_id
    )
    SELECT ct.customer_id, ct.paid_total FROM customer_totals AS ct
"#;

#[tokio::test]
async fn filter_then_format_for_execution() {
    let engine = SqlParserEngine::default();
    let filter = FilterDocument::parse(r#"{"paid_total": {">=": 100}, "customer_id": [1, 2]}"#).unwrap();

    let filtered = engine.build_filtered_query(INVOICE_REPORT, &filter).await.unwrap();
    let formatted = engine
        .format(&filtered, &FormatOptions::execution())
        .await
        .unwrap();

    assert!(formatted.sql.ends_with(
        "SELECT ct.customer_id, ct.paid_total FROM customer_totals AS ct \
         WHERE ct.customer_id IN ($1, $2) AND ct.paid_total >= $3"
    ));
    assert_eq!(formatted.params, vec![json!(1), json!(2), json!(100)]);
}

#[tokio::test]
async fn display_format_keeps_named_placeholders() {
    let engine = SqlParserEngine::default();
    let filter = FilterDocument::parse(r#"{"customer_id": 7}"#).unwrap();

    let filtered = engine.build_filtered_query(INVOICE_REPORT, &filter).await.unwrap();
    let formatted = engine.format(&filtered, &FormatOptions::display()).await.unwrap();

    assert!(formatted.sql.contains("WHERE ct.customer_id = :customer_id_eq"));
    assert_eq!(formatted.params, vec![json!(7)]);
}

#[tokio::test]
async fn formatted_output_reparses_to_the_same_statement() {
    let engine = SqlParserEngine::new(DialectConfig::Postgres);
    let parsed = engine
        .parse("SELECT i.invoice_id, i.amount FROM invoices AS i WHERE i.amount > :min_amount AND i.customer_id = :customer")
        .await
        .unwrap();

    let options = FormatOptions::display().with_parameter_style(ParameterStyle::Named);
    let formatted = engine.format(&parsed, &options).await.unwrap();
    let reparsed = engine.parse(&formatted.sql).await.unwrap();

    assert_eq!(reparsed.statement(), parsed.statement());
}

#[tokio::test]
async fn keyword_named_columns_survive_display_formatting() {
    let engine = SqlParserEngine::default();
    let parsed = engine.parse("SELECT user_id, name FROM users").await.unwrap();

    let formatted = engine.format(&parsed, &FormatOptions::display()).await.unwrap();
    assert_eq!(formatted.sql, "SELECT user_id, name FROM users");

    let reparsed = engine.parse(&formatted.sql).await.unwrap();
    assert_eq!(reparsed.statement(), parsed.statement());
}

#[tokio::test]
async fn upstream_columns_cover_cte_outputs() {
    let engine = SqlParserEngine::default();
    let parsed = engine.parse(INVOICE_REPORT).await.unwrap();

    let names: Vec<String> = engine
        .collect_selectable_columns(&parsed, ColumnCollectOptions::upstream())
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();

    assert_eq!(names, vec!["customer_id", "paid_total"]);
}

#[tokio::test]
async fn schemas_only_list_physical_tables() {
    let engine = SqlParserEngine::default();
    let parsed = engine.parse(INVOICE_REPORT).await.unwrap();

    let schemas = engine.collect_schemas(&parsed).await.unwrap();
    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0].name, "invoices");
    assert_eq!(schemas[0].columns, vec!["invoice_id", "customer_id", "amount", "is_paid"]);
}

#[tokio::test]
async fn referenced_names_work_on_fragments() {
    let engine = SqlParserEngine::default();
    let names = engine
        .referenced_names("SELECT customer_id FROM paid_invoices WHERE")
        .await
        .unwrap();

    assert!(names.contains("paid_invoices"));
    assert!(engine.parse("SELECT customer_id FROM paid_invoices WHERE").await.is_err());
}

#[tokio::test]
async fn invalid_filter_operator_is_an_error() {
    let engine = SqlParserEngine::default();
    let filter = FilterDocument::parse(r#"{"paid_total": {"between": 3}}"#).unwrap();

    let result = engine.build_filtered_query(INVOICE_REPORT, &filter).await;
    assert!(matches!(result, Err(EngineError::Filter(_))));
}
