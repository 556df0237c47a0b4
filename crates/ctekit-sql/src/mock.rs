//! Mock SQL engine for testing
//!
//! Delegates to [`SqlParserEngine`] while recording every call, and can be
//! told to fail chosen operations so error paths can be exercised without a
//! broken SQL string.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = MockEngine::new().with_failure(EngineOperation::Format);
//! let workspace = Workspace::new(Arc::new(engine.clone()), Config::default());
//! // ... compose, then inspect engine.calls().await
//! ```

use crate::engine::{
    ColumnCollectOptions, DecomposedQuery, EngineError, FormattedSql, ParsedQuery, SqlEngine, SqlParserEngine,
};
use ctekit_core::{DialectConfig, FilterDocument, FormatOptions, SelectableColumn, TableSchema};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Engine operations a mock can fail or record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOperation {
    Parse,
    Format,
    CollectColumns,
    BuildFilter,
    CollectSchemas,
    ReferencedNames,
    Decompose,
    DetectRecursion,
}

/// One recorded engine call
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCall {
    pub operation: EngineOperation,

    /// SQL the call received
    pub sql: String,

    /// Options of a format call
    pub options: Option<FormatOptions>,
}

/// Recording, failure-injecting engine
pub struct MockEngine {
    inner: SqlParserEngine,
    failures: HashSet<EngineOperation>,
    calls: Arc<RwLock<Vec<EngineCall>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_dialect(DialectConfig::default())
    }

    pub fn with_dialect(dialect: DialectConfig) -> Self {
        Self {
            inner: SqlParserEngine::new(dialect),
            failures: HashSet::new(),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Fail every call of `operation`
    pub fn with_failure(mut self, operation: EngineOperation) -> Self {
        self.failures.insert(operation);
        self
    }

    /// Calls recorded so far, in order
    pub async fn calls(&self) -> Vec<EngineCall> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self, operation: EngineOperation) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    async fn record(
        &self,
        operation: EngineOperation,
        sql: &str,
        options: Option<FormatOptions>,
    ) -> Result<(), EngineError> {
        self.calls.write().await.push(EngineCall {
            operation,
            sql: sql.to_string(),
            options,
        });

        if self.failures.contains(&operation) {
            return Err(EngineError::Backend(format!("Simulated {:?} failure", operation)));
        }
        Ok(())
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockEngine {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner,
            failures: self.failures.clone(),
            calls: Arc::clone(&self.calls),
        }
    }
}

#[async_trait::async_trait]
impl SqlEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn parse(&self, sql: &str) -> Result<ParsedQuery, EngineError> {
        self.record(EngineOperation::Parse, sql, None).await?;
        self.inner.parse(sql).await
    }

    async fn format(&self, query: &ParsedQuery, options: &FormatOptions) -> Result<FormattedSql, EngineError> {
        self.record(EngineOperation::Format, query.source_sql(), Some(*options)).await?;
        self.inner.format(query, options).await
    }

    async fn collect_selectable_columns(
        &self,
        query: &ParsedQuery,
        options: ColumnCollectOptions,
    ) -> Result<Vec<SelectableColumn>, EngineError> {
        self.record(EngineOperation::CollectColumns, query.source_sql(), None).await?;
        self.inner.collect_selectable_columns(query, options).await
    }

    async fn build_filtered_query(&self, sql: &str, filter: &FilterDocument) -> Result<ParsedQuery, EngineError> {
        self.record(EngineOperation::BuildFilter, sql, None).await?;
        self.inner.build_filtered_query(sql, filter).await
    }

    async fn collect_schemas(&self, query: &ParsedQuery) -> Result<Vec<TableSchema>, EngineError> {
        self.record(EngineOperation::CollectSchemas, query.source_sql(), None).await?;
        self.inner.collect_schemas(query).await
    }

    async fn referenced_names(&self, sql: &str) -> Result<BTreeSet<String>, EngineError> {
        self.record(EngineOperation::ReferencedNames, sql, None).await?;
        self.inner.referenced_names(sql).await
    }

    async fn decompose(&self, query: &ParsedQuery) -> Result<DecomposedQuery, EngineError> {
        self.record(EngineOperation::Decompose, query.source_sql(), None).await?;
        self.inner.decompose(query).await
    }

    async fn is_recursive_body(&self, name: &str, body: &str) -> Result<bool, EngineError> {
        self.record(EngineOperation::DetectRecursion, body, None).await?;
        self.inner.is_recursive_body(name, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_delegates() {
        let engine = MockEngine::new();
        let query = engine.parse("SELECT 1").await.unwrap();
        engine.format(&query, &FormatOptions::execution()).await.unwrap();

        let calls = engine.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation, EngineOperation::Parse);
        assert_eq!(calls[1].options, Some(FormatOptions::execution()));
    }

    #[tokio::test]
    async fn injected_failures_are_returned() {
        let engine = MockEngine::new().with_failure(EngineOperation::Parse);
        let clone = engine.clone();

        assert!(matches!(engine.parse("SELECT 1").await, Err(EngineError::Backend(_))));
        assert_eq!(clone.call_count(EngineOperation::Parse).await, 1);
    }
}
