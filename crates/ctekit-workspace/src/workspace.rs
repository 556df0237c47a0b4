//! Fragment workspace
//!
//! Owns the fragment arena and turns any fragment into one executable
//! statement: dependencies are collected and inlined as CTEs, an optional
//! fixture is injected ahead of them, filters become bound parameters and the
//! result is formatted for display or execution.

use crate::compose::WithComposer;
use crate::dag::DependencyCollector;
use crate::error::{CompositionError, CompositionErrorKind, WorkspaceError};
use crate::fixture::{FixtureDefinitions, TestDataFixture};
use crate::fragment::{ExecutionResult, Fragment, FragmentId, FragmentKind};
use crate::template::FilterTemplateGenerator;
use ctekit_core::{
    Config, CyclePolicy, Diagnostic, DiagnosticCode, FilterDocument, FormatOptions, Location, ParameterStyle,
    Severity, TableSchema, ValidationReport,
};
use ctekit_sql::{EngineError, ParsedQuery, SqlEngine};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

/// Name given to the main fragment of a decomposed statement
pub const MAIN_FRAGMENT_NAME: &str = "main";

/// Output of one composition
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicSqlResult {
    pub query: ParsedQuery,
    pub formatted_sql: String,
    pub params: Vec<Value>,

    /// `:name` or `$n` placeholder of each param
    pub param_labels: Vec<String>,
}

/// Graph statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WorkspaceStatistics {
    pub total_models: usize,
    pub main_queries: usize,
    pub ctes: usize,
    pub max_dependency_depth: usize,
    pub total_columns: usize,
}

/// Schema validation outcome of one fragment
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentValidation {
    pub fragment: String,
    pub kind: FragmentKind,
    pub outcome: Result<Vec<TableSchema>, String>,
}

/// Per-fragment outcomes plus the diagnostics report
#[derive(Debug, Clone)]
pub struct SchemaValidation {
    pub fragments: Vec<FragmentValidation>,
    pub report: ValidationReport,
}

/// Context attached to a composition failure
struct ErrorContext {
    fragment: String,
    dependency_count: usize,
    has_fixture: bool,
    has_filter: bool,
}

impl ErrorContext {
    fn error(self, kind: CompositionErrorKind, sql: Option<String>) -> CompositionError {
        CompositionError {
            fragment: self.fragment,
            dependency_count: self.dependency_count,
            has_fixture: self.has_fixture,
            has_filter: self.has_filter,
            sql,
            kind,
        }
    }
}

type StepError = (CompositionErrorKind, Option<String>);

/// Arena of fragments plus the state composition reads
#[derive(Clone)]
pub struct Workspace {
    fragments: Vec<Fragment>,
    engine: Arc<dyn SqlEngine>,
    config: Config,
    test_data: TestDataFixture,
    filter: String,
    format_options: FormatOptions,
    recursive: bool,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("fragments", &self.fragments)
            .field("engine", &self.engine.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Create an empty workspace
    pub fn new(engine: Arc<dyn SqlEngine>, config: Config) -> Self {
        let format_options = config.formatting.options(ParameterStyle::Named);
        Self {
            fragments: Vec::new(),
            engine,
            config,
            test_data: TestDataFixture::default(),
            filter: String::new(),
            format_options,
            recursive: false,
        }
    }

    /// Split a full statement into one CTE fragment per top-level CTE and a
    /// Main fragment holding the rest. Dependencies come from a token scan of
    /// each body against the CTE names.
    pub async fn decompose(sql: &str, engine: Arc<dyn SqlEngine>, config: Config) -> Result<Self, WorkspaceError> {
        let parsed = engine.parse(sql).await?;
        let decomposed = engine.decompose(&parsed).await?;

        let mut workspace = Self::new(Arc::clone(&engine), config);
        workspace.recursive = decomposed.recursive;
        let mut ctes = Vec::with_capacity(decomposed.ctes.len());
        for cte in &decomposed.ctes {
            let id = workspace.add_fragment(FragmentKind::Cte, &cte.name, &cte.body)?;
            if !cte.columns.is_empty() {
                workspace.set_columns(id, Some(cte.columns.clone()))?;
            }
            ctes.push((cte.name.to_lowercase(), id));
        }

        let main = workspace.add_fragment(FragmentKind::Main, MAIN_FRAGMENT_NAME, &decomposed.main_body)?;
        workspace.set_original_body(main, Some(sql.to_string()))?;

        for index in 0..workspace.fragments.len() {
            let id = FragmentId(index);
            let names = engine.referenced_names(&workspace.fragments[index].body).await?;
            for (name, dep) in &ctes {
                if *dep != id && names.contains(name) {
                    workspace.add_dependency(id, *dep)?;
                }
            }
        }

        tracing::debug!(ctes = ctes.len(), recursive = decomposed.recursive, "Decomposed statement");
        Ok(workspace)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn SqlEngine> {
        &self.engine
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn fragment(&self, id: FragmentId) -> Option<&Fragment> {
        self.fragments.get(id.index())
    }

    /// Look up by name, case-insensitively; CTE names win over Main names
    pub fn fragment_by_name(&self, name: &str) -> Option<&Fragment> {
        let find = |kind: FragmentKind| {
            self.fragments
                .iter()
                .find(|f| f.kind == kind && f.name.eq_ignore_ascii_case(name))
        };
        find(FragmentKind::Cte).or_else(|| find(FragmentKind::Main))
    }

    /// First Main fragment
    pub fn main_fragment(&self) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.is_main())
    }

    pub fn test_data(&self) -> &TestDataFixture {
        &self.test_data
    }

    pub fn set_test_data(&mut self, fixture: TestDataFixture) {
        self.test_data = fixture;
    }

    /// Stored filter document text
    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
    }

    /// Whether composed statements always open with `WITH RECURSIVE`
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn set_recursive(&mut self, recursive: bool) {
        self.recursive = recursive;
    }

    pub fn format_options(&self) -> &FormatOptions {
        &self.format_options
    }

    pub fn set_format_options(&mut self, options: FormatOptions) {
        self.format_options = options;
    }

    pub fn add_fragment(
        &mut self,
        kind: FragmentKind,
        name: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<FragmentId, WorkspaceError> {
        let name = name.into();
        self.ensure_unique(kind, &name, None)?;

        let id = FragmentId(self.fragments.len());
        self.fragments.push(Fragment::new(id, kind, name, body));
        Ok(id)
    }

    /// Make `fragment` depend on `dependency`
    pub fn add_dependency(&mut self, fragment: FragmentId, dependency: FragmentId) -> Result<(), WorkspaceError> {
        let dep = self.get(dependency)?;
        if dep.is_main() {
            return Err(WorkspaceError::MainDependency(dep.name.clone()));
        }
        let dep_name = dep.name.clone();

        let target = self.get_mut(fragment)?;
        if fragment == dependency {
            return Err(WorkspaceError::SelfDependency(target.name.clone()));
        }
        if target.dependencies.contains(&dependency) {
            return Err(WorkspaceError::DuplicateDependency {
                fragment: target.name.clone(),
                dependency: dep_name,
            });
        }

        target.dependencies.push(dependency);
        Ok(())
    }

    /// Remove a link; returns whether it existed
    pub fn remove_dependency(&mut self, fragment: FragmentId, dependency: FragmentId) -> Result<bool, WorkspaceError> {
        let target = self.get_mut(fragment)?;
        let before = target.dependencies.len();
        target.dependencies.retain(|&dep| dep != dependency);
        Ok(target.dependencies.len() != before)
    }

    pub fn set_body(&mut self, id: FragmentId, body: impl Into<String>) -> Result<(), WorkspaceError> {
        self.get_mut(id)?.body = body.into();
        Ok(())
    }

    pub fn set_columns(&mut self, id: FragmentId, columns: Option<Vec<String>>) -> Result<(), WorkspaceError> {
        self.get_mut(id)?.columns = columns;
        Ok(())
    }

    pub fn set_original_body(&mut self, id: FragmentId, original: Option<String>) -> Result<(), WorkspaceError> {
        self.get_mut(id)?.original_body = original;
        Ok(())
    }

    pub fn rename(&mut self, id: FragmentId, name: impl Into<String>) -> Result<(), WorkspaceError> {
        let name = name.into();
        let kind = self.get(id)?.kind;
        self.ensure_unique(kind, &name, Some(id))?;
        self.get_mut(id)?.name = name;
        Ok(())
    }

    pub fn record_result(&mut self, id: FragmentId, result: ExecutionResult) -> Result<(), WorkspaceError> {
        self.get_mut(id)?.last_result = Some(result);
        Ok(())
    }

    /// Names along the first dependency cycle, if the graph has one
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        DependencyCollector::new(&self.fragments, CyclePolicy::Reject)
            .find_cycle()
            .map(|cycle| self.names(&cycle.path))
    }

    pub fn statistics(&self) -> WorkspaceStatistics {
        let collector = DependencyCollector::new(&self.fragments, self.config.composition.cycle_policy);
        let main_queries = self.fragments.iter().filter(|f| f.is_main()).count();

        WorkspaceStatistics {
            total_models: self.fragments.len(),
            main_queries,
            ctes: self.fragments.len() - main_queries,
            max_dependency_depth: collector.max_depth(),
            total_columns: self.fragments.iter().filter_map(|f| f.columns()).map(<[String]>::len).sum(),
        }
    }

    /// Compose `id` into one statement.
    ///
    /// `for_execution` selects `$n` placeholders (one per occurrence) instead
    /// of `:name`. A malformed `filter` is ignored with a warning.
    pub async fn dynamic_sql(
        &self,
        id: FragmentId,
        fixture: Option<&TestDataFixture>,
        filter: Option<&str>,
        for_execution: bool,
    ) -> Result<DynamicSqlResult, CompositionError> {
        let fixture = fixture.and_then(TestDataFixture::definitions);
        let filter = parse_filter(filter);

        let Some(fragment) = self.fragment(id) else {
            let context = ErrorContext {
                fragment: id.to_string(),
                dependency_count: 0,
                has_fixture: fixture.is_some(),
                has_filter: filter.is_some(),
            };
            return Err(context.error(CompositionErrorKind::UnknownFragment(id), None));
        };

        let context = ErrorContext {
            fragment: fragment.name.clone(),
            dependency_count: fragment.dependencies.len(),
            has_fixture: fixture.is_some(),
            has_filter: filter.is_some(),
        };
        let span = tracing::debug_span!(
            "dynamic_sql",
            fragment = %fragment.name,
            dependencies = context.dependency_count,
            has_fixture = context.has_fixture,
            has_filter = context.has_filter,
            for_execution,
        );

        self.generate(fragment, fixture.as_ref(), filter.as_ref(), for_execution)
            .instrument(span)
            .await
            .map_err(|(kind, sql)| context.error(kind, sql))
    }

    /// Formatted SQL of [`Workspace::dynamic_sql`]
    pub async fn full_sql(
        &self,
        id: FragmentId,
        fixture: Option<&TestDataFixture>,
        filter: Option<&str>,
        for_execution: bool,
    ) -> Result<String, CompositionError> {
        Ok(self.dynamic_sql(id, fixture, filter, for_execution).await?.formatted_sql)
    }

    /// Execution-ready statement using the stored fixture and filter
    pub async fn prepare_execution(&self, id: FragmentId) -> Result<DynamicSqlResult, CompositionError> {
        let result = self
            .dynamic_sql(id, Some(&self.test_data), Some(&self.filter), true)
            .await?;

        tracing::info!(sql = %result.formatted_sql, params = result.params.len(), "Prepared statement for execution");
        Ok(result)
    }

    /// Filter template for the Main fragment's pristine body, or for the
    /// Main composed with its dependencies once that body is gone
    pub async fn filter_template(&self) -> String {
        let source = match self.main_fragment() {
            Some(main) => Some(self.template_source(main).await),
            None => None,
        };
        FilterTemplateGenerator::new(self.engine.as_ref())
            .generate(source.as_deref())
            .await
    }

    async fn template_source(&self, main: &Fragment) -> String {
        if let Some(original) = main.original_body() {
            return original.to_string();
        }

        match self.compose(main, None).await {
            Ok(composed) => composed,
            Err(error) => {
                tracing::warn!(fragment = %main.name, %error, "Deriving filter template from the bare body");
                main.body.clone()
            }
        }
    }

    /// Compose every fragment and collect the physical tables it reads.
    /// A failing fragment never stops the others.
    pub async fn validate_schemas(&self) -> SchemaValidation {
        let mut report = ValidationReport::new(self.config.dialect);
        let mut fragments = Vec::with_capacity(self.fragments.len());

        for fragment in &self.fragments {
            let outcome = match self.dynamic_sql(fragment.id, None, None, false).await {
                Ok(result) => match self.engine.collect_schemas(&result.query).await {
                    Ok(tables) => {
                        report.record_passed(&fragment.name, &tables);
                        Ok(tables)
                    }
                    Err(error) => {
                        report.record_failed(&fragment.name, self.schema_diagnostic(fragment, &error, &result.formatted_sql));
                        Err(error.to_string())
                    }
                },
                Err(error) => {
                    let mut diagnostic = error.to_diagnostic();
                    if diagnostic.impact.is_empty() {
                        diagnostic.impact = self.impact(fragment.id);
                    }
                    report.record_failed(&fragment.name, diagnostic);
                    Err(error.to_string())
                }
            };

            fragments.push(FragmentValidation {
                fragment: fragment.name.clone(),
                kind: fragment.kind,
                outcome,
            });
        }

        SchemaValidation { fragments, report }
    }

    async fn generate(
        &self,
        fragment: &Fragment,
        fixture: Option<&FixtureDefinitions>,
        filter: Option<&FilterDocument>,
        for_execution: bool,
    ) -> Result<DynamicSqlResult, StepError> {
        let composed = self.compose(fragment, fixture).await.map_err(|kind| (kind, None))?;
        tracing::debug!(sql = %composed, "Composed fragment");

        let fail = |error: EngineError| (CompositionErrorKind::Engine(error), Some(composed.clone()));

        let mut query = self.engine.parse(&composed).await.map_err(fail)?;
        if let Some(filter) = filter {
            query = self
                .engine
                .build_filtered_query(query.source_sql(), filter)
                .await
                .map_err(fail)?;
        }

        let style = if for_execution {
            ParameterStyle::Indexed
        } else {
            ParameterStyle::Named
        };
        let options = self.format_options.with_parameter_style(style);
        let formatted = self.engine.format(&query, &options).await.map_err(fail)?;

        Ok(DynamicSqlResult {
            query,
            formatted_sql: formatted.sql,
            params: formatted.params,
            param_labels: formatted.labels,
        })
    }

    /// Body with its fixture and dependencies inlined
    async fn compose(
        &self,
        fragment: &Fragment,
        fixture: Option<&FixtureDefinitions>,
    ) -> Result<String, CompositionErrorKind> {
        if fixture.is_none() && fragment.dependencies.is_empty() {
            return Ok(fragment.body.clone());
        }

        let collector = DependencyCollector::new(&self.fragments, self.config.composition.cycle_policy);
        let ids = collector
            .collect(fragment.id)
            .map_err(|cycle| CompositionErrorKind::CyclicDependency {
                path: self.names(&cycle.path),
            })?;

        let mut ctes: Vec<&Fragment> = ids.iter().filter_map(|&id| self.fragment(id)).collect();
        if self.config.composition.prune_unreferenced_ctes {
            ctes = self.referenced_ctes(&fragment.body, fixture, ctes).await?;
        }
        let recursive = self.recursive || self.has_recursive_cte(&ctes).await?;
        tracing::debug!(ctes = ctes.len(), recursive, "Collected dependencies");

        Ok(WithComposer::new()
            .with_fixture(fixture)
            .with_ctes(ctes)
            .recursive(recursive)
            .compose(&fragment.body))
    }

    /// CTEs reachable by textual reference from the body or the fixture
    async fn referenced_ctes<'w>(
        &self,
        body: &str,
        fixture: Option<&FixtureDefinitions>,
        ctes: Vec<&'w Fragment>,
    ) -> Result<Vec<&'w Fragment>, EngineError> {
        let mut referenced = self.engine.referenced_names(body).await?;
        if let Some(fixture) = fixture {
            referenced.extend(self.engine.referenced_names(&fixture.definitions).await?);
        }

        // dependents come after their dependencies, so walk backwards
        let mut keep = vec![false; ctes.len()];
        for (index, cte) in ctes.iter().enumerate().rev() {
            if referenced.contains(&cte.name.to_lowercase()) {
                keep[index] = true;
                referenced.extend(self.engine.referenced_names(&cte.body).await?);
            }
        }

        let total = ctes.len();
        let kept: Vec<&Fragment> = ctes
            .into_iter()
            .zip(keep)
            .filter_map(|(cte, keep)| keep.then_some(cte))
            .collect();

        tracing::debug!(pruned = total - kept.len(), "Pruned unreferenced CTEs");
        Ok(kept)
    }

    /// Whether any CTE reads from itself in a later set-operation branch
    async fn has_recursive_cte(&self, ctes: &[&Fragment]) -> Result<bool, EngineError> {
        for cte in ctes {
            if self.engine.is_recursive_body(&cte.name, &cte.body).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn schema_diagnostic(&self, fragment: &Fragment, error: &EngineError, sql: &str) -> Diagnostic {
        let (code, severity) = match error {
            EngineError::WildcardUnresolved(_) => (DiagnosticCode::SchemaWildcardUnresolved, Severity::Warn),
            _ => (DiagnosticCode::SchemaCollectionError, Severity::Error),
        };

        Diagnostic::new(code, severity, error.to_string())
            .with_location(Location::new(&fragment.name))
            .with_sql(sql)
            .with_impact(self.impact(fragment.id))
    }

    fn impact(&self, id: FragmentId) -> Vec<String> {
        let dependents = DependencyCollector::new(&self.fragments, CyclePolicy::Skip).dependents(id);
        self.names(&dependents)
    }

    fn names(&self, ids: &[FragmentId]) -> Vec<String> {
        ids.iter()
            .map(|&id| match self.fragment(id) {
                Some(fragment) => fragment.name.clone(),
                None => id.to_string(),
            })
            .collect()
    }

    fn ensure_unique(&self, kind: FragmentKind, name: &str, except: Option<FragmentId>) -> Result<(), WorkspaceError> {
        let taken = self
            .fragments
            .iter()
            .any(|f| Some(f.id) != except && f.kind == kind && f.name.eq_ignore_ascii_case(name));

        if taken {
            return Err(WorkspaceError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn get(&self, id: FragmentId) -> Result<&Fragment, WorkspaceError> {
        self.fragments.get(id.index()).ok_or(WorkspaceError::UnknownFragment(id))
    }

    fn get_mut(&mut self, id: FragmentId) -> Result<&mut Fragment, WorkspaceError> {
        self.fragments
            .get_mut(id.index())
            .ok_or(WorkspaceError::UnknownFragment(id))
    }
}

/// Parse filter text; blank or malformed text means no filters
fn parse_filter(text: Option<&str>) -> Option<FilterDocument> {
    let text = text?;
    let document = match FilterDocument::parse(text) {
        Ok(document) => document,
        Err(error) => {
            tracing::warn!(%error, "Ignoring malformed filter document");
            return None;
        }
    };

    if let Err(error) = document.predicates() {
        tracing::warn!(%error, "Ignoring malformed filter document");
        return None;
    }

    (!document.is_empty()).then_some(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctekit_sql::SqlParserEngine;
    use pretty_assertions::assert_eq;

    fn workspace() -> Workspace {
        Workspace::new(Arc::new(SqlParserEngine::default()), Config::default())
    }

    #[test]
    fn names_are_unique_per_kind() {
        let mut ws = workspace();
        ws.add_fragment(FragmentKind::Cte, "users_base", "SELECT 1").unwrap();

        assert!(matches!(
            ws.add_fragment(FragmentKind::Cte, "USERS_BASE", "SELECT 2"),
            Err(WorkspaceError::DuplicateName { .. })
        ));
        assert!(ws.add_fragment(FragmentKind::Main, "users_base", "SELECT 3").is_ok());
    }

    #[test]
    fn dependency_links_are_validated() {
        let mut ws = workspace();
        let base = ws.add_fragment(FragmentKind::Cte, "base", "SELECT 1").unwrap();
        let main = ws.add_fragment(FragmentKind::Main, "main", "SELECT * FROM base").unwrap();

        ws.add_dependency(main, base).unwrap();
        assert!(matches!(
            ws.add_dependency(main, base),
            Err(WorkspaceError::DuplicateDependency { .. })
        ));
        assert!(matches!(ws.add_dependency(base, base), Err(WorkspaceError::SelfDependency(_))));
        assert!(matches!(ws.add_dependency(base, main), Err(WorkspaceError::MainDependency(_))));
        assert!(matches!(
            ws.add_dependency(main, FragmentId(7)),
            Err(WorkspaceError::UnknownFragment(_))
        ));

        assert!(ws.remove_dependency(main, base).unwrap());
        assert!(!ws.remove_dependency(main, base).unwrap());
    }

    #[test]
    fn rename_keeps_uniqueness() {
        let mut ws = workspace();
        let a = ws.add_fragment(FragmentKind::Cte, "a", "SELECT 1").unwrap();
        ws.add_fragment(FragmentKind::Cte, "b", "SELECT 2").unwrap();

        assert!(ws.rename(a, "B").is_err());
        ws.rename(a, "A").unwrap();
        assert_eq!(ws.fragment(a).unwrap().name(), "A");
        assert_eq!(ws.fragment_by_name("a").map(Fragment::id), Some(a));
    }

    #[test]
    fn statistics_count_kinds_columns_and_depth() {
        let mut ws = workspace();
        let base = ws.add_fragment(FragmentKind::Cte, "base", "SELECT 1 AS id, 2 AS n").unwrap();
        let mid = ws.add_fragment(FragmentKind::Cte, "mid", "SELECT id FROM base").unwrap();
        let main = ws.add_fragment(FragmentKind::Main, "main", "SELECT id FROM mid").unwrap();
        ws.set_columns(base, Some(vec!["id".into(), "n".into()])).unwrap();
        ws.set_columns(mid, Some(vec!["id".into()])).unwrap();
        ws.add_dependency(mid, base).unwrap();
        ws.add_dependency(main, mid).unwrap();

        assert_eq!(
            ws.statistics(),
            WorkspaceStatistics {
                total_models: 3,
                main_queries: 1,
                ctes: 2,
                max_dependency_depth: 2,
                total_columns: 3,
            }
        );
    }

    #[test]
    fn malformed_filters_are_ignored() {
        assert!(parse_filter(None).is_none());
        assert!(parse_filter(Some("   ")).is_none());
        assert!(parse_filter(Some("{not json")).is_none());
        assert!(parse_filter(Some(r#"{"id": {"between": 1}}"#)).is_none());
        assert!(parse_filter(Some("{}")).is_none());
        assert!(parse_filter(Some(r#"{"id": 1}"#)).is_some());
    }

    #[tokio::test]
    async fn record_result_is_kept_on_fragment() {
        let mut ws = workspace();
        let main = ws.add_fragment(FragmentKind::Main, "main", "SELECT 42 AS answer").unwrap();

        let prepared = ws.prepare_execution(main).await.unwrap();
        let result = ExecutionResult::new(prepared.formatted_sql, prepared.params, vec!["answer".into()], vec![]);
        ws.record_result(main, result).unwrap();

        assert_eq!(ws.fragment(main).unwrap().last_result().unwrap().sql, "SELECT 42 AS answer");
    }
}
