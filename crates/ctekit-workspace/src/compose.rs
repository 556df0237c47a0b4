//! WITH-clause composition
//!
//! Renders fixture definitions and collected CTE fragments in front of a
//! target body, merging with a WITH clause the body already has.

use crate::fixture::{leading_with, FixtureDefinitions};
use crate::fragment::Fragment;

/// Builds one statement from a body and its definitions
#[derive(Debug, Default)]
pub struct WithComposer<'a> {
    fixture: Option<&'a FixtureDefinitions>,
    ctes: Vec<&'a Fragment>,
    recursive: bool,
}

impl<'a> WithComposer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixture(mut self, fixture: Option<&'a FixtureDefinitions>) -> Self {
        self.fixture = fixture;
        self
    }

    /// CTEs in the order they must be declared
    pub fn with_ctes(mut self, ctes: Vec<&'a Fragment>) -> Self {
        self.ctes = ctes;
        self
    }

    /// Force `WITH RECURSIVE`
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Compose `body`; returned unchanged when there is nothing to inject
    pub fn compose(&self, body: &str) -> String {
        if self.fixture.is_none() && self.ctes.is_empty() {
            return body.to_string();
        }

        let mut definitions: Vec<String> = Vec::with_capacity(self.ctes.len() + 1);
        if let Some(fixture) = self.fixture {
            definitions.push(fixture.definitions.clone());
        }
        definitions.extend(self.ctes.iter().map(|cte| render_cte(cte)));
        let definitions = definitions.join(",\n");

        let recursive = self.recursive || self.fixture.map(|f| f.recursive).unwrap_or(false);
        let body = strip_terminator(body);

        match leading_with(body) {
            Some(existing) => {
                let keyword = with_keyword(recursive || existing.recursive);
                let statement = format!("{} {},\n{}", keyword, definitions, existing.rest);
                if existing.prefix.is_empty() {
                    statement
                } else {
                    format!("{}\n{}", existing.prefix, statement)
                }
            }
            None => format!("{} {}\n{}", with_keyword(recursive), definitions, body.trim()),
        }
    }
}

fn with_keyword(recursive: bool) -> &'static str {
    if recursive {
        "WITH RECURSIVE"
    } else {
        "WITH"
    }
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim_end().trim_end_matches(';').trim_end()
}

/// `name(col1, col2) AS (body)`; the column list is omitted when unknown
fn render_cte(fragment: &Fragment) -> String {
    let columns = match fragment.columns() {
        Some(columns) if !columns.is_empty() => format!("({})", columns.join(", ")),
        _ => String::new(),
    };

    format!(
        "{}{} AS (\n{}\n)",
        fragment.name(),
        columns,
        strip_terminator(fragment.body()).trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::TestDataFixture;
    use crate::fragment::{FragmentId, FragmentKind};
    use pretty_assertions::assert_eq;

    fn cte(name: &str, body: &str, columns: Option<&[&str]>) -> Fragment {
        let mut fragment = Fragment::new(FragmentId(0), FragmentKind::Cte, name, body);
        fragment.columns = columns.map(|c| c.iter().map(|s| s.to_string()).collect());
        fragment
    }

    #[test]
    fn nothing_to_inject_returns_body() {
        let body = "SELECT 1;";
        assert_eq!(WithComposer::new().compose(body), body);
    }

    #[test]
    fn renders_ctes_with_and_without_columns() {
        let users = cte("users_base", "SELECT id, name FROM users;", Some(&["id", "name"]));
        let active = cte("active_users", "SELECT * FROM users_base WHERE active", None);

        let sql = WithComposer::new()
            .with_ctes(vec![&users, &active])
            .compose("SELECT * FROM active_users");

        assert_eq!(
            sql,
            "WITH users_base(id, name) AS (\nSELECT id, name FROM users\n),\n\
             active_users AS (\nSELECT * FROM users_base WHERE active\n)\n\
             SELECT * FROM active_users"
        );
    }

    #[test]
    fn fixture_comes_first() {
        let fixture = TestDataFixture::new("WITH users(id) AS (VALUES (1)),").definitions().unwrap();
        let base = cte("base", "SELECT id FROM users", None);

        let sql = WithComposer::new()
            .with_fixture(Some(&fixture))
            .with_ctes(vec![&base])
            .compose("SELECT id FROM base");

        assert_eq!(
            sql,
            "WITH users(id) AS (VALUES (1)),\nbase AS (\nSELECT id FROM users\n)\nSELECT id FROM base"
        );
    }

    #[test]
    fn merges_with_existing_with_clause() {
        let base = cte("base", "SELECT 1 AS n", None);

        let sql = WithComposer::new()
            .with_ctes(vec![&base])
            .compose("-- keep me\nWITH RECURSIVE walk AS (SELECT n FROM base) SELECT * FROM walk;");

        assert_eq!(
            sql,
            "-- keep me\nWITH RECURSIVE base AS (\nSELECT 1 AS n\n),\nwalk AS (SELECT n FROM base) SELECT * FROM walk"
        );
    }

    #[test]
    fn recursive_flag_upgrades_keyword() {
        let walk = cte("walk", "SELECT 1 AS n UNION ALL SELECT n + 1 FROM walk WHERE n < 3", None);
        let sql = WithComposer::new()
            .with_ctes(vec![&walk])
            .recursive(true)
            .compose("SELECT * FROM walk");

        assert!(sql.starts_with("WITH RECURSIVE walk AS ("));
    }
}
