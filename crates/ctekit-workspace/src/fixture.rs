//! Test-data fixtures
//!
//! A fixture is literal WITH-style text defining synthetic relations, for
//! example `WITH users(id, name) AS (VALUES (1, 'a'))`. It is injected ahead
//! of the fragment's own CTEs so it can shadow real tables.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Leading `WITH` keyword of a statement, after comments and whitespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LeadingWith<'a> {
    /// Comments before the keyword, trimmed
    pub prefix: &'a str,
    pub recursive: bool,
    /// Everything after `WITH [RECURSIVE]`, trimmed at the start
    pub rest: &'a str,
}

pub(crate) fn leading_with(sql: &str) -> Option<LeadingWith<'_>> {
    static LEADING_WITH: OnceLock<Regex> = OnceLock::new();
    let re = LEADING_WITH.get_or_init(|| {
        Regex::new(r"(?is)^((?:\s+|--[^\n]*(?:\n|$)|/\*.*?\*/)*)WITH\b(\s+RECURSIVE\b)?")
            .expect("valid leading WITH regex")
    });

    let caps = re.captures(sql)?;
    let whole = caps.get(0)?;

    Some(LeadingWith {
        prefix: caps.get(1).map(|m| m.as_str().trim()).unwrap_or(""),
        recursive: caps.get(2).is_some(),
        rest: sql[whole.end()..].trim_start(),
    })
}

/// Fixture text as supplied by the user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestDataFixture {
    body: String,
}

/// Bare CTE definitions from a fixture, ready to be joined with others
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureDefinitions {
    pub definitions: String,
    pub recursive: bool,
}

impl TestDataFixture {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_empty(&self) -> bool {
        self.definitions().is_none()
    }

    /// Strip a leading `WITH [RECURSIVE]` and trailing commas, semicolons
    /// or comments. `None` when nothing is left.
    pub fn definitions(&self) -> Option<FixtureDefinitions> {
        let (text, recursive) = match leading_with(&self.body) {
            Some(with) => (with.rest, with.recursive),
            None => (self.body.as_str(), false),
        };

        let definitions = trim_trailing(text.trim());

        if definitions.is_empty() {
            return None;
        }

        Some(FixtureDefinitions {
            definitions: definitions.to_string(),
            recursive,
        })
    }
}

/// Drop separators and comments after the last definition, so whatever is
/// joined after it is not swallowed by a line comment
fn trim_trailing(mut text: &str) -> &str {
    loop {
        let trimmed = text.trim_end_matches(|c: char| c == ',' || c == ';' || c.is_whitespace());
        let trimmed = strip_trailing_comment(trimmed);
        if trimmed.len() == text.len() {
            return text;
        }
        text = trimmed;
    }
}

fn strip_trailing_comment(text: &str) -> &str {
    if text.ends_with("*/") {
        if let Some(start) = text.rfind("/*") {
            return &text[..start];
        }
    }

    let line_start = text.rfind('\n').map(|i| i + 1).unwrap_or(0);
    match line_comment_start(&text[line_start..]) {
        Some(offset) => &text[..line_start + offset],
        None => text,
    }
}

/// Byte offset of a `--` comment outside quotes
fn line_comment_start(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut chars = line.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '-' && matches!(chars.peek(), Some((_, '-'))) => return Some(index),
            None => {}
        }
    }
    None
}

impl From<&str> for TestDataFixture {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}
