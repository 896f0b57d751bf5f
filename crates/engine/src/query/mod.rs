//! Path queries over serialized command, wrapper and object snapshots.
//!
//! The supported subset of JSONPath:
//!
//! - `$` the document root
//! - `.name`, `['name']` child keys
//! - `[n]`, `[-n]` array indices
//! - `[*]`, `.*` every child
//! - `..name`, `..*` recursive descent
//! - `[?(filter)]` elements (or the object itself) passing a [`Filter`]
//!
//! Queries always produce a list; callers decide what zero or many results mean.

pub mod filter;

use serde_json::Value;
use thiserror::Error;

pub use filter::{Filter, FilterContext, TypeHierarchy};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid path query '{query}': {reason}")]
    Syntax { query: String, reason: String },
}

impl QueryError {
    pub(crate) fn syntax(query: &str, reason: impl Into<String>) -> Self {
        QueryError::Syntax {
            query: query.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(i64),
    Wildcard,
    /// `..name`; `None` for `..*`.
    Descendant(Option<String>),
    Filter(Filter),
}

/// A parsed path query, reusable across documents.
#[derive(Debug, Clone)]
pub struct PathQuery {
    text: String,
    segments: Vec<Segment>,
}

impl PathQuery {
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let trimmed = text.trim();
        let Some(mut rest) = trimmed.strip_prefix('$') else {
            return Err(QueryError::syntax(text, "query must start with '$'"));
        };

        let mut segments = Vec::new();
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("..") {
                if let Some(remaining) = after.strip_prefix('*') {
                    segments.push(Segment::Descendant(None));
                    rest = remaining;
                } else {
                    let (name, remaining) = read_name(after);
                    if name.is_empty() {
                        return Err(QueryError::syntax(text, "recursive descent needs a key"));
                    }
                    segments.push(Segment::Descendant(Some(name.to_string())));
                    rest = remaining;
                }
            } else if let Some(after) = rest.strip_prefix('.') {
                if let Some(remaining) = after.strip_prefix('*') {
                    segments.push(Segment::Wildcard);
                    rest = remaining;
                } else {
                    let (name, remaining) = read_name(after);
                    if name.is_empty() {
                        return Err(QueryError::syntax(text, "empty key after '.'"));
                    }
                    segments.push(Segment::Key(name.to_string()));
                    rest = remaining;
                }
            } else if rest.starts_with('[') {
                let close = find_closing_bracket(rest).ok_or_else(|| QueryError::syntax(text, "unbalanced '['"))?;
                let inner = rest[1..close].trim();
                segments.push(parse_bracket(inner, text)?);
                rest = &rest[close + 1..];
            } else {
                return Err(QueryError::syntax(text, format!("unexpected input '{rest}'")));
            }
        }

        Ok(Self {
            text: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Selects matching nodes, treating `xsiType` comparisons as plain equality.
    pub fn select<'a>(&self, document: &'a Value) -> Vec<&'a Value> {
        self.select_with(document, None)
    }

    /// Selects matching nodes; `hierarchy` widens `xsiType` equality to subtypes.
    pub fn select_with<'a>(&self, document: &'a Value, hierarchy: Option<&dyn TypeHierarchy>) -> Vec<&'a Value> {
        let context = FilterContext { root: document, hierarchy };
        let mut current = vec![document];
        for segment in &self.segments {
            current = apply_segment(segment, current, &context);
            if current.is_empty() {
                break;
            }
        }
        current
    }
}

fn parse_bracket(inner: &str, query: &str) -> Result<Segment, QueryError> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Some(expression) = inner.strip_prefix('?') {
        let expression = expression.trim();
        let expression = expression
            .strip_prefix('(')
            .and_then(|value| value.strip_suffix(')'))
            .unwrap_or(expression);
        return Ok(Segment::Filter(Filter::parse(expression)?));
    }
    if let Some(key) = unquote(inner) {
        return Ok(Segment::Key(key));
    }
    inner
        .parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| QueryError::syntax(query, format!("unsupported selector '[{inner}]'")))
}

fn apply_segment<'a>(segment: &Segment, nodes: Vec<&'a Value>, context: &FilterContext<'_>) -> Vec<&'a Value> {
    let mut selected = Vec::new();
    for node in nodes {
        match segment {
            Segment::Key(key) => {
                if let Some(child) = node.as_object().and_then(|map| map.get(key)) {
                    selected.push(child);
                }
            }
            Segment::Index(index) => {
                if let Some(child) = node.as_array().and_then(|items| index_into(items, *index)) {
                    selected.push(child);
                }
            }
            Segment::Wildcard => selected.extend(children(node)),
            Segment::Descendant(name) => collect_descendants(node, name.as_deref(), &mut selected),
            Segment::Filter(filter) => match node {
                Value::Array(items) => selected.extend(items.iter().filter(|item| filter.matches(item, context))),
                Value::Object(_) if filter.matches(node, context) => selected.push(node),
                _ => {}
            },
        }
    }
    selected
}

fn children(node: &Value) -> Vec<&Value> {
    match node {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    }
}

fn collect_descendants<'a>(node: &'a Value, name: Option<&str>, selected: &mut Vec<&'a Value>) {
    match (node, name) {
        (Value::Object(map), Some(key)) => {
            if let Some(value) = map.get(key) {
                selected.push(value);
            }
        }
        (_, None) => selected.extend(children(node)),
        _ => {}
    }
    for child in children(node) {
        collect_descendants(child, name, selected);
    }
}

pub(crate) fn index_into(items: &[Value], index: i64) -> Option<&Value> {
    let position = if index < 0 {
        items.len().checked_sub(index.unsigned_abs() as usize)?
    } else {
        index as usize
    };
    items.get(position)
}

/// Splits a leading key off `input`, stopping at `.`, `[` or whitespace.
pub(crate) fn read_name(input: &str) -> (&str, &str) {
    let end = input
        .char_indices()
        .find(|(_, character)| *character == '.' || *character == '[' || character.is_whitespace())
        .map(|(index, _)| index)
        .unwrap_or(input.len());
    (&input[..end], &input[end..])
}

/// Index of the `]` closing the `[` at the start of `input`, skipping quoted
/// text and nested brackets or parentheses.
pub(crate) fn find_closing_bracket(input: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    for (index, character) in input.char_indices() {
        match character {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            '[' | '(' if !in_single_quote && !in_double_quote => depth += 1,
            ']' | ')' if !in_single_quote && !in_double_quote => {
                depth -= 1;
                if depth == 0 {
                    return (character == ']').then_some(index);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strips matching single or double quotes and resolves backslash escapes.
pub(crate) fn unquote(text: &str) -> Option<String> {
    let quote = text.chars().next().filter(|character| *character == '\'' || *character == '"')?;
    let body = text.strip_prefix(quote)?.strip_suffix(quote)?;
    if text.len() < 2 {
        return None;
    }
    let mut unescaped = String::with_capacity(body.len());
    let mut characters = body.chars();
    while let Some(character) = characters.next() {
        if character == '\\' {
            if let Some(next) = characters.next() {
                unescaped.push(next);
            }
        } else {
            unescaped.push(character);
        }
    }
    Some(unescaped)
}
