//! Template resolution for command lines, paths, labels, matchers and values.
//!
//! A template is resolved in two phases:
//!
//! 1. Path queries between `^` markers (`^$.inputs[0].name^`, or
//!    `^wrapper:$.name^` to read the wrapper instead of the command) are
//!    evaluated against snapshots taken when the resolver is built. A single
//!    result is spliced in, no result leaves the marker untouched, several
//!    results are an error.
//! 2. Every replacement key in the substitution map is replaced literally.

use std::sync::Arc;

use dockhand_types::ConfiguredCommand;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::ResolutionError;
use crate::query::PathQuery;

static PATH_QUERY_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\^(wrapper:)?([^^]+)\^").expect("path query marker pattern is valid"));

/// Replacement keys and the text substituted for them.
///
/// Cloning is cheap; [`SubstitutionMap::with`] copies the entries only for the
/// branch that adds to them, so sibling branches never observe each other's
/// additions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionMap {
    entries: Arc<IndexMap<String, String>>,
}

impl SubstitutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of this map with `key` set to `value`.
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.insert(key, value);
        next
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        Arc::make_mut(&mut self.entries).insert(key.into(), value.into());
    }

    /// Adds every entry of `other`, overwriting existing keys.
    pub fn extend(&mut self, other: &SubstitutionMap) {
        if other.is_empty() {
            return;
        }
        let entries = Arc::make_mut(&mut self.entries);
        for (key, value) in other.iter() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves templates against read-only snapshots of one configured command.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    command_snapshot: Value,
    wrapper_snapshot: Value,
}

impl TemplateResolver {
    pub fn new(configured: &ConfiguredCommand) -> Result<Self, ResolutionError> {
        Ok(Self {
            command_snapshot: serde_json::to_value(configured)?,
            wrapper_snapshot: serde_json::to_value(&configured.wrapper)?,
        })
    }

    /// Resolves `template` fully: path queries first, then replacement keys.
    /// Blank templates are returned unchanged.
    pub fn resolve(&self, template: &str, substitutions: &SubstitutionMap) -> Result<String, ResolutionError> {
        if template.trim().is_empty() {
            return Ok(template.to_string());
        }
        let mut resolved = self.resolve_path_queries(template)?;
        for (key, value) in substitutions.iter() {
            if !key.is_empty() && resolved.contains(key) {
                resolved = resolved.replace(key, value);
            }
        }
        Ok(resolved)
    }

    /// [`TemplateResolver::resolve`] lifted over an optional template.
    pub fn resolve_optional(&self, template: Option<&str>, substitutions: &SubstitutionMap) -> Result<Option<String>, ResolutionError> {
        template.map(|template| self.resolve(template, substitutions)).transpose()
    }

    /// Evaluates every `^...^` path query in `template`, leaving replacement
    /// keys alone.
    pub fn resolve_path_queries(&self, template: &str) -> Result<String, ResolutionError> {
        if !template.contains('^') {
            return Ok(template.to_string());
        }

        let mut resolved = String::with_capacity(template.len());
        let mut last_end = 0;
        for captures in PATH_QUERY_MARKER.captures_iter(template) {
            let (Some(marker), Some(query)) = (captures.get(0), captures.get(2)) else {
                continue;
            };
            let snapshot = if captures.get(1).is_some() { &self.wrapper_snapshot } else { &self.command_snapshot };
            let parsed = PathQuery::parse(query.as_str())?;
            let results = parsed.select(snapshot);

            resolved.push_str(&template[last_end..marker.start()]);
            match results.as_slice() {
                [] | [Value::Null] => {
                    debug!(query = query.as_str(), "path query matched nothing; leaving marker in place");
                    resolved.push_str(marker.as_str());
                }
                [single] => {
                    let text = format_json_value(single);
                    debug!(query = query.as_str(), result = %text, "path query resolved");
                    resolved.push_str(&text);
                }
                many => {
                    return Err(ResolutionError::AmbiguousPathQuery {
                        query: query.as_str().to_string(),
                        matches: many.len(),
                    });
                }
            }
            last_end = marker.end();
        }
        resolved.push_str(&template[last_end..]);
        Ok(resolved)
    }
}

/// Renders a JSON value as template text.
pub(crate) fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => String::new(),
        other_value => other_value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_types::{Command, CommandInput, CommandWrapper};

    fn resolver() -> TemplateResolver {
        let command = Command {
            name: "job".into(),
            image: Some("example/job:1".into()),
            inputs: vec![
                CommandInput {
                    name: "threshold".into(),
                    default_value: Some("0.5".into()),
                    ..Default::default()
                },
                CommandInput {
                    name: "mode".into(),
                    default_value: Some("fast".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let wrapper = CommandWrapper {
            name: "session-wrapper".into(),
            ..Default::default()
        };
        TemplateResolver::new(&ConfiguredCommand::new(command, wrapper)).expect("snapshots")
    }

    #[test]
    fn templates_without_placeholders_are_unchanged() {
        let resolver = resolver();
        let template = "run.sh --verbose";
        assert_eq!(resolver.resolve(template, &SubstitutionMap::new()).expect("resolve"), template);
        assert_eq!(resolver.resolve("   ", &SubstitutionMap::new()).expect("resolve"), "   ");
    }

    #[test]
    fn replacement_keys_are_substituted() {
        let substitutions = SubstitutionMap::new().with("#in#", "/data").with("#empty#", "");
        let resolved = resolver().resolve("run.sh #in# [#empty#] #unknown#", &substitutions).expect("resolve");
        assert_eq!(resolved, "run.sh /data [] #unknown#");
    }

    #[test]
    fn single_path_query_result_is_spliced() {
        let resolver = resolver();
        let resolved = resolver
            .resolve("img=^$.image^ t=^$.inputs[?(@.name == 'threshold')].default-value^", &SubstitutionMap::new())
            .expect("resolve");
        assert_eq!(resolved, "img=example/job:1 t=0.5");
        let wrapper = resolver.resolve("^wrapper:$.name^", &SubstitutionMap::new()).expect("resolve");
        assert_eq!(wrapper, "session-wrapper");
    }

    #[test]
    fn unmatched_path_query_is_left_in_place() {
        let resolved = resolver().resolve("x=^$.nothing^", &SubstitutionMap::new()).expect("resolve");
        assert_eq!(resolved, "x=^$.nothing^");
    }

    #[test]
    fn ambiguous_path_query_fails() {
        let error = resolver()
            .resolve("^$.inputs[*].name^", &SubstitutionMap::new())
            .expect_err("two inputs match");
        assert!(matches!(error, ResolutionError::AmbiguousPathQuery { matches: 2, .. }));
    }

    #[test]
    fn marker_without_a_query_root_is_rejected() {
        let error = resolver().resolve("x=^foo^", &SubstitutionMap::new()).expect_err("not a path query");
        assert!(matches!(error, ResolutionError::InvalidPathQuery(_)));
        let error = resolver().resolve("^wrapper:name^", &SubstitutionMap::new()).expect_err("not a path query");
        assert!(matches!(error, ResolutionError::InvalidPathQuery(_)));
    }

    #[test]
    fn carets_outside_queries_are_plain_text() {
        let resolved = resolver().resolve("@.label =~ /^MR/", &SubstitutionMap::new()).expect("resolve");
        assert_eq!(resolved, "@.label =~ /^MR/");
    }

    #[test]
    fn branch_copies_do_not_leak_into_parent() {
        let parent = SubstitutionMap::new().with("#a#", "1");
        let left = parent.with("#b#", "left");
        let right = parent.with("#b#", "right");
        assert_eq!(parent.get("#b#"), None);
        assert_eq!(left.get("#b#"), Some("left"));
        assert_eq!(right.get("#b#"), Some("right"));
    }
}
