//! Filter expressions used by `[?(...)]` selectors and input matchers.
//!
//! Grammar, loosest binding first: `||`, `&&`, leading `!`, parentheses,
//! then a single comparison (`==`, `!=`, `<`, `<=`, `>`, `>=`, `=~`, `in`)
//! or a bare operand tested for truthiness.
//!
//! Operands are `@`-relative paths (`@.label`, `@.scans[0].id`), root paths
//! (`$.id`), quoted strings, numbers, `true`/`false`/`null`, list literals
//! (`['a', 'b']`) and regex literals (`/^MR/i`). A bare identifier such as
//! `label` is read as `@.label`.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Number, Value};

use super::{QueryError, find_closing_bracket, index_into, read_name, unquote};

/// Answers "is type `candidate` the same as or derived from `ancestor`".
pub trait TypeHierarchy {
    fn is_a(&self, candidate: &str, ancestor: &str) -> bool;
}

/// Evaluation environment for a filter.
#[derive(Clone, Copy)]
pub struct FilterContext<'a> {
    pub root: &'a Value,
    pub hierarchy: Option<&'a dyn TypeHierarchy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep {
    Key(String),
    Index(i64),
}

#[derive(Debug, Clone)]
enum Operand {
    Current(Vec<PathStep>),
    Root(Vec<PathStep>),
    Literal(Value),
    Pattern(Regex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Matches,
    In,
}

const COMPARISONS: [(&str, Comparison); 8] = [
    ("=~", Comparison::Matches),
    ("==", Comparison::Equal),
    ("!=", Comparison::NotEqual),
    ("<=", Comparison::LessOrEqual),
    (">=", Comparison::GreaterOrEqual),
    ("<", Comparison::Less),
    (">", Comparison::Greater),
    (" in ", Comparison::In),
];

#[derive(Debug, Clone)]
enum Node {
    Any(Vec<Node>),
    All(Vec<Node>),
    Not(Box<Node>),
    Compare { left: Operand, comparison: Comparison, right: Operand },
    Truthy(Operand),
}

/// A parsed filter expression.
#[derive(Debug, Clone)]
pub struct Filter {
    root: Node,
}

impl Filter {
    pub fn parse(expression: &str) -> Result<Filter, QueryError> {
        parse_node(expression.trim(), expression).map(|root| Filter { root })
    }

    /// Whether `current` passes the filter.
    pub fn matches(&self, current: &Value, context: &FilterContext<'_>) -> bool {
        self.root.matches(current, context)
    }
}

impl Node {
    fn matches(&self, current: &Value, context: &FilterContext<'_>) -> bool {
        match self {
            Node::Any(parts) => parts.iter().any(|part| part.matches(current, context)),
            Node::All(parts) => parts.iter().all(|part| part.matches(current, context)),
            Node::Not(inner) => !inner.matches(current, context),
            Node::Truthy(operand) => match operand.resolve(current, context.root) {
                Some(Value::Null) | Some(Value::Bool(false)) | None => false,
                Some(_) => true,
            },
            Node::Compare { left, comparison, right } => compare(left, *comparison, right, current, context),
        }
    }
}

fn compare(left: &Operand, comparison: Comparison, right: &Operand, current: &Value, context: &FilterContext<'_>) -> bool {
    if comparison == Comparison::Matches {
        let Operand::Pattern(pattern) = right else {
            return false;
        };
        return left
            .resolve(current, context.root)
            .and_then(scalar_text)
            .is_some_and(|text| pattern.is_match(&text));
    }

    let left_value = left.resolve(current, context.root);
    let right_value = right.resolve(current, context.root);
    match comparison {
        Comparison::Equal => values_equal(left_value, right_value) || type_ancestry(left, left_value, right, right_value, context),
        Comparison::NotEqual => !(values_equal(left_value, right_value) || type_ancestry(left, left_value, right, right_value, context)),
        Comparison::Less => order(left_value, right_value) == Some(Ordering::Less),
        Comparison::LessOrEqual => matches!(order(left_value, right_value), Some(Ordering::Less | Ordering::Equal)),
        Comparison::Greater => order(left_value, right_value) == Some(Ordering::Greater),
        Comparison::GreaterOrEqual => matches!(order(left_value, right_value), Some(Ordering::Greater | Ordering::Equal)),
        Comparison::In => match (left_value, right_value) {
            (Some(needle), Some(Value::Array(items))) => items.iter().any(|item| loosely_equal(needle, item)),
            _ => false,
        },
        Comparison::Matches => false,
    }
}

fn values_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (Some(left), Some(right)) => loosely_equal(left, right),
        _ => false,
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (left, right) {
        (Value::Number(number), Value::String(text)) | (Value::String(text), Value::Number(number)) => {
            match (number.as_f64(), text.trim().parse::<f64>()) {
                (Some(number), Ok(parsed)) => number == parsed,
                _ => false,
            }
        }
        _ => false,
    }
}

/// `xsiType == 'X'` also holds when the object's type derives from `X`.
fn type_ancestry(left: &Operand, left_value: Option<&Value>, right: &Operand, right_value: Option<&Value>, context: &FilterContext<'_>) -> bool {
    let Some(hierarchy) = context.hierarchy else {
        return false;
    };
    let (candidate, ancestor) = if left.is_xsi_type_path() {
        (left_value, right_value)
    } else if right.is_xsi_type_path() {
        (right_value, left_value)
    } else {
        return false;
    };
    match (candidate.and_then(Value::as_str), ancestor.and_then(Value::as_str)) {
        (Some(candidate), Some(ancestor)) => hierarchy.is_a(candidate, ancestor),
        _ => false,
    }
}

fn order(left: Option<&Value>, right: Option<&Value>) -> Option<Ordering> {
    let (left, right) = (left?, right?);
    if let (Some(left), Some(right)) = (numeric(left), numeric(right)) {
        return left.partial_cmp(&right);
    }
    match (left, right) {
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

impl Operand {
    fn resolve<'a>(&'a self, current: &'a Value, root: &'a Value) -> Option<&'a Value> {
        match self {
            Operand::Current(steps) => walk(current, steps),
            Operand::Root(steps) => walk(root, steps),
            Operand::Literal(value) => Some(value),
            Operand::Pattern(_) => None,
        }
    }

    fn is_xsi_type_path(&self) -> bool {
        matches!(self, Operand::Current(steps) if steps.last() == Some(&PathStep::Key("xsiType".to_string())))
    }
}

fn walk<'a>(start: &'a Value, steps: &[PathStep]) -> Option<&'a Value> {
    let mut current = start;
    for step in steps {
        current = match step {
            PathStep::Key(key) => current.as_object()?.get(key)?,
            PathStep::Index(index) => index_into(current.as_array()?, *index)?,
        };
    }
    Some(current)
}

fn parse_node(expression: &str, original: &str) -> Result<Node, QueryError> {
    if expression.is_empty() {
        return Err(QueryError::syntax(original, "empty filter expression"));
    }
    if let Some(parts) = split_expression(expression, "||") {
        return parts.into_iter().map(|part| parse_node(part, original)).collect::<Result<_, _>>().map(Node::Any);
    }
    if let Some(parts) = split_expression(expression, "&&") {
        return parts.into_iter().map(|part| parse_node(part, original)).collect::<Result<_, _>>().map(Node::All);
    }

    let (negations, inner) = strip_leading_negations(expression);
    let inner = inner.trim();
    if inner.is_empty() {
        return Err(QueryError::syntax(original, "expression cannot end with negation operator"));
    }

    let node = match strip_enclosing_parentheses(inner) {
        Some(group) => parse_node(group, original)?,
        None => parse_comparison(inner, original)?,
    };
    Ok(if negations % 2 == 1 { Node::Not(Box::new(node)) } else { node })
}

fn parse_comparison(expression: &str, original: &str) -> Result<Node, QueryError> {
    for (token, comparison) in COMPARISONS {
        let Some(position) = find_top_level_operator(expression, token) else {
            continue;
        };
        let left = expression[..position].trim();
        let right = expression[position + token.len()..].trim();
        if left.is_empty() || right.is_empty() {
            return Err(QueryError::syntax(original, "comparison expression must include both left and right operands"));
        }
        let right = parse_operand(right, original)?;
        if comparison == Comparison::Matches && !matches!(right, Operand::Pattern(_)) {
            return Err(QueryError::syntax(original, "'=~' expects a /regex/ on the right"));
        }
        return Ok(Node::Compare {
            left: parse_operand(left, original)?,
            comparison,
            right,
        });
    }
    Ok(Node::Truthy(parse_operand(expression, original)?))
}

fn parse_operand(text: &str, original: &str) -> Result<Operand, QueryError> {
    if let Some(rest) = text.strip_prefix('@') {
        return parse_steps(rest, original).map(Operand::Current);
    }
    if let Some(rest) = text.strip_prefix('$') {
        return parse_steps(rest, original).map(Operand::Root);
    }
    if text.starts_with('\'') || text.starts_with('"') {
        return unquote(text)
            .map(|literal| Operand::Literal(Value::String(literal)))
            .ok_or_else(|| QueryError::syntax(original, format!("unterminated string {text}")));
    }
    if let Some(rest) = text.strip_prefix('/') {
        return parse_pattern(rest, original).map(Operand::Pattern);
    }
    if text.starts_with('[') {
        return parse_list(text, original).map(Operand::Literal);
    }
    if let Some(literal) = parse_scalar_literal(text) {
        return Ok(Operand::Literal(literal));
    }
    parse_steps(&format!(".{text}"), original).map(Operand::Current)
}

fn parse_scalar_literal(text: &str) -> Option<Value> {
    match text {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    let looks_numeric = text.chars().next().is_some_and(|character| character == '-' || character.is_ascii_digit());
    if !looks_numeric {
        return None;
    }
    if let Ok(integer) = text.parse::<i64>() {
        return Some(Value::Number(Number::from(integer)));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

fn parse_pattern(rest: &str, original: &str) -> Result<Regex, QueryError> {
    let Some(close) = rest.rfind('/') else {
        return Err(QueryError::syntax(original, "unterminated regex literal"));
    };
    let (pattern, flags) = (&rest[..close], &rest[close + 1..]);
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            other => return Err(QueryError::syntax(original, format!("unsupported regex flag '{other}'"))),
        }
    }
    builder.build().map_err(|error| QueryError::syntax(original, error.to_string()))
}

fn parse_list(text: &str, original: &str) -> Result<Value, QueryError> {
    let inner = text
        .strip_prefix('[')
        .and_then(|value| value.strip_suffix(']'))
        .ok_or_else(|| QueryError::syntax(original, "unterminated list literal"))?
        .trim();
    if inner.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let mut items = Vec::new();
    for item in split_top_level(inner, ',') {
        match parse_operand(item.trim(), original)? {
            Operand::Literal(value) => items.push(value),
            _ => return Err(QueryError::syntax(original, "list literals may only contain literals")),
        }
    }
    Ok(Value::Array(items))
}

fn parse_steps(mut rest: &str, original: &str) -> Result<Vec<PathStep>, QueryError> {
    let mut steps = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let (name, remaining) = read_name(after);
            if name.is_empty() {
                return Err(QueryError::syntax(original, "empty key after '.'"));
            }
            steps.push(PathStep::Key(name.to_string()));
            rest = remaining;
        } else if rest.starts_with('[') {
            let close = find_closing_bracket(rest).ok_or_else(|| QueryError::syntax(original, "unbalanced '['"))?;
            let inner = rest[1..close].trim();
            let step = match unquote(inner) {
                Some(key) => PathStep::Key(key),
                None => inner
                    .parse::<i64>()
                    .map(PathStep::Index)
                    .map_err(|_| QueryError::syntax(original, format!("unsupported selector '[{inner}]' in filter path")))?,
            };
            steps.push(step);
            rest = &rest[close + 1..];
        } else {
            return Err(QueryError::syntax(original, format!("unexpected input '{rest}' in filter path")));
        }
    }
    Ok(steps)
}

fn strip_enclosing_parentheses(expression: &str) -> Option<&str> {
    if !expression.starts_with('(') || !expression.ends_with(')') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            '(' if !in_single_quote && !in_double_quote => depth += 1,
            ')' if !in_single_quote && !in_double_quote => {
                depth -= 1;
                if depth == 0 {
                    return (index == expression.len() - 1).then(|| expression[1..index].trim());
                }
            }
            _ => {}
        }
    }
    None
}

fn split_expression<'a>(expression: &'a str, operator: &str) -> Option<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let length = expression.len();

    while start < length {
        if let Some(relative_index) = find_top_level_operator(&expression[start..], operator) {
            let absolute_index = start + relative_index;
            parts.push(expression[start..absolute_index].trim());
            start = absolute_index + operator.len();
        } else {
            parts.push(expression[start..].trim());
            break;
        }
    }

    if parts.len() > 1 { Some(parts) } else { None }
}

fn split_top_level(expression: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut encoded = [0u8; 4];
    let separator = separator.encode_utf8(&mut encoded);
    while let Some(relative_index) = find_top_level_operator(&expression[start..], separator) {
        parts.push(&expression[start..start + relative_index]);
        start += relative_index + separator.len();
    }
    parts.push(&expression[start..]);
    parts
}

fn strip_leading_negations(expression: &str) -> (usize, &str) {
    let mut count = 0usize;
    let mut remainder = expression.trim_start();
    while let Some(stripped) = remainder.strip_prefix('!') {
        if stripped.starts_with('=') {
            break;
        }
        count += 1;
        remainder = stripped.trim_start();
    }
    (count, remainder)
}

fn find_top_level_operator(expression: &str, operator: &str) -> Option<usize> {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut depth = 0i32;

    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                continue;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                continue;
            }
            '(' | '[' if !in_single_quote && !in_double_quote => {
                depth += 1;
                continue;
            }
            ')' | ']' if !in_single_quote && !in_double_quote => {
                if depth > 0 {
                    depth -= 1;
                }
                continue;
            }
            _ => {}
        }

        if !in_single_quote && !in_double_quote && depth == 0 && expression[index..].starts_with(operator) {
            return Some(index);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(expression: &str, value: &Value) -> bool {
        let filter = Filter::parse(expression).expect("filter parses");
        filter.matches(value, &FilterContext { root: value, hierarchy: None })
    }

    #[test]
    fn bare_identifiers_are_relative_paths() {
        let session = json!({"label": "MR1", "id": "E01"});
        assert!(check("label == 'MR1'", &session));
        assert!(check("@.label == \"MR1\"", &session));
        assert!(!check("label == 'MR2'", &session));
    }

    #[test]
    fn boolean_operators_and_grouping() {
        let scan = json!({"id": "4", "scan-type": "T1", "quality": 3, "usable": true});
        assert!(check("(@.scan-type == 'T2' || @.scan-type == 'T1') && @.quality >= 3", &scan));
        assert!(check("!(@.quality < 3)", &scan));
        assert!(check("@.usable", &scan));
        assert!(!check("@.missing", &scan));
        assert!(check("@.id == 4", &scan));
        assert!(check("@.scan-type in ['T1', 'T2']", &scan));
    }

    #[test]
    fn regex_matching_supports_case_insensitivity() {
        let scan = json!({"series-description": "Sagittal T1 MPRAGE"});
        assert!(check("@.series-description =~ /mprage/i", &scan));
        assert!(!check("@.series-description =~ /^T1/", &scan));
    }

    #[test]
    fn missing_paths_never_equal() {
        let object = json!({"a": null});
        assert!(!check("@.b == @.c", &object));
        assert!(check("@.b != 'x'", &object));
    }

    struct DerivedSessions;

    impl TypeHierarchy for DerivedSessions {
        fn is_a(&self, candidate: &str, ancestor: &str) -> bool {
            candidate == "xnat:mrSessionData" && ancestor == "xnat:imageSessionData"
        }
    }

    #[test]
    fn xsi_type_comparison_consults_hierarchy() {
        let session = json!({"xsiType": "xnat:mrSessionData"});
        let filter = Filter::parse("@.xsiType == 'xnat:imageSessionData'").expect("filter parses");
        let plain = FilterContext { root: &session, hierarchy: None };
        let widened = FilterContext {
            root: &session,
            hierarchy: Some(&DerivedSessions),
        };
        assert!(!filter.matches(&session, &plain));
        assert!(filter.matches(&session, &widened));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(Filter::parse("").is_err());
        assert!(Filter::parse("@.a ==").is_err());
        assert!(Filter::parse("@.a =~ 'x'").is_err());
        assert!(Filter::parse("!").is_err());
        assert!(Filter::parse("@.a == 'open").is_err());
    }
}
