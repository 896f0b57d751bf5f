//! Which input types can be derived from which, and how.

use dockhand_types::InputType;

/// How a derived input navigates from its parent's object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationRule {
    /// Read a scalar property off the parent. The input's declared property
    /// wins over `default_property`.
    Property { default_property: Option<&'static str> },
    /// Pick entries from a child list embedded in the parent, matched on
    /// `match_property` when the input carries a value. `aggregate` folds all
    /// matches into one value instead of fanning out.
    Children {
        key: &'static str,
        match_property: &'static str,
        aggregate: bool,
    },
    /// Load an enclosing object by the identifier stored in `reference_field`.
    Ancestor { reference_field: &'static str },
}

/// The rule for deriving `child` from `parent`, or `None` when the pair is
/// incompatible.
pub fn derivation_rule(parent: InputType, child: InputType) -> Option<DerivationRule> {
    use InputType::*;

    let rule = match (child, parent) {
        (String | Boolean | Number, parent) if parent.is_contextual() || parent == File => DerivationRule::Property { default_property: None },
        (Directory, parent) if parent.is_contextual() => DerivationRule::Property {
            default_property: Some("directory"),
        },
        (File, Resource) => children("files", "name", false),
        (Files, Resource) => children("files", "name", true),
        (Project, Subject | Session | Scan | Assessor | Resource) => DerivationRule::Ancestor {
            reference_field: "project-id",
        },
        (Subject, Project) => children("subjects", "id", false),
        (Subject, Session | Scan | Assessor) => DerivationRule::Ancestor {
            reference_field: "subject-id",
        },
        (Session, Subject) => children("sessions", "id", false),
        (Session, Scan | Assessor) => DerivationRule::Ancestor {
            reference_field: "session-id",
        },
        (Scan, Session) => children("scans", "id", false),
        (Assessor, Session) => children("assessors", "id", false),
        (Resource, Project | Subject | Session | Scan | Assessor) => children("resources", "id", false),
        _ => return None,
    };
    Some(rule)
}

fn children(key: &'static str, match_property: &'static str, aggregate: bool) -> DerivationRule {
    DerivationRule::Children {
        key,
        match_property,
        aggregate,
    }
}

/// Combines a value-derived `@.<property> == '<value>'` test with the input's
/// own matcher. `None` means every child passes.
pub fn child_filter(match_property: &str, value: Option<&str>, matcher: Option<&str>) -> Option<String> {
    let value_test = value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("@.{match_property} == '{}'", value.replace('\\', "\\\\").replace('\'', "\\'")));
    let matcher = matcher.map(str::trim).filter(|matcher| !matcher.is_empty());

    match (value_test, matcher) {
        (Some(value_test), Some(matcher)) => Some(format!("({value_test}) && ({matcher})")),
        (Some(value_test), None) => Some(value_test),
        (None, Some(matcher)) => Some(matcher.to_string()),
        (None, None) => None,
    }
}
