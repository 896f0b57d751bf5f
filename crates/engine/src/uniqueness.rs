//! Collects replacement-key values from uniquely resolved nodes.
//!
//! A node contributes only while it and every ancestor resolved to exactly
//! one value; a fan-out stops the walk for that whole subtree.

use dockhand_types::{Input, ResolvedInputTreeNode};

use crate::templates::SubstitutionMap;

/// Raw values keyed by replacement key. Null values register as `""`.
pub fn raw_values(tree: &ResolvedInputTreeNode) -> SubstitutionMap {
    let mut collected = SubstitutionMap::new();
    visit_unique(tree, &mut |node, value| {
        collected.insert(node.input.replacement_key(), value.unwrap_or_default());
    });
    collected
}

/// Command-line formatted values of command inputs, keyed by replacement key.
pub fn command_line_values(tree: &ResolvedInputTreeNode) -> SubstitutionMap {
    let mut collected = SubstitutionMap::new();
    visit_unique(tree, &mut |node, value| {
        if let Input::Command(input) = &node.input {
            let formatted = format_command_line_value(
                input.command_line_flag.as_deref(),
                input.command_line_separator.as_deref(),
                value.as_deref(),
            );
            collected.insert(node.input.replacement_key(), formatted);
        }
    });
    collected
}

/// `flag + separator + value`; the separator defaults to a single space.
/// A missing value drops the flag too.
pub fn format_command_line_value(flag: Option<&str>, separator: Option<&str>, value: Option<&str>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    match flag.filter(|flag| !flag.trim().is_empty()) {
        Some(flag) => format!("{flag}{}{value}", separator.unwrap_or(" ")),
        None => value.to_string(),
    }
}

/// Visits every uniquely resolved node with its single value.
pub fn visit_unique(tree: &ResolvedInputTreeNode, visit: &mut dyn FnMut(&ResolvedInputTreeNode, Option<String>)) {
    let [only] = tree.values_and_children.as_slice() else {
        return;
    };
    visit(tree, only.resolved_value.value.clone());
    for child in &only.children {
        visit_unique(child, visit);
    }
}
