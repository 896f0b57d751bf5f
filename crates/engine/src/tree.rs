//! Builds the static input dependency tree for one configured command.
//!
//! External inputs become roots. Derived inputs hang under the input they
//! derive from, which must be declared earlier. Command inputs hang under
//! the wrapper input that provides their value, or become roots.

use std::collections::HashMap;

use dockhand_types::{ConfiguredCommand, Input, PreresolvedInputTreeNode};
use tracing::{debug, warn};

use crate::error::ResolutionError;

struct PendingNode {
    input: Input,
    children: Vec<usize>,
}

/// Returns the root nodes in declaration order.
pub fn build_input_trees(configured: &ConfiguredCommand) -> Result<Vec<PreresolvedInputTreeNode>, ResolutionError> {
    let wrapper = &configured.wrapper;
    let mut nodes: Vec<PendingNode> = Vec::new();
    let mut wrapper_inputs: HashMap<&str, usize> = HashMap::new();
    let mut roots = Vec::new();

    for input in &wrapper.external_inputs {
        if wrapper_inputs.contains_key(input.name.as_str()) {
            return Err(ResolutionError::configuration(format!("wrapper input '{}' is declared twice", input.name)));
        }
        wrapper_inputs.insert(&input.name, nodes.len());
        roots.push(nodes.len());
        nodes.push(PendingNode {
            input: Input::External(input.clone()),
            children: Vec::new(),
        });
    }

    for input in &wrapper.derived_inputs {
        if wrapper_inputs.contains_key(input.name.as_str()) {
            return Err(ResolutionError::configuration(format!("wrapper input '{}' is declared twice", input.name)));
        }
        let Some(&parent) = wrapper_inputs.get(input.derived_from_wrapper_input.as_str()) else {
            return Err(ResolutionError::configuration(format!(
                "derived input '{}' is derived from '{}', which is not declared before it",
                input.name, input.derived_from_wrapper_input
            )));
        };
        let index = nodes.len();
        wrapper_inputs.insert(&input.name, index);
        nodes[parent].children.push(index);
        nodes.push(PendingNode {
            input: Input::Derived(input.clone()),
            children: Vec::new(),
        });
    }

    let providers: HashMap<String, usize> = nodes
        .iter()
        .enumerate()
        .rev()
        .filter_map(|(index, node)| node.input.provides_value_for().map(|name| (name.to_string(), index)))
        .collect();

    for provided in providers.keys() {
        if !configured.command.inputs.iter().any(|input| input.name == *provided) {
            warn!(command_input = %provided, "wrapper input provides a value for an undeclared command input");
        }
    }

    for input in &configured.command.inputs {
        let index = nodes.len();
        nodes.push(PendingNode {
            input: Input::Command(input.clone()),
            children: Vec::new(),
        });
        match providers.get(input.name.as_str()) {
            Some(&parent) => nodes[parent].children.push(index),
            None => roots.push(index),
        }
    }

    debug!(
        wrapper = %wrapper.name,
        node_count = nodes.len(),
        root_count = roots.len(),
        "input tree built"
    );

    let mut slots: Vec<Option<PendingNode>> = nodes.into_iter().map(Some).collect();
    Ok(roots.into_iter().filter_map(|root| assemble(root, &mut slots)).collect())
}

fn assemble(index: usize, slots: &mut [Option<PendingNode>]) -> Option<PreresolvedInputTreeNode> {
    let pending = slots.get_mut(index)?.take()?;
    let children = pending.children.into_iter().filter_map(|child| assemble(child, slots)).collect();
    Some(PreresolvedInputTreeNode {
        input: pending.input,
        children,
    })
}
