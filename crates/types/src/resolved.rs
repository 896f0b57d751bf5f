//! Artefacts produced by a resolution pass: input trees, mounts, outputs and
//! the final launchable plan.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{Input, InputType, OutputHandlerType};
use crate::domain::DomainObject;

/// Static dependency node: an input and the inputs that hang off it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct PreresolvedInputTreeNode {
    pub input: Input,
    #[serde(default)]
    pub children: Vec<PreresolvedInputTreeNode>,
}

impl PreresolvedInputTreeNode {
    pub fn new(input: Input) -> Self {
        Self { input, children: Vec::new() }
    }

    /// Depth-first visit of this node and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a PreresolvedInputTreeNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// One concrete resolution of an input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedInputValue {
    pub r#type: InputType,
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_label: Option<String>,
    /// Serialized form of the resolved object, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_value: Option<String>,
    #[serde(skip)]
    pub domain_object: Option<DomainObject>,
}

impl ResolvedInputValue {
    /// A scalar value with no backing object.
    pub fn scalar(r#type: InputType, value: Option<String>) -> Self {
        Self {
            r#type,
            json_value: value.clone(),
            value,
            value_label: None,
            domain_object: None,
        }
    }

    /// A value backed by a contextual object; the value is the object's URI.
    pub fn object(object: DomainObject) -> Self {
        Self {
            r#type: object.kind,
            value: object.uri().map(str::to_string),
            value_label: object.label().map(str::to_string),
            json_value: Some(object.to_json_string()),
            domain_object: Some(object),
        }
    }

    /// JSON form of the backing object, parsed back from `json-value` when
    /// the handle itself is not attached.
    pub fn json(&self) -> Option<Value> {
        if let Some(object) = &self.domain_object {
            return Some(object.json.clone());
        }
        self.json_value
            .as_deref()
            .and_then(|text| serde_json::from_str::<Value>(text).ok())
            .filter(|value| value.is_object() || value.is_array())
    }
}

/// A resolved value together with the subtrees resolved beneath it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedValueAndChildren {
    pub resolved_value: ResolvedInputValue,
    #[serde(default)]
    pub children: Vec<ResolvedInputTreeNode>,
}

/// Runtime mirror of [`PreresolvedInputTreeNode`] holding every value the
/// input resolved to. One entry means the input resolved uniquely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedInputTreeNode {
    pub input: Input,
    #[serde(default)]
    pub values_and_children: Vec<ResolvedValueAndChildren>,
}

impl ResolvedInputTreeNode {
    pub fn is_uniquely_resolved(&self) -> bool {
        self.values_and_children.len() == 1
    }

    /// Depth-first visit of this node and every node under every value.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a ResolvedInputTreeNode)) {
        visit(self);
        for entry in &self.values_and_children {
            for child in &entry.children {
                child.walk(visit);
            }
        }
    }
}

/// How a mount's files reach the container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MountStaging {
    /// The source directory is mounted as is.
    Direct,
    /// Source files are copied into a fresh build directory.
    Copy,
    /// A fresh, empty, writable build directory.
    Empty,
}

/// Provenance of files placed in a mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedMountFiles {
    pub from_wrapper_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedMount {
    pub name: String,
    pub writable: bool,
    pub container_path: Option<String>,
    /// Host-side directory backing the mount.
    #[serde(rename = "xnat-host-path")]
    pub host_path: String,
    /// The same directory as seen from the container host.
    pub container_host_path: String,
    #[serde(default)]
    pub input_files: Vec<ResolvedMountFiles>,
    pub staging: MountStaging,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedOutput {
    pub name: String,
    pub from_command_output: String,
    pub from_output_handler: String,
    pub r#type: OutputHandlerType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Wrapper input whose object receives the upload.
    pub handled_by: String,
    /// URI of that object.
    pub handled_by_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_wrapup_command: Option<String>,
}

/// A fully resolved, launchable plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedCommand {
    pub wrapper_id: i64,
    pub wrapper_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_description: Option<String>,
    pub command_id: i64,
    pub command_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Runtime values exactly as the caller supplied them.
    #[serde(default)]
    pub raw_input_values: IndexMap<String, String>,
    #[serde(default)]
    pub external_wrapper_input_values: IndexMap<String, Option<String>>,
    #[serde(default)]
    pub derived_input_values: IndexMap<String, Option<String>>,
    #[serde(default)]
    pub command_input_values: IndexMap<String, Option<String>>,
    pub command_line: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_entrypoint: Option<bool>,
    #[serde(default)]
    pub environment_variables: IndexMap<String, String>,
    #[serde(default)]
    pub ports: IndexMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<ResolvedMount>,
    #[serde(default)]
    pub outputs: Vec<ResolvedOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_memory: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_memory: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_cpu: Option<f64>,
}

/// Preview produced without enforcing required inputs or touching mounts
/// and outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PartiallyResolvedCommand {
    pub wrapper_id: i64,
    pub wrapper_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_description: Option<String>,
    pub command_id: i64,
    pub command_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub raw_input_values: IndexMap<String, String>,
    #[serde(default)]
    pub resolved_input_trees: Vec<ResolvedInputTreeNode>,
}
