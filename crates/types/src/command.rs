//! Command and wrapper definitions as they appear in stored JSON/YAML documents.
//!
//! Every struct here serializes with kebab-case keys so documents written by
//! existing tooling round-trip unchanged. Optional scalars are omitted when
//! absent; collections always serialize, defaulting to empty when missing.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Type tag carried by every input.
///
/// Plain command inputs only use the primitive tags (`string`, `boolean`,
/// `number`); wrapper inputs may use any of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum InputType {
    #[default]
    #[serde(rename = "string")]
    String,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "Directory")]
    Directory,
    #[serde(rename = "File[]")]
    Files,
    #[serde(rename = "File")]
    File,
    #[serde(rename = "Project")]
    Project,
    #[serde(rename = "Subject")]
    Subject,
    #[serde(rename = "Session")]
    Session,
    #[serde(rename = "Scan")]
    Scan,
    #[serde(rename = "Assessor")]
    Assessor,
    #[serde(rename = "Resource")]
    Resource,
    #[serde(rename = "Config")]
    Config,
}

impl InputType {
    /// Wire name of the type tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::String => "string",
            InputType::Boolean => "boolean",
            InputType::Number => "number",
            InputType::Directory => "Directory",
            InputType::Files => "File[]",
            InputType::File => "File",
            InputType::Project => "Project",
            InputType::Subject => "Subject",
            InputType::Session => "Session",
            InputType::Scan => "Scan",
            InputType::Assessor => "Assessor",
            InputType::Resource => "Resource",
            InputType::Config => "Config",
        }
    }

    /// Scalar tags whose values are plain strings.
    pub fn is_primitive(&self) -> bool {
        matches!(self, InputType::String | InputType::Boolean | InputType::Number)
    }

    /// Tags that refer to objects in the host's containment hierarchy and are
    /// instantiated through the domain-object collaborator.
    pub fn is_contextual(&self) -> bool {
        matches!(
            self,
            InputType::Project
                | InputType::Subject
                | InputType::Session
                | InputType::Scan
                | InputType::Assessor
                | InputType::Resource
                | InputType::Config
        )
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reusable, templated container job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Command {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Runtime flavour; `docker` unless stated otherwise.
    #[serde(default = "default_command_type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Template for the container's working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Template for the command line handed to the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_entrypoint: Option<bool>,
    #[serde(default)]
    pub mounts: Vec<CommandMount>,
    /// Environment variable templates; keys and values both resolve.
    #[serde(default)]
    pub environment_variables: IndexMap<String, String>,
    /// Container port to host port templates.
    #[serde(default)]
    pub ports: IndexMap<String, String>,
    #[serde(default)]
    pub inputs: Vec<CommandInput>,
    #[serde(default)]
    pub outputs: Vec<CommandOutput>,
    /// Context-specific bindings over this command.
    #[serde(default, rename = "xnat", alias = "wrappers", skip_serializing_if = "Vec::is_empty")]
    pub wrappers: Vec<CommandWrapper>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_memory: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_memory: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_cpu: Option<f64>,
}

fn default_command_type() -> String {
    "docker".to_string()
}

impl Command {
    /// Finds a wrapper by name.
    pub fn wrapper(&self, name: &str) -> Option<&CommandWrapper> {
        self.wrappers.iter().find(|wrapper| wrapper.name == name)
    }

    /// Finds a wrapper by identifier.
    pub fn wrapper_by_id(&self, id: i64) -> Option<&CommandWrapper> {
        self.wrappers.iter().find(|wrapper| wrapper.id == id)
    }
}

/// A directory the container expects to see at `path`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CommandMount {
    pub name: String,
    #[serde(default)]
    pub writable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A plain input declared by the command itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CommandInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub r#type: InputType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line_flag: Option<String>,
    /// Joins flag and value on the command line; a single space when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line_separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,
}

/// A file set the command writes and expects to be uploaded afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CommandOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Name of the mount the output files are written into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
}

/// Binds a command onto the host's contextual object types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CommandWrapper {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub contexts: Vec<String>,
    #[serde(default)]
    pub external_inputs: Vec<ExternalInput>,
    /// Must list parents before the inputs derived from them.
    #[serde(default)]
    pub derived_inputs: Vec<DerivedInput>,
    #[serde(default)]
    pub output_handlers: Vec<OutputHandler>,
}

/// A root-level wrapper input supplied by the caller or launch context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ExternalInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub r#type: InputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provides_value_for_command_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provides_files_for_command_mount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_setup_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_settable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_key: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_children: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,
}

/// A wrapper input computed by navigating from a parent input's value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct DerivedInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub r#type: InputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provides_value_for_command_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provides_files_for_command_mount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_setup_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_settable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_key: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_children: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,
    /// Name of the parent input this one navigates from.
    pub derived_from_wrapper_input: String,
    /// Property read off the parent object for scalar derivations.
    #[serde(default, rename = "derived-from-xnat-object-property", skip_serializing_if = "Option::is_none")]
    pub derived_from_object_property: Option<String>,
}

/// Target object type an output handler uploads into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OutputHandlerType {
    #[default]
    Resource,
    Assessor,
}

impl fmt::Display for OutputHandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputHandlerType::Resource => f.write_str("Resource"),
            OutputHandlerType::Assessor => f.write_str("Assessor"),
        }
    }
}

/// Binds one command output to the wrapper input whose object receives it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct OutputHandler {
    pub name: String,
    pub accepts_command_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_wrapup_command: Option<String>,
    pub as_a_child_of: String,
    #[serde(default)]
    pub r#type: OutputHandlerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Any of the three input kinds, dispatched by variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Input {
    External(ExternalInput),
    Derived(DerivedInput),
    Command(CommandInput),
}

impl Input {
    pub fn name(&self) -> &str {
        match self {
            Input::External(input) => &input.name,
            Input::Derived(input) => &input.name,
            Input::Command(input) => &input.name,
        }
    }

    pub fn input_type(&self) -> InputType {
        match self {
            Input::External(input) => input.r#type,
            Input::Derived(input) => input.r#type,
            Input::Command(input) => input.r#type,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            Input::External(input) => input.required,
            Input::Derived(input) => input.required,
            Input::Command(input) => input.required,
        }
    }

    pub fn matcher(&self) -> Option<&str> {
        match self {
            Input::External(input) => input.matcher.as_deref(),
            Input::Derived(input) => input.matcher.as_deref(),
            Input::Command(input) => input.matcher.as_deref(),
        }
    }

    pub fn default_value(&self) -> Option<&str> {
        match self {
            Input::External(input) => input.default_value.as_deref(),
            Input::Derived(input) => input.default_value.as_deref(),
            Input::Command(input) => input.default_value.as_deref(),
        }
    }

    pub fn sensitive(&self) -> bool {
        let flag = match self {
            Input::External(input) => input.sensitive,
            Input::Derived(input) => input.sensitive,
            Input::Command(input) => input.sensitive,
        };
        flag.unwrap_or(false)
    }

    /// Runtime values are honoured unless the wrapper input opts out.
    pub fn user_settable(&self) -> bool {
        match self {
            Input::External(input) => input.user_settable.unwrap_or(true),
            Input::Derived(input) => input.user_settable.unwrap_or(true),
            Input::Command(_) => true,
        }
    }

    /// Token substituted into templates; `#name#` when none is declared.
    pub fn replacement_key(&self) -> String {
        let declared = match self {
            Input::External(input) => input.replacement_key.as_deref(),
            Input::Derived(input) => input.replacement_key.as_deref(),
            Input::Command(input) => input.replacement_key.as_deref(),
        };
        match declared {
            Some(key) if !key.trim().is_empty() => key.to_string(),
            _ => format!("#{}#", self.name()),
        }
    }

    /// Command input that this wrapper input feeds, if any.
    pub fn provides_value_for(&self) -> Option<&str> {
        match self {
            Input::External(input) => input.provides_value_for_command_input.as_deref(),
            Input::Derived(input) => input.provides_value_for_command_input.as_deref(),
            Input::Command(_) => None,
        }
    }

    /// Mount that this wrapper input feeds files into, if any.
    pub fn provides_files_for(&self) -> Option<&str> {
        match self {
            Input::External(input) => input.provides_files_for_command_mount.as_deref(),
            Input::Derived(input) => input.provides_files_for_command_mount.as_deref(),
            Input::Command(_) => None,
        }
    }

    pub fn via_setup_command(&self) -> Option<&str> {
        match self {
            Input::External(input) => input.via_setup_command.as_deref(),
            Input::Derived(input) => input.via_setup_command.as_deref(),
            Input::Command(_) => None,
        }
    }

    pub fn is_command_input(&self) -> bool {
        matches!(self, Input::Command(_))
    }
}
