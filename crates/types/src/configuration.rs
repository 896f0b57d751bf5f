//! Site and project configuration overlays, and the configured command they produce.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandWrapper};

/// Overrides applied to a single input by site or project configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CommandInputConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_settable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced: Option<bool>,
}

impl CommandInputConfiguration {
    /// Fields set in `other` win.
    fn merged_with(&self, other: &CommandInputConfiguration) -> CommandInputConfiguration {
        CommandInputConfiguration {
            default_value: other.default_value.clone().or_else(|| self.default_value.clone()),
            matcher: other.matcher.clone().or_else(|| self.matcher.clone()),
            user_settable: other.user_settable.or(self.user_settable),
            advanced: other.advanced.or(self.advanced),
        }
    }
}

/// Overrides applied to a single output handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CommandOutputConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Input and output overrides for one wrapper, keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CommandConfiguration {
    #[serde(default)]
    pub inputs: IndexMap<String, CommandInputConfiguration>,
    #[serde(default)]
    pub outputs: IndexMap<String, CommandOutputConfiguration>,
}

impl CommandConfiguration {
    /// Layers `overlay` (typically the project configuration) on top of `self`
    /// (typically the site configuration). Entries present in both are merged
    /// field by field with the overlay winning.
    pub fn merge(&self, overlay: &CommandConfiguration) -> CommandConfiguration {
        let mut inputs = self.inputs.clone();
        for (name, configuration) in &overlay.inputs {
            let merged = match inputs.get(name) {
                Some(existing) => existing.merged_with(configuration),
                None => configuration.clone(),
            };
            inputs.insert(name.clone(), merged);
        }

        let mut outputs = self.outputs.clone();
        for (name, configuration) in &overlay.outputs {
            let label = configuration
                .label
                .clone()
                .or_else(|| outputs.get(name).and_then(|existing| existing.label.clone()));
            outputs.insert(name.clone(), CommandOutputConfiguration { label });
        }

        CommandConfiguration { inputs, outputs }
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

/// A command narrowed to one wrapper with configuration already applied.
///
/// This is the unit the resolution engine consumes. The command's own fields
/// serialize at the top level, the wrapper under `wrapper`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfiguredCommand {
    #[serde(flatten)]
    pub command: Command,
    pub wrapper: CommandWrapper,
}

impl ConfiguredCommand {
    /// Selects `wrapper_name` from `command` and applies `configuration`.
    ///
    /// Returns `None` when the command carries no wrapper by that name.
    pub fn configure(command: &Command, wrapper_name: &str, configuration: &CommandConfiguration) -> Option<ConfiguredCommand> {
        let mut wrapper = command.wrapper(wrapper_name)?.clone();
        let mut command = command.clone();
        command.wrappers.clear();

        for input in &mut command.inputs {
            if let Some(overrides) = configuration.inputs.get(&input.name) {
                apply_value_overrides(&mut input.default_value, &mut input.matcher, overrides);
            }
        }
        for input in &mut wrapper.external_inputs {
            if let Some(overrides) = configuration.inputs.get(&input.name) {
                apply_value_overrides(&mut input.default_value, &mut input.matcher, overrides);
                if overrides.user_settable.is_some() {
                    input.user_settable = overrides.user_settable;
                }
            }
        }
        for input in &mut wrapper.derived_inputs {
            if let Some(overrides) = configuration.inputs.get(&input.name) {
                apply_value_overrides(&mut input.default_value, &mut input.matcher, overrides);
                if overrides.user_settable.is_some() {
                    input.user_settable = overrides.user_settable;
                }
            }
        }
        for handler in &mut wrapper.output_handlers {
            if let Some(label) = configuration.outputs.get(&handler.name).and_then(|output| output.label.clone()) {
                handler.label = Some(label);
            }
        }

        Some(ConfiguredCommand { command, wrapper })
    }

    /// Wraps an already-selected wrapper without any overlay.
    pub fn new(command: Command, wrapper: CommandWrapper) -> ConfiguredCommand {
        let mut command = command;
        command.wrappers.clear();
        ConfiguredCommand { command, wrapper }
    }
}

fn apply_value_overrides(default_value: &mut Option<String>, matcher: &mut Option<String>, overrides: &CommandInputConfiguration) {
    if overrides.default_value.is_some() {
        *default_value = overrides.default_value.clone();
    }
    if overrides.matcher.is_some() {
        *matcher = overrides.matcher.clone();
    }
}
