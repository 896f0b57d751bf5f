//! The engine's boundary: turns a configured command plus runtime values
//! into a launchable plan.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dockhand_types::{
    ConfiguredCommand, Input, PartiallyResolvedCommand, PreresolvedInputTreeNode, ResolvedCommand, ResolvedInputTreeNode, User,
};
use dockhand_util::{EngineSettings, redact_sensitive, redact_values, split_command_line};
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use crate::ancestry::AncestryCache;
use crate::collaborators::{CommandLookup, ConfigurationScope, DefinitionStore, DomainObjectService, ScratchSpace};
use crate::error::ResolutionError;
use crate::mounts::MountResolver;
use crate::node::NodeResolver;
use crate::outputs::OutputResolver;
use crate::templates::{SubstitutionMap, TemplateResolver};
use crate::tree::build_input_trees;
use crate::uniqueness::{command_line_values, raw_values, visit_unique};

/// Caller-supplied values for one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    /// Input name to raw value.
    pub runtime_values: IndexMap<String, String>,
    pub user: User,
    /// Project the command runs in; selects project-scoped configuration.
    pub project: Option<String>,
}

impl ResolutionRequest {
    pub fn new(user: User) -> Self {
        Self {
            runtime_values: IndexMap::new(),
            user,
            project: None,
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.runtime_values.insert(name.into(), value.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn scope(&self) -> ConfigurationScope {
        match &self.project {
            Some(project) => ConfigurationScope::Project(project.clone()),
            None => ConfigurationScope::Site,
        }
    }
}

/// Resolves configured commands against the injected collaborators.
pub struct CommandResolutionService {
    definitions: Arc<dyn DefinitionStore>,
    objects: Arc<dyn DomainObjectService>,
    scratch: Arc<dyn ScratchSpace>,
    settings: EngineSettings,
    ancestry: Arc<AncestryCache>,
}

impl fmt::Debug for CommandResolutionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandResolutionService")
            .field("settings", &self.settings)
            .field("ancestry_entries", &self.ancestry.len())
            .finish()
    }
}

/// Input trees resolved with substitutions propagated across roots.
struct ResolvedTrees {
    trees: Vec<ResolvedInputTreeNode>,
    raw: SubstitutionMap,
}

impl CommandResolutionService {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        objects: Arc<dyn DomainObjectService>,
        scratch: Arc<dyn ScratchSpace>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            definitions,
            objects,
            scratch,
            settings,
            ancestry: AncestryCache::shared(),
        }
    }

    /// Replaces the process-wide ancestry cache.
    pub fn with_ancestry_cache(mut self, cache: Arc<AncestryCache>) -> Self {
        self.ancestry = cache;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Loads the configured command for `lookup` and resolves it.
    pub fn resolve_lookup(&self, lookup: &CommandLookup, request: &ResolutionRequest) -> Result<ResolvedCommand, ResolutionError> {
        let configured = self.definitions.configured_command(lookup, &request.scope())?;
        self.resolve(&configured, request)
    }

    /// Loads the configured command for `lookup` and pre-resolves it.
    pub fn pre_resolve_lookup(&self, lookup: &CommandLookup, request: &ResolutionRequest) -> Result<PartiallyResolvedCommand, ResolutionError> {
        let configured = self.definitions.configured_command(lookup, &request.scope())?;
        self.pre_resolve(&configured, request)
    }

    /// Resolves the input trees only. Required inputs are not enforced and
    /// no outputs or mounts are produced, so nothing is allocated.
    pub fn pre_resolve(&self, configured: &ConfiguredCommand, request: &ResolutionRequest) -> Result<PartiallyResolvedCommand, ResolutionError> {
        info!(command = %configured.command.name, wrapper = %configured.wrapper.name, "pre-resolving command");
        let templates = TemplateResolver::new(configured)?;
        let static_trees = build_input_trees(configured)?;
        let resolved = self.resolve_trees(&templates, &static_trees, request)?;

        let command = &configured.command;
        Ok(PartiallyResolvedCommand {
            wrapper_id: configured.wrapper.id,
            wrapper_name: configured.wrapper.name.clone(),
            wrapper_description: configured.wrapper.description.clone(),
            command_id: command.id,
            command_name: command.name.clone(),
            command_description: command.description.clone(),
            image: command.image.clone(),
            r#type: command.r#type.clone(),
            project: request.project.clone(),
            raw_input_values: request.runtime_values.clone(),
            resolved_input_trees: resolved.trees,
        })
    }

    /// Resolves `configured` into a launchable plan.
    pub fn resolve(&self, configured: &ConfiguredCommand, request: &ResolutionRequest) -> Result<ResolvedCommand, ResolutionError> {
        let command = &configured.command;
        info!(
            command = %command.name,
            wrapper = %configured.wrapper.name,
            user = %request.user.username,
            project = request.project.as_deref().unwrap_or("<site>"),
            "resolving command"
        );

        let templates = TemplateResolver::new(configured)?;
        let static_trees = build_input_trees(configured)?;
        let ResolvedTrees { trees, raw } = self.resolve_trees(&templates, &static_trees, request)?;
        check_required_inputs(&static_trees, &trees)?;

        let mut command_line_map = raw.clone();
        for tree in &trees {
            command_line_map.extend(&command_line_values(tree));
        }
        let command_line = templates.resolve(command.command_line.as_deref().unwrap_or_default(), &command_line_map)?;
        let environment_variables = resolve_map(&templates, &command.environment_variables, &raw)?;
        let ports = resolve_map(&templates, &command.ports, &raw)?;
        let working_directory = templates.resolve_optional(command.working_directory.as_deref(), &raw)?;

        let outputs = OutputResolver {
            configured,
            templates: &templates,
            objects: self.objects.as_ref(),
            user: &request.user,
        }
        .resolve(&trees, &raw)?;
        let mounts = MountResolver {
            mounts: &command.mounts,
            templates: &templates,
            scratch: self.scratch.as_ref(),
            settings: &self.settings,
        }
        .resolve(&trees, &raw)?;

        let mut external_wrapper_input_values = IndexMap::new();
        let mut derived_input_values = IndexMap::new();
        let mut command_input_values = IndexMap::new();
        let mut secrets = Vec::new();
        for tree in &trees {
            visit_unique(tree, &mut |node, value| {
                if node.input.sensitive()
                    && let Some(secret) = &value
                {
                    secrets.push(secret.clone());
                }
                let name = node.input.name().to_string();
                match &node.input {
                    Input::External(_) => external_wrapper_input_values.insert(name, value),
                    Input::Derived(_) => derived_input_values.insert(name, value),
                    Input::Command(_) => command_input_values.insert(name, value),
                };
            });
        }

        info!(
            command = %command.name,
            command_line = %loggable(&command_line, &secrets),
            mounts = mounts.len(),
            outputs = outputs.len(),
            "command resolved"
        );

        Ok(ResolvedCommand {
            wrapper_id: configured.wrapper.id,
            wrapper_name: configured.wrapper.name.clone(),
            wrapper_description: configured.wrapper.description.clone(),
            command_id: command.id,
            command_name: command.name.clone(),
            command_description: command.description.clone(),
            image: command.image.clone(),
            r#type: command.r#type.clone(),
            project: request.project.clone(),
            raw_input_values: request.runtime_values.clone(),
            external_wrapper_input_values,
            derived_input_values,
            command_input_values,
            command_line,
            override_entrypoint: command.override_entrypoint,
            environment_variables,
            ports,
            mounts,
            outputs,
            working_directory,
            reserve_memory: command.reserve_memory,
            limit_memory: command.limit_memory,
            limit_cpu: command.limit_cpu,
        })
    }

    /// Resolves every root's own values first, in declaration order, so
    /// derived inputs see the unique values of all external inputs. Each
    /// root's subtree then resolves with the keys of everything before it.
    /// Command inputs cut off by an empty provider resolve last, on their own.
    fn resolve_trees(
        &self,
        templates: &TemplateResolver,
        static_trees: &[PreresolvedInputTreeNode],
        request: &ResolutionRequest,
    ) -> Result<ResolvedTrees, ResolutionError> {
        let resolver = NodeResolver::new(
            templates,
            self.objects.as_ref(),
            self.ancestry.as_ref(),
            &request.user,
            &request.runtime_values,
        );
        let mut raw = SubstitutionMap::new();
        let mut roots = Vec::with_capacity(static_trees.len());
        for root in static_trees {
            let resolved = resolver.resolve_values(root, None, &raw)?;
            raw.extend(&raw_values(&resolved));
            roots.push(resolved);
        }

        let mut trees = Vec::with_capacity(static_trees.len());
        for (root, resolved) in static_trees.iter().zip(roots) {
            let resolved = resolver.resolve_children(root, resolved, &raw)?;
            raw.extend(&raw_values(&resolved));
            trees.push(resolved);
        }

        for orphan in unreached_command_inputs(static_trees, &trees) {
            debug!(input = %orphan.input.name(), "providing input has no value; resolving command input on its own");
            let resolved = resolver.resolve(orphan, None, &raw)?;
            raw.extend(&raw_values(&resolved));
            trees.push(resolved);
        }
        debug!(root_count = trees.len(), replacement_keys = raw.len(), "input trees resolved");
        Ok(ResolvedTrees { trees, raw })
    }
}

/// Fails with every required input that has no value anywhere, in
/// declaration order.
fn check_required_inputs(static_trees: &[PreresolvedInputTreeNode], trees: &[ResolvedInputTreeNode]) -> Result<(), ResolutionError> {
    let mut required = IndexSet::new();
    for tree in static_trees {
        tree.walk(&mut |node| {
            if node.input.required() {
                required.insert(node.input.name().to_string());
            }
        });
    }
    if required.is_empty() {
        return Ok(());
    }

    for tree in trees {
        tree.walk(&mut |node| {
            let has_value = node.values_and_children.iter().any(|entry| entry.resolved_value.value.is_some());
            if has_value {
                required.shift_remove(node.input.name());
            }
        });
    }

    if required.is_empty() {
        Ok(())
    } else {
        Err(ResolutionError::MissingRequiredInputs {
            names: required.into_iter().collect(),
        })
    }
}

/// Command inputs in `static_trees` that appear nowhere in `trees` because
/// some input above them resolved to no values.
fn unreached_command_inputs<'a>(static_trees: &'a [PreresolvedInputTreeNode], trees: &[ResolvedInputTreeNode]) -> Vec<&'a PreresolvedInputTreeNode> {
    let mut reached = HashSet::new();
    for tree in trees {
        tree.walk(&mut |node| {
            reached.insert(node.input.name().to_string());
        });
    }

    let mut unreached = Vec::new();
    for tree in static_trees {
        tree.walk(&mut |node| {
            if matches!(node.input, Input::Command(_)) && !reached.contains(node.input.name()) {
                unreached.push(node);
            }
        });
    }
    unreached
}

/// The command line as it may appear in logs.
fn loggable(command_line: &str, secrets: &[String]) -> String {
    redact_sensitive(&redact_values(command_line, secrets))
}

fn resolve_map(
    templates: &TemplateResolver,
    entries: &IndexMap<String, String>,
    substitutions: &SubstitutionMap,
) -> Result<IndexMap<String, String>, ResolutionError> {
    let mut resolved = IndexMap::with_capacity(entries.len());
    for (key, value) in entries {
        resolved.insert(templates.resolve(key, substitutions)?, templates.resolve(value, substitutions)?);
    }
    Ok(resolved)
}

/// Splits the resolved command line into an argument vector.
pub fn command_line_arguments(command: &ResolvedCommand) -> Vec<String> {
    split_command_line(&command.command_line)
}
