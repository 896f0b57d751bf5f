//! Binds declared command outputs to the objects that will receive them.
//!
//! Checks on the handler's input are soft for optional outputs (the output
//! is skipped with a warning) and hard for required ones. A missing handler
//! and template failures are always hard.

use dockhand_types::{
    CommandOutput, ConfiguredCommand, DomainObject, InputType, OutputHandler, OutputHandlerType, ResolvedInputTreeNode, ResolvedInputValue,
    ResolvedOutput, User,
};
use tracing::{debug, warn};

use crate::collaborators::DomainObjectService;
use crate::error::ResolutionError;
use crate::templates::{SubstitutionMap, TemplateResolver};

pub struct OutputResolver<'a> {
    pub configured: &'a ConfiguredCommand,
    pub templates: &'a TemplateResolver,
    pub objects: &'a dyn DomainObjectService,
    pub user: &'a User,
}

impl OutputResolver<'_> {
    pub fn resolve(&self, trees: &[ResolvedInputTreeNode], substitutions: &SubstitutionMap) -> Result<Vec<ResolvedOutput>, ResolutionError> {
        let mut resolved = Vec::with_capacity(self.configured.command.outputs.len());
        for output in &self.configured.command.outputs {
            let handler = self
                .configured
                .wrapper
                .output_handlers
                .iter()
                .find(|handler| handler.accepts_command_output == output.name)
                .ok_or_else(|| {
                    ResolutionError::configuration(format!(
                        "wrapper '{}' has no output handler for command output '{}'",
                        self.configured.wrapper.name, output.name
                    ))
                })?;

            let target = match self.handler_target(output, handler, trees) {
                Ok(target) => target,
                Err(error) if !output.required => {
                    warn!(output = %output.name, handler = %handler.name, error = %error, "skipping optional output");
                    continue;
                }
                Err(error) => return Err(error),
            };

            let output = ResolvedOutput {
                name: output.name.clone(),
                from_command_output: output.name.clone(),
                from_output_handler: handler.name.clone(),
                r#type: handler.r#type,
                required: output.required,
                mount: output.mount.clone(),
                path: self.templates.resolve_optional(output.path.as_deref(), substitutions)?,
                glob: output.glob.clone(),
                label: self.templates.resolve_optional(handler.label.as_deref(), substitutions)?,
                handled_by: handler.as_a_child_of.clone(),
                handled_by_uri: target.uri().unwrap_or_default().to_string(),
                via_wrapup_command: handler.via_wrapup_command.clone(),
            };
            debug!(output = %output.name, handled_by_uri = %output.handled_by_uri, "output resolved");
            resolved.push(output);
        }
        Ok(resolved)
    }

    /// The editable object `handler` uploads into.
    fn handler_target(&self, output: &CommandOutput, handler: &OutputHandler, trees: &[ResolvedInputTreeNode]) -> Result<DomainObject, ResolutionError> {
        let values = values_of(trees, &handler.as_a_child_of);
        let value = match values.as_slice() {
            [only] => *only,
            [] => {
                return Err(ResolutionError::output(
                    &output.name,
                    format!("handler input '{}' did not resolve to a value", handler.as_a_child_of),
                ));
            }
            many => {
                return Err(ResolutionError::output(
                    &output.name,
                    format!("handler input '{}' resolved to {} values; expected one", handler.as_a_child_of, many.len()),
                ));
            }
        };

        let object = value
            .domain_object
            .clone()
            .or_else(|| value.json().filter(serde_json::Value::is_object).map(|json| DomainObject::new(value.r#type, json)))
            .ok_or_else(|| {
                ResolutionError::output(
                    &output.name,
                    format!("handler input '{}' is not a contextual object", handler.as_a_child_of),
                )
            })?;

        if !accepts_parent(handler.r#type, object.kind) {
            return Err(ResolutionError::output(
                &output.name,
                format!("a {} output cannot be attached to a {}", handler.r#type, object.kind),
            ));
        }

        if !self.objects.can_edit(self.user, &object) {
            return Err(ResolutionError::Unauthorized {
                user: self.user.username.clone(),
                action: "edit".to_string(),
                target: object.uri().or(object.id()).unwrap_or(handler.as_a_child_of.as_str()).to_string(),
            });
        }
        Ok(object)
    }
}

fn accepts_parent(handler: OutputHandlerType, parent: InputType) -> bool {
    match handler {
        OutputHandlerType::Resource => matches!(
            parent,
            InputType::Project | InputType::Subject | InputType::Session | InputType::Scan | InputType::Assessor
        ),
        OutputHandlerType::Assessor => parent == InputType::Session,
    }
}

/// Every value of every node named `input` across all trees.
fn values_of<'a>(trees: &'a [ResolvedInputTreeNode], input: &str) -> Vec<&'a ResolvedInputValue> {
    let mut values = Vec::new();
    for tree in trees {
        tree.walk(&mut |node| {
            if node.input.name() == input {
                values.extend(node.values_and_children.iter().map(|entry| &entry.resolved_value));
            }
        });
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryObjectStore, ObjectCatalog};
    use dockhand_types::{Command, CommandWrapper, ExternalInput, Input, ResolvedValueAndChildren};
    use serde_json::json;

    fn configured(required: bool) -> ConfiguredCommand {
        ConfiguredCommand::new(
            Command {
                name: "job".into(),
                outputs: vec![CommandOutput {
                    name: "stats".into(),
                    required,
                    mount: Some("out".into()),
                    path: Some("stats-#threshold#.csv".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
            CommandWrapper {
                name: "w".into(),
                output_handlers: vec![OutputHandler {
                    name: "stats-resource".into(),
                    accepts_command_output: "stats".into(),
                    as_a_child_of: "session".into(),
                    label: Some("STATS".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
    }

    fn session_tree(uris: &[&str]) -> ResolvedInputTreeNode {
        ResolvedInputTreeNode {
            input: Input::External(ExternalInput {
                name: "session".into(),
                r#type: InputType::Session,
                ..Default::default()
            }),
            values_and_children: uris
                .iter()
                .map(|uri| ResolvedValueAndChildren {
                    resolved_value: ResolvedInputValue::object(DomainObject::new(InputType::Session, json!({"id": "E01", "uri": uri}))),
                    children: Vec::new(),
                })
                .collect(),
        }
    }

    fn store(uneditable: &[&str]) -> InMemoryObjectStore {
        InMemoryObjectStore::new(ObjectCatalog {
            uneditable: uneditable.iter().map(|uri| uri.to_string()).collect(),
            ..Default::default()
        })
    }

    fn resolve(required: bool, trees: &[ResolvedInputTreeNode], store: &InMemoryObjectStore) -> Result<Vec<ResolvedOutput>, ResolutionError> {
        let configured = configured(required);
        let templates = TemplateResolver::new(&configured).expect("templates");
        let user = User::new("alice");
        let resolver = OutputResolver {
            configured: &configured,
            templates: &templates,
            objects: store,
            user: &user,
        };
        resolver.resolve(trees, &SubstitutionMap::new().with("#threshold#", "0.5"))
    }

    #[test]
    fn unique_editable_parent_produces_output() {
        let outputs = resolve(true, &[session_tree(&["/archive/experiments/E01"])], &store(&[])).expect("outputs");
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].handled_by, "session");
        assert_eq!(outputs[0].handled_by_uri, "/archive/experiments/E01");
        assert_eq!(outputs[0].path.as_deref(), Some("stats-0.5.csv"));
        assert_eq!(outputs[0].label.as_deref(), Some("STATS"));
    }

    #[test]
    fn optional_output_is_skipped_when_parent_is_ambiguous() {
        let trees = [session_tree(&["/archive/experiments/E01", "/archive/experiments/E02"])];
        assert!(resolve(false, &trees, &store(&[])).expect("outputs").is_empty());
        let error = resolve(true, &trees, &store(&[])).expect_err("required");
        assert!(matches!(error, ResolutionError::OutputResolution { .. }));
    }

    #[test]
    fn required_output_without_edit_permission_is_unauthorized() {
        let trees = [session_tree(&["/archive/experiments/E01"])];
        let error = resolve(true, &trees, &store(&["/archive/experiments/E01"])).expect_err("not editable");
        assert!(error.is_unauthorized());
        assert!(resolve(false, &trees, &store(&["/archive/experiments/E01"])).expect("skipped").is_empty());
    }

    #[test]
    fn missing_handler_is_a_configuration_error() {
        let mut configured = configured(false);
        configured.wrapper.output_handlers.clear();
        let templates = TemplateResolver::new(&configured).expect("templates");
        let store = store(&[]);
        let user = User::new("alice");
        let resolver = OutputResolver {
            configured: &configured,
            templates: &templates,
            objects: &store,
            user: &user,
        };
        let error = resolver.resolve(&[], &SubstitutionMap::new()).expect_err("no handler");
        assert!(matches!(error, ResolutionError::Configuration { .. }));
    }
}
