//! Recursive resolution of the static input tree into concrete values.
//!
//! Each node resolves to zero or more values; every static child is then
//! resolved once per value with a copy of the substitution map extended by
//! this node's replacement key, so branches under different values stay
//! isolated from one another. Siblings under the same value share the keys
//! of those that resolved uniquely, in declaration order.

use dockhand_types::{
    CommandInput, DerivedInput, DomainObject, ExternalInput, Input, InputType, PreresolvedInputTreeNode, ResolvedInputTreeNode,
    ResolvedInputValue, ResolvedValueAndChildren, User,
};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ancestry::{AncestryCache, TypeAncestry};
use crate::collaborators::{CollaboratorError, DomainObjectService, ObjectReference};
use crate::derivation::{DerivationRule, child_filter, derivation_rule};
use crate::error::ResolutionError;
use crate::query::{Filter, FilterContext, PathQuery};
use crate::templates::{SubstitutionMap, TemplateResolver, format_json_value};
use crate::uniqueness::raw_values;
use dockhand_util::text_processing::REDACTED;

const ARCHIVE_PREFIX: &str = "/archive";

/// Resolves input tree nodes for one request.
pub struct NodeResolver<'a> {
    templates: &'a TemplateResolver,
    objects: &'a dyn DomainObjectService,
    ancestry: TypeAncestry<'a>,
    user: &'a User,
    runtime_values: &'a IndexMap<String, String>,
}

impl<'a> NodeResolver<'a> {
    pub fn new(
        templates: &'a TemplateResolver,
        objects: &'a dyn DomainObjectService,
        ancestry_cache: &'a AncestryCache,
        user: &'a User,
        runtime_values: &'a IndexMap<String, String>,
    ) -> Self {
        Self {
            templates,
            objects,
            ancestry: TypeAncestry::new(ancestry_cache, objects),
            user,
            runtime_values,
        }
    }

    /// Resolves `node` and, per resulting value, all of its children.
    pub fn resolve(
        &self,
        node: &PreresolvedInputTreeNode,
        parent: Option<&ResolvedInputValue>,
        substitutions: &SubstitutionMap,
    ) -> Result<ResolvedInputTreeNode, ResolutionError> {
        let resolved = self.resolve_values(node, parent, substitutions)?;
        self.resolve_children(node, resolved, substitutions)
    }

    /// Resolves the values of `node` itself, leaving every child list empty.
    pub fn resolve_values(
        &self,
        node: &PreresolvedInputTreeNode,
        parent: Option<&ResolvedInputValue>,
        substitutions: &SubstitutionMap,
    ) -> Result<ResolvedInputTreeNode, ResolutionError> {
        let values = match &node.input {
            Input::External(input) => self.resolve_external(&node.input, input, substitutions)?,
            Input::Derived(input) => self.resolve_derived(&node.input, input, parent, substitutions)?,
            Input::Command(input) => vec![self.resolve_command_input(&node.input, input, parent)?],
        };

        debug!(
            input = %node.input.name(),
            value_count = values.len(),
            values = ?values.iter().map(|value| display_value(&node.input, value.value.as_deref())).collect::<Vec<_>>(),
            "input resolved"
        );

        Ok(ResolvedInputTreeNode {
            input: node.input.clone(),
            values_and_children: values
                .into_iter()
                .map(|resolved_value| ResolvedValueAndChildren {
                    resolved_value,
                    children: Vec::new(),
                })
                .collect(),
        })
    }

    /// Resolves the static children of `node` under each value in `resolved`.
    /// Within one value, a child sees the keys of every uniquely resolved
    /// sibling before it.
    pub fn resolve_children(
        &self,
        node: &PreresolvedInputTreeNode,
        mut resolved: ResolvedInputTreeNode,
        substitutions: &SubstitutionMap,
    ) -> Result<ResolvedInputTreeNode, ResolutionError> {
        let replacement_key = node.input.replacement_key();
        for entry in &mut resolved.values_and_children {
            let value = &entry.resolved_value;
            let mut branch = substitutions.with(replacement_key.clone(), value.value.clone().unwrap_or_default());
            let mut children = Vec::with_capacity(node.children.len());
            for child in &node.children {
                let child = self.resolve(child, Some(value), &branch)?;
                branch.extend(&raw_values(&child));
                children.push(child);
            }
            entry.children = children;
        }
        Ok(resolved)
    }

    fn resolve_external(
        &self,
        input_ref: &Input,
        input: &ExternalInput,
        substitutions: &SubstitutionMap,
    ) -> Result<Vec<ResolvedInputValue>, ResolutionError> {
        let value = self.starting_value(input_ref)?;
        let Some(raw) = value.filter(|value| !value.trim().is_empty()) else {
            return Ok(vec![ResolvedInputValue::scalar(input.r#type, None)]);
        };
        if !input.r#type.is_contextual() {
            return Ok(vec![ResolvedInputValue::scalar(input.r#type, Some(raw))]);
        }

        let matcher = self.matcher(input_ref, substitutions)?;
        let load_children = input.load_children.unwrap_or(true);
        let Some(object) = self.instantiate(&input.name, &raw, input.r#type, load_children)? else {
            warn!(input = %input.name, value = %display_value(input_ref, Some(&raw)), "no object found for value");
            return Ok(Vec::new());
        };
        self.ensure_readable(&object)?;

        if let Some(matcher) = matcher.as_deref()
            && !self.passes(matcher, &object.json)?
        {
            info!(input = %input.name, matcher, "object rejected by matcher");
            return Ok(Vec::new());
        }
        Ok(vec![ResolvedInputValue::object(object)])
    }

    fn resolve_derived(
        &self,
        input_ref: &Input,
        input: &DerivedInput,
        parent: Option<&ResolvedInputValue>,
        substitutions: &SubstitutionMap,
    ) -> Result<Vec<ResolvedInputValue>, ResolutionError> {
        let Some(parent) = parent else {
            return Err(ResolutionError::configuration(format!(
                "derived input '{}' was resolved without a parent value",
                input.name
            )));
        };
        let Some(parent_json) = parent.json() else {
            debug!(input = %input.name, parent = %input.derived_from_wrapper_input, "parent has no object to derive from");
            return Ok(Vec::new());
        };
        let Some(rule) = derivation_rule(parent.r#type, input.r#type) else {
            warn!(
                input = %input.name,
                parent_type = %parent.r#type,
                input_type = %input.r#type,
                "cannot derive this input type from its parent type"
            );
            return Ok(Vec::new());
        };

        let value = self.starting_value(input_ref)?;
        let matcher = self.matcher(input_ref, substitutions)?;
        let load_children = input.load_children.unwrap_or(false);

        match rule {
            DerivationRule::Property { default_property } => {
                let property = input
                    .derived_from_object_property
                    .as_deref()
                    .map(str::trim)
                    .filter(|property| !property.is_empty())
                    .or(default_property)
                    .ok_or_else(|| {
                        ResolutionError::configuration(format!(
                            "derived input '{}' needs 'derived-from-xnat-object-property' to read a {} from a {}",
                            input.name, input.r#type, parent.r#type
                        ))
                    })?;
                if let Some(matcher) = matcher.as_deref()
                    && !self.passes(matcher, &parent_json)?
                {
                    info!(input = %input.name, matcher, "parent object rejected by matcher");
                    return Ok(Vec::new());
                }
                let query = PathQuery::parse(&format!("$.{property}"))?;
                let extracted = query.select(&parent_json).into_iter().find(|found| !found.is_null()).map(format_json_value);
                Ok(extracted.map(|text| vec![ResolvedInputValue::scalar(input.r#type, Some(text))]).unwrap_or_default())
            }
            DerivationRule::Children {
                key,
                match_property,
                aggregate,
            } => {
                let filter = child_filter(match_property, value.as_deref(), matcher.as_deref())
                    .map(|expression| Filter::parse(&expression))
                    .transpose()?;
                let context = FilterContext {
                    root: &parent_json,
                    hierarchy: Some(&self.ancestry),
                };
                let entries: Vec<&Value> = parent_json
                    .get(key)
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter(|item| filter.as_ref().is_none_or(|filter| filter.matches(item, &context)))
                            .collect()
                    })
                    .unwrap_or_default();

                if aggregate {
                    let files: Vec<Value> = entries.into_iter().cloned().collect();
                    if files.is_empty() {
                        return Ok(Vec::new());
                    }
                    return Ok(vec![aggregate_value(input.r#type, files)]);
                }

                let mut values = Vec::with_capacity(entries.len());
                for entry in entries {
                    let object = self.load_child(input, entry, load_children)?;
                    values.push(ResolvedInputValue::object(object));
                }
                Ok(values)
            }
            DerivationRule::Ancestor { reference_field } => {
                let Some(identifier) = parent_json.get(reference_field).and_then(Value::as_str) else {
                    warn!(input = %input.name, field = reference_field, "parent object does not reference an enclosing object");
                    return Ok(Vec::new());
                };
                let reference = ObjectReference::Id(identifier.to_string());
                let Some(object) = self.objects.resolve_object(&reference, input.r#type, load_children)? else {
                    warn!(input = %input.name, reference = %reference, "enclosing object not found");
                    return Ok(Vec::new());
                };
                self.ensure_readable(&object)?;
                if let Some(matcher) = matcher.as_deref()
                    && !self.passes(matcher, &object.json)?
                {
                    info!(input = %input.name, matcher, "object rejected by matcher");
                    return Ok(Vec::new());
                }
                Ok(vec![ResolvedInputValue::object(object)])
            }
        }
    }

    fn resolve_command_input(
        &self,
        input_ref: &Input,
        input: &CommandInput,
        parent: Option<&ResolvedInputValue>,
    ) -> Result<ResolvedInputValue, ResolutionError> {
        let mut value = input.default_value.clone();
        if let Some(provided) = parent.and_then(|parent| parent.value.clone()) {
            value = Some(provided);
        }
        if let Some(runtime) = self.runtime_value(input_ref) {
            value = Some(runtime.to_string());
        }
        let mut value = value.map(|value| self.templates.resolve_path_queries(&value)).transpose()?;

        match input.r#type {
            InputType::Boolean => {
                let truthy = value.as_deref().is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));
                let mapped = if truthy { &input.true_value } else { &input.false_value };
                if mapped.is_some() {
                    value = mapped.clone();
                }
            }
            InputType::Number => {
                if let Some(number) = value.as_deref()
                    && !number.trim().is_empty()
                    && number.trim().parse::<f64>().is_err()
                {
                    warn!(input = %input.name, value = %display_value(input_ref, Some(number)), "value is not a number");
                }
            }
            _ => {}
        }

        Ok(ResolvedInputValue::scalar(input.r#type, value))
    }

    /// Default value, overridden by a runtime value, with path queries resolved.
    fn starting_value(&self, input: &Input) -> Result<Option<String>, ResolutionError> {
        let mut value = input.default_value().map(str::to_string);
        if let Some(runtime) = self.runtime_value(input) {
            value = Some(runtime.to_string());
        }
        value.map(|value| self.templates.resolve_path_queries(&value)).transpose()
    }

    fn runtime_value(&self, input: &Input) -> Option<&'a str> {
        let runtime = self.runtime_values.get(input.name())?;
        if !input.user_settable() {
            warn!(input = %input.name(), "ignoring runtime value for input that is not user-settable");
            return None;
        }
        Some(runtime.as_str())
    }

    fn matcher(&self, input: &Input, substitutions: &SubstitutionMap) -> Result<Option<String>, ResolutionError> {
        let matcher = self.templates.resolve_optional(input.matcher(), substitutions)?;
        Ok(matcher.filter(|matcher| !matcher.trim().is_empty()))
    }

    fn passes(&self, matcher: &str, json: &Value) -> Result<bool, ResolutionError> {
        let filter = Filter::parse(matcher)?;
        let context = FilterContext {
            root: json,
            hierarchy: Some(&self.ancestry),
        };
        Ok(filter.matches(json, &context))
    }

    /// Turns a caller value into an object: inline JSON, an archive URI, or
    /// an identifier handed to the collaborator.
    fn instantiate(&self, input_name: &str, raw: &str, kind: InputType, load_children: bool) -> Result<Option<DomainObject>, ResolutionError> {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            let json: Value = serde_json::from_str(trimmed)
                .map_err(|error| ResolutionError::input(input_name, format!("value is not a valid {kind} object: {error}")))?;
            return Ok(Some(DomainObject::new(kind, json)));
        }

        let reference = if trimmed.starts_with('/') {
            ObjectReference::Uri(archive_uri(trimmed))
        } else {
            ObjectReference::Id(trimmed.to_string())
        };
        match self.objects.resolve_object(&reference, kind, load_children) {
            Ok(object) => Ok(object),
            Err(CollaboratorError::Malformed { what, message }) => Err(ResolutionError::input(input_name, format!("malformed {what}: {message}"))),
            Err(other) => Err(other.into()),
        }
    }

    fn load_child(&self, input: &DerivedInput, entry: &Value, load_children: bool) -> Result<DomainObject, ResolutionError> {
        let embedded = DomainObject::new(input.r#type, entry.clone());
        if !load_children {
            return Ok(embedded);
        }
        let Some(uri) = embedded.uri() else {
            return Ok(embedded);
        };
        let reference = ObjectReference::Uri(uri.to_string());
        Ok(self.objects.resolve_object(&reference, input.r#type, true)?.unwrap_or(embedded))
    }

    fn ensure_readable(&self, object: &DomainObject) -> Result<(), ResolutionError> {
        if self.objects.can_read(self.user, object) {
            return Ok(());
        }
        Err(ResolutionError::Unauthorized {
            user: self.user.username.clone(),
            action: "read".to_string(),
            target: object.uri().or(object.id()).unwrap_or("object").to_string(),
        })
    }
}

/// One value standing for a whole file list.
fn aggregate_value(kind: InputType, files: Vec<Value>) -> ResolvedInputValue {
    let uris: Vec<Value> = files
        .iter()
        .filter_map(|file| file.get("uri").cloned())
        .collect();
    let object = DomainObject::new(kind, Value::Array(files));
    ResolvedInputValue {
        r#type: kind,
        value: Some(Value::Array(uris).to_string()),
        value_label: None,
        json_value: Some(object.to_json_string()),
        domain_object: Some(object),
    }
}

fn archive_uri(path: &str) -> String {
    if path == ARCHIVE_PREFIX || path.starts_with("/archive/") {
        path.to_string()
    } else {
        format!("{ARCHIVE_PREFIX}{path}")
    }
}

fn display_value(input: &Input, value: Option<&str>) -> String {
    match value {
        Some(_) if input.sensitive() => REDACTED.to_string(),
        Some(value) => value.to_string(),
        None => "<none>".to_string(),
    }
}
