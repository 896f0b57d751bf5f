//! In-memory collaborators backed by JSON documents.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use dockhand_types::{Command, CommandConfiguration, ConfiguredCommand, DomainObject, InputType, User};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{CollaboratorError, CommandLookup, ConfigurationScope, DefinitionStore, DomainObjectService, ObjectReference};

/// Archive paths are stored with this prefix; callers may omit it.
const ARCHIVE_PREFIX: &str = "/archive";

/// Child list keys and the object kind found under each.
const CHILD_KINDS: [(&str, InputType); 6] = [
    ("subjects", InputType::Subject),
    ("sessions", InputType::Session),
    ("scans", InputType::Scan),
    ("assessors", InputType::Assessor),
    ("resources", InputType::Resource),
    ("files", InputType::File),
];

/// One top-level object in a catalog document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub kind: InputType,
    pub object: Value,
}

/// On-disk shape of an object catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ObjectCatalog {
    #[serde(default)]
    pub objects: Vec<CatalogEntry>,
    /// Object type to its direct parent type, e.g. `xnat:mrSessionData` to
    /// `xnat:imageSessionData`.
    #[serde(default)]
    pub type_parents: IndexMap<String, String>,
    /// URIs nobody may read.
    #[serde(default)]
    pub unreadable: Vec<String>,
    /// URIs nobody may edit.
    #[serde(default)]
    pub uneditable: Vec<String>,
}

/// Serves objects from an [`ObjectCatalog`], including every nested child.
///
/// Nested children are annotated with `project-id`, `subject-id` and
/// `session-id` from their enclosing objects when those fields are absent,
/// so upward derivations work on hand-written catalogs. Objects are always
/// returned fully loaded.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Vec<DomainObject>,
    type_parents: HashMap<String, String>,
    unreadable: HashSet<String>,
    uneditable: HashSet<String>,
}

impl InMemoryObjectStore {
    pub fn new(catalog: ObjectCatalog) -> Self {
        let mut objects = Vec::new();
        for entry in catalog.objects {
            let mut object = entry.object;
            annotate_ancestors(&mut object, entry.kind, &Ancestors::default());
            index_object(&object, entry.kind, &mut objects);
        }
        Self {
            objects,
            type_parents: catalog.type_parents.into_iter().collect(),
            unreadable: catalog.unreadable.iter().map(|uri| normalize_uri(uri)).collect(),
            uneditable: catalog.uneditable.iter().map(|uri| normalize_uri(uri)).collect(),
        }
    }

    /// Reads a catalog document from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read object catalog: {}", path.display()))?;
        let catalog: ObjectCatalog =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse object catalog: {}", path.display()))?;
        Ok(Self::new(catalog))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn find(&self, reference: &ObjectReference, kind: InputType) -> Option<&DomainObject> {
        let candidates = self.objects.iter().filter(|object| object.kind == kind);
        match reference {
            ObjectReference::Uri(uri) => {
                let wanted = normalize_uri(uri);
                candidates.into_iter().find(|object| object.uri().map(normalize_uri).as_deref() == Some(wanted.as_str()))
            }
            ObjectReference::Id(id) => {
                let mut candidates: Vec<&DomainObject> = candidates.collect();
                if let Some(position) = candidates.iter().position(|object| object.id() == Some(id.as_str())) {
                    return Some(candidates.swap_remove(position));
                }
                candidates.into_iter().find(|object| object.field("label") == Some(id.as_str()))
            }
        }
    }

    fn is_listed(list: &HashSet<String>, object: &DomainObject) -> bool {
        object.uri().is_some_and(|uri| list.contains(&normalize_uri(uri)))
    }
}

impl DomainObjectService for InMemoryObjectStore {
    fn resolve_object(&self, reference: &ObjectReference, kind: InputType, load_children: bool) -> Result<Option<DomainObject>, CollaboratorError> {
        let found = self.find(reference, kind).cloned();
        debug!(
            reference = %reference,
            kind = %kind,
            load_children,
            found = found.is_some(),
            "object lookup"
        );
        Ok(found)
    }

    fn can_read(&self, _user: &User, object: &DomainObject) -> bool {
        !Self::is_listed(&self.unreadable, object)
    }

    fn can_edit(&self, _user: &User, object: &DomainObject) -> bool {
        !Self::is_listed(&self.unreadable, object) && !Self::is_listed(&self.uneditable, object)
    }

    fn is_subtype(&self, candidate: &str, ancestor: &str) -> bool {
        let mut current = candidate;
        // Bounded walk so a cyclic parent map cannot spin forever.
        for _ in 0..=self.type_parents.len() {
            if current == ancestor {
                return true;
            }
            match self.type_parents.get(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }
}

fn normalize_uri(uri: &str) -> String {
    let trimmed = uri.trim().trim_end_matches('/');
    if trimmed == ARCHIVE_PREFIX || trimmed.starts_with("/archive/") {
        trimmed.to_string()
    } else {
        format!("{ARCHIVE_PREFIX}{trimmed}")
    }
}

#[derive(Debug, Clone, Default)]
struct Ancestors {
    project: Option<String>,
    subject: Option<String>,
    session: Option<String>,
}

impl Ancestors {
    fn descend(&self, kind: InputType, id: Option<String>) -> Ancestors {
        let mut next = self.clone();
        match kind {
            InputType::Project => next.project = id,
            InputType::Subject => next.subject = id,
            InputType::Session => next.session = id,
            _ => {}
        }
        next
    }
}

fn annotate_ancestors(object: &mut Value, kind: InputType, ancestors: &Ancestors) {
    let Some(map) = object.as_object_mut() else {
        return;
    };
    for (field, value) in [
        ("project-id", &ancestors.project),
        ("subject-id", &ancestors.subject),
        ("session-id", &ancestors.session),
    ] {
        if let Some(value) = value
            && !map.contains_key(field)
        {
            map.insert(field.to_string(), Value::String(value.clone()));
        }
    }

    let id = map.get("id").and_then(Value::as_str).map(str::to_string);
    let below = ancestors.descend(kind, id);
    for (key, child_kind) in CHILD_KINDS {
        if let Some(Value::Array(children)) = map.get_mut(key) {
            for child in children {
                annotate_ancestors(child, child_kind, &below);
            }
        }
    }
}

fn index_object(object: &Value, kind: InputType, objects: &mut Vec<DomainObject>) {
    objects.push(DomainObject::new(kind, object.clone()));
    for (key, child_kind) in CHILD_KINDS {
        if let Some(Value::Array(children)) = object.get(key) {
            for child in children {
                index_object(child, child_kind, objects);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConfigurationKey {
    command_id: i64,
    wrapper_name: String,
}

/// Commands held in memory with optional site and project overlays.
#[derive(Debug, Default)]
pub struct InMemoryDefinitionStore {
    commands: Mutex<Vec<Command>>,
    site: Mutex<HashMap<ConfigurationKey, CommandConfiguration>>,
    projects: Mutex<HashMap<(String, ConfigurationKey), CommandConfiguration>>,
}

impl InMemoryDefinitionStore {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands: Mutex::new(commands),
            ..Default::default()
        }
    }

    pub fn add_command(&self, command: Command) {
        self.commands.lock().expect("definition store lock poisoned").push(command);
    }

    pub fn set_site_configuration(&self, command_id: i64, wrapper_name: &str, configuration: CommandConfiguration) {
        let key = ConfigurationKey {
            command_id,
            wrapper_name: wrapper_name.to_string(),
        };
        self.site.lock().expect("definition store lock poisoned").insert(key, configuration);
    }

    pub fn set_project_configuration(&self, project: &str, command_id: i64, wrapper_name: &str, configuration: CommandConfiguration) {
        let key = ConfigurationKey {
            command_id,
            wrapper_name: wrapper_name.to_string(),
        };
        self.projects
            .lock()
            .expect("definition store lock poisoned")
            .insert((project.to_string(), key), configuration);
    }

    fn configuration_for(&self, key: &ConfigurationKey, scope: &ConfigurationScope) -> CommandConfiguration {
        let site = self
            .site
            .lock()
            .expect("definition store lock poisoned")
            .get(key)
            .cloned()
            .unwrap_or_default();
        match scope {
            ConfigurationScope::Site => site,
            ConfigurationScope::Project(project) => {
                let overlay = self
                    .projects
                    .lock()
                    .expect("definition store lock poisoned")
                    .get(&(project.clone(), key.clone()))
                    .cloned();
                match overlay {
                    Some(overlay) => site.merge(&overlay),
                    None => site,
                }
            }
        }
    }
}

impl DefinitionStore for InMemoryDefinitionStore {
    fn configured_command(&self, lookup: &CommandLookup, scope: &ConfigurationScope) -> Result<ConfiguredCommand, CollaboratorError> {
        let (command, wrapper_name) = {
            let commands = self.commands.lock().expect("definition store lock poisoned");
            let found = match lookup {
                CommandLookup::WrapperId(wrapper_id) => commands
                    .iter()
                    .find_map(|command| command.wrapper_by_id(*wrapper_id).map(|wrapper| (command.clone(), wrapper.name.clone()))),
                CommandLookup::CommandAndWrapper { command_id, wrapper_name } => commands
                    .iter()
                    .find(|command| command.id == *command_id && command.wrapper(wrapper_name).is_some())
                    .map(|command| (command.clone(), wrapper_name.clone())),
            };
            found.ok_or_else(|| CollaboratorError::not_found("command", lookup.to_string()))?
        };

        let key = ConfigurationKey {
            command_id: command.id,
            wrapper_name: wrapper_name.clone(),
        };
        let configuration = self.configuration_for(&key, scope);
        ConfiguredCommand::configure(&command, &wrapper_name, &configuration)
            .ok_or_else(|| CollaboratorError::not_found("wrapper", wrapper_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_types::{CommandInputConfiguration, CommandWrapper};
    use serde_json::json;

    fn catalog() -> ObjectCatalog {
        serde_json::from_value(json!({
            "objects": [{
                "kind": "Project",
                "object": {
                    "id": "P1",
                    "uri": "/archive/projects/P1",
                    "subjects": [{
                        "id": "S01",
                        "label": "Subject One",
                        "uri": "/archive/subjects/S01",
                        "sessions": [{
                            "id": "E01",
                            "label": "MR1",
                            "xsiType": "xnat:mrSessionData",
                            "uri": "/archive/experiments/E01",
                            "scans": [{"id": "1", "uri": "/archive/experiments/E01/scans/1"}]
                        }]
                    }]
                }
            }],
            "type-parents": {"xnat:mrSessionData": "xnat:imageSessionData", "xnat:imageSessionData": "xnat:experimentData"},
            "uneditable": ["/experiments/E01"]
        }))
        .expect("catalog")
    }

    #[test]
    fn nested_objects_are_indexed_with_ancestor_ids() {
        let store = InMemoryObjectStore::new(catalog());
        assert_eq!(store.len(), 4);

        let scan = store
            .resolve_object(&ObjectReference::Uri("/experiments/E01/scans/1".into()), InputType::Scan, true)
            .expect("lookup")
            .expect("scan exists");
        assert_eq!(scan.field("session-id"), Some("E01"));
        assert_eq!(scan.field("subject-id"), Some("S01"));
        assert_eq!(scan.field("project-id"), Some("P1"));

        let session = store
            .resolve_object(&ObjectReference::Id("MR1".into()), InputType::Session, false)
            .expect("lookup")
            .expect("found by label");
        assert_eq!(session.id(), Some("E01"));

        let wrong_kind = store
            .resolve_object(&ObjectReference::Id("E01".into()), InputType::Subject, false)
            .expect("lookup");
        assert!(wrong_kind.is_none());
    }

    #[test]
    fn permissions_and_type_hierarchy() {
        let store = InMemoryObjectStore::new(catalog());
        let user = User::new("alice");
        let session = store
            .resolve_object(&ObjectReference::Id("E01".into()), InputType::Session, false)
            .expect("lookup")
            .expect("session");
        assert!(store.can_read(&user, &session));
        assert!(!store.can_edit(&user, &session));
        assert!(store.is_subtype("xnat:mrSessionData", "xnat:experimentData"));
        assert!(!store.is_subtype("xnat:experimentData", "xnat:mrSessionData"));
    }

    #[test]
    fn definition_store_merges_project_over_site() {
        let command = Command {
            id: 7,
            name: "job".into(),
            inputs: vec![dockhand_types::CommandInput {
                name: "threshold".into(),
                default_value: Some("0.1".into()),
                ..Default::default()
            }],
            wrappers: vec![CommandWrapper {
                id: 70,
                name: "w".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let store = InMemoryDefinitionStore::new(vec![command]);
        let mut site = CommandConfiguration::default();
        site.inputs.insert(
            "threshold".into(),
            CommandInputConfiguration {
                default_value: Some("0.5".into()),
                ..Default::default()
            },
        );
        let mut project = CommandConfiguration::default();
        project.inputs.insert(
            "threshold".into(),
            CommandInputConfiguration {
                default_value: Some("0.9".into()),
                ..Default::default()
            },
        );
        store.set_site_configuration(7, "w", site);
        store.set_project_configuration("P1", 7, "w", project);

        let site_scoped = store
            .configured_command(&CommandLookup::WrapperId(70), &ConfigurationScope::Site)
            .expect("configured");
        assert_eq!(site_scoped.command.inputs[0].default_value.as_deref(), Some("0.5"));

        let project_scoped = store
            .configured_command(
                &CommandLookup::CommandAndWrapper {
                    command_id: 7,
                    wrapper_name: "w".into(),
                },
                &ConfigurationScope::Project("P1".into()),
            )
            .expect("configured");
        assert_eq!(project_scoped.command.inputs[0].default_value.as_deref(), Some("0.9"));

        let missing = store.configured_command(&CommandLookup::WrapperId(99), &ConfigurationScope::Site);
        assert!(matches!(missing, Err(CollaboratorError::NotFound { .. })));
    }
}
