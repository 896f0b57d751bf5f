//! Handles on contextual objects from the host's object graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::InputType;

/// A contextual object (project, subject, session, ...) or a file entry,
/// carried as its serialized JSON form.
///
/// Well-known keys: `id`, `label`, `uri`, `xsiType`, `directory`, and the
/// child lists `subjects`, `sessions`, `scans`, `assessors`, `resources`,
/// `files`. Ancestor references use `project-id`, `subject-id` and
/// `session-id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainObject {
    pub kind: InputType,
    pub json: Value,
}

impl DomainObject {
    pub fn new(kind: InputType, json: Value) -> Self {
        Self { kind, json }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.json.get(name).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.field("id")
    }

    pub fn label(&self) -> Option<&str> {
        self.field("label").or_else(|| self.field("name"))
    }

    pub fn uri(&self) -> Option<&str> {
        self.field("uri")
    }

    pub fn xsi_type(&self) -> Option<&str> {
        self.field("xsiType")
    }

    pub fn directory(&self) -> Option<&str> {
        self.field("directory")
    }

    /// Compact JSON text of the object.
    pub fn to_json_string(&self) -> String {
        self.json.to_string()
    }
}

/// The account a resolution runs on behalf of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct User {
    pub username: String,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}
