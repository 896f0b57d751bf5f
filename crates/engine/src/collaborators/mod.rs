//! Seams to the systems the engine relies on but does not own: stored
//! definitions, the host's object graph and scratch space for mounts.
//!
//! Each trait has an in-memory implementation used by the CLI and tests.

pub mod memory;
pub mod scratch;

use std::fmt;
use std::path::PathBuf;

use dockhand_types::{ConfiguredCommand, DomainObject, InputType, User};
use thiserror::Error;

pub use memory::{InMemoryDefinitionStore, InMemoryObjectStore, ObjectCatalog};
pub use scratch::BuildDirectoryScratch;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{kind} '{reference}' was not found")]
    NotFound { kind: String, reference: String },
    #[error("user '{user}' is not allowed to {action} '{target}'")]
    Unauthorized { user: String, action: String, target: String },
    #[error("malformed {what}: {message}")]
    Malformed { what: String, message: String },
    #[error("{0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollaboratorError {
    pub fn not_found(kind: impl Into<String>, reference: impl Into<String>) -> Self {
        CollaboratorError::NotFound {
            kind: kind.into(),
            reference: reference.into(),
        }
    }

    pub fn unauthorized(user: impl Into<String>, action: impl Into<String>, target: impl Into<String>) -> Self {
        CollaboratorError::Unauthorized {
            user: user.into(),
            action: action.into(),
            target: target.into(),
        }
    }

    pub fn malformed(what: impl Into<String>, message: impl Into<String>) -> Self {
        CollaboratorError::Malformed {
            what: what.into(),
            message: message.into(),
        }
    }
}

/// How a caller-supplied value points at an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectReference {
    /// An archive path such as `/archive/projects/P1/subjects/S01`.
    Uri(String),
    /// A bare identifier or label.
    Id(String),
}

impl ObjectReference {
    pub fn as_str(&self) -> &str {
        match self {
            ObjectReference::Uri(value) | ObjectReference::Id(value) => value,
        }
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The host's object graph.
pub trait DomainObjectService: Send + Sync {
    /// Loads an object of `kind`. `Ok(None)` means nothing matched.
    fn resolve_object(&self, reference: &ObjectReference, kind: InputType, load_children: bool) -> Result<Option<DomainObject>, CollaboratorError>;

    fn can_read(&self, user: &User, object: &DomainObject) -> bool;

    fn can_edit(&self, user: &User, object: &DomainObject) -> bool;

    /// Whether the object type `candidate` is `ancestor` or derives from it.
    fn is_subtype(&self, candidate: &str, ancestor: &str) -> bool;
}

/// Selects a command and wrapper in the definition store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLookup {
    WrapperId(i64),
    CommandAndWrapper { command_id: i64, wrapper_name: String },
}

impl fmt::Display for CommandLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLookup::WrapperId(id) => write!(f, "wrapper {id}"),
            CommandLookup::CommandAndWrapper { command_id, wrapper_name } => write!(f, "command {command_id} wrapper '{wrapper_name}'"),
        }
    }
}

/// Which configuration overlay applies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigurationScope {
    #[default]
    Site,
    Project(String),
}

/// Stored command definitions and their configuration overlays.
pub trait DefinitionStore: Send + Sync {
    /// The command narrowed to one wrapper with site and (for project scope)
    /// project configuration merged in.
    fn configured_command(&self, lookup: &CommandLookup, scope: &ConfigurationScope) -> Result<ConfiguredCommand, CollaboratorError>;
}

/// Hands out fresh directories for mounts that need staging.
pub trait ScratchSpace: Send + Sync {
    fn allocate_directory(&self) -> Result<PathBuf, CollaboratorError>;
}
