use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::query::QueryError;

/// Why a resolution request failed.
///
/// Authorization failures keep their own variant so callers can tell "you
/// may not see this" apart from "this does not exist".
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The command or wrapper definition is internally inconsistent.
    #[error("invalid command configuration: {message}")]
    Configuration { message: String },

    #[error("could not resolve input '{input}': {message}")]
    InputResolution { input: String, message: String },

    #[error(transparent)]
    InvalidPathQuery(#[from] QueryError),

    #[error("path query '{query}' matched {matches} values; expected at most one")]
    AmbiguousPathQuery { query: String, matches: usize },

    #[error("missing values for required inputs: {}", names.join(", "))]
    MissingRequiredInputs { names: Vec<String> },

    #[error("could not resolve mount '{mount}': {message}")]
    MountResolution { mount: String, message: String },

    #[error("could not resolve output '{output}': {message}")]
    OutputResolution { output: String, message: String },

    #[error("user '{user}' is not allowed to {action} '{target}'")]
    Unauthorized { user: String, action: String, target: String },

    #[error("{kind} '{reference}' was not found")]
    NotFound { kind: String, reference: String },

    #[error("collaborator failed: {0}")]
    Collaborator(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("could not allocate a build directory: {0}")]
    ScratchAllocation(String),
}

impl ResolutionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ResolutionError::Configuration { message: message.into() }
    }

    pub fn input(input: impl Into<String>, message: impl Into<String>) -> Self {
        ResolutionError::InputResolution {
            input: input.into(),
            message: message.into(),
        }
    }

    pub fn mount(mount: impl Into<String>, message: impl Into<String>) -> Self {
        ResolutionError::MountResolution {
            mount: mount.into(),
            message: message.into(),
        }
    }

    pub fn output(output: impl Into<String>, message: impl Into<String>) -> Self {
        ResolutionError::OutputResolution {
            output: output.into(),
            message: message.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ResolutionError::Unauthorized { .. })
    }
}

impl From<CollaboratorError> for ResolutionError {
    fn from(error: CollaboratorError) -> Self {
        match error {
            CollaboratorError::Unauthorized { user, action, target } => ResolutionError::Unauthorized { user, action, target },
            CollaboratorError::NotFound { kind, reference } => ResolutionError::NotFound { kind, reference },
            CollaboratorError::Io(error) => ResolutionError::ScratchAllocation(error.to_string()),
            other => ResolutionError::Collaborator(other.to_string()),
        }
    }
}
