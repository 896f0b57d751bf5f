//! # Dockhand Engine
//!
//! Resolves a declarative, templated container command plus caller-supplied
//! values into a launchable plan: a concrete command line, environment,
//! ports, mounts and output upload targets.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dockhand_engine::{
//!     BuildDirectoryScratch, CommandResolutionService, InMemoryDefinitionStore, InMemoryObjectStore, ObjectCatalog, ResolutionRequest,
//! };
//! use dockhand_types::{Command, CommandWrapper, ConfiguredCommand, User};
//! use dockhand_util::EngineSettings;
//!
//! let build = tempfile::tempdir()?;
//! let settings = EngineSettings {
//!     build_path: build.path().to_path_buf(),
//!     path_translation: None,
//! };
//! let service = CommandResolutionService::new(
//!     Arc::new(InMemoryDefinitionStore::default()),
//!     Arc::new(InMemoryObjectStore::new(ObjectCatalog::default())),
//!     Arc::new(BuildDirectoryScratch::new(build.path())),
//!     settings,
//! );
//!
//! let command = Command {
//!     name: "hello".into(),
//!     command_line: Some("echo hello".into()),
//!     ..Default::default()
//! };
//! let configured = ConfiguredCommand::new(command, CommandWrapper::default());
//! let resolved = service.resolve(&configured, &ResolutionRequest::new(User::new("alice")))?;
//! assert_eq!(resolved.command_line, "echo hello");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`query`**: JSONPath subset and matcher filter expressions
//! - **`templates`**: `^path-query^` and replacement-key substitution
//! - **`tree`**: static input dependency tree
//! - **`node`**: recursive per-value resolution of that tree
//! - **`uniqueness`**: replacement keys from uniquely resolved inputs
//! - **`outputs`** / **`mounts`**: upload targets and mount staging
//! - **`collaborators`**: seams to the definition store, object graph and
//!   scratch space, with in-memory implementations
//! - **`service`**: the resolution entry points

use std::{fs, path::Path};

use anyhow::{Context, Result};
use dockhand_types::Command;

pub mod ancestry;
pub mod collaborators;
pub mod derivation;
pub mod error;
pub mod mounts;
pub mod node;
pub mod outputs;
pub mod query;
pub mod service;
pub mod templates;
pub mod tree;
pub mod uniqueness;

pub use ancestry::AncestryCache;
pub use collaborators::{
    BuildDirectoryScratch, CollaboratorError, CommandLookup, ConfigurationScope, DefinitionStore, DomainObjectService, InMemoryDefinitionStore,
    InMemoryObjectStore, ObjectCatalog, ObjectReference, ScratchSpace,
};
pub use error::ResolutionError;
pub use query::{PathQuery, QueryError};
pub use service::{CommandResolutionService, ResolutionRequest, command_line_arguments};
pub use templates::{SubstitutionMap, TemplateResolver};
pub use tree::build_input_trees;

/// Loads a command definition, parsing `.json` files as JSON and anything
/// else as YAML.
pub fn load_command_file(file_path: impl AsRef<Path>) -> Result<Command> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read command file: {}", file_path.display()))?;

    let is_json = file_path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let command = if is_json {
        serde_json::from_str(&content).with_context(|| format!("Failed to parse command JSON: {}", file_path.display()))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse command YAML: {}", file_path.display()))?
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_command_file_reads_yaml() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let command_path = temp_dir.path().join("command.yaml");
        fs::write(
            &command_path,
            r#"
name: "fsl-bet"
image: "example/fsl:6"
command-line: "bet #in# #out# -f #frac#"
inputs:
  - name: frac
    type: number
    default-value: "0.5"
xnat:
  - name: session-bet
    external-inputs:
      - name: session
        type: Session
"#,
        )
        .expect("write");

        let command = load_command_file(&command_path).expect("parse command");
        assert_eq!(command.name, "fsl-bet");
        assert_eq!(command.inputs[0].default_value.as_deref(), Some("0.5"));
        assert_eq!(command.wrappers[0].external_inputs[0].name, "session");
    }

    #[test]
    fn load_command_file_reports_path_on_failure() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let command_path = temp_dir.path().join("broken.json");
        fs::write(&command_path, "{ not json").expect("write");

        let error = load_command_file(&command_path).expect_err("broken");
        assert!(format!("{error:#}").contains("broken.json"));
    }
}
