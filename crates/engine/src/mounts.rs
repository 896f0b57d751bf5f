//! Decides how each declared mount is backed on the host.
//!
//! | feeders | root | sub-path | writable | staging |
//! |---|---|---|---|---|
//! | none | | | | empty scratch dir, writable |
//! | one | yes | no | no | root mounted directly, read-only |
//! | one | yes | no | yes | copy root into scratch |
//! | one | any | yes | any | copy the sub-path into scratch |
//! | many | | | | copy everything into one scratch dir |

use std::collections::HashMap;

use dockhand_types::{
    CommandMount, InputType, MountStaging, ResolvedInputTreeNode, ResolvedInputValue, ResolvedMount, ResolvedMountFiles,
};
use dockhand_util::EngineSettings;
use serde_json::Value;
use tracing::{debug, info};

use crate::collaborators::ScratchSpace;
use crate::error::ResolutionError;
use crate::templates::{SubstitutionMap, TemplateResolver};

pub struct MountResolver<'a> {
    pub mounts: &'a [CommandMount],
    pub templates: &'a TemplateResolver,
    pub scratch: &'a dyn ScratchSpace,
    pub settings: &'a EngineSettings,
}

impl MountResolver<'_> {
    pub fn resolve(&self, trees: &[ResolvedInputTreeNode], substitutions: &SubstitutionMap) -> Result<Vec<ResolvedMount>, ResolutionError> {
        let mut feeders = self.collect_feeders(trees)?;
        let mut resolved = Vec::with_capacity(self.mounts.len());
        for mount in self.mounts {
            let sources = feeders.remove(mount.name.as_str()).unwrap_or_default();
            let resolved_mount = self.resolve_mount(mount, sources, substitutions)?;
            info!(
                mount = %resolved_mount.name,
                staging = ?resolved_mount.staging,
                host_path = %resolved_mount.host_path,
                writable = resolved_mount.writable,
                "mount resolved"
            );
            resolved.push(resolved_mount);
        }
        Ok(resolved)
    }

    /// File sources per mount name, from every value of every feeding input.
    fn collect_feeders<'t>(&self, trees: &'t [ResolvedInputTreeNode]) -> Result<HashMap<&'t str, Vec<ResolvedMountFiles>>, ResolutionError> {
        let mut feeding: Vec<(&'t str, &'t str, &'t ResolvedInputValue)> = Vec::new();
        for tree in trees {
            tree.walk(&mut |node| {
                if let Some(mount) = node.input.provides_files_for() {
                    for entry in &node.values_and_children {
                        feeding.push((mount, node.input.name(), &entry.resolved_value));
                    }
                }
            });
        }

        let mut feeders: HashMap<&str, Vec<ResolvedMountFiles>> = HashMap::new();
        for (mount, input, value) in feeding {
            if !self.mounts.iter().any(|declared| declared.name == mount) {
                return Err(ResolutionError::configuration(format!(
                    "input '{input}' provides files for mount '{mount}', which the command does not declare"
                )));
            }
            if value.value.is_none() {
                debug!(mount, input, "skipping feeder with no value");
                continue;
            }
            feeders.entry(mount).or_default().extend(sources_for(mount, input, value)?);
        }
        Ok(feeders)
    }

    fn resolve_mount(&self, mount: &CommandMount, sources: Vec<ResolvedMountFiles>, substitutions: &SubstitutionMap) -> Result<ResolvedMount, ResolutionError> {
        let container_path = self.templates.resolve_optional(mount.path.as_deref(), substitutions)?;

        let (staging, host_path, writable) = match sources.as_slice() {
            [] => (MountStaging::Empty, self.allocate()?, true),
            [only] => match (&only.root_directory, &only.path) {
                (Some(root), None) if !mount.writable => (MountStaging::Direct, root.clone(), false),
                (Some(_), _) | (None, Some(_)) => (MountStaging::Copy, self.allocate()?, mount.writable),
                (None, None) => {
                    return Err(ResolutionError::mount(
                        &mount.name,
                        format!("input '{}' provides neither a directory nor a file", only.from_wrapper_input),
                    ));
                }
            },
            _ => (MountStaging::Copy, self.allocate()?, mount.writable),
        };

        Ok(ResolvedMount {
            name: mount.name.clone(),
            writable,
            container_path,
            container_host_path: self.settings.container_host_path(&host_path),
            host_path,
            input_files: sources,
            staging,
        })
    }

    fn allocate(&self) -> Result<String, ResolutionError> {
        let directory = self.scratch.allocate_directory()?;
        Ok(directory.to_string_lossy().into_owned())
    }
}

fn sources_for(mount: &str, input: &str, value: &ResolvedInputValue) -> Result<Vec<ResolvedMountFiles>, ResolutionError> {
    let raw = value.value.clone().unwrap_or_default();
    let json = value.json();
    let field = |name: &str| json.as_ref().and_then(|json| json.get(name)).and_then(Value::as_str).map(str::to_string);

    let source = match value.r#type {
        kind if kind.is_contextual() => {
            let root = field("directory").ok_or_else(|| {
                ResolutionError::mount(mount, format!("{kind} '{raw}' from input '{input}' has no directory"))
            })?;
            ResolvedMountFiles {
                from_wrapper_input: input.to_string(),
                from_uri: Some(raw),
                root_directory: Some(root),
                path: None,
            }
        }
        InputType::Directory => ResolvedMountFiles {
            from_wrapper_input: input.to_string(),
            from_uri: None,
            root_directory: Some(raw),
            path: None,
        },
        InputType::File => ResolvedMountFiles {
            from_wrapper_input: input.to_string(),
            from_uri: field("uri"),
            root_directory: field("directory"),
            path: field("path").or_else(|| field("name")).or(Some(raw)),
        },
        InputType::Files => {
            let entries = json.as_ref().and_then(Value::as_array).cloned().unwrap_or_default();
            return Ok(entries.iter().map(|entry| file_entry(input, entry)).collect());
        }
        other => {
            return Err(ResolutionError::mount(mount, format!("input '{input}' of type {other} cannot provide files")));
        }
    };
    Ok(vec![source])
}

fn file_entry(input: &str, entry: &Value) -> ResolvedMountFiles {
    let field = |name: &str| entry.get(name).and_then(Value::as_str).map(str::to_string);
    ResolvedMountFiles {
        from_wrapper_input: input.to_string(),
        from_uri: field("uri"),
        root_directory: field("directory"),
        path: field("path").or_else(|| field("name")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::BuildDirectoryScratch;
    use dockhand_types::{Command, CommandWrapper, ConfiguredCommand, DomainObject, ExternalInput, Input, ResolvedValueAndChildren};
    use dockhand_util::PathTranslation;
    use serde_json::json;
    use std::path::Path;

    fn feeder(name: &str, mount: &str, values: Vec<ResolvedInputValue>) -> ResolvedInputTreeNode {
        ResolvedInputTreeNode {
            input: Input::External(ExternalInput {
                name: name.into(),
                provides_files_for_command_mount: Some(mount.into()),
                ..Default::default()
            }),
            values_and_children: values
                .into_iter()
                .map(|resolved_value| ResolvedValueAndChildren {
                    resolved_value,
                    children: Vec::new(),
                })
                .collect(),
        }
    }

    fn session(directory: &str) -> ResolvedInputValue {
        ResolvedInputValue::object(DomainObject::new(
            InputType::Session,
            json!({"id": "E01", "uri": "/archive/experiments/E01", "directory": directory}),
        ))
    }

    fn resolve(mounts: &[CommandMount], trees: &[ResolvedInputTreeNode], build: &Path) -> Result<Vec<ResolvedMount>, ResolutionError> {
        let configured = ConfiguredCommand::new(Command::default(), CommandWrapper::default());
        let templates = TemplateResolver::new(&configured).expect("templates");
        let scratch = BuildDirectoryScratch::new(build);
        let settings = EngineSettings {
            build_path: build.to_path_buf(),
            path_translation: Some(PathTranslation {
                host_prefix: "/data".into(),
                container_host_prefix: "/mnt/data".into(),
            }),
        };
        MountResolver {
            mounts,
            templates: &templates,
            scratch: &scratch,
            settings: &settings,
        }
        .resolve(trees, &SubstitutionMap::new())
    }

    fn mount(name: &str, writable: bool) -> CommandMount {
        CommandMount {
            name: name.into(),
            writable,
            path: Some(format!("/{name}")),
        }
    }

    #[test]
    fn read_only_directory_is_passed_through() {
        let build = tempfile::tempdir().expect("tempdir");
        let trees = [feeder("session", "in", vec![session("/data/archive/E01")])];
        let mounts = resolve(&[mount("in", false)], &trees, build.path()).expect("mounts");

        assert_eq!(mounts[0].staging, MountStaging::Direct);
        assert_eq!(mounts[0].host_path, "/data/archive/E01");
        assert_eq!(mounts[0].container_host_path, "/mnt/data/archive/E01");
        assert!(!mounts[0].writable);
        assert_eq!(mounts[0].input_files[0].from_uri.as_deref(), Some("/archive/experiments/E01"));
    }

    #[test]
    fn writable_mount_copies_into_scratch() {
        let build = tempfile::tempdir().expect("tempdir");
        let trees = [feeder("session", "in", vec![session("/data/archive/E01")])];
        let mounts = resolve(&[mount("in", true)], &trees, build.path()).expect("mounts");

        assert_eq!(mounts[0].staging, MountStaging::Copy);
        assert!(mounts[0].host_path.starts_with(build.path().to_string_lossy().as_ref()));
        assert!(Path::new(&mounts[0].host_path).is_dir());
    }

    #[test]
    fn unfed_mount_gets_empty_writable_scratch() {
        let build = tempfile::tempdir().expect("tempdir");
        let trees = [feeder("session", "in", vec![ResolvedInputValue::scalar(InputType::Session, None)])];
        let mounts = resolve(&[mount("in", false), mount("out", false)], &trees, build.path()).expect("mounts");

        assert!(mounts.iter().all(|mount| mount.staging == MountStaging::Empty && mount.writable));
        assert_ne!(mounts[0].host_path, mounts[1].host_path);
        assert_eq!(mounts[1].container_path.as_deref(), Some("/out"));
    }

    #[test]
    fn several_feeders_are_copied() {
        let build = tempfile::tempdir().expect("tempdir");
        let trees = [feeder("sessions", "in", vec![session("/data/a"), session("/data/b")])];
        let mounts = resolve(&[mount("in", false)], &trees, build.path()).expect("mounts");
        assert_eq!(mounts[0].staging, MountStaging::Copy);
        assert_eq!(mounts[0].input_files.len(), 2);
    }

    #[test]
    fn single_file_is_copied_with_its_path() {
        let build = tempfile::tempdir().expect("tempdir");
        let file = ResolvedInputValue::object(DomainObject::new(
            InputType::File,
            json!({"name": "brain.nii", "uri": "/archive/experiments/E01/resources/NIFTI/files/brain.nii", "directory": "/data/nifti"}),
        ));
        let trees = [feeder("image", "in", vec![file])];
        let mounts = resolve(&[mount("in", false)], &trees, build.path()).expect("mounts");

        assert_eq!(mounts[0].staging, MountStaging::Copy);
        assert_eq!(mounts[0].input_files[0].path.as_deref(), Some("brain.nii"));
        assert_eq!(mounts[0].input_files[0].root_directory.as_deref(), Some("/data/nifti"));
    }

    #[test]
    fn feeding_an_undeclared_mount_is_a_configuration_error() {
        let build = tempfile::tempdir().expect("tempdir");
        let trees = [feeder("session", "nowhere", vec![session("/data/a")])];
        let error = resolve(&[mount("in", false)], &trees, build.path()).expect_err("undeclared");
        assert!(matches!(error, ResolutionError::Configuration { .. }));
    }

    #[test]
    fn contextual_object_without_directory_fails() {
        let build = tempfile::tempdir().expect("tempdir");
        let value = ResolvedInputValue::object(DomainObject::new(InputType::Session, json!({"uri": "/archive/experiments/E09"})));
        let trees = [feeder("session", "in", vec![value])];
        let error = resolve(&[mount("in", false)], &trees, build.path()).expect_err("no directory");
        assert!(matches!(error, ResolutionError::MountResolution { .. }));
    }
}
