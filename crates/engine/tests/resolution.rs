use std::sync::Arc;

use dockhand_engine::{
    AncestryCache, BuildDirectoryScratch, CommandLookup, CommandResolutionService, InMemoryDefinitionStore, InMemoryObjectStore, ObjectCatalog,
    ResolutionError, ResolutionRequest, command_line_arguments,
};
use dockhand_types::{
    Command, CommandConfiguration, CommandInput, CommandInputConfiguration, CommandWrapper, ConfiguredCommand, DerivedInput, ExternalInput,
    InputType, MountStaging, User,
};
use dockhand_util::EngineSettings;
use tempfile::TempDir;

fn load_command() -> Command {
    let command = include_str!("data/threshold_command.json");
    serde_json::from_str(command).expect("parse command fixture")
}

fn load_catalog() -> ObjectCatalog {
    let catalog = include_str!("data/catalog.json");
    serde_json::from_str(catalog).expect("parse catalog fixture")
}

struct Harness {
    service: CommandResolutionService,
    definitions: Arc<InMemoryDefinitionStore>,
    build: TempDir,
}

fn harness() -> Harness {
    let build = tempfile::tempdir().expect("tempdir");
    let definitions = Arc::new(InMemoryDefinitionStore::new(vec![load_command()]));
    let service = CommandResolutionService::new(
        definitions.clone(),
        Arc::new(InMemoryObjectStore::new(load_catalog())),
        Arc::new(BuildDirectoryScratch::new(build.path())),
        EngineSettings {
            build_path: build.path().to_path_buf(),
            path_translation: None,
        },
    )
    .with_ancestry_cache(Arc::new(AncestryCache::default()));
    Harness {
        service,
        definitions,
        build,
    }
}

fn configured(wrapper: &str) -> ConfiguredCommand {
    ConfiguredCommand::configure(&load_command(), wrapper, &CommandConfiguration::default()).expect("wrapper present")
}

fn request() -> ResolutionRequest {
    ResolutionRequest::new(User::new("alice"))
}

fn inline_command(command_line: &str, inputs: Vec<CommandInput>, wrapper: CommandWrapper) -> ConfiguredCommand {
    ConfiguredCommand::new(
        Command {
            id: 12,
            name: "inline".into(),
            command_line: Some(command_line.into()),
            inputs,
            ..Default::default()
        },
        wrapper,
    )
}

fn external(name: &str, kind: InputType) -> ExternalInput {
    ExternalInput {
        name: name.into(),
        r#type: kind,
        ..Default::default()
    }
}

fn derived(name: &str, kind: InputType, parent: &str) -> DerivedInput {
    DerivedInput {
        name: name.into(),
        r#type: kind,
        derived_from_wrapper_input: parent.into(),
        ..Default::default()
    }
}

#[test]
fn subject_wrapper_resolves_the_mr1_session() {
    let harness = harness();
    let request = request().with_value("subject", "/archive/subjects/S01");
    let resolved = harness.service.resolve(&configured("threshold-subject"), &request).expect("resolved");

    assert_eq!(resolved.command_line, "run.sh --in /archive/experiments/E01 --t 0.5");
    assert_eq!(command_line_arguments(&resolved), vec!["run.sh", "--in", "/archive/experiments/E01", "--t", "0.5"]);
    assert_eq!(resolved.derived_input_values.get("session"), Some(&Some("/archive/experiments/E01".to_string())));
    assert_eq!(resolved.command_input_values.get("session-label"), Some(&Some("MR1".to_string())));
    assert_eq!(resolved.working_directory.as_deref(), Some("/work/MR1"));
    assert_eq!(resolved.environment_variables.get("THRESHOLD").map(String::as_str), Some("0.5"));
    assert_eq!(resolved.environment_variables.get("SESSION_LABEL").map(String::as_str), Some("MR1"));
    assert_eq!(resolved.ports.get("8080").map(String::as_str), Some("9000"));
    assert_eq!(resolved.image.as_deref(), Some("example/threshold:1.2.0"));
    assert_eq!(resolved.limit_cpu, Some(1.5));
    assert_eq!(resolved.wrapper_id, 110);
}

#[test]
fn read_only_session_directory_is_mounted_directly() {
    let harness = harness();
    let request = request().with_value("subject", "/archive/subjects/S01");
    let resolved = harness.service.resolve(&configured("threshold-subject"), &request).expect("resolved");

    let input = resolved.mounts.iter().find(|mount| mount.name == "input").expect("input mount");
    assert_eq!(input.staging, MountStaging::Direct);
    assert_eq!(input.host_path, "/data/archive/P1/arc001/MR1");
    assert_eq!(input.container_host_path, input.host_path);
    assert_eq!(input.container_path.as_deref(), Some("/input"));
    assert!(!input.writable);

    let output = resolved.mounts.iter().find(|mount| mount.name == "output").expect("output mount");
    assert_eq!(output.staging, MountStaging::Empty);
    assert!(output.writable);
    assert!(output.host_path.starts_with(harness.build.path().to_string_lossy().as_ref()));
}

#[test]
fn required_output_resolves_and_unusable_optional_output_is_skipped() {
    let harness = harness();
    let request = request().with_value("subject", "S01");
    let resolved = harness.service.resolve(&configured("threshold-subject"), &request).expect("resolved");

    // The report handler targets a subject, which cannot own an assessor.
    assert_eq!(resolved.outputs.len(), 1);
    let mask = &resolved.outputs[0];
    assert_eq!(mask.name, "mask");
    assert_eq!(mask.handled_by, "session");
    assert_eq!(mask.handled_by_uri, "/archive/experiments/E01");
    assert_eq!(mask.label.as_deref(), Some("MASK_0.5"));
    assert_eq!(mask.path.as_deref(), Some("mask-0.5.nii.gz"));
}

#[test]
fn missing_subject_lists_every_required_input() {
    let harness = harness();
    let error = harness.service.resolve(&configured("threshold-subject"), &request()).expect_err("no subject");
    match error {
        ResolutionError::MissingRequiredInputs { names } => assert_eq!(names, vec!["subject", "session"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn scans_fan_out_and_stay_out_of_substitutions() {
    let harness = harness();
    let request = request().with_value("session", "E01");
    let resolved = harness.service.resolve(&configured("threshold-scans"), &request).expect("resolved");

    assert_eq!(resolved.command_line, "run.sh --in /archive/experiments/E01 --t 0.5");
    assert!(!resolved.derived_input_values.contains_key("scan"));
    // The report handler's scan is ambiguous, so the optional output drops out.
    assert_eq!(resolved.outputs.iter().map(|output| output.name.as_str()).collect::<Vec<_>>(), vec!["mask"]);

    let preview = harness.service.pre_resolve(&configured("threshold-scans"), &request).expect("preview");
    let session = &preview.resolved_input_trees[0];
    assert!(session.is_uniquely_resolved());
    assert_eq!(session.values_and_children[0].children[0].values_and_children.len(), 2);
}

#[test]
fn boolean_input_uses_declared_tokens_on_the_command_line() {
    let harness = harness();
    let mut configured = configured("threshold-scans");
    configured.command.command_line = Some("run.sh #verbose# --t #threshold#".into());

    let request = request().with_value("session", "E01").with_value("verbose", "true");
    let resolved = harness.service.resolve(&configured, &request).expect("resolved");
    assert_eq!(resolved.command_line, "run.sh --verbose 1 --t 0.5");
    assert_eq!(resolved.command_input_values.get("verbose"), Some(&Some("1".to_string())));
}

#[test]
fn unreadable_session_is_unauthorized_not_missing() {
    let harness = harness();
    let request = request().with_value("session", "E02");
    let error = harness.service.resolve(&configured("threshold-scans"), &request).expect_err("unreadable");
    assert!(error.is_unauthorized(), "unexpected error: {error}");

    let request = self::request().with_value("session", "E99");
    let error = harness.service.resolve(&configured("threshold-scans"), &request).expect_err("unknown");
    assert!(matches!(error, ResolutionError::MissingRequiredInputs { .. }));
}

#[test]
fn project_configuration_overrides_site_defaults() {
    let harness = harness();
    let site = CommandConfiguration {
        inputs: [(
            "threshold".to_string(),
            CommandInputConfiguration {
                default_value: Some("0.6".into()),
                ..Default::default()
            },
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    let project = CommandConfiguration {
        inputs: [(
            "threshold".to_string(),
            CommandInputConfiguration {
                default_value: Some("0.7".into()),
                ..Default::default()
            },
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    harness.definitions.set_site_configuration(11, "threshold-scans", site);
    harness.definitions.set_project_configuration("P1", 11, "threshold-scans", project);

    let lookup = CommandLookup::CommandAndWrapper {
        command_id: 11,
        wrapper_name: "threshold-scans".into(),
    };
    let site_resolved = harness.service.resolve_lookup(&lookup, &request().with_value("session", "E01")).expect("site");
    assert!(site_resolved.command_line.ends_with("--t 0.6"));

    let project_request = request().with_value("session", "E01").with_project("P1");
    let project_resolved = harness.service.resolve_lookup(&lookup, &project_request).expect("project");
    assert!(project_resolved.command_line.ends_with("--t 0.7"));
    assert_eq!(project_resolved.project.as_deref(), Some("P1"));
}

#[test]
fn resolved_command_serializes_with_kebab_case_keys() {
    let harness = harness();
    let request = request().with_value("subject", "/archive/subjects/S01");
    let resolved = harness.service.resolve(&configured("threshold-subject"), &request).expect("resolved");

    let json = serde_json::to_value(&resolved).expect("serialize");
    assert_eq!(json["command-line"], "run.sh --in /archive/experiments/E01 --t 0.5");
    assert_eq!(json["mounts"][0]["xnat-host-path"], "/data/archive/P1/arc001/MR1");
    assert_eq!(json["outputs"][0]["handled-by-uri"], "/archive/experiments/E01");
    assert_eq!(json["raw-input-values"]["subject"], "/archive/subjects/S01");
}

#[test]
fn sibling_matcher_sees_uniquely_resolved_session() {
    let harness = harness();
    let wrapper = CommandWrapper {
        name: "pick-session".into(),
        external_inputs: vec![external("subject", InputType::Subject)],
        derived_inputs: vec![
            DerivedInput {
                matcher: Some("label == 'MR1'".into()),
                ..derived("session", InputType::Session, "subject")
            },
            DerivedInput {
                matcher: Some("@.uri == '#session#'".into()),
                provides_value_for_command_input: Some("c".into()),
                ..derived("chosen", InputType::Session, "subject")
            },
        ],
        ..Default::default()
    };
    let configured = inline_command(
        "run #c#",
        vec![CommandInput {
            name: "c".into(),
            ..Default::default()
        }],
        wrapper,
    );

    let resolved = harness.service.resolve(&configured, &request().with_value("subject", "S01")).expect("resolved");
    assert_eq!(resolved.command_line, "run /archive/experiments/E01");
}

#[test]
fn derived_matcher_sees_externals_declared_after_its_parent() {
    let harness = harness();
    let wrapper = CommandWrapper {
        name: "pick-scan".into(),
        external_inputs: vec![external("session", InputType::Session), external("scan-type", InputType::String)],
        derived_inputs: vec![DerivedInput {
            matcher: Some("@.scan-type == '#scan-type#'".into()),
            provides_value_for_command_input: Some("s".into()),
            ..derived("scan", InputType::Scan, "session")
        }],
        ..Default::default()
    };
    let configured = inline_command(
        "run #s#",
        vec![CommandInput {
            name: "s".into(),
            ..Default::default()
        }],
        wrapper,
    );

    let request = request().with_value("session", "E01").with_value("scan-type", "T2w");
    let resolved = harness.service.resolve(&configured, &request).expect("resolved");
    assert_eq!(resolved.command_line, "run /archive/experiments/E01/scans/2");
}

#[test]
fn command_input_falls_back_when_its_provider_is_empty() {
    let harness = harness();
    let wrapper = CommandWrapper {
        name: "no-session".into(),
        external_inputs: vec![external("subject", InputType::Subject)],
        derived_inputs: vec![DerivedInput {
            matcher: Some("label == 'MRX'".into()),
            provides_value_for_command_input: Some("c".into()),
            ..derived("session", InputType::Session, "subject")
        }],
        ..Default::default()
    };
    let input = |default_value: Option<&str>| CommandInput {
        name: "c".into(),
        required: true,
        default_value: default_value.map(str::to_string),
        ..Default::default()
    };

    let configured = inline_command("run #c#", vec![input(Some("fallback"))], wrapper.clone());
    let request = request().with_value("subject", "S01");
    let resolved = harness.service.resolve(&configured, &request).expect("default");
    assert_eq!(resolved.command_line, "run fallback");

    let resolved = harness
        .service
        .resolve(&configured, &request.clone().with_value("c", "override"))
        .expect("runtime value");
    assert_eq!(resolved.command_line, "run override");
    assert_eq!(resolved.command_input_values.get("c"), Some(&Some("override".to_string())));

    let configured = inline_command("run #c#", vec![input(None)], wrapper);
    match harness.service.resolve(&configured, &request).expect_err("no value") {
        ResolutionError::MissingRequiredInputs { names } => assert_eq!(names, vec!["c"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn resource_file_list_feeds_a_copied_mount() {
    let harness = harness();
    let mut configured = configured("threshold-scans");
    configured.wrapper.external_inputs[0].provides_files_for_command_mount = None;
    configured
        .wrapper
        .derived_inputs
        .push(derived("nifti", InputType::Resource, "session"));
    configured.wrapper.derived_inputs.push(DerivedInput {
        provides_files_for_command_mount: Some("input".into()),
        ..derived("nifti-files", InputType::Files, "nifti")
    });

    let resolved = harness.service.resolve(&configured, &request().with_value("session", "E01")).expect("resolved");
    assert_eq!(
        resolved.derived_input_values.get("nifti"),
        Some(&Some("/archive/experiments/E01/resources/NIFTI".to_string()))
    );

    let input = resolved.mounts.iter().find(|mount| mount.name == "input").expect("input mount");
    assert_eq!(input.staging, MountStaging::Copy);
    assert!(!input.writable);
    assert!(input.host_path.starts_with(harness.build.path().to_string_lossy().as_ref()));
    let paths: Vec<_> = input.input_files.iter().map(|files| files.path.as_deref()).collect();
    assert_eq!(paths, vec![Some("brain.nii.gz"), Some("mask.nii.gz")]);
    assert!(input.input_files.iter().all(|files| files.from_wrapper_input == "nifti-files"));
}
