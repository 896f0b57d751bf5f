use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dockhand_engine::{
    BuildDirectoryScratch, CommandLookup, CommandResolutionService, InMemoryDefinitionStore, InMemoryObjectStore, ResolutionRequest,
    command_line_arguments, load_command_file,
};
use dockhand_types::{Command, User};
use dockhand_util::EngineSettings;
use indexmap::IndexMap;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dockhand", version, about = "Resolve containerized command definitions into launchable plans")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Resolve a command into a launchable plan
    Resolve {
        #[command(flatten)]
        target: TargetArgs,
        /// Print only the command line split into arguments
        #[arg(long)]
        arguments: bool,
    },
    /// Resolve the input tree without enforcing required inputs
    Preview {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Command definition file (.json, .yaml or .yml)
    definition: PathBuf,
    /// Wrapper to run; may be omitted when the command declares exactly one
    #[arg(long, short = 'w')]
    wrapper: Option<String>,
    /// JSON object catalog serving contextual objects
    #[arg(long)]
    objects: Option<PathBuf>,
    /// Runtime input value as NAME=VALUE; repeatable
    #[arg(long = "input", short = 'i', value_parser = parse_input)]
    inputs: Vec<(String, String)>,
    /// User the resolution runs as
    #[arg(long, default_value = "admin")]
    user: String,
    /// Project scope for configuration overlays
    #[arg(long)]
    project: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = EngineSettings::load().context("Failed to load engine settings")?;
    debug!(build_path = %settings.build_path.display(), "settings loaded");

    match cli.command {
        CliCommand::Resolve { target, arguments } => {
            let (service, lookup, request) = prepare(&target, settings)?;
            let resolved = service.resolve_lookup(&lookup, &request)?;
            if arguments {
                println!("{}", serde_json::to_string_pretty(&command_line_arguments(&resolved))?);
            } else {
                println!("{}", serde_json::to_string_pretty(&resolved)?);
            }
        }
        CliCommand::Preview { target } => {
            let (service, lookup, request) = prepare(&target, settings)?;
            let preview = service.pre_resolve_lookup(&lookup, &request)?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}

fn prepare(target: &TargetArgs, settings: EngineSettings) -> Result<(CommandResolutionService, CommandLookup, ResolutionRequest)> {
    let command = load_command_file(&target.definition)?;
    let wrapper_name = select_wrapper(&command, target.wrapper.as_deref())?;
    let lookup = CommandLookup::CommandAndWrapper {
        command_id: command.id,
        wrapper_name,
    };

    let objects = match &target.objects {
        Some(path) => InMemoryObjectStore::from_file(path)?,
        None => InMemoryObjectStore::default(),
    };
    info!(
        command = %command.name,
        lookup = %lookup,
        objects = objects.len(),
        "loaded definition"
    );

    let scratch = BuildDirectoryScratch::new(settings.build_path.clone());
    let service = CommandResolutionService::new(
        Arc::new(InMemoryDefinitionStore::new(vec![command])),
        Arc::new(objects),
        Arc::new(scratch),
        settings,
    );

    let runtime_values: IndexMap<String, String> = target.inputs.iter().cloned().collect();
    let request = ResolutionRequest {
        runtime_values,
        user: User::new(target.user.clone()),
        project: target.project.clone(),
    };
    Ok((service, lookup, request))
}

fn select_wrapper(command: &Command, requested: Option<&str>) -> Result<String> {
    if let Some(name) = requested {
        if command.wrapper(name).is_none() {
            bail!("command '{}' has no wrapper named '{}'", command.name, name);
        }
        return Ok(name.to_string());
    }
    match command.wrappers.as_slice() {
        [only] => Ok(only.name.clone()),
        [] => bail!("command '{}' declares no wrappers", command.name),
        many => {
            let names: Vec<&str> = many.iter().map(|wrapper| wrapper.name.as_str()).collect();
            bail!("command '{}' has several wrappers; pick one with --wrapper: {}", command.name, names.join(", "))
        }
    }
}

fn parse_input(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw.split_once('=').ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("input name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_types::CommandWrapper;

    #[test]
    fn parse_input_splits_on_first_equals() {
        assert_eq!(parse_input("filter=a=b").expect("parsed"), ("filter".to_string(), "a=b".to_string()));
        assert!(parse_input("novalue").is_err());
        assert!(parse_input("=x").is_err());
    }

    #[test]
    fn single_wrapper_is_selected_implicitly() {
        let mut command = Command {
            name: "job".into(),
            wrappers: vec![CommandWrapper {
                name: "only".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(select_wrapper(&command, None).expect("selected"), "only");
        assert!(select_wrapper(&command, Some("other")).is_err());

        command.wrappers.push(CommandWrapper {
            name: "second".into(),
            ..Default::default()
        });
        assert!(select_wrapper(&command, None).is_err());
        assert_eq!(select_wrapper(&command, Some("second")).expect("selected"), "second");
    }

    #[test]
    fn cli_parses_repeated_inputs() {
        let cli = Cli::try_parse_from(["dockhand", "resolve", "command.json", "-i", "a=1", "--input", "b=2", "--arguments"]).expect("parse");
        match cli.command {
            CliCommand::Resolve { target, arguments } => {
                assert!(arguments);
                assert_eq!(target.inputs.len(), 2);
                assert_eq!(target.user, "admin");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
