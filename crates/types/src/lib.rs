//! Shared type definitions for command definitions, configuration overlays,
//! contextual objects and resolved launch plans.
//!
//! - [`command`]: commands, wrappers and their inputs, outputs and mounts.
//! - [`configuration`]: site/project overlays and the configured command.
//! - [`domain`]: contextual object handles and users.
//! - [`resolved`]: input trees and the resolved plan emitted by the engine.
//!
//! All wire types serialize with kebab-case keys.

pub mod command;
pub mod configuration;
pub mod domain;
pub mod resolved;

pub use command::{
    Command, CommandInput, CommandMount, CommandOutput, CommandWrapper, DerivedInput, ExternalInput, Input, InputType, OutputHandler,
    OutputHandlerType,
};
pub use configuration::{CommandConfiguration, CommandInputConfiguration, CommandOutputConfiguration, ConfiguredCommand};
pub use domain::{DomainObject, User};
pub use resolved::{
    MountStaging, PartiallyResolvedCommand, PreresolvedInputTreeNode, ResolvedCommand, ResolvedInputTreeNode, ResolvedInputValue,
    ResolvedMount, ResolvedMountFiles, ResolvedOutput, ResolvedValueAndChildren,
};
