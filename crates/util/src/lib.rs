//! Shared helpers for the resolution engine and CLI.
//!
//! - [`settings`]: engine settings loaded from JSON with environment overrides.
//! - [`shell_lexing`]: splits a resolved command line into an argument vector.
//! - [`text_processing`]: redaction of secret-looking and sensitive values.

pub mod settings;
pub mod shell_lexing;
pub mod text_processing;

use std::path::PathBuf;

use dirs_next::home_dir;

pub use settings::{EngineSettings, PathTranslation, SettingsError};
pub use shell_lexing::split_command_line;
pub use text_processing::{redact_sensitive, redact_values};

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if trimmed == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(trimmed)
}
