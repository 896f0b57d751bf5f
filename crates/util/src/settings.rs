//! Engine settings persisted as JSON.
//!
//! The file lives at `~/.config/dockhand/settings.json` on most platforms and
//! can be relocated with `DOCKHAND_SETTINGS_PATH`. `DOCKHAND_BUILD_PATH`
//! overrides the build directory regardless of what the file says.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::expand_tilde;

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "DOCKHAND_SETTINGS_PATH";

/// Environment variable overriding the build directory.
pub const BUILD_PATH_ENV: &str = "DOCKHAND_BUILD_PATH";

/// Default filename for the JSON payload.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rewrites host paths into the form the container host sees them in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct PathTranslation {
    pub host_prefix: String,
    pub container_host_prefix: String,
}

impl PathTranslation {
    /// Swaps `host_prefix` for `container_host_prefix`; other paths pass through.
    pub fn translate(&self, path: &str) -> String {
        match path.strip_prefix(&self.host_prefix) {
            Some(rest) if !self.host_prefix.is_empty() => format!("{}{}", self.container_host_prefix, rest),
            _ => path.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct EngineSettings {
    /// Parent directory for freshly allocated scratch directories.
    #[serde(default = "default_build_path")]
    pub build_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_translation: Option<PathTranslation>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            build_path: default_build_path(),
            path_translation: None,
        }
    }
}

fn default_build_path() -> PathBuf {
    env::temp_dir().join("dockhand").join("build")
}

impl EngineSettings {
    /// Loads settings from the default location, applying environment overrides.
    pub fn load() -> Result<Self, SettingsError> {
        let path = default_settings_path();
        Self::load_from(&path)
    }

    /// Loads settings from `path`. A missing file yields defaults; a file that
    /// fails to parse is logged and also yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let mut settings = match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<EngineSettings>(&data) {
                Ok(settings) => settings,
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "Failed to parse settings file; using defaults"
                    );
                    EngineSettings::default()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => EngineSettings::default(),
            Err(error) => return Err(SettingsError::Io(error)),
        };

        if let Ok(build_path) = env::var(BUILD_PATH_ENV) {
            let trimmed = build_path.trim();
            if !trimmed.is_empty() {
                settings.build_path = expand_tilde(trimmed);
            }
        } else if let Some(raw) = settings.build_path.to_str() {
            settings.build_path = expand_tilde(raw);
        }

        debug!(path = %path.display(), build_path = %settings.build_path.display(), "settings loaded");
        Ok(settings)
    }

    /// The path a container host uses for `host_path`.
    pub fn container_host_path(&self, host_path: &str) -> String {
        match &self.path_translation {
            Some(translation) => translation.translate(host_path),
            None => host_path.to_string(),
        }
    }
}

/// Settings file location honouring [`SETTINGS_PATH_ENV`].
pub fn default_settings_path() -> PathBuf {
    if let Ok(path) = env::var(SETTINGS_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dockhand")
        .join(SETTINGS_FILE_NAME)
}
