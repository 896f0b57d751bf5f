use std::fs;
use std::path::PathBuf;

use tracing::debug;

use super::{CollaboratorError, ScratchSpace};

/// Allocates uniquely named directories under a build path. Directories are
/// kept after allocation; cleaning them up belongs to whoever finalizes the
/// container.
#[derive(Debug, Clone)]
pub struct BuildDirectoryScratch {
    build_path: PathBuf,
}

impl BuildDirectoryScratch {
    pub fn new(build_path: impl Into<PathBuf>) -> Self {
        Self { build_path: build_path.into() }
    }
}

impl ScratchSpace for BuildDirectoryScratch {
    fn allocate_directory(&self) -> Result<PathBuf, CollaboratorError> {
        fs::create_dir_all(&self.build_path)?;
        let directory = tempfile::Builder::new().prefix("mount-").tempdir_in(&self.build_path)?.keep();
        debug!(path = %directory.display(), "allocated build directory");
        Ok(directory)
    }
}
