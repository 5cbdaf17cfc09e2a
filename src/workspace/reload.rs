//! Workspace rebuilt from a description file when the file changes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use forge_core::ForgeResult;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::Workspace;

type Factory = Box<dyn Fn(&Path) -> ForgeResult<Arc<dyn Workspace>> + Send + Sync>;

/// Lazily (re)builds a workspace from a file.
///
/// [`ReloadingWorkspace::workspace`] hashes the file on every call and only invokes the
/// factory when the content changed since the last build. Callers that still hold the
/// previous workspace keep using it; nothing running on it is interrupted.
pub struct ReloadingWorkspace {
    path: PathBuf,
    factory: Factory,
    current: Mutex<Option<(String, Arc<dyn Workspace>)>>,
}

impl ReloadingWorkspace {
    /// Watch `path`, building workspaces with `factory`.
    pub fn new<F>(path: impl Into<PathBuf>, factory: F) -> Self
    where
        F: Fn(&Path) -> ForgeResult<Arc<dyn Workspace>> + Send + Sync + 'static,
    {
        Self {
            path: path.into(),
            factory: Box::new(factory),
            current: Mutex::new(None),
        }
    }

    /// Description file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current workspace, rebuilt first if the file content changed.
    ///
    /// A failing rebuild keeps the previous workspace in place and returns the error.
    pub fn workspace(&self) -> ForgeResult<Arc<dyn Workspace>> {
        let checksum = file_checksum(&self.path)?;
        let mut current = self.current.lock();
        if let Some((known, workspace)) = current.as_ref() {
            if *known == checksum {
                debug!(path = %self.path.display(), "Workspace unchanged");
                return Ok(Arc::clone(workspace));
            }
        }

        let workspace = (self.factory)(&self.path)?;
        info!(
            path = %self.path.display(),
            checksum = %&checksum[..12],
            "Workspace reloaded"
        );
        *current = Some((checksum, Arc::clone(&workspace)));
        Ok(workspace)
    }

    /// Checksum of the content the current workspace was built from.
    pub fn checksum(&self) -> Option<String> {
        self.current.lock().as_ref().map(|(checksum, _)| checksum.clone())
    }
}

impl fmt::Debug for ReloadingWorkspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadingWorkspace")
            .field("path", &self.path)
            .field("checksum", &self.checksum())
            .finish()
    }
}

fn file_checksum(path: &Path) -> ForgeResult<String> {
    let bytes = std::fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use forge_core::ForgeError;
    use tempfile::TempDir;

    use crate::config::ForgeConfig;
    use crate::context::Context;
    use crate::workspace::BasicWorkspace;

    fn reloading(path: &Path, builds: Arc<AtomicUsize>) -> ReloadingWorkspace {
        ReloadingWorkspace::new(path, move |path| {
            builds.fetch_add(1, Ordering::SeqCst);
            let config = ForgeConfig::load_from(path)
                .map_err(|e| ForgeError::Configuration(e.to_string()))?;
            let workspace = BasicWorkspace::builder(Context::new("reload"))
                .targets_from_config(&config)
                .build();
            Ok(Arc::new(workspace) as Arc<dyn Workspace>)
        })
    }

    #[test]
    fn test_rebuilds_only_on_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forge.toml");
        std::fs::write(&path, "[targets.demo]\na = 1\n").unwrap();

        let builds = Arc::new(AtomicUsize::new(0));
        let reload = reloading(&path, Arc::clone(&builds));

        let first = reload.workspace().unwrap();
        let again = reload.workspace().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(first.get_target("demo").unwrap().get_i64("a"), Some(1));

        std::fs::write(&path, "[targets.demo]\na = 2\n").unwrap();
        let changed = reload.workspace().unwrap();
        assert!(!Arc::ptr_eq(&first, &changed));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(changed.get_target("demo").unwrap().get_i64("a"), Some(2));

        // the old workspace is still usable
        assert_eq!(first.get_target("demo").unwrap().get_i64("a"), Some(1));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let reload = reloading(&dir.path().join("absent.toml"), Arc::new(AtomicUsize::new(0)));
        assert!(matches!(reload.workspace(), Err(ForgeError::Io(_))));
        assert!(reload.checksum().is_none());
    }
}
