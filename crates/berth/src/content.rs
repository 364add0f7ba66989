//! Artifact content cache
//!
//! Parsing and validating module envelopes is the hot path when the same
//! mods are revalidated across lifecycle passes. The cache keys entries by
//! path and invalidates on modification time, so an edited artifact is
//! reparsed on its next use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tracing::debug;

use crate::artifact::ModuleArtifact;
use crate::error::Result;

struct CacheEntry {
    modified: SystemTime,
    artifact: Arc<ModuleArtifact>,
}

/// Shared, mtime-invalidated cache of parsed artifacts.
#[derive(Default)]
pub struct ContentManager {
    entries: RwLock<BTreeMap<PathBuf, CacheEntry>>,
}

impl ContentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an artifact, reusing the cached parse while the file is
    /// unchanged on disk.
    pub fn load(&self, path: &Path) -> Result<Arc<ModuleArtifact>> {
        let modified = std::fs::metadata(path)?.modified()?;

        if let Ok(entries) = self.entries.read() {
            if let Some(entry) = entries.get(path) {
                if entry.modified == modified {
                    return Ok(entry.artifact.clone());
                }
            }
        }

        debug!(path = %path.display(), "parsing artifact");
        let artifact = Arc::new(ModuleArtifact::from_path(path)?);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                path.to_path_buf(),
                CacheEntry {
                    modified,
                    artifact: artifact.clone(),
                },
            );
        }
        Ok(artifact)
    }

    /// Drop the cached entry for one path.
    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(path);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}
