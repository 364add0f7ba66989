//! On-disk mod store
//!
//! The store root contains one subdirectory per installed mod. Each mod
//! folder carries a `<name>.moddetails` JSON manifest naming the mod and
//! the mod type whose ruleset governs it, plus a `scripts/` subfolder of
//! module artifacts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DETAILS_SUFFIX: &str = ".moddetails";

/// Manifest describing one installed mod.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModDetails {
    pub name: String,
    /// Mod type whose ruleset this mod is validated against.
    pub mod_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
}

impl ModDetails {
    pub fn new(name: impl Into<String>, mod_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mod_type: mod_type.into(),
            version: String::new(),
            author: String::new(),
            description: String::new(),
        }
    }
}

/// Directory of installed mods.
#[derive(Clone, Debug)]
pub struct ModStore {
    root: PathBuf,
}

impl ModStore {
    /// Open a store, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mod_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Installed mod folders, sorted by name.
    pub fn mod_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&self.root)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Read the manifest from a mod folder. The first `.moddetails` file
    /// found wins; a folder without one is an error.
    pub fn details(&self, mod_dir: &Path) -> Result<ModDetails> {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(mod_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.to_ascii_lowercase().ends_with(DETAILS_SUFFIX))
            })
            .collect();
        candidates.sort();

        let Some(path) = candidates.into_iter().next() else {
            return Err(Error::ManifestMissing(mod_dir.to_path_buf()));
        };
        debug!(path = %path.display(), "reading mod manifest");
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every readable manifest in the store, in folder order. Folders with
    /// missing or unreadable manifests are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ModDetails>> {
        let mut all = Vec::new();
        for dir in self.mod_dirs()? {
            match self.details(&dir) {
                Ok(details) => all.push(details),
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "skipping unreadable mod manifest");
                }
            }
        }
        Ok(all)
    }

    /// Write a manifest into a mod folder, creating the folder if needed.
    pub fn save_details(&self, details: &ModDetails) -> Result<PathBuf> {
        let dir = self.mod_dir(&details.name);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}{DETAILS_SUFFIX}", details.name));
        std::fs::write(&path, serde_json::to_vec_pretty(details)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ModStore::open(dir.path()).unwrap();

        let mut details = ModDetails::new("shipyard", "gameplay");
        details.version = "2.1.0".to_string();
        store.save_details(&details).unwrap();

        let dirs = store.mod_dirs().unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(store.details(&dirs[0]).unwrap(), details);
    }

    #[test]
    fn folder_without_manifest_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = ModStore::open(dir.path()).unwrap();
        let empty = store.mod_dir("bare");
        std::fs::create_dir_all(&empty).unwrap();

        assert!(matches!(
            store.details(&empty).unwrap_err(),
            Error::ManifestMissing(_)
        ));
    }

    #[test]
    fn list_skips_unreadable_manifests() {
        let dir = TempDir::new().unwrap();
        let store = ModStore::open(dir.path()).unwrap();
        store
            .save_details(&ModDetails::new("good", "gameplay"))
            .unwrap();
        std::fs::create_dir_all(store.mod_dir("bare")).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "good");
    }

    #[test]
    fn unknown_manifest_fields_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ModStore::open(dir.path()).unwrap();
        let mod_dir = store.mod_dir("odd");
        std::fs::create_dir_all(&mod_dir).unwrap();
        std::fs::write(
            mod_dir.join("odd.moddetails"),
            r#"{"name":"odd","mod_type":"gameplay","sneaky":true}"#,
        )
        .unwrap();

        assert!(store.details(&mod_dir).is_err());
    }
}
