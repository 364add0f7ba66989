//! Trust verification against a reference store
//!
//! Candidate modules are compared against a trusted-store directory of
//! known-good artifacts keyed by filename. Identity tokens are compared
//! before content hashes, so a spoofed publisher is reported as an identity
//! mismatch even when the content differs too. A separate reconciliation
//! pass replaces candidates with same-named system copies of greater or
//! equal version.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use berth_core::sha256;

use crate::artifact::{is_artifact_path, ModuleArtifact};
use crate::error::{Error, Result};
use crate::SCRIPTS_DIR;

/// A trusted reference entry: identity token plus content hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustRecord {
    pub file_name: String,
    pub identity: String,
    pub content_hash: berth_core::Digest,
}

/// Per-candidate verification verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustVerdict {
    /// Identity and content both match the reference.
    Trusted,
    /// No same-named reference exists in the store.
    Unreferenced,
    /// The candidate's envelope could not be read or parsed.
    Unreadable { message: String },
    /// Identity tokens differ: signals spoofing. Always blocks.
    IdentityMismatch { expected: String, found: String },
    /// Content differs under a matching identity: a legitimately updated
    /// but unverified module. Never blocks.
    HashMismatch { expected: String, found: String },
}

impl TrustVerdict {
    /// Whether this verdict blocks load irrespective of warn-only mode.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            TrustVerdict::IdentityMismatch { .. } | TrustVerdict::Unreadable { .. }
        )
    }

    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustVerdict::Trusted)
    }
}

/// A directory of known-good reference artifacts, keyed by filename.
#[derive(Clone, Debug)]
pub struct TrustStore {
    root: PathBuf,
}

impl TrustStore {
    /// Open a store rooted at an explicit directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::ConfigError(format!(
                "trusted store directory not found: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up the reference record for a filename, if one exists.
    pub fn record(&self, file_name: &str) -> Result<Option<TrustRecord>> {
        let reference = self.root.join(file_name);
        if !reference.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&reference)?;
        let artifact = ModuleArtifact::from_slice(&reference.display().to_string(), &bytes)?;
        Ok(Some(TrustRecord {
            file_name: file_name.to_string(),
            identity: artifact.publisher,
            content_hash: sha256(&bytes),
        }))
    }

    /// Verify one candidate artifact against this store.
    pub fn verify(&self, candidate: &Path) -> Result<TrustVerdict> {
        let Some(file_name) = candidate.file_name().and_then(|n| n.to_str()) else {
            return Err(Error::ConfigError(format!(
                "candidate has no file name: {}",
                candidate.display()
            )));
        };

        let Some(record) = self.record(file_name)? else {
            debug!(file = %file_name, "no trusted reference for candidate");
            return Ok(TrustVerdict::Unreferenced);
        };

        let bytes = std::fs::read(candidate)?;
        let artifact = match ModuleArtifact::from_slice(file_name, &bytes) {
            Ok(artifact) => artifact,
            Err(e) => {
                return Ok(TrustVerdict::Unreadable {
                    message: e.to_string(),
                })
            }
        };

        // Identity before content: spoofing is reported as such even when
        // the bytes differ as well.
        if !artifact.publisher.eq_ignore_ascii_case(&record.identity) {
            return Ok(TrustVerdict::IdentityMismatch {
                expected: record.identity,
                found: artifact.publisher,
            });
        }

        let candidate_hash = sha256(&bytes);
        if candidate_hash != record.content_hash {
            return Ok(TrustVerdict::HashMismatch {
                expected: record.content_hash.to_hex(),
                found: candidate_hash.to_hex(),
            });
        }

        Ok(TrustVerdict::Trusted)
    }
}

/// Effect of reconciling one candidate against the system root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileAction {
    /// The candidate's bytes were replaced by the system copy.
    Replaced {
        file_name: String,
        system_version: String,
    },
    /// The candidate is newer than the system copy and was kept.
    Kept {
        file_name: String,
        candidate_version: String,
        system_version: String,
    },
}

/// Reconcile a mod's top-level modules against a "known-good" system root.
///
/// When the system copy's version is greater than or equal to the
/// candidate's, the candidate is replaced in place; otherwise it is kept
/// with a warning. Re-running on an already-reconciled folder performs no
/// further writes.
pub fn reconcile(mod_dir: &Path, system_root: &Path) -> Result<Vec<ReconcileAction>> {
    let scripts_dir = mod_dir.join(SCRIPTS_DIR);
    if !scripts_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut actions = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&scripts_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_artifact_path(p))
        .collect();
    entries.sort();

    for candidate in entries {
        let Some(file_name) = candidate.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let system_copy = system_root.join(file_name);
        if !system_copy.is_file() {
            continue;
        }

        let candidate_bytes = std::fs::read(&candidate)?;
        let system_bytes = std::fs::read(&system_copy)?;

        let candidate_artifact = ModuleArtifact::from_slice(file_name, &candidate_bytes)?;
        let system_artifact = ModuleArtifact::from_slice(file_name, &system_bytes)?;

        let (Some(candidate_version), Some(system_version)) = (
            candidate_artifact.version_triple(),
            system_artifact.version_triple(),
        ) else {
            continue;
        };

        if system_version >= candidate_version {
            // Already reconciled folders need no second write.
            if candidate_bytes != system_bytes {
                std::fs::write(&candidate, &system_bytes)?;
                info!(file = %file_name, version = %system_artifact.version,
                    "replaced module with system copy");
                actions.push(ReconcileAction::Replaced {
                    file_name: file_name.to_string(),
                    system_version: system_artifact.version.clone(),
                });
            }
        } else {
            warn!(file = %file_name, candidate = %candidate_artifact.version,
                system = %system_artifact.version,
                "module is newer than system copy, keeping mod version");
            actions.push(ReconcileAction::Kept {
                file_name: file_name.to_string(),
                candidate_version: candidate_artifact.version.clone(),
                system_version: system_artifact.version.clone(),
            });
        }
    }

    Ok(actions)
}
