//! Module artifact envelopes
//!
//! A mod ships its executable modules as `*.mod.json` artifacts: a JSON
//! envelope declaring the module's name, strict-semver version, publisher
//! identity token, and exported type surface, plus an opaque base64 payload
//! for the isolation substrate. The trust verifier reads the envelope for
//! identity and version; the content hash covers the whole file's bytes.

use std::path::Path;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File suffix for module artifacts.
pub const ARTIFACT_SUFFIX: &str = ".mod.json";

/// Whether a path names a module artifact.
pub fn is_artifact_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.to_lowercase().ends_with(ARTIFACT_SUFFIX))
}

/// An exported method of a module type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodExport {
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
}

/// A type exported by a module, with the interfaces it implements.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeExport {
    pub name: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Whether a public parameterless constructor exists.
    #[serde(default = "default_true")]
    pub constructible: bool,
    #[serde(default)]
    pub methods: Vec<MethodExport>,
}

fn default_true() -> bool {
    true
}

impl TypeExport {
    /// Interface match by short name or fully-qualified name,
    /// case-insensitively.
    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| {
            i.eq_ignore_ascii_case(interface)
                || i.rsplit('.')
                    .next()
                    .is_some_and(|short| short.eq_ignore_ascii_case(interface))
        })
    }

    /// Find an exported method by case-insensitive name.
    pub fn method(&self, name: &str) -> Option<&MethodExport> {
        self.methods.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }
}

/// A module artifact envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleArtifact {
    pub name: String,
    /// Strict semver (x.y.z).
    pub version: String,
    /// Publisher identity token (hex key fingerprint).
    pub publisher: String,
    #[serde(default)]
    pub exports: Vec<TypeExport>,
    /// Opaque base64 payload for the isolation substrate.
    #[serde(default)]
    pub payload: String,
}

impl ModuleArtifact {
    /// Parse and validate an artifact from raw bytes.
    pub fn from_slice(path_label: &str, bytes: &[u8]) -> Result<Self> {
        let artifact: Self = serde_json::from_slice(bytes).map_err(|e| Error::InvalidArtifact {
            path: path_label.to_string(),
            message: e.to_string(),
        })?;
        artifact.validate(path_label)?;
        Ok(artifact)
    }

    /// Read, parse, and validate an artifact file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&path.display().to_string(), &bytes)
    }

    pub fn validate(&self, path_label: &str) -> Result<()> {
        let fail = |message: String| Error::InvalidArtifact {
            path: path_label.to_string(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(fail("name must be a non-empty string".into()));
        }
        if parse_semver(&self.version).is_none() {
            return Err(fail(format!(
                "version must be strict semver (x.y.z), got {:?}",
                self.version
            )));
        }
        if self.publisher.trim().is_empty() || hex::decode(&self.publisher).is_err() {
            return Err(fail("publisher must be a hex identity token".into()));
        }
        if !self.payload.is_empty()
            && base64::engine::general_purpose::STANDARD
                .decode(&self.payload)
                .is_err()
        {
            return Err(fail("payload must be base64".into()));
        }

        let mut type_names = std::collections::HashSet::new();
        for export in &self.exports {
            if export.name.trim().is_empty() {
                return Err(fail("export name must be non-empty".into()));
            }
            if !type_names.insert(export.name.to_lowercase()) {
                return Err(fail(format!("duplicate export type: {}", export.name)));
            }
            let mut method_names = std::collections::HashSet::new();
            for method in &export.methods {
                if !method_names.insert(method.name.to_lowercase()) {
                    return Err(fail(format!(
                        "duplicate method {} on export {}",
                        method.name, export.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// The declared version as a comparable triple.
    pub fn version_triple(&self) -> Option<[u32; 3]> {
        parse_semver(&self.version)
    }

    /// Case-insensitive lookup of an exported type.
    pub fn export(&self, type_name: &str) -> Option<&TypeExport> {
        self.exports
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(type_name))
    }

    /// Exported types implementing the named interface, in export order.
    pub fn types_implementing(&self, interface: &str) -> Vec<&TypeExport> {
        self.exports
            .iter()
            .filter(|t| t.implements(interface))
            .collect()
    }
}

fn parse_semver(value: &str) -> Option<[u32; 3]> {
    let mut parts = value.split('.');
    let major = parts.next()?.parse::<u32>().ok()?;
    let minor = parts.next()?.parse::<u32>().ok()?;
    let patch = parts.next()?.parse::<u32>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some([major, minor, patch])
}
