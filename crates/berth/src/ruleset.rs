//! Mod rulesets and mod-type metadata

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A case-insensitive name set.
///
/// Entries are trimmed and lowercased on insertion; blank entries are
/// dropped. Membership checks lowercase the probe, so rule files may mix
/// case freely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct NameSet {
    entries: BTreeSet<String>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str) {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            self.entries.insert(trimmed.to_lowercase());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(&name.trim().to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Union another set into this one.
    pub fn extend_with(&mut self, other: &NameSet) {
        self.entries.extend(other.entries.iter().cloned());
    }
}

impl From<Vec<String>> for NameSet {
    fn from(values: Vec<String>) -> Self {
        let mut set = NameSet::new();
        for value in &values {
            set.insert(value);
        }
        set
    }
}

impl From<NameSet> for Vec<String> {
    fn from(set: NameSet) -> Self {
        set.entries.into_iter().collect()
    }
}

impl<'a> FromIterator<&'a str> for NameSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = NameSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

/// Structural rules a mod's file tree must satisfy, plus the method-name
/// whitelists consulted at invocation time.
///
/// Invariant: when `only_allow` is non-empty it is the sole authority for
/// module admissibility and supersedes `forbid_modules` entirely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ruleset {
    /// File extensions that must appear at least once (e.g. ".cfg").
    #[serde(default)]
    pub require_extensions: NameSet,
    /// File extensions that must not appear anywhere.
    #[serde(default)]
    pub forbid_extensions: NameSet,
    /// Module names that must be present among discovered modules.
    #[serde(default)]
    pub require_modules: NameSet,
    /// Module names that are policy violations when present.
    #[serde(default)]
    pub forbid_modules: NameSet,
    /// Whitelist override: when non-empty, only these modules are admissible.
    #[serde(default)]
    pub only_allow: NameSet,
    /// Method names callable through the gateway by default.
    #[serde(default)]
    pub default_calls: NameSet,
    /// Method names callable through the gateway by external callers.
    #[serde(default)]
    pub public_calls: NameSet,
}

impl Ruleset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Export to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Whether a method name may be invoked through the gateway.
    pub fn is_call_allowed(&self, method: &str) -> bool {
        self.default_calls.contains(method) || self.public_calls.contains(method)
    }

    /// Union another ruleset into this one, set by set.
    pub fn merge_with(&mut self, other: &Ruleset) {
        self.require_extensions.extend_with(&other.require_extensions);
        self.forbid_extensions.extend_with(&other.forbid_extensions);
        self.require_modules.extend_with(&other.require_modules);
        self.forbid_modules.extend_with(&other.forbid_modules);
        self.only_allow.extend_with(&other.only_allow);
        self.default_calls.extend_with(&other.default_calls);
        self.public_calls.extend_with(&other.public_calls);
    }
}

/// Descriptive metadata for a mod type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_website: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Default for ModMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            website: None,
            author_name: None,
            author_website: None,
            version: default_version(),
        }
    }
}

/// A published mod type: metadata plus the ruleset every instance of the
/// type is validated against.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModType {
    pub metadata: ModMetadata,
    #[serde(default)]
    pub ruleset: Ruleset,
    /// Relative asset path to hex SHA-256 content hash, recorded at
    /// publish time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assets: BTreeMap<String, String>,
}

impl ModType {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
