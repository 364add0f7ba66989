//! Mod type publishing
//!
//! Mod types live in a descriptor directory as `<name>.modtype.yaml` files
//! with a detached `.sig` Ed25519 signature over the descriptor bytes and
//! the publisher's `.pub` key beside them. Creating the first descriptor
//! generates the publisher keypair through a [`SecretStore`]; later
//! operations reuse the stored key. Consumers derive the publisher's
//! identity token from the public key, the same token module artifacts
//! carry in their `publisher` field.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use berth_core::{sha256_hex, Keypair, PublicKey, Signature};

use crate::error::{Error, Result};
use crate::ruleset::ModType;

pub const DESCRIPTOR_SUFFIX: &str = ".modtype.yaml";
pub const SIGNATURE_SUFFIX: &str = ".modtype.sig";
pub const PUBKEY_FILE: &str = "publisher.pub";

/// Storage for the publisher's signing key.
pub trait SecretStore: Send + Sync {
    /// The stored keypair, or `None` when no key has been created yet.
    fn load(&self) -> Result<Option<Keypair>>;

    fn store(&self, keypair: &Keypair) -> Result<()>;
}

/// Keeps a hex-encoded seed in a file.
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self) -> Result<Option<Keypair>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(Keypair::from_hex(text.trim())?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, keypair: &Keypair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, keypair.to_hex())?;
        Ok(())
    }
}

/// Creates, updates and deletes signed mod type descriptors.
pub struct TypePublisher {
    root: PathBuf,
    secrets: Box<dyn SecretStore>,
}

impl TypePublisher {
    pub fn new(root: impl Into<PathBuf>, secrets: Box<dyn SecretStore>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, secrets })
    }

    fn descriptor_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{DESCRIPTOR_SUFFIX}"))
    }

    fn signature_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{SIGNATURE_SUFFIX}"))
    }

    /// The stored keypair, generated and persisted on first use.
    fn keypair(&self) -> Result<Keypair> {
        if let Some(existing) = self.secrets.load()? {
            return Ok(existing);
        }
        let keypair = Keypair::generate();
        self.secrets.store(&keypair)?;
        info!(publisher = %keypair.public_key().fingerprint(), "publisher keypair generated");
        Ok(keypair)
    }

    /// The publisher identity token derived from the stored key.
    pub fn publisher(&self) -> Result<String> {
        Ok(self.keypair()?.public_key().fingerprint())
    }

    fn write_signed(&self, name: &str, mod_type: &ModType) -> Result<PathBuf> {
        let body = mod_type.to_yaml()?;
        let keypair = self.keypair()?;
        let descriptor = self.descriptor_path(name);
        std::fs::write(&descriptor, body.as_bytes())?;
        std::fs::write(
            self.signature_path(name),
            keypair.sign(body.as_bytes()).to_hex(),
        )?;
        std::fs::write(
            self.root.join(PUBKEY_FILE),
            keypair.public_key().to_hex(),
        )?;
        Ok(descriptor)
    }

    /// Publish a new mod type. Refuses to clobber an existing descriptor.
    pub fn create(&self, mod_type: &ModType) -> Result<PathBuf> {
        let name = descriptor_name(mod_type)?;
        if self.descriptor_path(&name).exists() {
            return Err(Error::ConfigError(format!(
                "mod type '{name}' already published, use update"
            )));
        }
        let path = self.write_signed(&name, mod_type)?;
        info!(mod_type = %name, "mod type published");
        Ok(path)
    }

    /// Merge changes into a published mod type and re-sign it. Rule sets
    /// are unioned; non-empty metadata fields replace the stored ones.
    pub fn update(&self, changes: &ModType) -> Result<PathBuf> {
        let name = descriptor_name(changes)?;
        let mut current = self.load(&name)?;

        current.ruleset.merge_with(&changes.ruleset);
        if !changes.metadata.description.is_empty() {
            current.metadata.description = changes.metadata.description.clone();
        }
        if changes.metadata.website.is_some() {
            current.metadata.website = changes.metadata.website.clone();
        }
        if changes.metadata.author_name.is_some() {
            current.metadata.author_name = changes.metadata.author_name.clone();
        }
        if changes.metadata.author_website.is_some() {
            current.metadata.author_website = changes.metadata.author_website.clone();
        }
        current.metadata.version = changes.metadata.version.clone();
        current.assets.extend(
            changes
                .assets
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let path = self.write_signed(&name, &current)?;
        info!(mod_type = %name, "mod type updated");
        Ok(path)
    }

    /// Remove a published descriptor and its signature. Returns whether
    /// the descriptor existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let existed = self.descriptor_path(name).exists();
        remove_if_present(&self.signature_path(name))?;
        remove_if_present(&self.descriptor_path(name))?;
        if existed {
            info!(mod_type = %name, "mod type deleted");
        }
        Ok(existed)
    }

    /// Read a descriptor back, verifying its signature against the
    /// published key first.
    pub fn load(&self, name: &str) -> Result<ModType> {
        let descriptor = self.descriptor_path(name);
        if !descriptor.is_file() {
            return Err(Error::ConfigError(format!(
                "mod type '{name}' is not published"
            )));
        }
        let body = std::fs::read(&descriptor)?;
        let key = PublicKey::from_hex(
            std::fs::read_to_string(self.root.join(PUBKEY_FILE))?.trim(),
        )?;
        let signature = Signature::from_hex(
            std::fs::read_to_string(self.signature_path(name))?.trim(),
        )?;
        if !key.verify(&body, &signature) {
            warn!(mod_type = %name, "descriptor signature does not verify");
            return Err(Error::RuleViolation {
                rule: "descriptor-signature".to_string(),
                message: format!("mod type '{name}' failed signature verification"),
            });
        }
        ModType::from_yaml(std::str::from_utf8(&body).map_err(|e| {
            Error::ConfigError(format!("descriptor '{name}' is not UTF-8: {e}"))
        })?)
    }

    /// Published mod type names, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_suffix(DESCRIPTOR_SUFFIX))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }
}

/// SHA-256 fingerprints for every file under an asset root, keyed by
/// relative path with forward slashes.
pub fn fingerprint_assets(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut assets = BTreeMap::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::ConfigError(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::ConfigError(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = std::fs::read(entry.path())?;
        assets.insert(relative, sha256_hex(&bytes));
    }
    Ok(assets)
}

fn descriptor_name(mod_type: &ModType) -> Result<String> {
    let name = mod_type.metadata.name.trim();
    if name.is_empty() {
        return Err(Error::ConfigError(
            "mod type has no name to publish under".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
