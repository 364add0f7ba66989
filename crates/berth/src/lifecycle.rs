//! Mod lifecycle control
//!
//! Enabling a mod writes a `.enabled` payload and a detached `.enabled.sig`
//! HMAC over its bytes, signed with the host's marker key so an attacker
//! who can write to the mod folder cannot forge enablement. The signature
//! is written last, so there is never a verifiable enabled state before
//! the payload is durable. `load_scripts` walks the store, validates each
//! enabled mod under the chosen strictness, compiles its capability policy
//! and brings its modules live in a fresh load context.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use berth_core::{hmac_sha256, tag_from_slice, verify_hmac};

use crate::artifact::is_artifact_path;
use crate::context::{HostContext, LoadContext};
use crate::error::{Error, Result};
use crate::introspect::TypeRegistry;
use crate::module::ModuleRuntime;
use crate::policy::{self, allowed_members_from_yaml_file};
use crate::ruleset::ModType;
use crate::store::ModStore;
use crate::trust::TrustStore;
use crate::validator::{ValidationOptions, ValidationReport, Validator};
use crate::SCRIPTS_DIR;

pub const ENABLED_MARKER: &str = ".enabled";
pub const ENABLED_SIG: &str = ".enabled.sig";
pub const ALLOWED_MEMBERS_FILE: &str = "allowed_members.yaml";

/// How validation and load failures are treated during a load pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strictness {
    /// Validate, refuse mods with blocking findings, abort the batch on
    /// the first load failure.
    Strict,
    /// Validate but only warn; log load failures and keep going.
    Moderate,
    /// Skip rule validation, silently skip whatever fails to load.
    Lenient,
}

#[derive(Serialize, Deserialize)]
struct EnabledPayload {
    mod_name: String,
    enabled_at: DateTime<Utc>,
}

/// Why a mod was skipped during a load pass.
#[derive(Clone, Debug)]
pub struct RejectedMod {
    pub name: String,
    pub reason: String,
    pub report: Option<ValidationReport>,
}

/// Outcome of one `load_scripts` pass.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub rejected: Vec<RejectedMod>,
}

/// Drives enable, load and disable for every mod in a store.
pub struct LifecycleController {
    store: ModStore,
    mod_types: BTreeMap<String, ModType>,
    trusted_store: Option<TrustStore>,
    system_root: Option<PathBuf>,
    registry: Arc<TypeRegistry>,
    host: Arc<HostContext>,
    runtime: Arc<dyn ModuleRuntime>,
    marker_key: Vec<u8>,
}

impl LifecycleController {
    pub fn new(
        store: ModStore,
        host: Arc<HostContext>,
        runtime: Arc<dyn ModuleRuntime>,
        marker_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            store,
            mod_types: BTreeMap::new(),
            trusted_store: None,
            system_root: None,
            registry: Arc::new(TypeRegistry::with_baseline()),
            host,
            runtime,
            marker_key: marker_key.into(),
        }
    }

    /// Register a mod type whose ruleset governs mods declaring it.
    pub fn with_mod_type(mut self, mod_type: ModType) -> Self {
        let key = mod_type.metadata.name.to_ascii_lowercase();
        self.mod_types.insert(key, mod_type);
        self
    }

    pub fn with_trusted_store(mut self, store: TrustStore) -> Self {
        self.trusted_store = Some(store);
        self
    }

    pub fn with_system_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.system_root = Some(root.into());
        self
    }

    /// Host type registry used to compile each mod's capability policy.
    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &ModStore {
        &self.store
    }

    /// Mark a mod enabled: payload first, detached signature last.
    pub fn enable(&self, mod_name: &str) -> Result<()> {
        let mod_dir = self.store.mod_dir(mod_name);
        if !mod_dir.is_dir() {
            return Err(Error::ModFolderMissing(mod_dir));
        }
        let payload = EnabledPayload {
            mod_name: mod_name.to_string(),
            enabled_at: Utc::now(),
        };
        let payload_bytes = serde_json::to_vec_pretty(&payload)?;
        std::fs::write(mod_dir.join(ENABLED_MARKER), &payload_bytes)?;
        let tag = hex::encode(hmac_sha256(&self.marker_key, &payload_bytes));
        std::fs::write(mod_dir.join(ENABLED_SIG), tag)?;

        // The content manager outlives individual load passes.
        self.host.content_manager(mod_name);
        info!(mod_name, "mod enabled");
        Ok(())
    }

    /// Whether a mod carries a valid enable marker. A missing payload or
    /// signature, a tampered payload, or a forged signature all read as
    /// disabled; this never errors.
    pub fn is_enabled(&self, mod_name: &str) -> bool {
        let mod_dir = self.store.mod_dir(mod_name);
        let Ok(payload_bytes) = std::fs::read(mod_dir.join(ENABLED_MARKER)) else {
            return false;
        };
        let Ok(sig_hex) = std::fs::read_to_string(mod_dir.join(ENABLED_SIG)) else {
            return false;
        };
        let Ok(tag_bytes) = hex::decode(sig_hex.trim()) else {
            return false;
        };
        let Ok(tag) = tag_from_slice(&tag_bytes) else {
            return false;
        };
        if !verify_hmac(&self.marker_key, &payload_bytes, &tag) {
            warn!(mod_name, "enable marker failed signature verification");
            return false;
        }
        // The MAC held, now make sure the payload names this mod.
        let Ok(payload) = serde_json::from_slice::<EnabledPayload>(&payload_bytes) else {
            return false;
        };
        payload.mod_name.eq_ignore_ascii_case(mod_name)
    }

    /// Remove the enable marker and revoke any live context. The signature
    /// goes first so no verifiable enabled state survives a partial delete.
    pub fn disable(&self, mod_name: &str) -> Result<()> {
        let mod_dir = self.store.mod_dir(mod_name);
        remove_if_present(&mod_dir.join(ENABLED_SIG))?;
        remove_if_present(&mod_dir.join(ENABLED_MARKER))?;
        if self.host.remove(mod_name) {
            info!(mod_name, "mod disabled and context revoked");
        } else {
            info!(mod_name, "mod disabled");
        }
        Ok(())
    }

    /// Validate and load every enabled mod in the store.
    ///
    /// Under `Strict`, the first mod that fails to load aborts the batch
    /// with its error; validation rejections only skip the offending mod.
    pub fn load_scripts(&self, strictness: Strictness) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for mod_dir in self.store.mod_dirs()? {
            let Some(name) = mod_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = name.to_string();
            if !self.is_enabled(&name) {
                debug!(mod_name = %name, "mod not enabled, skipping");
                continue;
            }

            match self.load_one(&name, strictness) {
                Ok(Ok(())) => report.loaded.push(name),
                Ok(Err(rejection)) => {
                    warn!(mod_name = %name, reason = %rejection.reason, "mod rejected");
                    report.rejected.push(rejection);
                }
                Err(e) => match strictness {
                    Strictness::Strict => return Err(e),
                    Strictness::Moderate => {
                        warn!(mod_name = %name, error = %e, "mod failed to load");
                        report.rejected.push(RejectedMod {
                            name,
                            reason: e.to_string(),
                            report: None,
                        });
                    }
                    Strictness::Lenient => {
                        debug!(mod_name = %name, error = %e, "mod failed to load, skipping");
                        report.rejected.push(RejectedMod {
                            name,
                            reason: e.to_string(),
                            report: None,
                        });
                    }
                },
            }
        }

        info!(
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            "load pass finished"
        );
        Ok(report)
    }

    fn load_one(
        &self,
        mod_name: &str,
        strictness: Strictness,
    ) -> Result<std::result::Result<(), RejectedMod>> {
        let mod_dir = self.store.mod_dir(mod_name);
        let details = self.store.details(&mod_dir)?;

        let Some(mod_type) = self.mod_types.get(&details.mod_type.to_ascii_lowercase()) else {
            return Ok(Err(RejectedMod {
                name: mod_name.to_string(),
                reason: format!("unknown mod type '{}'", details.mod_type),
                report: None,
            }));
        };

        if strictness != Strictness::Lenient {
            let options = ValidationOptions {
                warn_only: strictness == Strictness::Moderate,
                system_root: self.system_root.clone(),
            };
            let mut validator = Validator::new(mod_type.ruleset.clone(), options);
            if let Some(store) = &self.trusted_store {
                validator = validator.with_trusted_store(store.clone());
            }
            let validation = validator.validate(&mod_dir)?;
            if !validation.is_load_allowed() {
                return Ok(Err(RejectedMod {
                    name: mod_name.to_string(),
                    reason: "validation failed".to_string(),
                    report: Some(validation),
                }));
            }
        }

        let mut context = LoadContext::new(mod_name);
        context.set_policy(self.compile_policy(mod_name, &mod_dir)?);

        let scripts_dir = mod_dir.join(SCRIPTS_DIR);
        if scripts_dir.is_dir() {
            let content = self.host.content_manager(mod_name);
            let mut paths: Vec<PathBuf> = std::fs::read_dir(&scripts_dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_artifact_path(p))
                .collect();
            paths.sort();

            for path in paths {
                match content
                    .load(&path)
                    .and_then(|artifact| self.runtime.instantiate(&artifact))
                {
                    Ok(module) => context.admit(module),
                    Err(e) => match strictness {
                        Strictness::Strict => return Err(e),
                        Strictness::Moderate => {
                            warn!(mod_name, path = %path.display(), error = %e,
                                "skipping artifact that failed to load");
                        }
                        Strictness::Lenient => {
                            debug!(mod_name, path = %path.display(), error = %e,
                                "skipping artifact that failed to load");
                        }
                    },
                }
            }
        }

        self.host.register(context);
        info!(mod_name, "mod loaded");
        Ok(Ok(()))
    }

    /// Compile the mod's capability policy from its `allowed_members.yaml`.
    /// An absent file yields the baseline policy with a warning.
    fn compile_policy(
        &self,
        mod_name: &str,
        mod_dir: &Path,
    ) -> Result<crate::policy::CapabilityPolicy> {
        let members_path = mod_dir.join(ALLOWED_MEMBERS_FILE);
        if !members_path.is_file() {
            warn!(mod_name, "no {ALLOWED_MEMBERS_FILE}, applying baseline policy");
            return Ok(policy::baseline_policy());
        }
        let config = allowed_members_from_yaml_file(&members_path)?;
        let (compiled, report) = policy::compile(Some(&config), self.registry.as_ref());
        for entry in report.warnings() {
            warn!(mod_name, type_name = %entry.type_name, token = ?entry.token,
                outcome = ?entry.outcome, "allow-list entry not granted");
        }
        Ok(compiled)
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::NativeHostRuntime;
    use crate::ruleset::{ModMetadata, Ruleset};
    use tempfile::TempDir;

    const KEY: &[u8] = b"lifecycle-test-key";

    fn gameplay_type() -> ModType {
        ModType {
            metadata: ModMetadata {
                name: "gameplay".to_string(),
                ..Default::default()
            },
            ruleset: Ruleset::default(),
            ..Default::default()
        }
    }

    fn controller(root: &TempDir) -> LifecycleController {
        LifecycleController::new(
            ModStore::open(root.path()).unwrap(),
            Arc::new(HostContext::new()),
            Arc::new(NativeHostRuntime::new()),
            KEY,
        )
        .with_mod_type(gameplay_type())
    }

    fn install_mod(ctl: &LifecycleController, name: &str, modules: &[&str]) {
        ctl.store()
            .save_details(&crate::store::ModDetails::new(name, "gameplay"))
            .unwrap();
        let scripts = ctl.store().mod_dir(name).join(SCRIPTS_DIR);
        std::fs::create_dir_all(&scripts).unwrap();
        for module in modules {
            std::fs::write(
                scripts.join(format!("{module}.mod.json")),
                format!(
                    r#"{{"name":"{module}","version":"1.0.0","publisher":"aa11","payload":""}}"#
                ),
            )
            .unwrap();
        }
    }

    #[test]
    fn enable_round_trip() {
        let root = TempDir::new().unwrap();
        let ctl = controller(&root);
        install_mod(&ctl, "shipyard", &["core"]);

        assert!(!ctl.is_enabled("shipyard"));
        ctl.enable("shipyard").unwrap();
        assert!(ctl.is_enabled("shipyard"));
        ctl.disable("shipyard").unwrap();
        assert!(!ctl.is_enabled("shipyard"));
    }

    #[test]
    fn enabling_a_missing_mod_fails() {
        let root = TempDir::new().unwrap();
        let ctl = controller(&root);
        assert!(matches!(
            ctl.enable("ghost").unwrap_err(),
            Error::ModFolderMissing(_)
        ));
    }

    #[test]
    fn deleted_signature_reads_as_disabled() {
        let root = TempDir::new().unwrap();
        let ctl = controller(&root);
        install_mod(&ctl, "shipyard", &["core"]);
        ctl.enable("shipyard").unwrap();

        std::fs::remove_file(ctl.store().mod_dir("shipyard").join(ENABLED_SIG)).unwrap();
        assert!(!ctl.is_enabled("shipyard"));
    }

    #[test]
    fn tampered_payload_reads_as_disabled() {
        let root = TempDir::new().unwrap();
        let ctl = controller(&root);
        install_mod(&ctl, "shipyard", &["core"]);
        ctl.enable("shipyard").unwrap();

        let marker = ctl.store().mod_dir("shipyard").join(ENABLED_MARKER);
        let text = std::fs::read_to_string(&marker).unwrap();
        std::fs::write(&marker, text.replace("shipyard", "flagship")).unwrap();

        assert!(!ctl.is_enabled("shipyard"));
    }

    #[test]
    fn forged_marker_without_the_key_reads_as_disabled() {
        let root = TempDir::new().unwrap();
        let ctl = controller(&root);
        install_mod(&ctl, "shipyard", &["core"]);

        let forged = LifecycleController::new(
            ModStore::open(root.path()).unwrap(),
            Arc::new(HostContext::new()),
            Arc::new(NativeHostRuntime::new()),
            b"some-other-key".as_slice(),
        );
        forged.enable("shipyard").unwrap();

        assert!(!ctl.is_enabled("shipyard"));
    }

    #[test]
    fn load_scripts_loads_only_enabled_mods() {
        let root = TempDir::new().unwrap();
        let ctl = controller(&root);
        install_mod(&ctl, "alpha", &["core"]);
        install_mod(&ctl, "beta", &["core"]);
        ctl.enable("alpha").unwrap();

        let report = ctl.load_scripts(Strictness::Strict).unwrap();
        assert_eq!(report.loaded, vec!["alpha".to_string()]);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn strict_rejects_what_moderate_lets_through() {
        let root = TempDir::new().unwrap();
        let mut mod_type = gameplay_type();
        mod_type.ruleset.forbid_modules.insert("core");
        let ctl = LifecycleController::new(
            ModStore::open(root.path()).unwrap(),
            Arc::new(HostContext::new()),
            Arc::new(NativeHostRuntime::new()),
            KEY,
        )
        .with_mod_type(mod_type);
        install_mod(&ctl, "alpha", &["core"]);
        ctl.enable("alpha").unwrap();

        let strict = ctl.load_scripts(Strictness::Strict).unwrap();
        assert!(strict.loaded.is_empty());
        assert_eq!(strict.rejected.len(), 1);
        assert!(strict.rejected[0].report.is_some());

        let moderate = ctl.load_scripts(Strictness::Moderate).unwrap();
        assert_eq!(moderate.loaded, vec!["alpha".to_string()]);
    }

    #[test]
    fn lenient_skips_validation() {
        let root = TempDir::new().unwrap();
        let mut mod_type = gameplay_type();
        mod_type.ruleset.forbid_modules.insert("core");
        let ctl = LifecycleController::new(
            ModStore::open(root.path()).unwrap(),
            Arc::new(HostContext::new()),
            Arc::new(NativeHostRuntime::new()),
            KEY,
        )
        .with_mod_type(mod_type);
        install_mod(&ctl, "alpha", &["core"]);
        ctl.enable("alpha").unwrap();

        let report = ctl.load_scripts(Strictness::Lenient).unwrap();
        assert_eq!(report.loaded, vec!["alpha".to_string()]);
    }

    #[test]
    fn strict_aborts_the_batch_on_a_broken_mod() {
        let root = TempDir::new().unwrap();
        let ctl = controller(&root);
        install_mod(&ctl, "broken", &["core"]);
        ctl.enable("broken").unwrap();

        // Partially deleted install: manifest gone, marker still present.
        std::fs::remove_file(ctl.store().mod_dir("broken").join("broken.moddetails")).unwrap();

        assert!(matches!(
            ctl.load_scripts(Strictness::Strict).unwrap_err(),
            Error::ManifestMissing(_)
        ));
    }

    #[test]
    fn moderate_keeps_the_batch_going_past_broken_mods() {
        let root = TempDir::new().unwrap();
        let ctl = controller(&root);
        install_mod(&ctl, "alpha", &["core"]);
        install_mod(&ctl, "broken", &["core"]);
        ctl.enable("alpha").unwrap();
        ctl.enable("broken").unwrap();

        std::fs::remove_file(ctl.store().mod_dir("broken").join("broken.moddetails")).unwrap();

        let report = ctl.load_scripts(Strictness::Moderate).unwrap();
        assert_eq!(report.loaded, vec!["alpha".to_string()]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].name, "broken");
    }

    #[test]
    fn allowed_members_config_feeds_the_context_policy() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(HostContext::new());
        let mut registry = TypeRegistry::with_baseline();
        registry.register(
            crate::introspect::TypeInfo::new("host.Log")
                .with_method("Write")
                .with_method("Flush"),
        );
        let ctl = LifecycleController::new(
            ModStore::open(root.path()).unwrap(),
            host.clone(),
            Arc::new(NativeHostRuntime::new()),
            KEY,
        )
        .with_mod_type(gameplay_type())
        .with_registry(Arc::new(registry));
        install_mod(&ctl, "alpha", &["core"]);
        std::fs::write(
            ctl.store().mod_dir("alpha").join(ALLOWED_MEMBERS_FILE),
            "host.Log: [Write]\n",
        )
        .unwrap();
        ctl.enable("alpha").unwrap();
        ctl.load_scripts(Strictness::Strict).unwrap();

        let context = host.context("alpha").unwrap();
        assert!(context.policy().allows_method("host.Log", "write"));
        assert!(!context.policy().allows_method("host.Log", "Flush"));
        // The baseline surface is always present underneath the grants.
        assert!(context.policy().is_type_allowed("core.Math"));
    }

    #[test]
    fn missing_allowed_members_falls_back_to_baseline() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(HostContext::new());
        let ctl = LifecycleController::new(
            ModStore::open(root.path()).unwrap(),
            host.clone(),
            Arc::new(NativeHostRuntime::new()),
            KEY,
        )
        .with_mod_type(gameplay_type());
        install_mod(&ctl, "alpha", &["core"]);
        ctl.enable("alpha").unwrap();
        ctl.load_scripts(Strictness::Strict).unwrap();

        let context = host.context("alpha").unwrap();
        assert!(context.policy().is_type_allowed("core.Math"));
        assert!(!context.policy().is_type_allowed("host.Process"));
    }
}
