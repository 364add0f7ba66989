//! Load contexts and the host registry
//!
//! Every mod loads into its own [`LoadContext`], an arena owning the mod's
//! live modules. Revoking a context flips an atomic flag that every
//! invocation path checks, so stale handles fail fast instead of reaching a
//! half-unloaded module. [`HostContext`] is the host-wide registry mapping
//! mod and type names, case-insensitively, to their contexts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::content::ContentManager;
use crate::error::{Error, Result};
use crate::module::ScriptModule;
use crate::policy::{baseline_policy, CapabilityPolicy};

/// An arena owning the modules loaded for one mod.
pub struct LoadContext {
    name: String,
    revoked: AtomicBool,
    modules: Vec<Arc<dyn ScriptModule>>,
    policy: CapabilityPolicy,
}

impl LoadContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            revoked: AtomicBool::new(false),
            modules: Vec::new(),
            policy: baseline_policy(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take ownership of a freshly instantiated module.
    pub fn admit(&mut self, module: Box<dyn ScriptModule>) {
        debug!(context = %self.name, module = %module.name(), "module admitted");
        self.modules.push(Arc::from(module));
    }

    /// Case-insensitive lookup by module name.
    pub fn module(&self, name: &str) -> Option<Arc<dyn ScriptModule>> {
        self.modules
            .iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn modules(&self) -> impl Iterator<Item = &Arc<dyn ScriptModule>> {
        self.modules.iter()
    }

    /// Capability policy compiled for this mod. Defaults to the baseline.
    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: CapabilityPolicy) {
        self.policy = policy;
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Mark the context dead. Idempotent; existing handles observe the flag
    /// on their next use.
    pub fn revoke(&self) {
        if !self.revoked.swap(true, Ordering::AcqRel) {
            info!(context = %self.name, "load context revoked");
        }
    }

    /// Fail if the context has been revoked.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_revoked() {
            return Err(Error::ContextRevoked(self.name.clone()));
        }
        Ok(())
    }
}

/// Host-wide registry of load contexts, keyed by lowercase mod name.
#[derive(Default)]
pub struct HostContext {
    contexts: RwLock<BTreeMap<String, Arc<LoadContext>>>,
    type_index: RwLock<BTreeMap<String, String>>,
    content_managers: RwLock<BTreeMap<String, Arc<ContentManager>>>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a populated context under its mod name. A stale context
    /// under the same name is revoked before the replacement goes live.
    pub fn register(&self, context: LoadContext) -> Arc<LoadContext> {
        let key = context.name().to_ascii_lowercase();
        let context = Arc::new(context);

        let mut contexts = write_lock(&self.contexts);
        let mut type_index = write_lock(&self.type_index);

        if let Some(stale) = contexts.remove(&key) {
            stale.revoke();
            type_index.retain(|_, owner| owner != &key);
        }

        for module in context.modules() {
            for export in &module.artifact().exports {
                type_index.insert(export.name.to_ascii_lowercase(), key.clone());
            }
        }
        contexts.insert(key, context.clone());
        context
    }

    pub fn context(&self, mod_name: &str) -> Option<Arc<LoadContext>> {
        read_lock(&self.contexts)
            .get(&mod_name.to_ascii_lowercase())
            .cloned()
    }

    /// Resolve an exported type name to the module that exports it.
    pub fn resolve_type(
        &self,
        type_name: &str,
    ) -> Option<(Arc<LoadContext>, Arc<dyn ScriptModule>)> {
        let key = read_lock(&self.type_index)
            .get(&type_name.to_ascii_lowercase())
            .cloned()?;
        let context = read_lock(&self.contexts).get(&key).cloned()?;
        let module = context
            .modules()
            .find(|m| m.artifact().export(type_name).is_some())
            .cloned()?;
        Some((context, module))
    }

    /// Revoke and drop the context for a mod. Returns whether one existed.
    pub fn remove(&self, mod_name: &str) -> bool {
        let key = mod_name.to_ascii_lowercase();
        let mut contexts = write_lock(&self.contexts);
        let mut type_index = write_lock(&self.type_index);
        write_lock(&self.content_managers).remove(&key);
        match contexts.remove(&key) {
            Some(context) => {
                context.revoke();
                type_index.retain(|_, owner| owner != &key);
                true
            }
            None => false,
        }
    }

    /// Get-or-create the content manager for a mod. Reused across
    /// enable/load cycles until the mod is removed.
    pub fn content_manager(&self, mod_name: &str) -> Arc<ContentManager> {
        let key = mod_name.to_ascii_lowercase();
        if let Some(existing) = read_lock(&self.content_managers).get(&key) {
            return existing.clone();
        }
        let mut managers = write_lock(&self.content_managers);
        managers
            .entry(key)
            .or_insert_with(|| Arc::new(ContentManager::new()))
            .clone()
    }

    pub fn mod_names(&self) -> Vec<String> {
        read_lock(&self.contexts)
            .values()
            .map(|c| c.name().to_string())
            .collect()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
