//! Module runtime seam
//!
//! [`ScriptModule`] is a loaded, invocable module; [`ModuleRuntime`] turns a
//! validated artifact into one. The built-in [`NativeHostRuntime`] executes
//! module exports through an in-process dispatch table, which is also what
//! the test suites run against. [`HostGate`] sits on the other side of the
//! boundary and checks every outbound host API call against the compiled
//! capability policy before dispatching it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::artifact::ModuleArtifact;
use crate::error::{Error, Result};
use crate::policy::CapabilityPolicy;
use crate::ruleset::NameSet;

/// A handler backing one exported or host-side method.
pub type HostFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// A loaded module whose exports can be invoked.
pub trait ScriptModule: Send + Sync {
    fn name(&self) -> &str;

    fn artifact(&self) -> &ModuleArtifact;

    /// Invoke an exported method. The export table has already been checked
    /// by the caller, so an unresolved handler is a runtime error.
    fn invoke(&self, type_name: &str, method: &str, args: &[Value]) -> Result<Value>;

    /// Instantiate an exported type. Fails when the export is not
    /// constructible or has no backing.
    fn construct(&self, type_name: &str) -> Result<()>;
}

/// Turns validated artifacts into live modules.
pub trait ModuleRuntime: Send + Sync {
    fn instantiate(&self, artifact: &ModuleArtifact) -> Result<Box<dyn ScriptModule>>;
}

fn dispatch_key(type_name: &str, method: &str) -> String {
    format!("{}.{}", type_name.to_ascii_lowercase(), method.to_ascii_lowercase())
}

/// In-process runtime dispatching exports to registered native handlers.
#[derive(Default)]
pub struct NativeHostRuntime {
    handlers: RwLock<BTreeMap<String, HostFn>>,
}

impl NativeHostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the native handler backing one exported method.
    pub fn register<F>(&self, type_name: &str, method: &str, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.insert(dispatch_key(type_name, method), Arc::new(handler));
    }

    fn resolve(&self, type_name: &str, method: &str) -> Option<HostFn> {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.get(&dispatch_key(type_name, method)).cloned()
    }

    fn snapshot(&self) -> BTreeMap<String, HostFn> {
        match self.handlers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ModuleRuntime for NativeHostRuntime {
    fn instantiate(&self, artifact: &ModuleArtifact) -> Result<Box<dyn ScriptModule>> {
        debug!(module = %artifact.name, version = %artifact.version, "instantiating module");
        Ok(Box::new(NativeModule {
            artifact: artifact.clone(),
            handlers: self.snapshot(),
        }))
    }
}

/// A module instantiated by [`NativeHostRuntime`]. Holds a snapshot of the
/// dispatch table taken at instantiation time.
struct NativeModule {
    artifact: ModuleArtifact,
    handlers: BTreeMap<String, HostFn>,
}

impl ScriptModule for NativeModule {
    fn name(&self) -> &str {
        &self.artifact.name
    }

    fn artifact(&self) -> &ModuleArtifact {
        &self.artifact
    }

    fn invoke(&self, type_name: &str, method: &str, args: &[Value]) -> Result<Value> {
        let Some(handler) = self.handlers.get(&dispatch_key(type_name, method)) else {
            return Err(Error::Runtime(format!(
                "no handler registered for {type_name}.{method} in module '{}'",
                self.artifact.name
            )));
        };
        handler(args)
    }

    fn construct(&self, type_name: &str) -> Result<()> {
        let Some(export) = self.artifact.export(type_name) else {
            return Err(Error::Runtime(format!(
                "module '{}' does not export type {type_name}",
                self.artifact.name
            )));
        };
        if !export.constructible {
            return Err(Error::Runtime(format!(
                "type {type_name} in module '{}' is not constructible",
                self.artifact.name
            )));
        }
        Ok(())
    }
}

/// Gate between modules and the host API surface.
///
/// A call goes through only when the method name is on the merged call
/// whitelist and the capability policy grants the member. The whitelist is
/// consulted first, so a policy-granted member with a non-whitelisted name
/// is still refused.
pub struct HostGate {
    policy: CapabilityPolicy,
    allowed_calls: NameSet,
    surface: BTreeMap<String, HostFn>,
}

impl HostGate {
    pub fn new(policy: CapabilityPolicy, allowed_calls: NameSet) -> Self {
        Self {
            policy,
            allowed_calls,
            surface: BTreeMap::new(),
        }
    }

    /// Expose one host method to modules.
    pub fn expose<F>(&mut self, type_name: &str, method: &str, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.surface
            .insert(dispatch_key(type_name, method), Arc::new(handler));
    }

    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    /// Dispatch a host API call on behalf of a module.
    pub fn call(&self, type_name: &str, method: &str, args: &[Value]) -> Result<Value> {
        if !self.allowed_calls.is_empty() && !self.allowed_calls.contains(method) {
            warn!(type_name, method, "host call refused by call whitelist");
            return Err(Error::RuleViolation {
                rule: "call-whitelist".to_string(),
                message: format!("method '{method}' is not a permitted call"),
            });
        }
        if !self.policy.allows_method(type_name, method) {
            warn!(type_name, method, "host call refused by capability policy");
            return Err(Error::RuleViolation {
                rule: "capability-policy".to_string(),
                message: format!("{type_name}.{method} is not granted"),
            });
        }
        let Some(handler) = self.surface.get(&dispatch_key(type_name, method)) else {
            return Err(Error::Runtime(format!(
                "host method {type_name}.{method} is not implemented"
            )));
        };
        handler(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{TypeInfo, TypeRegistry};
    use crate::policy;
    use serde_json::json;
    use std::collections::BTreeMap as Map;

    fn sample_artifact() -> ModuleArtifact {
        let json = r#"{
            "name": "physics",
            "version": "1.2.0",
            "publisher": "aa11",
            "exports": [
                {
                    "name": "physics.Solver",
                    "interfaces": ["host.Updatable"],
                    "constructible": true,
                    "methods": [{"name": "Step", "is_static": false}]
                },
                {
                    "name": "physics.Tables",
                    "constructible": false,
                    "methods": []
                }
            ],
            "payload": ""
        }"#;
        ModuleArtifact::from_slice("physics.mod.json", json.as_bytes()).unwrap()
    }

    #[test]
    fn native_runtime_dispatches_registered_handlers() {
        let runtime = NativeHostRuntime::new();
        runtime.register("physics.Solver", "Step", |args| {
            Ok(json!(args.len() as i64))
        });

        let module = runtime.instantiate(&sample_artifact()).unwrap();
        let out = module
            .invoke("Physics.SOLVER", "step", &[json!(1), json!(2)])
            .unwrap();
        assert_eq!(out, json!(2));
    }

    #[test]
    fn missing_handler_is_a_runtime_error() {
        let runtime = NativeHostRuntime::new();
        let module = runtime.instantiate(&sample_artifact()).unwrap();
        let err = module.invoke("physics.Solver", "Step", &[]).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[test]
    fn construct_respects_the_constructible_flag() {
        let runtime = NativeHostRuntime::new();
        let module = runtime.instantiate(&sample_artifact()).unwrap();
        module.construct("physics.Solver").unwrap();
        assert!(module.construct("physics.Tables").is_err());
        assert!(module.construct("physics.Missing").is_err());
    }

    fn gate_with(policy_tokens: &[(&str, &[&str])], calls: &[&str]) -> HostGate {
        let mut registry = TypeRegistry::new();
        registry.register(
            TypeInfo::new("host.Log")
                .with_method("Write")
                .with_method("Flush"),
        );
        let mut config = Map::new();
        for (type_name, tokens) in policy_tokens {
            config.insert(
                type_name.to_string(),
                tokens.iter().map(|t| t.to_string()).collect(),
            );
        }
        let (policy, _) = policy::compile(Some(&config), &registry);
        HostGate::new(policy, calls.iter().copied().collect())
    }

    #[test]
    fn whitelist_is_checked_before_the_policy() {
        let mut gate = gate_with(&[("host.Log", &["Write"])], &["Write"]);
        gate.expose("host.Log", "Write", |_| Ok(Value::Null));
        gate.expose("host.Log", "Flush", |_| Ok(Value::Null));

        gate.call("host.Log", "Write", &[]).unwrap();

        // Flush is exposed and would fail the policy too, but the whitelist
        // refusal comes first.
        let err = gate.call("host.Log", "Flush", &[]).unwrap_err();
        match err {
            Error::RuleViolation { rule, .. } => assert_eq!(rule, "call-whitelist"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn policy_denial_comes_before_surface_probing() {
        let gate = gate_with(&[("host.Log", &["Write"])], &[]);
        // Flush was never exposed, but the caller must not learn that.
        let err = gate.call("host.Log", "Flush", &[]).unwrap_err();
        match err {
            Error::RuleViolation { rule, .. } => assert_eq!(rule, "capability-policy"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_whitelist_allows_any_granted_call() {
        let mut gate = gate_with(&[("host.Log", &["*"])], &[]);
        gate.expose("host.Log", "Flush", |_| Ok(json!(true)));
        assert_eq!(gate.call("host.Log", "Flush", &[]).unwrap(), json!(true));
    }
}
