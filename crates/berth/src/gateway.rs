//! Invocation gateway
//!
//! All inbound calls to module exports go through here. The gateway
//! consults the governing ruleset's whitelists before any resolution,
//! refuses revoked contexts, checks the export table before touching the
//! module, and contains panics from module code so a misbehaving module
//! cannot take the host down with it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::artifact::ARTIFACT_SUFFIX;
use crate::context::HostContext;
use crate::ruleset::Ruleset;

/// Result of routing a single call.
#[derive(Debug)]
pub enum InvokeOutcome {
    /// The export ran to completion.
    Returned(Value),
    /// The exported type was instantiated.
    Constructed,
    /// No loaded module exports the requested type or method.
    Unresolved { message: String },
    /// The call was refused before reaching module code.
    Denied { rule: String, message: String },
    /// Module code failed or panicked. The host keeps running.
    Faulted { message: String },
}

impl InvokeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvokeOutcome::Returned(_) | InvokeOutcome::Constructed)
    }
}

/// Routes calls from the host into loaded module exports.
pub struct Gateway {
    host: Arc<HostContext>,
}

impl Gateway {
    pub fn new(host: Arc<HostContext>) -> Self {
        Self { host }
    }

    /// Invoke an exported method by type name.
    ///
    /// The call whitelist is consulted before the type is resolved, and the
    /// module whitelist override before the export table is probed.
    pub fn invoke(
        &self,
        ruleset: &Ruleset,
        type_name: &str,
        method: &str,
        args: &[Value],
    ) -> InvokeOutcome {
        if !ruleset.is_call_allowed(method) {
            return InvokeOutcome::Denied {
                rule: "call-whitelist".to_string(),
                message: format!("method '{method}' is not a permitted call"),
            };
        }
        let Some((context, module)) = self.host.resolve_type(type_name) else {
            return InvokeOutcome::Unresolved {
                message: format!("no loaded module exports type {type_name}"),
            };
        };
        if context.is_revoked() {
            warn!(type_name, method, context = context.name(), "call to revoked context refused");
            return InvokeOutcome::Denied {
                rule: "revoked-context".to_string(),
                message: format!("load context '{}' has been revoked", context.name()),
            };
        }
        if !module_allowed(ruleset, module.name()) {
            warn!(type_name, module = module.name(), "module restricted by whitelist override");
            return InvokeOutcome::Denied {
                rule: "whitelist-override".to_string(),
                message: format!("module '{}' is not on the allow list", module.name()),
            };
        }

        // Probe the export table before running anything.
        let Some(export) = module.artifact().export(type_name) else {
            return InvokeOutcome::Unresolved {
                message: format!("module '{}' does not export type {type_name}", module.name()),
            };
        };
        if export.method(method).is_none() {
            return InvokeOutcome::Unresolved {
                message: format!("type {type_name} does not export method {method}"),
            };
        }

        debug!(type_name, method, module = module.name(), "invoking export");
        let result = catch_unwind(AssertUnwindSafe(|| module.invoke(type_name, method, args)));
        match result {
            Ok(Ok(value)) => InvokeOutcome::Returned(value),
            Ok(Err(e)) => {
                warn!(type_name, method, error = %e, "export returned an error");
                InvokeOutcome::Faulted {
                    message: e.to_string(),
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(type_name, method, %message, "export panicked");
                InvokeOutcome::Faulted { message }
            }
        }
    }

    /// Invoke a method on whichever of a mod's exported types implements
    /// the named interface.
    ///
    /// All refusals happen before any export probing: a non-whitelisted
    /// module or a method outside both call whitelists is denied whether
    /// or not the member exists. When several exported types implement the
    /// interface, the first in export order wins with a warning.
    pub fn invoke_interface(
        &self,
        mod_name: &str,
        ruleset: &Ruleset,
        interface: &str,
        method: &str,
        args: &[Value],
    ) -> InvokeOutcome {
        let Some(context) = self.host.context(mod_name) else {
            return InvokeOutcome::Unresolved {
                message: format!("mod '{mod_name}' has no loaded context"),
            };
        };
        if context.is_revoked() {
            return InvokeOutcome::Denied {
                rule: "revoked-context".to_string(),
                message: format!("load context '{}' has been revoked", context.name()),
            };
        }
        // The call whitelist does not depend on the modules, so it answers
        // before any of them is examined.
        if !ruleset.is_call_allowed(method) {
            return InvokeOutcome::Denied {
                rule: "call-whitelist".to_string(),
                message: format!("method '{method}' is not a permitted call"),
            };
        }

        let mut target = None;
        for module in context.modules() {
            if !module_allowed(ruleset, module.name()) {
                warn!(mod_name, module = module.name(), "module restricted by whitelist override");
                return InvokeOutcome::Denied {
                    rule: "whitelist-override".to_string(),
                    message: format!("module '{}' is not on the allow list", module.name()),
                };
            }

            let implementing = module.artifact().types_implementing(interface);
            if implementing.len() > 1 {
                warn!(mod_name, interface, chosen = %implementing[0].name,
                    "multiple exported types implement the interface, using the first");
            }
            if let Some(export) = implementing.first() {
                target = Some((module.clone(), export.name.clone()));
                break;
            }
        }

        let Some((module, type_name)) = target else {
            return InvokeOutcome::Unresolved {
                message: format!("no exported type in '{mod_name}' implements {interface}"),
            };
        };
        let Some(export) = module.artifact().export(&type_name) else {
            return InvokeOutcome::Unresolved {
                message: format!("module '{}' does not export type {type_name}", module.name()),
            };
        };
        let Some(method_export) = export.method(method) else {
            return InvokeOutcome::Unresolved {
                message: format!("type {type_name} does not export method {method}"),
            };
        };

        if !method_export.is_static {
            if let Err(e) = module.construct(&type_name) {
                return InvokeOutcome::Denied {
                    rule: "constructor".to_string(),
                    message: e.to_string(),
                };
            }
        }

        debug!(mod_name, interface, %type_name, method, "invoking interface export");
        match catch_unwind(AssertUnwindSafe(|| module.invoke(&type_name, method, args))) {
            Ok(Ok(value)) => InvokeOutcome::Returned(value),
            Ok(Err(e)) => InvokeOutcome::Faulted {
                message: e.to_string(),
            },
            Err(payload) => InvokeOutcome::Faulted {
                message: panic_message(payload.as_ref()),
            },
        }
    }

    /// Instantiate an exported type. The whitelist override applies to
    /// construction the same as to calls.
    pub fn construct(&self, ruleset: &Ruleset, type_name: &str) -> InvokeOutcome {
        let Some((context, module)) = self.host.resolve_type(type_name) else {
            return InvokeOutcome::Unresolved {
                message: format!("no loaded module exports type {type_name}"),
            };
        };
        if context.is_revoked() {
            return InvokeOutcome::Denied {
                rule: "revoked-context".to_string(),
                message: format!("load context '{}' has been revoked", context.name()),
            };
        }
        if !module_allowed(ruleset, module.name()) {
            return InvokeOutcome::Denied {
                rule: "whitelist-override".to_string(),
                message: format!("module '{}' is not on the allow list", module.name()),
            };
        }
        match catch_unwind(AssertUnwindSafe(|| module.construct(type_name))) {
            Ok(Ok(())) => InvokeOutcome::Constructed,
            Ok(Err(e)) => InvokeOutcome::Faulted {
                message: e.to_string(),
            },
            Err(payload) => InvokeOutcome::Faulted {
                message: panic_message(payload.as_ref()),
            },
        }
    }
}

/// The whitelist override accepts module names with or without the
/// artifact suffix.
fn module_allowed(ruleset: &Ruleset, module_name: &str) -> bool {
    if ruleset.only_allow.is_empty() {
        return true;
    }
    ruleset.only_allow.contains(module_name)
        || ruleset
            .only_allow
            .contains(&format!("{module_name}{ARTIFACT_SUFFIX}"))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "module panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ModuleArtifact;
    use crate::context::LoadContext;
    use crate::module::{ModuleRuntime, NativeHostRuntime};
    use serde_json::json;

    fn gateway_with_solver() -> (Gateway, Arc<HostContext>) {
        let json = r#"{
            "name": "physics",
            "version": "1.0.0",
            "publisher": "aa11",
            "exports": [{
                "name": "physics.Solver",
                "constructible": true,
                "methods": [
                    {"name": "Step", "is_static": false},
                    {"name": "Explode", "is_static": false}
                ]
            }],
            "payload": ""
        }"#;
        let artifact = ModuleArtifact::from_slice("physics.mod.json", json.as_bytes()).unwrap();

        let runtime = NativeHostRuntime::new();
        runtime.register("physics.Solver", "Step", |args| Ok(json!(args.len())));
        runtime.register("physics.Solver", "Explode", |_| panic!("solver blew up"));

        let mut context = LoadContext::new("physics-mod");
        context.admit(runtime.instantiate(&artifact).unwrap());

        let host = Arc::new(HostContext::new());
        host.register(context);
        (Gateway::new(host.clone()), host)
    }

    #[test]
    fn successful_invocation_returns_the_value() {
        let (gateway, _host) = gateway_with_solver();
        let ruleset = calls("default_calls: [Step]\n");
        let outcome = gateway.invoke(&ruleset, "physics.Solver", "Step", &[json!(1)]);
        match outcome {
            InvokeOutcome::Returned(v) => assert_eq!(v, json!(1)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unknown_method_is_unresolved_without_running_anything() {
        let (gateway, _host) = gateway_with_solver();
        let ruleset = calls("default_calls: [Vanish]\n");
        let outcome = gateway.invoke(&ruleset, "physics.Solver", "Vanish", &[]);
        assert!(matches!(outcome, InvokeOutcome::Unresolved { .. }));
    }

    #[test]
    fn unknown_type_is_unresolved() {
        let (gateway, _host) = gateway_with_solver();
        let ruleset = calls("default_calls: [Step]\n");
        let outcome = gateway.invoke(&ruleset, "physics.Missing", "Step", &[]);
        assert!(matches!(outcome, InvokeOutcome::Unresolved { .. }));
    }

    #[test]
    fn panics_are_contained_as_faults() {
        let (gateway, _host) = gateway_with_solver();
        let ruleset = calls("default_calls: [Step, Explode]\n");
        let outcome = gateway.invoke(&ruleset, "physics.Solver", "Explode", &[]);
        match outcome {
            InvokeOutcome::Faulted { message } => assert!(message.contains("solver blew up")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The host survives and keeps serving calls.
        assert!(gateway.invoke(&ruleset, "physics.Solver", "Step", &[]).is_success());
    }

    #[test]
    fn revoked_context_is_denied() {
        let (gateway, host) = gateway_with_solver();
        host.context("physics-mod").unwrap().revoke();
        let ruleset = calls("default_calls: [Step]\n");
        let outcome = gateway.invoke(&ruleset, "physics.Solver", "Step", &[]);
        match outcome {
            InvokeOutcome::Denied { rule, .. } => assert_eq!(rule, "revoked-context"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn type_addressed_calls_respect_the_whitelists() {
        let (gateway, _host) = gateway_with_solver();

        // "Step" exists on the export, but sits outside both call whitelists.
        let ruleset = calls("default_calls: [OnLoad]\n");
        match gateway.invoke(&ruleset, "physics.Solver", "Step", &[]) {
            InvokeOutcome::Denied { rule, .. } => assert_eq!(rule, "call-whitelist"),
            other => panic!("unexpected outcome: {other:?}"),
        }

        // A whitelist override naming a different module shuts this one out,
        // for calls and construction alike.
        let ruleset = calls("only_allow: [other]\ndefault_calls: [Step]\n");
        match gateway.invoke(&ruleset, "physics.Solver", "Step", &[]) {
            InvokeOutcome::Denied { rule, .. } => assert_eq!(rule, "whitelist-override"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        match gateway.construct(&ruleset, "physics.Solver") {
            InvokeOutcome::Denied { rule, .. } => assert_eq!(rule, "whitelist-override"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    fn gateway_with_interfaces() -> Gateway {
        let json = r#"{
            "name": "physics",
            "version": "1.0.0",
            "publisher": "aa11",
            "exports": [
                {
                    "name": "physics.Solver",
                    "interfaces": ["host.Updatable"],
                    "constructible": true,
                    "methods": [{"name": "Step", "is_static": false}]
                },
                {
                    "name": "physics.FastSolver",
                    "interfaces": ["host.Updatable"],
                    "constructible": true,
                    "methods": [{"name": "Step", "is_static": false}]
                },
                {
                    "name": "physics.Tables",
                    "interfaces": ["host.Reportable"],
                    "constructible": false,
                    "methods": [{"name": "Dump", "is_static": false}]
                }
            ],
            "payload": ""
        }"#;
        let artifact = ModuleArtifact::from_slice("physics.mod.json", json.as_bytes()).unwrap();

        let runtime = NativeHostRuntime::new();
        runtime.register("physics.Solver", "Step", |_| Ok(json!("solver")));
        runtime.register("physics.FastSolver", "Step", |_| Ok(json!("fast")));

        let mut context = LoadContext::new("shipyard");
        context.admit(runtime.instantiate(&artifact).unwrap());
        let host = Arc::new(HostContext::new());
        host.register(context);
        Gateway::new(host)
    }

    fn calls(yaml: &str) -> crate::ruleset::Ruleset {
        crate::ruleset::Ruleset::from_yaml(yaml).unwrap()
    }

    #[test]
    fn interface_call_resolves_and_runs() {
        let gateway = gateway_with_interfaces();
        let ruleset = calls("default_calls: [Step]\n");
        match gateway.invoke_interface("shipyard", &ruleset, "host.Updatable", "Step", &[]) {
            // Two types implement the interface; the first in export order
            // wins.
            InvokeOutcome::Returned(v) => assert_eq!(v, json!("solver")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn short_interface_names_match_too() {
        let gateway = gateway_with_interfaces();
        let ruleset = calls("public_calls: [Step]\n");
        assert!(gateway
            .invoke_interface("shipyard", &ruleset, "Updatable", "Step", &[])
            .is_success());
    }

    #[test]
    fn non_whitelisted_method_is_denied_without_probing() {
        let gateway = gateway_with_interfaces();
        let ruleset = calls("default_calls: [OnLoad]\n");
        // "Step" exists on the export, but must never be probed.
        match gateway.invoke_interface("shipyard", &ruleset, "host.Updatable", "Step", &[]) {
            InvokeOutcome::Denied { rule, .. } => assert_eq!(rule, "call-whitelist"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // A method that does not exist is denied identically.
        match gateway.invoke_interface("shipyard", &ruleset, "host.Updatable", "Vanish", &[]) {
            InvokeOutcome::Denied { rule, .. } => assert_eq!(rule, "call-whitelist"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn whitelist_override_restricts_modules() {
        let gateway = gateway_with_interfaces();
        let ruleset = calls("only_allow: [other]\ndefault_calls: [Step]\n");
        match gateway.invoke_interface("shipyard", &ruleset, "host.Updatable", "Step", &[]) {
            InvokeOutcome::Denied { rule, .. } => assert_eq!(rule, "whitelist-override"),
            other => panic!("unexpected outcome: {other:?}"),
        }

        // Listing the module, with or without the artifact suffix, lets the
        // call through.
        let ruleset = calls("only_allow: [\"physics.mod.json\"]\ndefault_calls: [Step]\n");
        assert!(gateway
            .invoke_interface("shipyard", &ruleset, "host.Updatable", "Step", &[])
            .is_success());
    }

    #[test]
    fn instance_method_on_a_non_constructible_type_is_denied() {
        let gateway = gateway_with_interfaces();
        let ruleset = calls("default_calls: [Dump]\n");
        match gateway.invoke_interface("shipyard", &ruleset, "host.Reportable", "Dump", &[]) {
            InvokeOutcome::Denied { rule, .. } => assert_eq!(rule, "constructor"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unimplemented_interface_is_unresolved() {
        let gateway = gateway_with_interfaces();
        let ruleset = calls("default_calls: [Step]\n");
        assert!(matches!(
            gateway.invoke_interface("shipyard", &ruleset, "host.Renderable", "Step", &[]),
            InvokeOutcome::Unresolved { .. }
        ));
    }

    #[test]
    fn construct_goes_through_the_export_table() {
        let (gateway, _host) = gateway_with_solver();
        let ruleset = Ruleset::default();
        assert!(gateway.construct(&ruleset, "physics.Solver").is_success());
        assert!(matches!(
            gateway.construct(&ruleset, "physics.Missing"),
            InvokeOutcome::Unresolved { .. }
        ));
    }

    #[test]
    fn empty_context_still_denies_non_whitelisted_calls() {
        let host = Arc::new(HostContext::new());
        host.register(LoadContext::new("hollow"));
        let gateway = Gateway::new(host);

        let ruleset = calls("default_calls: [OnLoad]\n");
        match gateway.invoke_interface("hollow", &ruleset, "host.Updatable", "Step", &[]) {
            InvokeOutcome::Denied { rule, .. } => assert_eq!(rule, "call-whitelist"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
