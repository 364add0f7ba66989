//! Capability policy compilation
//!
//! Turns a declarative type→member allow-list into the compiled
//! [`CapabilityPolicy`] enforced by the module runtime. Compilation never
//! fails outright: unresolved names degrade to warnings carried in the
//! [`CompileReport`], and the conservative baseline surface is always
//! granted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::introspect::{baseline_types, MemberDescriptor, TypeInfo, TypeIntrospector};

/// Token meaning "all public members of this type".
pub const WILDCARD_MEMBER: &str = "*";

/// Declarative allow-list: fully-qualified type name → member-name tokens.
pub type AllowedMembersConfig = BTreeMap<String, Vec<String>>;

/// Load an allowed-members config from a YAML file.
pub fn allowed_members_from_yaml_file(path: impl AsRef<Path>) -> Result<AllowedMembersConfig> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Compiled capability surface for one type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCapability {
    /// All public members of the type are allowed.
    #[serde(default)]
    pub all_public: bool,
    /// The zero-argument public constructor is allowed.
    #[serde(default)]
    pub constructor: bool,
    /// Allowed method names (declared spelling).
    #[serde(default)]
    pub methods: BTreeSet<String>,
    /// Allowed field names (declared spelling).
    #[serde(default)]
    pub fields: BTreeSet<String>,
}

impl TypeCapability {
    fn all_public() -> Self {
        Self {
            all_public: true,
            ..Self::default()
        }
    }

    fn grant(&mut self, descriptor: &MemberDescriptor) {
        match descriptor {
            MemberDescriptor::Constructor => self.constructor = true,
            MemberDescriptor::Method(name) => {
                self.methods.insert(name.clone());
            }
            MemberDescriptor::Field(name) => {
                self.fields.insert(name.clone());
            }
            MemberDescriptor::PropertyAccessor { getter, setter, .. } => {
                if let Some(getter) = getter {
                    self.methods.insert(getter.clone());
                }
                if let Some(setter) = setter {
                    self.methods.insert(setter.clone());
                }
            }
        }
    }
}

/// Immutable compiled capability policy: type → allowed member surface.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityPolicy {
    types: BTreeMap<String, TypeCapability>,
}

impl CapabilityPolicy {
    pub fn is_type_allowed(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn allows_constructor(&self, type_name: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(|cap| cap.all_public || cap.constructor)
    }

    pub fn allows_method(&self, type_name: &str, method: &str) -> bool {
        self.types.get(type_name).is_some_and(|cap| {
            cap.all_public || cap.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
        })
    }

    pub fn allows_field(&self, type_name: &str, field: &str) -> bool {
        self.types.get(type_name).is_some_and(|cap| {
            cap.all_public || cap.fields.iter().any(|f| f.eq_ignore_ascii_case(field))
        })
    }

    pub fn capability(&self, type_name: &str) -> Option<&TypeCapability> {
        self.types.get(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

/// Outcome of resolving one allow-list entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    /// The entry produced at least one capability grant.
    Granted,
    /// The entry was not processed (unknown type, reserved token).
    Skipped(String),
    /// The entry named no resolvable member of a known type.
    Denied(String),
}

/// One allow-list entry's resolution record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileEntry {
    pub type_name: String,
    /// `None` for whole-type (wildcard/empty-list) entries.
    pub token: Option<String>,
    pub outcome: GrantOutcome,
}

/// Aggregated compilation report. Resolution failures are data here, never
/// control flow.
#[derive(Clone, Debug, Default)]
pub struct CompileReport {
    pub entries: Vec<CompileEntry>,
}

impl CompileReport {
    pub fn warnings(&self) -> impl Iterator<Item = &CompileEntry> {
        self.entries
            .iter()
            .filter(|e| !matches!(e.outcome, GrantOutcome::Granted))
    }

    pub fn is_clean(&self) -> bool {
        self.warnings().next().is_none()
    }

    fn record(&mut self, type_name: &str, token: Option<&str>, outcome: GrantOutcome) {
        self.entries.push(CompileEntry {
            type_name: type_name.to_string(),
            token: token.map(str::to_string),
            outcome,
        });
    }
}

/// The fixed conservative default policy: the baseline surface and nothing
/// else.
pub fn baseline_policy() -> CapabilityPolicy {
    let mut types = BTreeMap::new();
    for info in baseline_types() {
        types.insert(info.name, TypeCapability::all_public());
    }
    CapabilityPolicy { types }
}

/// Compile an allow-list into a capability policy.
///
/// An empty or absent config yields exactly [`baseline_policy`]. Custom
/// entries are added on top of the baseline; the result is a pure function
/// of the config and the introspector's contents, independent of entry
/// order.
pub fn compile(
    config: Option<&AllowedMembersConfig>,
    introspector: &dyn TypeIntrospector,
) -> (CapabilityPolicy, CompileReport) {
    let mut policy = baseline_policy();
    let mut report = CompileReport::default();

    let Some(config) = config.filter(|c| !c.is_empty()) else {
        return (policy, report);
    };

    for (type_name, tokens) in config {
        let Some(info) = introspector.lookup(type_name) else {
            warn!(type_name = %type_name, "allow-list references unknown type, skipping");
            report.record(type_name, None, GrantOutcome::Skipped("unknown type".into()));
            continue;
        };

        if tokens.is_empty() || tokens.iter().any(|t| t == WILDCARD_MEMBER) {
            policy
                .types
                .insert(type_name.clone(), TypeCapability::all_public());
            report.record(type_name, None, GrantOutcome::Granted);
            continue;
        }

        let capability = policy.types.entry(type_name.clone()).or_default();
        for token in tokens {
            let outcome = grant_token(capability, info, token);
            if let GrantOutcome::Skipped(reason) | GrantOutcome::Denied(reason) = &outcome {
                warn!(type_name = %type_name, token = %token, reason = %reason, "member token not granted");
            }
            report.record(type_name, Some(token), outcome);
        }
    }

    (policy, report)
}

fn grant_token(capability: &mut TypeCapability, info: &TypeInfo, token: &str) -> GrantOutcome {
    let token = token.trim();
    if token.is_empty() {
        return GrantOutcome::Skipped("blank token".into());
    }

    if is_constructor_token(token) {
        if !info.has_default_constructor {
            return GrantOutcome::Denied("no public zero-argument constructor".into());
        }
        capability.grant(&MemberDescriptor::Constructor);
        return GrantOutcome::Granted;
    }

    // Operator tokens are reserved for future extension.
    if token.starts_with("op_") {
        return GrantOutcome::Skipped("operator tokens are not supported".into());
    }

    let descriptors = resolve_member_token(info, token);
    if descriptors.is_empty() {
        return GrantOutcome::Denied("no method, field, or property with this name".into());
    }
    for descriptor in &descriptors {
        capability.grant(descriptor);
    }
    GrantOutcome::Granted
}

fn is_constructor_token(token: &str) -> bool {
    token == ".ctor" || token == "new" || token.starts_with("ctor(")
}

/// Resolve a plain member token against a type's surface.
///
/// Each member kind is attempted independently: a token may grant a method,
/// a field, and a property's accessors all at once, and a miss for one kind
/// never aborts the others.
fn resolve_member_token(info: &TypeInfo, token: &str) -> Vec<MemberDescriptor> {
    let mut descriptors = Vec::new();

    if let Some(method) = info.method(token) {
        descriptors.push(MemberDescriptor::Method(method.to_string()));
    }
    if let Some(field) = info.field(token) {
        descriptors.push(MemberDescriptor::Field(field.to_string()));
    }
    if let Some(property) = info.property(token) {
        descriptors.push(MemberDescriptor::PropertyAccessor {
            name: property.name.clone(),
            getter: property.getter.clone(),
            setter: property.setter.clone(),
        });
    }

    descriptors
}
