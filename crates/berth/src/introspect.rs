//! Type introspection for the policy compiler
//!
//! The policy compiler never inspects byte-code. It resolves member-name
//! tokens through the narrow [`TypeIntrospector`] interface, so the rest of
//! the pipeline stays agnostic to how type metadata is produced. Hosts
//! populate a [`TypeRegistry`] with the surface they are willing to expose.

use std::collections::{BTreeMap, BTreeSet};

/// A capability target resolved from one allow-list token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberDescriptor {
    /// The public zero-argument constructor.
    Constructor,
    /// A public method by name.
    Method(String),
    /// A public field by name.
    Field(String),
    /// A property's accessor methods, granted individually.
    PropertyAccessor {
        name: String,
        getter: Option<String>,
        setter: Option<String>,
    },
}

/// A property and its accessor method names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: String,
    pub getter: Option<String>,
    pub setter: Option<String>,
}

/// The public surface of one introspectable type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: String,
    pub methods: BTreeSet<String>,
    pub fields: BTreeSet<String>,
    pub properties: Vec<PropertyInfo>,
    pub has_default_constructor: bool,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, name: impl Into<String>) -> Self {
        self.methods.insert(name.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into());
        self
    }

    pub fn with_property(
        mut self,
        name: impl Into<String>,
        getter: Option<&str>,
        setter: Option<&str>,
    ) -> Self {
        self.properties.push(PropertyInfo {
            name: name.into(),
            getter: getter.map(str::to_string),
            setter: setter.map(str::to_string),
        });
        self
    }

    pub fn with_default_constructor(mut self) -> Self {
        self.has_default_constructor = true;
        self
    }

    /// Look up a property by name (case-insensitive, matching the original
    /// reflection semantics for member tokens).
    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Find a declared method by case-insensitive name, returning the
    /// declared spelling.
    pub fn method(&self, name: &str) -> Option<&str> {
        self.methods
            .iter()
            .find(|m| m.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Find a declared field by case-insensitive name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

/// Narrow lookup interface consumed by the policy compiler.
pub trait TypeIntrospector: Send + Sync {
    /// Resolve a type by fully-qualified name, or `None` if unknown.
    fn lookup(&self, full_name: &str) -> Option<&TypeInfo>;
}

/// Host-populated registry of introspectable types.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeInfo>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the conservative baseline surface.
    pub fn with_baseline() -> Self {
        let mut registry = Self::new();
        for info in baseline_types() {
            registry.register(info);
        }
        registry
    }

    pub fn register(&mut self, info: TypeInfo) {
        self.types.insert(info.name.clone(), info);
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl TypeIntrospector for TypeRegistry {
    fn lookup(&self, full_name: &str) -> Option<&TypeInfo> {
        self.types.get(full_name)
    }
}

/// Fully-qualified names of the always-granted baseline types.
pub const BASELINE_TYPE_NAMES: &[&str] = &[
    "core.Math",
    "core.String",
    "core.Vec",
    "core.Map",
];

/// The conservative baseline: safe base-library primitives granted in full
/// even when a custom allow-list is supplied.
pub fn baseline_types() -> Vec<TypeInfo> {
    vec![
        TypeInfo::new("core.Math")
            .with_method("abs")
            .with_method("min")
            .with_method("max")
            .with_method("clamp")
            .with_field("PI"),
        TypeInfo::new("core.String")
            .with_default_constructor()
            .with_method("len")
            .with_method("to_lowercase")
            .with_method("to_uppercase")
            .with_method("contains"),
        TypeInfo::new("core.Vec")
            .with_default_constructor()
            .with_method("push")
            .with_method("pop")
            .with_method("len")
            .with_method("clear"),
        TypeInfo::new("core.Map")
            .with_default_constructor()
            .with_method("insert")
            .with_method("remove")
            .with_method("get")
            .with_method("len"),
    ]
}
