#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! # berth
//!
//! Capability-based sandboxing and trust validation for game mods.
//!
//! A mod is a folder of module artifacts governed by the ruleset of its
//! declared mod type. The pipeline resolves host types through an
//! introspection registry, compiles member grants into a capability
//! policy, verifies artifacts against a trusted reference store, validates
//! folders against the ruleset, and finally loads modules into revocable
//! contexts whose exports are only reachable through the invocation
//! gateway.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use berth::context::HostContext;
//! use berth::lifecycle::{LifecycleController, Strictness};
//! use berth::module::NativeHostRuntime;
//! use berth::store::ModStore;
//!
//! # fn main() -> berth::Result<()> {
//! let store = ModStore::open("mods")?;
//! let host = Arc::new(HostContext::new());
//! let runtime = Arc::new(NativeHostRuntime::new());
//!
//! let controller = LifecycleController::new(store, host.clone(), runtime, b"marker key".as_slice());
//! controller.enable("shipyard")?;
//! let report = controller.load_scripts(Strictness::Strict)?;
//! println!("loaded {} mods", report.loaded.len());
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod content;
pub mod context;
pub mod error;
pub mod gateway;
pub mod introspect;
pub mod lifecycle;
pub mod module;
pub mod policy;
pub mod publish;
pub mod ruleset;
pub mod store;
pub mod trust;
pub mod validator;

pub use error::{Error, Result};

/// Subfolder of a mod that holds its module artifacts.
pub const SCRIPTS_DIR: &str = "scripts";
