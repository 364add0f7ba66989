//! Rule validation for mod folders
//!
//! Runs a fixed sequence of passes over a mod folder: file-extension rules
//! across the whole tree, per-module allow and forbid rules over the
//! scripts subfolder, required-module presence, trust verification against
//! the reference store, and finally system reconciliation. Extension
//! failures always block and abort the remaining passes, whatever the mode.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::artifact::{is_artifact_path, ModuleArtifact};
use crate::error::{Error, Result};
use crate::ruleset::{NameSet, Ruleset};
use crate::trust::{reconcile, ReconcileAction, TrustStore, TrustVerdict};
use crate::SCRIPTS_DIR;

/// Rulesets may spell extensions with or without the leading dot.
fn contains_extension(set: &NameSet, ext: &str) -> bool {
    set.contains(ext) || set.contains(&format!(".{ext}"))
}

/// Behavior switches for a validation run.
#[derive(Clone, Debug, Default)]
pub struct ValidationOptions {
    /// Downgrade module-rule findings to non-blocking warnings. Extension
    /// rules and hard trust failures still block.
    pub warn_only: bool,
    /// When set, reconcile top-level modules against this system root
    /// after the rule passes.
    pub system_root: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One rule violation or advisory produced during validation.
#[derive(Clone, Debug)]
pub struct Finding {
    pub rule: String,
    pub severity: Severity,
    pub blocking: bool,
    pub message: String,
}

impl Finding {
    fn blocking_unless(rule: &str, warn_only: bool, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            severity: if warn_only {
                Severity::Warning
            } else {
                Severity::Error
            },
            blocking: !warn_only,
            message,
        }
    }

    fn hard(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Error,
            blocking: true,
            message,
        }
    }

    fn advisory(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Warning,
            blocking: false,
            message,
        }
    }
}

/// Outcome of validating one mod folder.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub mod_name: String,
    pub findings: Vec<Finding>,
    /// Whether the extension pass failed hard and later passes were skipped.
    pub aborted: bool,
    pub reconciled: Vec<ReconcileAction>,
}

impl ValidationReport {
    pub fn is_load_allowed(&self) -> bool {
        !self.findings.iter().any(|f| f.blocking)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }
}

/// Validates mod folders against one ruleset.
pub struct Validator {
    ruleset: Ruleset,
    trusted_store: Option<TrustStore>,
    options: ValidationOptions,
}

impl Validator {
    pub fn new(ruleset: Ruleset, options: ValidationOptions) -> Self {
        Self {
            ruleset,
            trusted_store: None,
            options,
        }
    }

    pub fn with_trusted_store(mut self, store: TrustStore) -> Self {
        self.trusted_store = Some(store);
        self
    }

    /// Run every pass over a mod folder and collect the findings.
    pub fn validate(&self, mod_dir: &Path) -> Result<ValidationReport> {
        if !mod_dir.is_dir() {
            return Err(Error::ModFolderMissing(mod_dir.to_path_buf()));
        }
        let mod_name = mod_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<unnamed>")
            .to_string();

        let mut report = ValidationReport {
            mod_name: mod_name.clone(),
            ..Default::default()
        };

        debug!(mod_name = %mod_name, "validating mod folder");

        self.check_extensions(mod_dir, &mut report);
        if report.findings.iter().any(|f| f.blocking) {
            // A disallowed file type invalidates the whole folder, so the
            // per-module passes would only add noise.
            report.aborted = true;
            warn!(mod_name = %mod_name, "extension pass failed, skipping module passes");
            return Ok(report);
        }

        let modules = self.collect_modules(mod_dir, &mut report)?;
        self.check_module_rules(&modules, &mut report);
        self.check_required_modules(mod_dir, &modules, &mut report);
        self.check_trust(&modules, &mut report)?;

        if let Some(system_root) = &self.options.system_root {
            report.reconciled = reconcile(mod_dir, system_root)?;
        }

        if report.is_load_allowed() {
            info!(mod_name = %mod_name, findings = report.findings.len(), "mod folder passed validation");
        } else {
            warn!(mod_name = %mod_name, findings = report.findings.len(), "mod folder failed validation");
        }
        Ok(report)
    }

    /// Extension rules cover every file in the tree, not just modules.
    /// Violations are hard in every mode, warn-only does not apply here.
    fn check_extensions(&self, mod_dir: &Path, report: &mut ValidationReport) {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for entry in WalkDir::new(mod_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            let Some(ext) = ext else { continue };

            if contains_extension(&self.ruleset.forbid_extensions, &ext) {
                report.findings.push(Finding::hard(
                    "forbidden-extension",
                    format!(
                        "file type '.{ext}' is not allowed: {}",
                        entry.path().display()
                    ),
                ));
            }
            seen.insert(ext);
        }

        for required in self.ruleset.require_extensions.iter() {
            let required = required.trim_start_matches('.');
            if !seen.contains(required) {
                report.findings.push(Finding::hard(
                    "missing-extension",
                    format!("no '.{required}' file present in the mod folder"),
                ));
            }
        }
    }

    /// Parse every artifact under scripts/. Unparseable envelopes are hard
    /// failures and do not surface as modules for later passes.
    fn collect_modules(
        &self,
        mod_dir: &Path,
        report: &mut ValidationReport,
    ) -> Result<Vec<(PathBuf, ModuleArtifact)>> {
        let scripts_dir = mod_dir.join(SCRIPTS_DIR);
        if !scripts_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut modules = Vec::new();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&scripts_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_artifact_path(p))
            .collect();
        paths.sort();

        for path in paths {
            match ModuleArtifact::from_path(&path) {
                Ok(artifact) => modules.push((path, artifact)),
                Err(e) => {
                    report.findings.push(Finding::hard(
                        "unreadable-module",
                        format!("{}: {e}", path.display()),
                    ));
                }
            }
        }
        Ok(modules)
    }

    fn check_module_rules(
        &self,
        modules: &[(PathBuf, ModuleArtifact)],
        report: &mut ValidationReport,
    ) {
        let whitelist_active = !self.ruleset.only_allow.is_empty();
        for (_, artifact) in modules {
            if whitelist_active {
                // A non-empty whitelist dominates: the forbid list is not
                // consulted at all.
                if !self.ruleset.only_allow.contains(&artifact.name) {
                    report.findings.push(Finding::blocking_unless(
                        "module-not-whitelisted",
                        self.options.warn_only,
                        format!("module '{}' is not on the allow list", artifact.name),
                    ));
                }
            } else if self.ruleset.forbid_modules.contains(&artifact.name) {
                report.findings.push(Finding::blocking_unless(
                    "forbidden-module",
                    self.options.warn_only,
                    format!("module '{}' is forbidden", artifact.name),
                ));
            }
        }
    }

    fn check_required_modules(
        &self,
        mod_dir: &Path,
        modules: &[(PathBuf, ModuleArtifact)],
        report: &mut ValidationReport,
    ) {
        if self.ruleset.require_modules.is_empty() {
            return;
        }
        let scripts_dir = mod_dir.join(SCRIPTS_DIR);
        if !scripts_dir.is_dir() {
            // Requiring modules from a mod that ships none is always an
            // error, whatever the mode.
            report.findings.push(Finding::hard(
                "missing-scripts-folder",
                format!(
                    "ruleset requires modules but '{}' has no {SCRIPTS_DIR} folder",
                    report.mod_name
                ),
            ));
            return;
        }

        for required in self.ruleset.require_modules.iter() {
            let present = modules
                .iter()
                .any(|(_, a)| a.name.eq_ignore_ascii_case(required));
            if !present {
                report.findings.push(Finding::blocking_unless(
                    "missing-module",
                    self.options.warn_only,
                    format!("required module '{required}' is not present"),
                ));
            }
        }
    }

    fn check_trust(
        &self,
        modules: &[(PathBuf, ModuleArtifact)],
        report: &mut ValidationReport,
    ) -> Result<()> {
        let Some(store) = &self.trusted_store else {
            return Ok(());
        };
        for (path, artifact) in modules {
            match store.verify(path)? {
                TrustVerdict::Trusted => {}
                TrustVerdict::Unreferenced => {
                    report.findings.push(Finding::advisory(
                        "untrusted-module",
                        format!("module '{}' has no trusted reference", artifact.name),
                    ));
                }
                TrustVerdict::HashMismatch { expected, found } => {
                    report.findings.push(Finding::advisory(
                        "content-changed",
                        format!(
                            "module '{}' content differs from the trusted copy (expected {expected}, found {found})",
                            artifact.name
                        ),
                    ));
                }
                TrustVerdict::IdentityMismatch { expected, found } => {
                    report.findings.push(Finding::hard(
                        "identity-mismatch",
                        format!(
                            "module '{}' publisher {found} does not match trusted publisher {expected}",
                            artifact.name
                        ),
                    ));
                }
                TrustVerdict::Unreadable { message } => {
                    report.findings.push(Finding::hard(
                        "unreadable-module",
                        format!("{}: {message}", path.display()),
                    ));
                }
            }
        }
        Ok(())
    }
}
