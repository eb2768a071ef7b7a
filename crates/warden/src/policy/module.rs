//! Allow/deny decisions for module references.

use std::collections::BTreeSet;

use super::outcome::{PolicyOutcome, Violation};
use crate::config::{ModuleLoadPolicy, SandboxConfig};

/// Decides whether a bare module reference may be loaded.
///
/// The deny set always wins: a module listed in both sets is denied, and
/// the raw filesystem primitives are in the deny set for every
/// configuration.
#[derive(Clone, Debug)]
pub struct ModulePolicy {
    load_policy: ModuleLoadPolicy,
    allow: Option<BTreeSet<String>>,
    deny: Vec<String>,
}

impl ModulePolicy {
    /// Build the policy from a sandbox configuration.
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            load_policy: config.module_load_policy(),
            allow: config.module_allow_set().cloned(),
            deny: config.module_deny_set().to_vec(),
        }
    }

    /// Check a module name.
    pub fn check(&self, module: &str) -> PolicyOutcome<()> {
        self.evaluate(module).into()
    }

    pub(crate) fn evaluate(&self, module: &str) -> Result<(), Violation> {
        if self.load_policy == ModuleLoadPolicy::Disabled {
            return Err(Violation::denied("module loading is not allowed"));
        }

        let allowed = self
            .allow
            .as_ref()
            .is_none_or(|allow| allow.contains(module));

        if !allowed || self.deny.iter().any(|d| d == module) {
            return Err(Violation::denied(format!(
                "module not allowed: {}",
                module
            )));
        }

        Ok(())
    }
}
