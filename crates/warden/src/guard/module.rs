//! Module load guard.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ModuleLoadPolicy;
use crate::policy::{GuardResult, PathClassification, PolicyOutcome, Reported, SandboxError, Violation};
use crate::sandbox::SandboxState;

/// The host's module loader.
pub trait ModuleLoader: Send + Sync {
    /// A loaded module.
    type Module;
    /// Loader failure, surfaced to the caller unchanged.
    type Error: Into<Box<dyn Error + Send + Sync>>;

    /// Load `id` on behalf of the file at `caller`.
    fn load(&self, id: &str, caller: Option<&Path>) -> Result<Self::Module, Self::Error>;
}

/// Replacement module loader handed to sandboxed code.
///
/// Requests are classified by the sandbox's path resolver, then checked
/// against the load policy and the module allow/deny sets. The identifier
/// reaches the host loader exactly as it was requested.
pub struct ModuleGuard<L> {
    loader: Arc<L>,
    state: Arc<SandboxState>,
    caller: Option<PathBuf>,
}

impl<L> Clone for ModuleGuard<L> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            state: Arc::clone(&self.state),
            caller: self.caller.clone(),
        }
    }
}

impl<L> fmt::Debug for ModuleGuard<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleGuard")
            .field("policy", &self.state.config.module_load_policy())
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

impl<L: ModuleLoader> ModuleGuard<L> {
    pub(crate) fn new(loader: Arc<L>, state: Arc<SandboxState>) -> Self {
        Self {
            loader,
            state,
            caller: None,
        }
    }

    /// A copy of this guard that loads on behalf of `caller`.
    pub fn for_caller(&self, caller: impl Into<PathBuf>) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            state: Arc::clone(&self.state),
            caller: Some(caller.into()),
        }
    }

    /// The caller context, if any.
    pub fn caller(&self) -> Option<&Path> {
        self.caller.as_deref()
    }

    /// Decide whether `id` may be loaded without loading it.
    pub fn check(&self, id: &str) -> PolicyOutcome<PathClassification> {
        self.evaluate(id).into()
    }

    /// Load `id` if policy allows it.
    pub fn require(&self, id: &str) -> GuardResult<L::Module> {
        if let Err(violation) = self.evaluate(id) {
            return self.state.reporter.violation("require", violation.at(id));
        }
        tracing::trace!(module = %id, caller = ?self.caller, "module load allowed");

        self.loader
            .load(id, self.caller.as_deref())
            .map(Reported::Value)
            .map_err(|err| SandboxError::Delegate(err.into()))
    }

    fn evaluate(&self, id: &str) -> Result<PathClassification, Violation> {
        let policy = self.state.config.module_load_policy();
        if policy == ModuleLoadPolicy::Disabled {
            return Err(Violation::denied("module loading is not allowed"));
        }

        let classification = self
            .state
            .resolver
            .classify(id, self.caller.as_deref(), true)?;

        match &classification {
            PathClassification::Module(name) => self.state.modules.evaluate(name)?,
            PathClassification::File(_) if policy == ModuleLoadPolicy::ModulesOnly => {
                return Err(Violation::denied("module loading limited to modules"));
            }
            PathClassification::File(_) => {}
        }
        Ok(classification)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::SandboxConfig;
    use crate::sandbox::Sandbox;

    #[derive(Default)]
    struct RecordingLoader {
        calls: Mutex<Vec<(String, Option<PathBuf>)>>,
    }

    impl ModuleLoader for Arc<RecordingLoader> {
        type Module = String;
        type Error = std::io::Error;

        fn load(&self, id: &str, caller: Option<&Path>) -> Result<String, std::io::Error> {
            self.calls
                .lock()
                .unwrap()
                .push((id.to_string(), caller.map(Path::to_path_buf)));
            if id == "broken" {
                return Err(std::io::Error::other("loader failed"));
            }
            Ok(format!("module:{}", id))
        }
    }

    fn guard(json: &str) -> (ModuleGuard<Arc<RecordingLoader>>, Arc<RecordingLoader>) {
        let config = SandboxConfig::from_json(json).unwrap();
        let loader = Arc::new(RecordingLoader::default());
        (
            Sandbox::new(config).module_guard(Arc::clone(&loader)),
            loader,
        )
    }

    #[test]
    fn test_disabled_denies_everything() {
        let (guard, loader) = guard(r#"{"root": "/app", "require": false}"#);
        let err = guard.require("lodash").unwrap_err();
        assert!(matches!(err, SandboxError::PermissionDenied(_)));
        assert!(loader.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_modules_only_scenarios() {
        let (guard, loader) =
            guard(r#"{"root": "/app", "modules": {"allow": ["lodash", "left-pad"], "deny": "left-pad"}}"#);
        let guard = guard.for_caller("/app/src/index.js");

        assert_eq!(
            guard.require("lodash").unwrap(),
            Reported::Value("module:lodash".to_string())
        );
        assert!(matches!(
            guard.require("./secret.js"),
            Err(SandboxError::PermissionDenied(ref r)) if r == "module loading limited to modules"
        ));
        assert!(matches!(
            guard.require("left-pad"),
            Err(SandboxError::PermissionDenied(ref r)) if r == "module not allowed: left-pad"
        ));

        let calls = loader.calls.lock().unwrap();
        assert_eq!(
            *calls,
            [(
                "lodash".to_string(),
                Some(PathBuf::from("/app/src/index.js"))
            )]
        );
    }

    #[test]
    fn test_any_module_allows_files_in_root() {
        let (guard, loader) = guard(r#"{"root": "/app", "require": true}"#);
        let guard = guard.for_caller("/app/src/index.js");

        assert!(guard.require("./util.js").unwrap().is_value());
        assert!(guard.require("../../etc/passwd").unwrap_err().is_violation());
        assert_eq!(loader.calls.lock().unwrap()[0].0, "./util.js");
    }

    #[test]
    fn test_raw_primitives_always_denied() {
        let (guard, _) = guard(r#"{"root": "/app", "require": true, "modules": ["fs", "fs-extra"]}"#);
        assert!(guard.require("fs").is_err());
        assert!(guard.require("fs-extra").is_err());
    }

    #[test]
    fn test_lenient_returns_null() {
        let (guard, _) = guard(r#"{"root": "/app", "throwErrors": false, "modules": false}"#);
        assert_eq!(guard.require("lodash").unwrap(), Reported::Null);
        assert_eq!(guard.require("").unwrap(), Reported::Undefined);
    }

    #[test]
    fn test_loader_errors_are_delegated() {
        let (guard, _) = guard(r#"{"root": "/app"}"#);
        let err = guard.require("broken").unwrap_err();
        assert!(matches!(err, SandboxError::Delegate(_)));
        assert_eq!(err.to_string(), "loader failed");
    }

    #[test]
    fn test_check_does_not_load() {
        let (guard, loader) = guard(r#"{"root": "/app"}"#);
        assert_eq!(
            guard.check("lodash"),
            PolicyOutcome::Allowed(PathClassification::Module("lodash".to_string()))
        );
        assert!(loader.calls.lock().unwrap().is_empty());
    }
}
