//! Sandbox construction.

use std::fmt;
use std::sync::Arc;

use crate::capability::{CapabilityTable, GuardedFs};
use crate::config::SandboxConfig;
use crate::guard::{EvalGuard, Evaluator, ModuleGuard, ModuleLoader};
use crate::policy::{ModulePolicy, OutcomeReporter, PathResolver};
use crate::primitives::{FileSystem, LocalFs};

/// Policy state shared by every capability a sandbox hands out.
#[derive(Debug)]
pub(crate) struct SandboxState {
    pub(crate) config: SandboxConfig,
    pub(crate) resolver: PathResolver,
    pub(crate) modules: ModulePolicy,
    pub(crate) reporter: OutcomeReporter,
    pub(crate) table: CapabilityTable,
}

/// A configured sandbox.
///
/// Building a sandbox fixes every policy decision that does not depend on a
/// call's arguments: the root, the module sets and the capability table.
/// Capabilities handed out afterwards share that state and can be cloned
/// and re-scoped to a caller freely.
///
/// ## Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use warden::{LocalFs, Sandbox, SandboxConfig};
///
/// let config = SandboxConfig::from_json(r#"{"root": "/srv/app", "fs": ["read"]}"#)?;
/// let sandbox = Sandbox::new(config);
///
/// let fs = sandbox.filesystem(Arc::new(LocalFs::new()));
/// let modules = sandbox.module_guard(my_loader);
/// ```
#[derive(Clone)]
pub struct Sandbox {
    state: Arc<SandboxState>,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("root_dir", &self.state.config.root_dir())
            .field("operations", &self.state.table.names())
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Build a sandbox from a normalized configuration.
    pub fn new(config: SandboxConfig) -> Self {
        let table = CapabilityTable::build(config.fs_actions());

        tracing::info!(
            root = %config.root_dir().display(),
            strict = config.throw_on_violation(),
            require = ?config.module_load_policy(),
            eval = ?config.eval_policy(),
            operations = table.len(),
            "sandbox configured"
        );

        let state = SandboxState {
            resolver: PathResolver::new(config.root_dir()),
            modules: ModulePolicy::from_config(&config),
            reporter: OutcomeReporter::new(config.throw_on_violation()),
            table,
            config,
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// The configuration this sandbox was built from.
    pub fn config(&self) -> &SandboxConfig {
        &self.state.config
    }

    /// The filesystem operations this sandbox exposes.
    pub fn capabilities(&self) -> &CapabilityTable {
        &self.state.table
    }

    /// The resolver confining paths to the root.
    pub fn resolver(&self) -> &PathResolver {
        &self.state.resolver
    }

    /// The module allow/deny policy.
    pub fn module_policy(&self) -> &ModulePolicy {
        &self.state.modules
    }

    /// The reporter turning violations into results.
    pub fn reporter(&self) -> OutcomeReporter {
        self.state.reporter
    }

    /// Guard `fs` with this sandbox's filesystem policy.
    pub fn filesystem(&self, fs: Arc<dyn FileSystem>) -> GuardedFs {
        GuardedFs::new(fs, Arc::clone(&self.state))
    }

    /// Guard the host filesystem.
    pub fn local_filesystem(&self) -> GuardedFs {
        self.filesystem(Arc::new(LocalFs::new()))
    }

    /// Guard a host module loader with this sandbox's module policy.
    pub fn module_guard<L: ModuleLoader>(&self, loader: L) -> ModuleGuard<L> {
        ModuleGuard::new(Arc::new(loader), Arc::clone(&self.state))
    }

    /// Guard a host evaluator with this sandbox's evaluation policy.
    pub fn eval_guard<E: Evaluator>(&self, evaluator: E) -> EvalGuard<E> {
        EvalGuard::new(
            Arc::new(evaluator),
            self.state.config.eval_policy(),
            self.state.reporter,
        )
    }
}
