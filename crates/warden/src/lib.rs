//! Warden: capability-based sandbox policy engine
//!
//! Warden decides what sandboxed code may touch. A [`Sandbox`] is built
//! from a [`SandboxConfig`] and hands out capability objects in place of
//! the host's raw facilities: a [`GuardedFs`] instead of the filesystem, a
//! [`ModuleGuard`] instead of the module loader and an [`EvalGuard`]
//! instead of the evaluator. Each one confines paths to the sandbox root,
//! applies the configured policy and then delegates to the wrapped
//! collaborator unchanged.
//!
//! Violations are either raised as [`SandboxError`]s or returned as
//! [`Reported`] sentinels, depending on `throwErrors`.

pub mod capability;
pub mod config;
pub mod guard;
pub mod policy;
pub mod primitives;
mod sandbox;


pub use capability::{CapabilityTable, GuardedFs, Operation};
pub use config::{
    ConfigError, EvalPolicy, FsAction, FsActions, ModuleLoadPolicy, SandboxConfig,
    SandboxConfigBuilder, SandboxOptions,
};
pub use guard::{EvalGuard, EvalScope, Evaluator, ModuleGuard, ModuleLoader};
pub use policy::{
    GuardResult, OutcomeReporter, PathClassification, PathResolver, PolicyOutcome, Reported,
    SandboxError,
};
pub use primitives::{FileSystem, LocalFs};
pub use sandbox::Sandbox;
