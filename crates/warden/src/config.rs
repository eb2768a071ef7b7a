//! Sandbox configuration.
//!
//! A [`SandboxConfig`] is built once, either from the declarative
//! [`SandboxOptions`] wire shape (usually JSON) or through
//! [`SandboxConfigBuilder`], and is immutable for the lifetime of the
//! sandbox derived from it.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Module identifiers under which the raw filesystem primitives are
/// registered with the host loader. Always denied.
pub const RAW_PRIMITIVE_MODULES: &[&str] = &["fs", "fs-extra"];

/// Errors raised while building a [`SandboxConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path of the configuration file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// The configuration is not valid JSON or has the wrong shape
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    /// An `fs` entry is not part of the action vocabulary
    #[error("unknown fs action: {0}")]
    UnknownAction(String),
    /// The root directory could not be made absolute
    #[error("cannot resolve root directory: {0}")]
    Root(#[source] std::io::Error),
    /// No root was given and the entry executable has no parent directory
    #[error("no root directory given and the entry executable has no parent")]
    NoEntryDirectory,
}

/// Whether dynamic module loading is permitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleLoadPolicy {
    /// Every load request is denied.
    Disabled,
    /// Module references and file paths inside the root may be loaded.
    AnyModule,
    /// Only bare module references may be loaded.
    #[default]
    ModulesOnly,
}

/// Whether dynamic code execution is permitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvalPolicy {
    /// Every evaluation is denied, for sandboxed code and host alike.
    #[default]
    Disabled,
    /// Evaluation is delegated unchanged.
    Enabled,
    /// Sandboxed code is denied; the host keeps its own evaluation path.
    EnabledLocalOnly,
}

/// A single granted filesystem action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsAction {
    /// Read file contents
    Read,
    /// Write file contents
    Write,
    /// Open read/write streams
    Stream,
    /// Create files that do not exist yet
    Add,
    /// Change files that already exist
    Modify,
    /// Append to files
    Append,
    /// Remove files
    Delete,
    /// Rename files
    Rename,
    /// Watch files for changes
    Watch,
    /// Copy files
    Copy,
    /// Move files
    Move,
    /// Query existence
    Exists,
    /// Expose synchronous variants
    Sync,
    /// Operate on directories
    Dir,
    /// Touch script sources
    Js,
    /// Touch structured config files
    Json,
}

impl FsAction {
    /// The full action vocabulary, in declaration order.
    pub const ALL: [FsAction; 16] = [
        FsAction::Read,
        FsAction::Write,
        FsAction::Stream,
        FsAction::Add,
        FsAction::Modify,
        FsAction::Append,
        FsAction::Delete,
        FsAction::Rename,
        FsAction::Watch,
        FsAction::Copy,
        FsAction::Move,
        FsAction::Exists,
        FsAction::Sync,
        FsAction::Dir,
        FsAction::Js,
        FsAction::Json,
    ];

    /// The wire name of this action.
    pub fn as_str(self) -> &'static str {
        match self {
            FsAction::Read => "read",
            FsAction::Write => "write",
            FsAction::Stream => "stream",
            FsAction::Add => "add",
            FsAction::Modify => "modify",
            FsAction::Append => "append",
            FsAction::Delete => "delete",
            FsAction::Rename => "rename",
            FsAction::Watch => "watch",
            FsAction::Copy => "copy",
            FsAction::Move => "move",
            FsAction::Exists => "exists",
            FsAction::Sync => "sync",
            FsAction::Dir => "dir",
            FsAction::Js => "js",
            FsAction::Json => "json",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for FsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FsAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownAction(s.to_string()))
    }
}

/// A set of granted [`FsAction`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FsActions(u32);

impl FsActions {
    /// No actions granted.
    pub const fn none() -> Self {
        Self(0)
    }

    /// Every action granted.
    pub fn all() -> Self {
        FsAction::ALL.into_iter().collect()
    }

    /// Returns true if `action` is granted.
    pub fn contains(self, action: FsAction) -> bool {
        self.0 & action.bit() != 0
    }

    /// Returns true if every action in `actions` is granted.
    pub fn contains_all(self, actions: &[FsAction]) -> bool {
        actions.iter().all(|a| self.contains(*a))
    }

    /// Grant an action.
    pub fn insert(&mut self, action: FsAction) {
        self.0 |= action.bit();
    }

    /// Returns a copy with `action` granted.
    pub fn with(mut self, action: FsAction) -> Self {
        self.insert(action);
        self
    }

    /// Returns true if nothing is granted.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over granted actions in declaration order.
    pub fn iter(self) -> impl Iterator<Item = FsAction> {
        FsAction::ALL.into_iter().filter(move |a| self.contains(*a))
    }
}

impl fmt::Debug for FsActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<FsAction> for FsActions {
    fn from_iter<I: IntoIterator<Item = FsAction>>(iter: I) -> Self {
        let mut actions = FsActions::none();
        for action in iter {
            actions.insert(action);
        }
        actions
    }
}

/// One string or a list of strings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OneOrMany {
    /// A single entry
    One(String),
    /// Several entries
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// `require` option: `true`, `false` or `"modules"`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequireOption {
    /// `true` allows any module or file, `false` disables loading
    Flag(bool),
    /// Only `"modules"` is accepted
    Mode(RequireMode),
}

/// String form of the `require` option.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequireMode {
    /// Bare module references only
    Modules,
}

/// `modules` option: flag, allow list, or allow/deny object.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ModulesOption {
    /// `true` allows any module, `false` allows none
    Flag(bool),
    /// Allow only these modules
    Allow(OneOrMany),
    /// Explicit allow and deny lists
    Rules {
        /// Allow only these modules
        #[serde(default)]
        allow: Option<OneOrMany>,
        /// Deny these modules in addition to the raw primitives
        #[serde(default)]
        deny: Option<OneOrMany>,
    },
}

/// `fs` option: flag or list of action names.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FsOption {
    /// `true` grants everything, `false` nothing
    Flag(bool),
    /// Grant these actions
    Actions(Vec<String>),
}

/// `eval` option: `true`, `false` or `"local"`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EvalOption {
    /// `true` enables, `false` disables
    Flag(bool),
    /// Only `"local"` is accepted
    Mode(EvalMode),
}

/// String form of the `eval` option.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    /// Host-only evaluation
    Local,
}

/// Declarative sandbox options as accepted on the wire.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxOptions {
    /// Raise violations as errors (default) or return sentinels
    #[serde(default)]
    pub throw_errors: Option<bool>,
    /// Sandbox root directory
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Module loading policy
    #[serde(default)]
    pub require: Option<RequireOption>,
    /// Module allow/deny sets
    #[serde(default)]
    pub modules: Option<ModulesOption>,
    /// Granted filesystem actions
    #[serde(default)]
    pub fs: Option<FsOption>,
    /// Dynamic evaluation policy
    #[serde(default)]
    pub eval: Option<EvalOption>,
}

/// Immutable, normalized sandbox configuration.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    throw_on_violation: bool,
    root_dir: PathBuf,
    module_load_policy: ModuleLoadPolicy,
    module_allow_set: Option<BTreeSet<String>>,
    module_deny_set: Vec<String>,
    fs_actions: FsActions,
    eval_policy: EvalPolicy,
}

impl SandboxConfig {
    /// Start building a configuration programmatically.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Normalize declarative options into a configuration.
    pub fn from_options(options: SandboxOptions) -> Result<Self, ConfigError> {
        let mut builder = SandboxConfig::builder();

        if let Some(throw) = options.throw_errors {
            builder = builder.throw_on_violation(throw);
        }
        if let Some(root) = options.root {
            builder = builder.root_dir(root);
        }

        builder = builder.module_load_policy(match options.require {
            None | Some(RequireOption::Mode(RequireMode::Modules)) => ModuleLoadPolicy::ModulesOnly,
            Some(RequireOption::Flag(true)) => ModuleLoadPolicy::AnyModule,
            Some(RequireOption::Flag(false)) => ModuleLoadPolicy::Disabled,
        });

        match options.modules {
            None | Some(ModulesOption::Flag(true)) => {}
            Some(ModulesOption::Flag(false)) => builder = builder.allow_modules(Vec::<String>::new()),
            Some(ModulesOption::Allow(allow)) => builder = builder.allow_modules(allow.into_vec()),
            Some(ModulesOption::Rules { allow, deny }) => {
                if let Some(allow) = allow {
                    builder = builder.allow_modules(allow.into_vec());
                }
                for name in deny.map(OneOrMany::into_vec).unwrap_or_default() {
                    builder = builder.deny_module(name);
                }
            }
        }

        builder = builder.fs_actions(match options.fs {
            None | Some(FsOption::Flag(false)) => FsActions::none(),
            Some(FsOption::Flag(true)) => FsActions::all(),
            Some(FsOption::Actions(names)) => names
                .iter()
                .map(|n| n.parse::<FsAction>())
                .collect::<Result<FsActions, _>>()?,
        });

        builder = builder.eval_policy(match options.eval {
            None | Some(EvalOption::Flag(false)) => EvalPolicy::Disabled,
            Some(EvalOption::Flag(true)) => EvalPolicy::Enabled,
            Some(EvalOption::Mode(EvalMode::Local)) => EvalPolicy::EnabledLocalOnly,
        });

        builder.build()
    }

    /// Parse and normalize a JSON configuration string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let options: SandboxOptions = serde_json::from_str(json)?;
        Self::from_options(options)
    }

    /// Read, parse and normalize a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Whether violations are raised as errors.
    pub fn throw_on_violation(&self) -> bool {
        self.throw_on_violation
    }

    /// Absolute, normalized sandbox root.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Module loading policy.
    pub fn module_load_policy(&self) -> ModuleLoadPolicy {
        self.module_load_policy
    }

    /// Modules that may be loaded, if restricted.
    pub fn module_allow_set(&self) -> Option<&BTreeSet<String>> {
        self.module_allow_set.as_ref()
    }

    /// Modules that are always denied. Starts with [`RAW_PRIMITIVE_MODULES`].
    pub fn module_deny_set(&self) -> &[String] {
        &self.module_deny_set
    }

    /// Granted filesystem actions.
    pub fn fs_actions(&self) -> FsActions {
        self.fs_actions
    }

    /// Dynamic evaluation policy.
    pub fn eval_policy(&self) -> EvalPolicy {
        self.eval_policy
    }
}

/// Builder for [`SandboxConfig`].
///
/// # Example
///
/// ```rust,ignore
/// let config = SandboxConfig::builder()
///     .root_dir("/srv/app")
///     .fs_action(FsAction::Read)
///     .allow_module("lodash")
///     .build()?;
/// ```
#[derive(Clone, Debug)]
pub struct SandboxConfigBuilder {
    throw_on_violation: bool,
    root_dir: Option<PathBuf>,
    module_load_policy: ModuleLoadPolicy,
    module_allow_set: Option<BTreeSet<String>>,
    extra_denied: Vec<String>,
    fs_actions: FsActions,
    eval_policy: EvalPolicy,
}

impl Default for SandboxConfigBuilder {
    fn default() -> Self {
        Self {
            throw_on_violation: true,
            root_dir: None,
            module_load_policy: ModuleLoadPolicy::default(),
            module_allow_set: None,
            extra_denied: Vec::new(),
            fs_actions: FsActions::none(),
            eval_policy: EvalPolicy::default(),
        }
    }
}

impl SandboxConfigBuilder {
    /// Raise violations as errors (`true`) or return sentinels (`false`).
    pub fn throw_on_violation(mut self, throw: bool) -> Self {
        self.throw_on_violation = throw;
        self
    }

    /// Set the sandbox root. Relative roots are resolved against the
    /// working directory at build time.
    pub fn root_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root.into());
        self
    }

    /// Set the module loading policy.
    pub fn module_load_policy(mut self, policy: ModuleLoadPolicy) -> Self {
        self.module_load_policy = policy;
        self
    }

    /// Add a module to the allow set, creating the set if needed.
    pub fn allow_module(mut self, name: impl Into<String>) -> Self {
        self.module_allow_set
            .get_or_insert_with(BTreeSet::new)
            .insert(name.into());
        self
    }

    /// Restrict loading to exactly these modules. An empty iterator allows none.
    pub fn allow_modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.module_allow_set = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Deny a module in addition to the raw primitives.
    pub fn deny_module(mut self, name: impl Into<String>) -> Self {
        self.extra_denied.push(name.into());
        self
    }

    /// Replace the granted filesystem actions.
    pub fn fs_actions(mut self, actions: FsActions) -> Self {
        self.fs_actions = actions;
        self
    }

    /// Grant one filesystem action.
    pub fn fs_action(mut self, action: FsAction) -> Self {
        self.fs_actions.insert(action);
        self
    }

    /// Set the dynamic evaluation policy.
    pub fn eval_policy(mut self, policy: EvalPolicy) -> Self {
        self.eval_policy = policy;
        self
    }

    /// Resolve the root and freeze the configuration.
    pub fn build(self) -> Result<SandboxConfig, ConfigError> {
        let root_dir = resolve_root(self.root_dir.as_deref())?;

        let mut module_deny_set: Vec<String> =
            RAW_PRIMITIVE_MODULES.iter().map(|s| (*s).to_string()).collect();
        for name in self.extra_denied {
            if !module_deny_set.contains(&name) {
                module_deny_set.push(name);
            }
        }

        Ok(SandboxConfig {
            throw_on_violation: self.throw_on_violation,
            root_dir,
            module_load_policy: self.module_load_policy,
            module_allow_set: self.module_allow_set,
            module_deny_set,
            fs_actions: self.fs_actions,
            eval_policy: self.eval_policy,
        })
    }
}

fn resolve_root(root: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let absolute = match root {
        Some(root) if root.is_absolute() => root.to_path_buf(),
        Some(root) => std::env::current_dir().map_err(ConfigError::Root)?.join(root),
        None => {
            let exe = std::env::current_exe().map_err(ConfigError::Root)?;
            exe.parent()
                .map(Path::to_path_buf)
                .ok_or(ConfigError::NoEntryDirectory)?
        }
    };
    Ok(path_clean::clean(absolute))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::from_json(r#"{"root": "/app"}"#).unwrap();

        assert!(config.throw_on_violation());
        assert_eq!(config.root_dir(), Path::new("/app"));
        assert_eq!(config.module_load_policy(), ModuleLoadPolicy::ModulesOnly);
        assert!(config.module_allow_set().is_none());
        assert_eq!(config.module_deny_set(), ["fs", "fs-extra"]);
        assert!(config.fs_actions().is_empty());
        assert_eq!(config.eval_policy(), EvalPolicy::Disabled);
    }

    #[test]
    fn test_fs_true_expands_to_everything() {
        let config = SandboxConfig::from_json(r#"{"root": "/app", "fs": true}"#).unwrap();
        assert_eq!(config.fs_actions(), FsActions::all());
        assert_eq!(config.fs_actions().iter().count(), 16);
    }

    #[test]
    fn test_fs_action_list() {
        let config =
            SandboxConfig::from_json(r#"{"root": "/app", "fs": ["read", "sync", "json"]}"#)
                .unwrap();
        let actions = config.fs_actions();

        assert!(actions.contains(FsAction::Read));
        assert!(actions.contains(FsAction::Sync));
        assert!(actions.contains(FsAction::Json));
        assert!(!actions.contains(FsAction::Write));
        assert!(!actions.contains(FsAction::Js));
    }

    #[test]
    fn test_unknown_fs_action_rejected() {
        let err = SandboxConfig::from_json(r#"{"root": "/app", "fs": ["read", "chmod"]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAction(ref a) if a == "chmod"));
    }

    #[test]
    fn test_require_modes() {
        let disabled = SandboxConfig::from_json(r#"{"root": "/app", "require": false}"#).unwrap();
        let any = SandboxConfig::from_json(r#"{"root": "/app", "require": true}"#).unwrap();
        let modules =
            SandboxConfig::from_json(r#"{"root": "/app", "require": "modules"}"#).unwrap();

        assert_eq!(disabled.module_load_policy(), ModuleLoadPolicy::Disabled);
        assert_eq!(any.module_load_policy(), ModuleLoadPolicy::AnyModule);
        assert_eq!(modules.module_load_policy(), ModuleLoadPolicy::ModulesOnly);
    }

    #[test]
    fn test_modules_false_is_empty_allow_set() {
        let config = SandboxConfig::from_json(r#"{"root": "/app", "modules": false}"#).unwrap();
        assert_eq!(config.module_allow_set().map(BTreeSet::len), Some(0));
    }

    #[test]
    fn test_modules_allow_and_deny() {
        let config = SandboxConfig::from_json(
            r#"{"root": "/app", "modules": {"allow": ["lodash", "fs"], "deny": "left-pad"}}"#,
        )
        .unwrap();

        let allow = config.module_allow_set().unwrap();
        assert!(allow.contains("lodash"));
        assert!(allow.contains("fs"));
        assert_eq!(config.module_deny_set(), ["fs", "fs-extra", "left-pad"]);
    }

    #[test]
    fn test_modules_single_string_allow() {
        let config = SandboxConfig::from_json(r#"{"root": "/app", "modules": "lodash"}"#).unwrap();
        let allow = config.module_allow_set().unwrap();
        assert_eq!(allow.iter().collect::<Vec<_>>(), ["lodash"]);
    }

    #[test]
    fn test_eval_modes() {
        let local = SandboxConfig::from_json(r#"{"root": "/app", "eval": "local"}"#).unwrap();
        let on = SandboxConfig::from_json(r#"{"root": "/app", "eval": true}"#).unwrap();

        assert_eq!(local.eval_policy(), EvalPolicy::EnabledLocalOnly);
        assert_eq!(on.eval_policy(), EvalPolicy::Enabled);
    }

    #[test]
    fn test_root_is_normalized() {
        let config = SandboxConfig::builder()
            .root_dir("/app/src/../data/./")
            .build()
            .unwrap();
        assert_eq!(config.root_dir(), Path::new("/app/data"));
    }

    #[test]
    fn test_relative_root_becomes_absolute() {
        let config = SandboxConfig::builder().root_dir("sandbox").build().unwrap();
        assert!(config.root_dir().is_absolute());
        assert!(config.root_dir().ends_with("sandbox"));
    }

    #[test]
    fn test_default_root_is_entry_directory() {
        let config = SandboxConfig::builder().build().unwrap();
        let exe = std::env::current_exe().unwrap();
        assert_eq!(config.root_dir(), path_clean::clean(exe.parent().unwrap()));
    }

    #[test]
    fn test_deny_set_cannot_drop_raw_primitives() {
        let config = SandboxConfig::builder()
            .root_dir("/app")
            .allow_modules(["fs"])
            .deny_module("fs")
            .build()
            .unwrap();
        assert_eq!(config.module_deny_set(), ["fs", "fs-extra"]);
    }

    #[test]
    fn test_fs_actions_set_operations() {
        let actions = FsActions::none().with(FsAction::Read).with(FsAction::Dir);
        assert!(actions.contains_all(&[FsAction::Read, FsAction::Dir]));
        assert!(!actions.contains_all(&[FsAction::Read, FsAction::Write]));
        assert_eq!(format!("{:?}", actions), "{Read, Dir}");
    }
}
