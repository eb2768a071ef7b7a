//! Path classification and root confinement.
//!
//! Every requested path or module identifier goes through
//! [`PathResolver::resolve`] before anything else looks at it. File paths
//! come out absolute, lexically normalized and strictly inside the root;
//! bare identifiers come out as module references when the caller allows
//! them.

use std::path::{Component, Path, PathBuf};

use super::outcome::{PolicyOutcome, Violation};

/// How a requested path was classified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathClassification {
    /// A file path strictly inside the root.
    File(PathBuf),
    /// A bare module reference, still subject to module policy.
    Module(String),
}

impl PathClassification {
    /// Returns true for module references.
    pub fn is_module(&self) -> bool {
        matches!(self, PathClassification::Module(_))
    }

    /// The resolved file path, if this is not a module reference.
    pub fn resolved_path(&self) -> Option<&Path> {
        match self {
            PathClassification::File(path) => Some(path),
            PathClassification::Module(_) => None,
        }
    }

    /// The module name, if this is a module reference.
    pub fn module_name(&self) -> Option<&str> {
        match self {
            PathClassification::Module(name) => Some(name),
            PathClassification::File(_) => None,
        }
    }
}

/// Classifies and confines requested paths against a root directory.
#[derive(Clone, Debug)]
pub struct PathResolver {
    root_dir: PathBuf,
}

impl PathResolver {
    /// Create a resolver for an absolute, normalized root.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// The sandbox root.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Classify `requested` relative to the file at `caller`.
    ///
    /// * `.`-prefixed paths are relative to the caller's directory.
    /// * `/`-prefixed paths are relative to the root, never the real
    ///   filesystem root.
    /// * Other paths are module references when `allow_modules` is set,
    ///   and caller-relative otherwise (drive-qualified paths are taken
    ///   verbatim when they name the root's drive).
    ///
    /// File paths must land strictly inside the root.
    pub fn resolve(
        &self,
        requested: &str,
        caller: Option<&Path>,
        allow_modules: bool,
    ) -> PolicyOutcome<PathClassification> {
        self.classify(requested, caller, allow_modules).into()
    }

    /// Like [`resolve`](Self::resolve), but any violation reads as `None`.
    pub fn resolve_quiet(
        &self,
        requested: &str,
        caller: Option<&Path>,
        allow_modules: bool,
    ) -> Option<PathClassification> {
        self.classify(requested, caller, allow_modules).ok()
    }

    /// Resolve a file path, module references disallowed.
    pub(crate) fn resolve_file(
        &self,
        requested: &str,
        caller: Option<&Path>,
    ) -> Result<PathBuf, Violation> {
        match self.classify(requested, caller, false)? {
            PathClassification::File(path) => Ok(path),
            PathClassification::Module(name) => Err(Violation::denied(format!(
                "module reference not allowed here: {}",
                name
            ))),
        }
    }

    pub(crate) fn classify(
        &self,
        requested: &str,
        caller: Option<&Path>,
        allow_modules: bool,
    ) -> Result<PathClassification, Violation> {
        if requested.is_empty() {
            return Err(Violation::undefined("path not defined"));
        }

        let caller_dir = self.caller_dir(caller);

        let joined = if requested.starts_with(['/', '\\']) {
            self.root_dir
                .join(requested.trim_start_matches(['/', '\\']))
        } else if requested.starts_with('.') || !allow_modules {
            if self.shares_volume_prefix(requested) {
                PathBuf::from(requested)
            } else {
                caller_dir.join(requested)
            }
        } else {
            tracing::trace!(module = %requested, "classified as module reference");
            return Ok(PathClassification::Module(requested.to_string()));
        };

        let resolved = path_clean::clean(joined);
        self.confine(&resolved)?;

        tracing::trace!(path = %resolved.display(), "classified as file");
        Ok(PathClassification::File(resolved))
    }

    /// Ensure `path` names something strictly inside the root.
    pub(crate) fn confine(&self, path: &Path) -> Result<(), Violation> {
        if path.starts_with(&self.root_dir) && path != self.root_dir {
            Ok(())
        } else {
            Err(Violation::denied(format!(
                "root access limited to {}",
                self.root_dir.display()
            )))
        }
    }

    fn caller_dir(&self, caller: Option<&Path>) -> PathBuf {
        match caller.and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => self.root_dir.join(dir),
            _ => self.root_dir.clone(),
        }
    }

    /// Whether `requested` already carries the root's drive/volume prefix.
    fn shares_volume_prefix(&self, requested: &str) -> bool {
        match self.root_dir.components().next() {
            Some(Component::Prefix(prefix)) => {
                let prefix = prefix.as_os_str().to_string_lossy();
                !prefix.is_empty() && requested.starts_with(prefix.as_ref())
            }
            _ => false,
        }
    }
}
