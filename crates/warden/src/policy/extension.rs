//! Gating of script-source and structured-config files.

use std::path::Path;

use super::outcome::{PolicyOutcome, Violation};
use crate::config::{FsAction, FsActions};

/// Extensions treated as script sources.
pub const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

/// Extensions treated as structured configuration.
pub const CONFIG_EXTENSIONS: &[&str] = &["json"];

/// Whether an operation reads or changes its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Reading contents or metadata
    Read,
    /// Creating, changing or removing
    Write,
}

impl Access {
    fn verb(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "modify",
        }
    }
}

/// Sensitive file category of a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Category {
    Script,
    Config,
}

impl Category {
    fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if SCRIPT_EXTENSIONS.contains(&ext.as_str()) {
            Some(Category::Script)
        } else if CONFIG_EXTENSIONS.contains(&ext.as_str()) {
            Some(Category::Config)
        } else {
            None
        }
    }
}

/// Denies script and config files unless `js`/`json` are granted.
#[derive(Clone, Copy, Debug)]
pub struct ExtensionPolicy {
    allow_js: bool,
    allow_json: bool,
}

impl ExtensionPolicy {
    /// Build from the granted actions.
    pub fn new(actions: FsActions) -> Self {
        Self {
            allow_js: actions.contains(FsAction::Js),
            allow_json: actions.contains(FsAction::Json),
        }
    }

    /// Check a resolved path for the given kind of access.
    pub fn check(&self, path: &Path, access: Access) -> PolicyOutcome<()> {
        self.evaluate(path, access).into()
    }

    pub(crate) fn evaluate(&self, path: &Path, access: Access) -> Result<(), Violation> {
        match Category::of(path) {
            Some(Category::Script) if !self.allow_js => Err(Violation::denied(format!(
                "cannot {} js files",
                access.verb()
            ))),
            Some(Category::Config) if !self.allow_json => Err(Violation::denied(format!(
                "cannot {} json files",
                access.verb()
            ))),
            _ => Ok(()),
        }
    }
}
