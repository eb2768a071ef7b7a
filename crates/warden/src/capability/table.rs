//! Operation vocabulary and the per-operation guards built from it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::config::{FsAction, FsActions};
use crate::policy::{Access, ExtensionPolicy, Violation};

/// A filesystem operation a sandbox may expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    /// `readFile`
    ReadFile,
    /// `readFileSync`
    ReadFileSync,
    /// `readdir`
    ReadDir,
    /// `readdirSync`
    ReadDirSync,
    /// `readJson`
    ReadJson,
    /// `readJsonSync`
    ReadJsonSync,
    /// `createReadStream`
    CreateReadStream,
    /// `writeFile`
    WriteFile,
    /// `writeFileSync`
    WriteFileSync,
    /// `mkdir`
    Mkdir,
    /// `mkdirSync`
    MkdirSync,
    /// `writeJson`
    WriteJson,
    /// `writeJsonSync`
    WriteJsonSync,
    /// `createWriteStream`
    CreateWriteStream,
    /// `remove`
    Remove,
    /// `removeSync`
    RemoveSync,
    /// `emptyDir`
    EmptyDir,
    /// `emptyDirSync`
    EmptyDirSync,
    /// `appendFile`
    AppendFile,
    /// `appendFileSync`
    AppendFileSync,
    /// `copy`
    Copy,
    /// `copySync`
    CopySync,
    /// `move`
    Move,
    /// `moveSync`
    MoveSync,
    /// `rename`
    Rename,
    /// `renameSync`
    RenameSync,
    /// `watch`
    Watch,
    /// `existsSync`
    ExistsSync,
    /// `existsModuleSync`
    ExistsModuleSync,
}

/// What an operation does to its target, which decides the checks it gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    /// Reads an existing target
    Read,
    /// Creates or changes a file at the target
    Create,
    /// Creates a directory at the target
    MakeDir,
    /// Removes the target
    Remove,
    /// Empties a directory
    Clear,
    /// Source plus a created destination
    Transfer,
    /// Renames in place; both ends are checked like removals
    Rename,
    /// Existence query
    Query,
}

/// Static description of an operation.
#[derive(Clone, Copy, Debug)]
struct Descriptor {
    name: &'static str,
    requires: &'static [FsAction],
    sync: bool,
    shape: Shape,
}

const fn describe(
    name: &'static str,
    requires: &'static [FsAction],
    sync: bool,
    shape: Shape,
) -> Descriptor {
    Descriptor {
        name,
        requires,
        sync,
        shape,
    }
}

impl Operation {
    /// Every operation, in table order.
    pub const ALL: [Operation; 29] = [
        Operation::ReadFile,
        Operation::ReadFileSync,
        Operation::ReadDir,
        Operation::ReadDirSync,
        Operation::ReadJson,
        Operation::ReadJsonSync,
        Operation::CreateReadStream,
        Operation::WriteFile,
        Operation::WriteFileSync,
        Operation::Mkdir,
        Operation::MkdirSync,
        Operation::WriteJson,
        Operation::WriteJsonSync,
        Operation::CreateWriteStream,
        Operation::Remove,
        Operation::RemoveSync,
        Operation::EmptyDir,
        Operation::EmptyDirSync,
        Operation::AppendFile,
        Operation::AppendFileSync,
        Operation::Copy,
        Operation::CopySync,
        Operation::Move,
        Operation::MoveSync,
        Operation::Rename,
        Operation::RenameSync,
        Operation::Watch,
        Operation::ExistsSync,
        Operation::ExistsModuleSync,
    ];

    const fn descriptor(self) -> Descriptor {
        match self {
            Operation::ReadFile => describe("readFile", &[FsAction::Read], false, Shape::Read),
            Operation::ReadFileSync => {
                describe("readFileSync", &[FsAction::Read], true, Shape::Read)
            }
            Operation::ReadDir => {
                describe("readdir", &[FsAction::Read, FsAction::Dir], false, Shape::Read)
            }
            Operation::ReadDirSync => {
                describe("readdirSync", &[FsAction::Read, FsAction::Dir], true, Shape::Read)
            }
            Operation::ReadJson => {
                describe("readJson", &[FsAction::Read, FsAction::Json], false, Shape::Read)
            }
            Operation::ReadJsonSync => {
                describe("readJsonSync", &[FsAction::Read, FsAction::Json], true, Shape::Read)
            }
            Operation::CreateReadStream => {
                describe("createReadStream", &[FsAction::Read, FsAction::Stream], false, Shape::Read)
            }
            Operation::WriteFile => describe("writeFile", &[FsAction::Write], false, Shape::Create),
            Operation::WriteFileSync => {
                describe("writeFileSync", &[FsAction::Write], true, Shape::Create)
            }
            Operation::Mkdir => {
                describe("mkdir", &[FsAction::Write, FsAction::Dir], false, Shape::MakeDir)
            }
            Operation::MkdirSync => {
                describe("mkdirSync", &[FsAction::Write, FsAction::Dir], true, Shape::MakeDir)
            }
            Operation::WriteJson => {
                describe("writeJson", &[FsAction::Write, FsAction::Json], false, Shape::Create)
            }
            Operation::WriteJsonSync => {
                describe("writeJsonSync", &[FsAction::Write, FsAction::Json], true, Shape::Create)
            }
            Operation::CreateWriteStream => {
                describe("createWriteStream", &[FsAction::Write, FsAction::Stream], false, Shape::Create)
            }
            Operation::Remove => describe("remove", &[FsAction::Delete], false, Shape::Remove),
            Operation::RemoveSync => {
                describe("removeSync", &[FsAction::Delete], true, Shape::Remove)
            }
            Operation::EmptyDir => {
                describe("emptyDir", &[FsAction::Delete, FsAction::Dir], false, Shape::Clear)
            }
            Operation::EmptyDirSync => {
                describe("emptyDirSync", &[FsAction::Delete, FsAction::Dir], true, Shape::Clear)
            }
            Operation::AppendFile => {
                describe("appendFile", &[FsAction::Append], false, Shape::Create)
            }
            Operation::AppendFileSync => {
                describe("appendFileSync", &[FsAction::Append], true, Shape::Create)
            }
            Operation::Copy => describe("copy", &[FsAction::Copy], false, Shape::Transfer),
            Operation::CopySync => describe("copySync", &[FsAction::Copy], true, Shape::Transfer),
            Operation::Move => describe("move", &[FsAction::Move], false, Shape::Transfer),
            Operation::MoveSync => describe("moveSync", &[FsAction::Move], true, Shape::Transfer),
            Operation::Rename => describe("rename", &[FsAction::Rename], false, Shape::Rename),
            Operation::RenameSync => {
                describe("renameSync", &[FsAction::Rename], true, Shape::Rename)
            }
            Operation::Watch => describe("watch", &[FsAction::Watch], false, Shape::Read),
            // existence queries only come in one form, so `sync` is not required
            Operation::ExistsSync => {
                describe("existsSync", &[FsAction::Exists], false, Shape::Query)
            }
            Operation::ExistsModuleSync => {
                describe("existsModuleSync", &[FsAction::Exists], false, Shape::Query)
            }
        }
    }

    /// The exposed name, e.g. `readFileSync`.
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Look an operation up by its exposed name.
    pub fn from_name(name: &str) -> Option<Self> {
        Operation::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Actions that must all be granted for this operation to be exposed.
    pub fn requires(self) -> &'static [FsAction] {
        self.descriptor().requires
    }

    /// Whether this is a synchronous variant (needs `sync` as well).
    pub fn is_sync(self) -> bool {
        self.descriptor().sync
    }

    /// Whether the granted actions expose this operation.
    pub fn is_exposed(self, actions: FsActions) -> bool {
        let descriptor = self.descriptor();
        if !actions.contains_all(descriptor.requires) {
            return false;
        }
        if descriptor.sync && !actions.contains(FsAction::Sync) {
            return false;
        }
        match descriptor.shape {
            // a modify-only grant may not create directories
            Shape::MakeDir => {
                actions.contains(FsAction::Add) || !actions.contains(FsAction::Modify)
            }
            _ => true,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Existence-based gating of writes when `add` or `modify` is granted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreationRule {
    add: bool,
    modify: bool,
}

impl CreationRule {
    /// The rule for the granted actions, or `None` when neither `add` nor
    /// `modify` is granted and writes are unrestricted.
    pub fn from_actions(actions: FsActions) -> Option<Self> {
        let add = actions.contains(FsAction::Add);
        let modify = actions.contains(FsAction::Modify);
        (add || modify).then_some(Self { add, modify })
    }

    /// Check a target given whether it already exists.
    pub fn check(self, exists: bool) -> Result<(), Violation> {
        if exists && !self.modify {
            Err(Violation::denied("cannot modify existing files"))
        } else if !exists && !self.add {
            Err(Violation::denied("cannot add new files"))
        } else {
            Ok(())
        }
    }
}

/// Returns true if the final segment of `path` has no extension.
pub fn is_directory_like(path: &Path) -> bool {
    !path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Checks composed for one exposed operation.
#[derive(Clone, Debug)]
pub struct Guard {
    operation: Operation,
    access: Access,
    extension: Option<ExtensionPolicy>,
    creation: Option<CreationRule>,
    ensure_parent: bool,
    deny_directories: bool,
}

impl Guard {
    fn compose(operation: Operation, actions: FsActions) -> Self {
        let shape = operation.descriptor().shape;
        let dir = actions.contains(FsAction::Dir);
        let creates = matches!(shape, Shape::Create | Shape::Transfer | Shape::Rename);

        let access = match shape {
            Shape::Read | Shape::Query => Access::Read,
            _ => Access::Write,
        };
        let sensitive_granted =
            actions.contains(FsAction::Js) && actions.contains(FsAction::Json);
        let extension = match shape {
            Shape::Remove | Shape::Clear => None,
            _ if sensitive_granted => None,
            _ => Some(ExtensionPolicy::new(actions)),
        };

        Self {
            operation,
            access,
            extension,
            creation: if creates {
                CreationRule::from_actions(actions)
            } else {
                None
            },
            ensure_parent: match shape {
                Shape::MakeDir => true,
                _ => creates && dir,
            },
            deny_directories: !dir && matches!(shape, Shape::Remove | Shape::Rename | Shape::Query),
        }
    }

    /// The operation this guard protects.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Whether the operation reads or writes its target.
    pub fn access(&self) -> Access {
        self.access
    }

    /// The creation rule, if writes are existence-gated.
    pub fn creation(&self) -> Option<CreationRule> {
        self.creation
    }

    /// Whether missing parent directories are created first.
    pub fn ensures_parent(&self) -> bool {
        self.ensure_parent
    }

    /// Whether directory-like targets are refused.
    pub fn denies_directories(&self) -> bool {
        self.deny_directories
    }

    /// Check one resolved endpoint against the path-only rules.
    pub fn check_endpoint(&self, path: &Path) -> Result<(), Violation> {
        if let Some(extension) = &self.extension {
            extension.evaluate(path, self.access)?;
        }
        if self.deny_directories && is_directory_like(path) {
            let reason = match self.operation.descriptor().shape {
                Shape::Rename => "cannot rename directories",
                Shape::Query => "cannot query directories",
                _ => "cannot remove directories",
            };
            return Err(Violation::denied(reason));
        }
        Ok(())
    }
}

/// The operations a sandbox exposes, each with its guard.
///
/// Built once from the granted actions. Operations that are not granted are
/// absent, not present as refusing stubs.
#[derive(Clone, Debug, Default)]
pub struct CapabilityTable {
    actions: FsActions,
    entries: BTreeMap<Operation, Guard>,
}

impl CapabilityTable {
    /// Build the table for a set of granted actions.
    pub fn build(actions: FsActions) -> Self {
        let entries = Operation::ALL
            .into_iter()
            .filter(|op| op.is_exposed(actions))
            .map(|op| (op, Guard::compose(op, actions)))
            .collect();
        Self { actions, entries }
    }

    /// The actions this table was built from.
    pub fn actions(&self) -> FsActions {
        self.actions
    }

    /// The guard for an operation, if exposed.
    pub fn get(&self, operation: Operation) -> Option<&Guard> {
        self.entries.get(&operation)
    }

    /// Whether an operation is exposed.
    pub fn contains(&self, operation: Operation) -> bool {
        self.entries.contains_key(&operation)
    }

    /// Exposed operations in table order.
    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        self.entries.keys().copied()
    }

    /// Exposed operation names in table order.
    pub fn names(&self) -> Vec<&'static str> {
        self.operations().map(Operation::name).collect()
    }

    /// Number of exposed operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is exposed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::FsAction::{Delete, Dir, Exists, Read, Write};

    fn actions(list: &[FsAction]) -> FsActions {
        list.iter().copied().collect()
    }

    #[test]
    fn test_empty_actions_empty_table() {
        let table = CapabilityTable::build(FsActions::none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_full_table() {
        let table = CapabilityTable::build(FsActions::all());
        assert_eq!(table.len(), Operation::ALL.len());
    }

    #[test]
    fn test_sync_variants_need_sync() {
        let without = CapabilityTable::build(actions(&[Read, Write, Delete]));
        assert!(without.operations().all(|op| !op.is_sync()));
        assert!(without.contains(Operation::ReadFile));

        let with = CapabilityTable::build(actions(&[Read, Write, Delete, FsAction::Sync]));
        let added: Vec<_> = with
            .operations()
            .filter(|op| !without.contains(*op))
            .collect();
        assert_eq!(
            added,
            [
                Operation::ReadFileSync,
                Operation::WriteFileSync,
                Operation::RemoveSync
            ]
        );
    }

    #[test]
    fn test_sync_alone_exposes_nothing() {
        let table = CapabilityTable::build(actions(&[FsAction::Sync]));
        assert!(table.is_empty());
    }

    #[test]
    fn test_exists_does_not_need_sync() {
        let table = CapabilityTable::build(actions(&[Exists]));
        assert_eq!(table.names(), ["existsSync", "existsModuleSync"]);
    }

    #[test]
    fn test_mkdir_needs_add_when_modify_granted() {
        let modify_only = CapabilityTable::build(actions(&[Write, Dir, FsAction::Modify]));
        assert!(!modify_only.contains(Operation::Mkdir));

        let with_add =
            CapabilityTable::build(actions(&[Write, Dir, FsAction::Modify, FsAction::Add]));
        assert!(with_add.contains(Operation::Mkdir));

        let plain = CapabilityTable::build(actions(&[Write, Dir]));
        assert!(plain.contains(Operation::Mkdir));
    }

    #[test]
    fn test_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
        }
        assert_eq!(Operation::from_name("chmod"), None);
    }

    #[test]
    fn test_creation_rule() {
        assert!(CreationRule::from_actions(actions(&[Write])).is_none());

        let add_only = CreationRule::from_actions(actions(&[FsAction::Add])).unwrap();
        assert!(add_only.check(false).is_ok());
        assert_eq!(
            add_only.check(true),
            Err(Violation::denied("cannot modify existing files"))
        );

        let modify_only = CreationRule::from_actions(actions(&[FsAction::Modify])).unwrap();
        assert!(modify_only.check(true).is_ok());
        assert_eq!(
            modify_only.check(false),
            Err(Violation::denied("cannot add new files"))
        );
    }

    #[test]
    fn test_directory_like() {
        assert!(is_directory_like(Path::new("/app/data")));
        assert!(is_directory_like(Path::new("/app/.hidden")));
        assert!(!is_directory_like(Path::new("/app/data.txt")));
        assert!(!is_directory_like(Path::new("/app/archive.tar.gz")));
        assert!(!is_directory_like(Path::new("/app/main.rs")));
    }

    #[test]
    fn test_guard_composition() {
        let table = CapabilityTable::build(actions(&[Write, Delete, FsAction::Add, Dir]));

        let write = table.get(Operation::WriteFile).unwrap();
        assert_eq!(write.access(), Access::Write);
        assert!(write.creation().is_some());
        assert!(write.ensures_parent());
        assert!(write.check_endpoint(Path::new("/app/a.js")).is_err());

        let remove = table.get(Operation::Remove).unwrap();
        assert!(!remove.denies_directories());
        assert!(remove.check_endpoint(Path::new("/app/dir")).is_ok());
    }

    #[test]
    fn test_remove_denies_directories_without_dir() {
        let table = CapabilityTable::build(actions(&[Delete]));
        let remove = table.get(Operation::Remove).unwrap();
        assert_eq!(
            remove.check_endpoint(Path::new("/app/dir")),
            Err(Violation::denied("cannot remove directories"))
        );
        assert!(remove.check_endpoint(Path::new("/app/file.txt")).is_ok());
    }
}
