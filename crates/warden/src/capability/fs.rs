//! Policy-enforcing filesystem capability.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::table::{CapabilityTable, Guard, Operation};
use crate::policy::{
    Access, ExtensionPolicy, GuardResult, PathClassification, PolicyOutcome, Reported,
    SandboxError, Violation,
};
use crate::primitives::{CopyOptions, DirEntry, FileSystem, ReadStream, Watcher, WriteStream};
use crate::sandbox::SandboxState;

/// Why a guarded call stopped before producing a value.
#[derive(Debug)]
enum Halt {
    Violation(Violation),
    Error(SandboxError),
}

impl From<Violation> for Halt {
    fn from(violation: Violation) -> Self {
        Halt::Violation(violation)
    }
}

impl From<SandboxError> for Halt {
    fn from(err: SandboxError) -> Self {
        Halt::Error(err)
    }
}

impl From<io::Error> for Halt {
    fn from(err: io::Error) -> Self {
        Halt::Error(SandboxError::Io(err))
    }
}

/// Guarded filesystem handed to sandboxed code.
///
/// Exposes exactly the operations in the sandbox's [`CapabilityTable`].
/// Every call resolves its path arguments against the caller context,
/// runs the operation's guard, and only then delegates to the wrapped
/// [`FileSystem`]. Calling an operation that is not in the table returns
/// [`SandboxError::Unavailable`] without touching the filesystem.
///
/// ## Example
///
/// ```rust,ignore
/// let sandbox = Sandbox::new(config);
/// let fs = sandbox.filesystem(Arc::new(LocalFs::new())).for_caller("/srv/app/src/index.js");
///
/// let bytes = fs.read_file("./data.txt").await?.into_option();
/// ```
#[derive(Clone)]
pub struct GuardedFs {
    fs: Arc<dyn FileSystem>,
    state: Arc<SandboxState>,
    caller: Option<PathBuf>,
}

impl fmt::Debug for GuardedFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedFs")
            .field("caller", &self.caller)
            .field("operations", &self.state.table.names())
            .finish_non_exhaustive()
    }
}

impl GuardedFs {
    pub(crate) fn new(fs: Arc<dyn FileSystem>, state: Arc<SandboxState>) -> Self {
        Self {
            fs,
            state,
            caller: None,
        }
    }

    /// A copy of this capability whose relative paths resolve against the
    /// directory of `caller`.
    pub fn for_caller(&self, caller: impl Into<PathBuf>) -> Self {
        Self {
            fs: Arc::clone(&self.fs),
            state: Arc::clone(&self.state),
            caller: Some(caller.into()),
        }
    }

    /// The caller context, if any.
    pub fn caller(&self) -> Option<&Path> {
        self.caller.as_deref()
    }

    /// The operations this capability exposes.
    pub fn capabilities(&self) -> &CapabilityTable {
        &self.state.table
    }

    /// Whether an operation is exposed.
    pub fn has(&self, operation: Operation) -> bool {
        self.state.table.contains(operation)
    }

    fn guard(&self, operation: Operation) -> Result<&Guard, Halt> {
        self.state
            .table
            .get(operation)
            .ok_or(Halt::Error(SandboxError::Unavailable(operation.name())))
    }

    /// Resolve and check one endpoint.
    fn admit(&self, guard: &Guard, requested: &str) -> Result<PathBuf, Halt> {
        self.state
            .resolver
            .resolve_file(requested, self.caller.as_deref())
            .and_then(|path| guard.check_endpoint(&path).map(|()| path))
            .map_err(|violation| Halt::Violation(violation.at(requested)))
    }

    /// Run the existence-dependent checks for a target about to be written.
    async fn prepare(&self, guard: &Guard, target: &Path) -> Result<(), Halt> {
        if let Some(rule) = guard.creation() {
            rule.check(self.fs.exists(target).await)
                .map_err(|violation| violation.at(target.display().to_string()))?;
        }
        if guard.ensures_parent()
            && let Some(parent) = target.parent()
        {
            self.fs.create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn prepare_sync(&self, guard: &Guard, target: &Path) -> Result<(), Halt> {
        if let Some(rule) = guard.creation() {
            rule.check(self.fs.exists_sync(target))
                .map_err(|violation| violation.at(target.display().to_string()))?;
        }
        if guard.ensures_parent()
            && let Some(parent) = target.parent()
        {
            self.fs.create_dir_all_sync(parent)?;
        }
        Ok(())
    }

    fn copy_options(&self, overwrite: bool) -> CopyOptions {
        CopyOptions {
            overwrite,
            error_on_exist: self.state.reporter.is_strict(),
        }
    }

    fn finish<T>(&self, operation: Operation, result: Result<T, Halt>) -> GuardResult<T> {
        match result {
            Ok(value) => Ok(Reported::Value(value)),
            Err(Halt::Violation(violation)) => {
                self.state.reporter.violation(operation.name(), violation)
            }
            Err(Halt::Error(err)) => Err(err),
        }
    }

    /// `readFile`
    pub async fn read_file(&self, path: &str) -> GuardResult<Vec<u8>> {
        let op = Operation::ReadFile;
        let result = async {
            let target = self.admit(self.guard(op)?, path)?;
            Ok::<_, Halt>(self.fs.read_file(&target).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `readFileSync`
    pub fn read_file_sync(&self, path: &str) -> GuardResult<Vec<u8>> {
        let op = Operation::ReadFileSync;
        let result = self
            .admit_sync(op, path)
            .and_then(|target| Ok(self.fs.read_file_sync(&target)?));
        self.finish(op, result)
    }

    /// `readdir`
    pub async fn read_dir(&self, path: &str) -> GuardResult<Vec<DirEntry>> {
        let op = Operation::ReadDir;
        let result = async {
            let target = self.admit(self.guard(op)?, path)?;
            Ok::<_, Halt>(self.fs.read_dir(&target).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `readdirSync`
    pub fn read_dir_sync(&self, path: &str) -> GuardResult<Vec<DirEntry>> {
        let op = Operation::ReadDirSync;
        let result = self
            .admit_sync(op, path)
            .and_then(|target| Ok(self.fs.read_dir_sync(&target)?));
        self.finish(op, result)
    }

    /// `readJson`
    pub async fn read_json(&self, path: &str) -> GuardResult<serde_json::Value> {
        let op = Operation::ReadJson;
        let result = async {
            let target = self.admit(self.guard(op)?, path)?;
            Ok::<_, Halt>(self.fs.read_json(&target).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `readJsonSync`
    pub fn read_json_sync(&self, path: &str) -> GuardResult<serde_json::Value> {
        let op = Operation::ReadJsonSync;
        let result = self
            .admit_sync(op, path)
            .and_then(|target| Ok(self.fs.read_json_sync(&target)?));
        self.finish(op, result)
    }

    /// `createReadStream`
    pub async fn create_read_stream(&self, path: &str) -> GuardResult<ReadStream> {
        let op = Operation::CreateReadStream;
        let result = async {
            let target = self.admit(self.guard(op)?, path)?;
            Ok::<_, Halt>(self.fs.open_read(&target).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `writeFile`
    pub async fn write_file(&self, path: &str, data: &[u8]) -> GuardResult<()> {
        let op = Operation::WriteFile;
        let result = async {
            let guard = self.guard(op)?;
            let target = self.admit(guard, path)?;
            self.prepare(guard, &target).await?;
            Ok::<_, Halt>(self.fs.write_file(&target, data).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `writeFileSync`
    pub fn write_file_sync(&self, path: &str, data: &[u8]) -> GuardResult<()> {
        let op = Operation::WriteFileSync;
        let result = self.write_target_sync(op, path).and_then(|target| {
            self.fs.write_file_sync(&target, data)?;
            Ok(())
        });
        self.finish(op, result)
    }

    /// `mkdir`
    ///
    /// Missing intermediate directories are created first.
    pub async fn mkdir(&self, path: &str) -> GuardResult<()> {
        let op = Operation::Mkdir;
        let result = async {
            let guard = self.guard(op)?;
            let target = self.admit(guard, path)?;
            self.prepare(guard, &target).await?;
            Ok::<_, Halt>(self.fs.create_dir(&target).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `mkdirSync`
    pub fn mkdir_sync(&self, path: &str) -> GuardResult<()> {
        let op = Operation::MkdirSync;
        let result = self.write_target_sync(op, path).and_then(|target| {
            self.fs.create_dir_sync(&target)?;
            Ok(())
        });
        self.finish(op, result)
    }

    /// `writeJson`
    pub async fn write_json(&self, path: &str, value: &serde_json::Value) -> GuardResult<()> {
        let op = Operation::WriteJson;
        let result = async {
            let guard = self.guard(op)?;
            let target = self.admit(guard, path)?;
            self.prepare(guard, &target).await?;
            Ok::<_, Halt>(self.fs.write_json(&target, value).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `writeJsonSync`
    pub fn write_json_sync(&self, path: &str, value: &serde_json::Value) -> GuardResult<()> {
        let op = Operation::WriteJsonSync;
        let result = self.write_target_sync(op, path).and_then(|target| {
            self.fs.write_json_sync(&target, value)?;
            Ok(())
        });
        self.finish(op, result)
    }

    /// `createWriteStream`
    pub async fn create_write_stream(&self, path: &str) -> GuardResult<WriteStream> {
        let op = Operation::CreateWriteStream;
        let result = async {
            let guard = self.guard(op)?;
            let target = self.admit(guard, path)?;
            self.prepare(guard, &target).await?;
            Ok::<_, Halt>(self.fs.open_write(&target).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `remove`
    pub async fn remove(&self, path: &str) -> GuardResult<()> {
        let op = Operation::Remove;
        let result = async {
            let target = self.admit(self.guard(op)?, path)?;
            Ok::<_, Halt>(self.fs.remove(&target).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `removeSync`
    pub fn remove_sync(&self, path: &str) -> GuardResult<()> {
        let op = Operation::RemoveSync;
        let result = self.admit_sync(op, path).and_then(|target| {
            self.fs.remove_sync(&target)?;
            Ok(())
        });
        self.finish(op, result)
    }

    /// `emptyDir`
    pub async fn empty_dir(&self, path: &str) -> GuardResult<()> {
        let op = Operation::EmptyDir;
        let result = async {
            let target = self.admit(self.guard(op)?, path)?;
            Ok::<_, Halt>(self.fs.empty_dir(&target).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `emptyDirSync`
    pub fn empty_dir_sync(&self, path: &str) -> GuardResult<()> {
        let op = Operation::EmptyDirSync;
        let result = self.admit_sync(op, path).and_then(|target| {
            self.fs.empty_dir_sync(&target)?;
            Ok(())
        });
        self.finish(op, result)
    }

    /// `appendFile`
    pub async fn append_file(&self, path: &str, data: &[u8]) -> GuardResult<()> {
        let op = Operation::AppendFile;
        let result = async {
            let guard = self.guard(op)?;
            let target = self.admit(guard, path)?;
            self.prepare(guard, &target).await?;
            Ok::<_, Halt>(self.fs.append_file(&target, data).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `appendFileSync`
    pub fn append_file_sync(&self, path: &str, data: &[u8]) -> GuardResult<()> {
        let op = Operation::AppendFileSync;
        let result = self.write_target_sync(op, path).and_then(|target| {
            self.fs.append_file_sync(&target, data)?;
            Ok(())
        });
        self.finish(op, result)
    }

    /// `copy`
    ///
    /// With `overwrite` unset, an existing destination is an error in strict
    /// mode and silently kept in lenient mode.
    pub async fn copy(&self, src: &str, dest: &str, overwrite: bool) -> GuardResult<()> {
        let op = Operation::Copy;
        let result = async {
            let (from, to) = self.transfer_endpoints(op, src, dest).await?;
            let options = self.copy_options(overwrite);
            Ok::<_, Halt>(self.fs.copy(&from, &to, options).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `copySync`
    pub fn copy_sync(&self, src: &str, dest: &str, overwrite: bool) -> GuardResult<()> {
        let op = Operation::CopySync;
        let result = self
            .transfer_endpoints_sync(op, src, dest)
            .and_then(|(from, to)| {
                self.fs.copy_sync(&from, &to, self.copy_options(overwrite))?;
                Ok(())
            });
        self.finish(op, result)
    }

    /// `move`
    pub async fn move_path(&self, src: &str, dest: &str, overwrite: bool) -> GuardResult<()> {
        let op = Operation::Move;
        let result = async {
            let (from, to) = self.transfer_endpoints(op, src, dest).await?;
            let options = self.copy_options(overwrite);
            Ok::<_, Halt>(self.fs.move_path(&from, &to, options).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `moveSync`
    pub fn move_path_sync(&self, src: &str, dest: &str, overwrite: bool) -> GuardResult<()> {
        let op = Operation::MoveSync;
        let result = self
            .transfer_endpoints_sync(op, src, dest)
            .and_then(|(from, to)| {
                self.fs
                    .move_path_sync(&from, &to, self.copy_options(overwrite))?;
                Ok(())
            });
        self.finish(op, result)
    }

    /// `rename`
    ///
    /// Both paths resolve against the caller context independently.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> GuardResult<()> {
        let op = Operation::Rename;
        let result = async {
            let (from, to) = self.transfer_endpoints(op, old_path, new_path).await?;
            Ok::<_, Halt>(self.fs.rename(&from, &to).await?)
        }
        .await;
        self.finish(op, result)
    }

    /// `renameSync`
    pub fn rename_sync(&self, old_path: &str, new_path: &str) -> GuardResult<()> {
        let op = Operation::RenameSync;
        let result = self
            .transfer_endpoints_sync(op, old_path, new_path)
            .and_then(|(from, to)| {
                self.fs.rename_sync(&from, &to)?;
                Ok(())
            });
        self.finish(op, result)
    }

    /// `watch`
    ///
    /// Must be called within a tokio runtime.
    pub fn watch(&self, path: &str) -> GuardResult<Watcher> {
        let op = Operation::Watch;
        let result = self
            .admit_sync(op, path)
            .and_then(|target| Ok(self.fs.watch(&target)?));
        self.finish(op, result)
    }

    /// `existsSync`
    ///
    /// Any violation, including an out-of-root path, reads as `false`. Only
    /// an unexposed operation is an error.
    pub fn exists_sync(&self, path: &str) -> Result<bool, SandboxError> {
        let op = Operation::ExistsSync;
        let guard = self
            .state
            .table
            .get(op)
            .ok_or(SandboxError::Unavailable(op.name()))?;

        let outcome: PolicyOutcome<bool> = self
            .state
            .resolver
            .resolve_file(path, self.caller.as_deref())
            .and_then(|target| {
                guard.check_endpoint(&target)?;
                Ok(self.fs.exists_sync(&target))
            })
            .into();
        Ok(self.state.reporter.report_bool(op.name(), outcome))
    }

    /// `existsModuleSync`
    ///
    /// True only for a bare module reference that module policy allows and
    /// that exists under the root.
    pub fn exists_module_sync(&self, name: &str) -> Result<bool, SandboxError> {
        let op = Operation::ExistsModuleSync;
        if !self.state.table.contains(op) {
            return Err(SandboxError::Unavailable(op.name()));
        }

        let outcome: PolicyOutcome<bool> = self.module_exists(name).into();
        Ok(self.state.reporter.report_bool(op.name(), outcome))
    }

    fn module_exists(&self, name: &str) -> Result<bool, Violation> {
        let classification =
            self.state
                .resolver
                .classify(name, self.caller.as_deref(), true)?;
        let PathClassification::Module(module) = classification else {
            return Err(Violation::denied("not a module reference"));
        };
        self.state.modules.evaluate(&module)?;
        ExtensionPolicy::new(self.state.table.actions()).evaluate(Path::new(&module), Access::Read)?;

        let target = path_clean::clean(self.state.resolver.root_dir().join(&module));
        self.state.resolver.confine(&target)?;
        Ok(self.fs.exists_sync(&target))
    }

    fn admit_sync(&self, operation: Operation, path: &str) -> Result<PathBuf, Halt> {
        self.admit(self.guard(operation)?, path)
    }

    fn write_target_sync(&self, operation: Operation, path: &str) -> Result<PathBuf, Halt> {
        let guard = self.guard(operation)?;
        let target = self.admit(guard, path)?;
        self.prepare_sync(guard, &target)?;
        Ok(target)
    }

    /// Resolve a source and a destination; the destination is prepared for
    /// writing.
    async fn transfer_endpoints(
        &self,
        operation: Operation,
        src: &str,
        dest: &str,
    ) -> Result<(PathBuf, PathBuf), Halt> {
        let guard = self.guard(operation)?;
        let from = self.admit(guard, src)?;
        let to = self.admit(guard, dest)?;
        self.prepare(guard, &to).await?;
        Ok((from, to))
    }

    fn transfer_endpoints_sync(
        &self,
        operation: Operation,
        src: &str,
        dest: &str,
    ) -> Result<(PathBuf, PathBuf), Halt> {
        let guard = self.guard(operation)?;
        let from = self.admit(guard, src)?;
        let to = self.admit(guard, dest)?;
        self.prepare_sync(guard, &to)?;
        Ok((from, to))
    }
}
