//! Raw filesystem primitives the guards delegate to.
//!
//! The [`FileSystem`] trait is the boundary between policy and I/O: guards
//! only call it after a request has passed policy, and whatever it returns
//! (including errors) is handed back to the caller unchanged.
//! [`LocalFs`] implements it over the host filesystem.

mod local;

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use local::LocalFs;

/// Directory entry returned by `read_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name
    pub name: String,
    /// Whether this entry is a directory
    pub is_dir: bool,
}

/// Options for copy and move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Replace an existing destination
    pub overwrite: bool,
    /// Fail instead of silently skipping when the destination exists and
    /// `overwrite` is false
    pub error_on_exist: bool,
}

/// A change observed by a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The path appeared
    Created(PathBuf),
    /// The path's contents or size changed
    Modified(PathBuf),
    /// The path disappeared
    Removed(PathBuf),
}

impl WatchEvent {
    /// The path this event is about.
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Removed(p) => p,
        }
    }
}

/// A running watch. Dropping it stops the watch.
#[derive(Debug)]
pub struct Watcher {
    events: mpsc::Receiver<WatchEvent>,
    task: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Wrap an event channel and the task feeding it.
    pub fn new(events: mpsc::Receiver<WatchEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { events, task }
    }

    /// Wait for the next event. Returns `None` once the watch has ended.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Readable stream handed out by `open_read`.
pub type ReadStream = Pin<Box<dyn AsyncRead + Send>>;

/// Writable stream handed out by `open_write`.
pub type WriteStream = Pin<Box<dyn AsyncWrite + Send>>;

fn invalid_json(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Unrestricted filesystem operations.
///
/// Implementations should behave like the host filesystem; the sandbox adds
/// no semantics of its own on top of them.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read a whole file.
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Read a whole file, blocking.
    fn read_file_sync(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// List a directory.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// List a directory, blocking.
    fn read_dir_sync(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Read and parse a JSON file.
    async fn read_json(&self, path: &Path) -> io::Result<serde_json::Value> {
        let bytes = self.read_file(path).await?;
        serde_json::from_slice(&bytes).map_err(invalid_json)
    }

    /// Read and parse a JSON file, blocking.
    fn read_json_sync(&self, path: &Path) -> io::Result<serde_json::Value> {
        let bytes = self.read_file_sync(path)?;
        serde_json::from_slice(&bytes).map_err(invalid_json)
    }

    /// Open a file for streaming reads.
    async fn open_read(&self, path: &Path) -> io::Result<ReadStream>;

    /// Create or truncate a file with `data`.
    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Create or truncate a file with `data`, blocking.
    fn write_file_sync(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Serialize `value` as JSON into a file.
    async fn write_json(&self, path: &Path, value: &serde_json::Value) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(invalid_json)?;
        self.write_file(path, &bytes).await
    }

    /// Serialize `value` as JSON into a file, blocking.
    fn write_json_sync(&self, path: &Path, value: &serde_json::Value) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(invalid_json)?;
        self.write_file_sync(path, &bytes)
    }

    /// Open a file for streaming writes, creating or truncating it.
    async fn open_write(&self, path: &Path) -> io::Result<WriteStream>;

    /// Create a single directory.
    async fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Create a single directory, blocking.
    fn create_dir_sync(&self, path: &Path) -> io::Result<()>;

    /// Create a directory and all missing parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create a directory and all missing parents, blocking.
    fn create_dir_all_sync(&self, path: &Path) -> io::Result<()>;

    /// Remove a file or a directory tree. Missing paths are not an error.
    async fn remove(&self, path: &Path) -> io::Result<()>;

    /// Remove a file or a directory tree, blocking.
    fn remove_sync(&self, path: &Path) -> io::Result<()>;

    /// Make sure a directory exists and is empty.
    async fn empty_dir(&self, path: &Path) -> io::Result<()>;

    /// Make sure a directory exists and is empty, blocking.
    fn empty_dir_sync(&self, path: &Path) -> io::Result<()>;

    /// Append `data` to a file, creating it if missing.
    async fn append_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Append `data` to a file, blocking.
    fn append_file_sync(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Copy a file or directory tree.
    async fn copy(&self, from: &Path, to: &Path, options: CopyOptions) -> io::Result<()>;

    /// Copy a file or directory tree, blocking.
    fn copy_sync(&self, from: &Path, to: &Path, options: CopyOptions) -> io::Result<()>;

    /// Move a file or directory tree, across devices if needed.
    async fn move_path(&self, from: &Path, to: &Path, options: CopyOptions) -> io::Result<()>;

    /// Move a file or directory tree, blocking.
    fn move_path_sync(&self, from: &Path, to: &Path, options: CopyOptions) -> io::Result<()>;

    /// Rename a path in place.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Rename a path in place, blocking.
    fn rename_sync(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Whether a path exists.
    async fn exists(&self, path: &Path) -> bool;

    /// Whether a path exists, blocking.
    fn exists_sync(&self, path: &Path) -> bool;

    /// Start watching a path for changes.
    fn watch(&self, path: &Path) -> io::Result<Watcher>;
}
