//! Host filesystem backend.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use super::{CopyOptions, DirEntry, FileSystem, ReadStream, WatchEvent, Watcher, WriteStream};

/// [`FileSystem`] over `std::fs` and `tokio::fs`.
///
/// Paths are used exactly as given; confinement is the guard's job.
#[derive(Debug, Clone)]
pub struct LocalFs {
    poll_interval: Duration,
    channel_capacity: usize,
}

impl Default for LocalFs {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            channel_capacity: 64,
        }
    }
}

impl LocalFs {
    /// Create a backend with default watch settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how often watchers poll for changes.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn to_entries(dir: fs::ReadDir) -> io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    for entry in dir {
        let entry = entry?;
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry.file_type()?.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn remove_blocking(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn empty_dir_blocking(path: &Path) -> io::Result<()> {
    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries {
                remove_blocking(&entry?.path())?;
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(path),
        Err(e) => Err(e),
    }
}

/// Decide what to do with an existing destination. `Ok(false)` means skip.
fn prepare_destination(to: &Path, options: CopyOptions) -> io::Result<bool> {
    if fs::symlink_metadata(to).is_err() {
        return Ok(true);
    }
    if options.overwrite {
        remove_blocking(to)?;
        return Ok(true);
    }
    if options.error_on_exist {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    Ok(false)
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    let meta = fs::metadata(from)?;
    if meta.is_dir() {
        let entries = fs::read_dir(from)?.collect::<io::Result<Vec<_>>>()?;
        fs::create_dir_all(to)?;
        for entry in entries {
            copy_tree(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(from, to)?;
        let file = fs::File::options().write(true).open(to)?;
        file.set_modified(meta.modified()?)
    }
}

/// Refuse to copy or move a directory onto itself or into its own subtree.
fn ensure_not_nested(from: &Path, to: &Path) -> io::Result<()> {
    let nested = path_clean::clean(to).starts_with(path_clean::clean(from));
    if nested && fs::metadata(from)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "cannot copy {} to a subdirectory of itself, {}",
                from.display(),
                to.display()
            ),
        ));
    }
    Ok(())
}

fn copy_blocking(from: &Path, to: &Path, options: CopyOptions) -> io::Result<()> {
    ensure_not_nested(from, to)?;
    if !prepare_destination(to, options)? {
        return Ok(());
    }
    copy_tree(from, to)
}

fn move_blocking(from: &Path, to: &Path, options: CopyOptions) -> io::Result<()> {
    ensure_not_nested(from, to)?;
    if !prepare_destination(to, options)? {
        return Ok(());
    }
    match fs::rename(from, to) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            copy_tree(from, to)?;
            remove_blocking(from)
        }
        other => other,
    }
}

async fn blocking<T, F>(f: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

/// Snapshot of a watched path, compared between polls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl Stamp {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        }
    }
}

async fn stamp(path: &Path) -> Option<Stamp> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(Stamp::from_metadata(&meta))
}

async fn poll_changes(
    path: PathBuf,
    mut last: Option<Stamp>,
    interval: Duration,
    tx: mpsc::Sender<WatchEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let current = stamp(&path).await;
        let event = match (last, current) {
            (None, Some(_)) => Some(WatchEvent::Created(path.clone())),
            (Some(_), None) => Some(WatchEvent::Removed(path.clone())),
            (Some(a), Some(b)) if a != b => Some(WatchEvent::Modified(path.clone())),
            _ => None,
        };
        last = current;
        if let Some(event) = event
            && tx.send(event).await.is_err()
        {
            break;
        }
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    fn read_file_sync(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let path = path.to_path_buf();
        blocking(move || to_entries(fs::read_dir(path)?)).await
    }

    fn read_dir_sync(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        to_entries(fs::read_dir(path)?)
    }

    async fn open_read(&self, path: &Path) -> io::Result<ReadStream> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::pin(file))
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, data).await
    }

    fn write_file_sync(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(path, data)
    }

    async fn open_write(&self, path: &Path) -> io::Result<WriteStream> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::pin(file))
    }

    async fn create_dir(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir(path).await
    }

    fn create_dir_sync(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    fn create_dir_all_sync(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let path = path.to_path_buf();
        blocking(move || remove_blocking(&path)).await
    }

    fn remove_sync(&self, path: &Path) -> io::Result<()> {
        remove_blocking(path)
    }

    async fn empty_dir(&self, path: &Path) -> io::Result<()> {
        let path = path.to_path_buf();
        blocking(move || empty_dir_blocking(&path)).await
    }

    fn empty_dir_sync(&self, path: &Path) -> io::Result<()> {
        empty_dir_blocking(path)
    }

    async fn append_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(data).await?;
        file.flush().await
    }

    fn append_file_sync(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(data)
    }

    async fn copy(&self, from: &Path, to: &Path, options: CopyOptions) -> io::Result<()> {
        let (from, to) = (from.to_path_buf(), to.to_path_buf());
        blocking(move || copy_blocking(&from, &to, options)).await
    }

    fn copy_sync(&self, from: &Path, to: &Path, options: CopyOptions) -> io::Result<()> {
        copy_blocking(from, to, options)
    }

    async fn move_path(&self, from: &Path, to: &Path, options: CopyOptions) -> io::Result<()> {
        let (from, to) = (from.to_path_buf(), to.to_path_buf());
        blocking(move || move_blocking(&from, &to, options)).await
    }

    fn move_path_sync(&self, from: &Path, to: &Path, options: CopyOptions) -> io::Result<()> {
        move_blocking(from, to, options)
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    fn rename_sync(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    fn exists_sync(&self, path: &Path) -> bool {
        path.exists()
    }

    fn watch(&self, path: &Path) -> io::Result<Watcher> {
        let handle = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;
        // taken before returning so changes made right after `watch` are seen
        let initial = fs::metadata(path).ok().map(|m| Stamp::from_metadata(&m));
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let task = handle.spawn(poll_changes(
            path.to_path_buf(),
            initial,
            self.poll_interval,
            tx,
        ));
        Ok(Watcher::new(rx, Some(task)))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_skips_existing_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (dir.path().join("a.txt"), dir.path().join("b.txt"));
        fs::write(&a, b"new").unwrap();
        fs::write(&b, b"old").unwrap();

        let local = LocalFs::new();
        local.copy(&a, &b, CopyOptions::default()).await.unwrap();
        assert_eq!(fs::read(&b).unwrap(), b"old");

        let err = local
            .copy(
                &a,
                &b,
                CopyOptions {
                    overwrite: false,
                    error_on_exist: true,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        local
            .copy(
                &a,
                &b,
                CopyOptions {
                    overwrite: true,
                    error_on_exist: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(fs::read(&b).unwrap(), b"new");
    }

    #[test]
    fn test_copy_tree_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/x.txt"), b"x").unwrap();

        let local = LocalFs::new();
        local
            .copy_sync(&src, &dir.path().join("dst"), CopyOptions::default())
            .unwrap();
        assert_eq!(fs::read(dir.path().join("dst/nested/x.txt")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_copy_into_own_subtree_refused() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("f.txt"), b"f").unwrap();
        let local = LocalFs::new();

        let err = local
            .copy(&src, &src.join("b"), CopyOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(!src.join("b").exists());

        let err = local
            .move_path_sync(&src, &src.join("b/c"), CopyOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        // overwriting onto itself must not delete the source
        let overwrite = CopyOptions {
            overwrite: true,
            error_on_exist: false,
        };
        assert!(local.copy_sync(&src, &src, overwrite).is_err());
        assert_eq!(fs::read(src.join("f.txt")).unwrap(), b"f");
    }

    #[test]
    fn test_copy_file_beside_itself_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::write(&src, b"f").unwrap();

        // a sibling sharing the name prefix is not nested
        LocalFs::new()
            .copy_sync(&src, &dir.path().join("ab"), CopyOptions::default())
            .unwrap();
        assert_eq!(fs::read(dir.path().join("ab")).unwrap(), b"f");
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        LocalFs::new().remove_sync(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn test_empty_dir_creates_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cache");
        let local = LocalFs::new();

        local.empty_dir_sync(&target).unwrap();
        assert!(target.is_dir());

        fs::write(target.join("a.txt"), b"a").unwrap();
        fs::create_dir(target.join("sub")).unwrap();
        local.empty_dir_sync(&target).unwrap();
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_watch_reports_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched.txt");
        let local = LocalFs::new().with_poll_interval(Duration::from_millis(10));

        let mut watcher = local.watch(&path).unwrap();
        fs::write(&path, b"hello").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, WatchEvent::Created(path));
    }
}
