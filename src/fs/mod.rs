//! Pluggable filesystem capability (spec.md §4.1, DESIGN NOTES "Dynamic
//! dispatch over filesystem").
//!
//! `Storage` (crate::storage) is generic over this trait rather than reaching
//! for `tokio::fs`/`std::fs` directly, the way `peoci/src/blobcache.rs` reaches
//! directly for `rustix`/`std::fs` since it never needed a test double. Two
//! implementations are provided: [`os::OsFilesystem`] for real use and
//! [`memory::MemoryFilesystem`] purely so the rest of the crate's test suite
//! can run with no disk I/O.

pub mod memory;
pub mod os;

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(PathBuf),
    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path)
        } else {
            Error::Io { path, source }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// A writable file handle; `write_all` + `sync`/`close` semantics are
/// expressed at the `Storage` layer (buffer-then-atomic-rename), so this
/// trait only needs to support sequential writes.
pub trait WriteFile: Send {
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = std::io::Result<()>> + Send;
    fn flush(&mut self) -> impl Future<Output = std::io::Result<()>> + Send;
}

pub trait ReadFile: Send {
    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> impl Future<Output = std::io::Result<()>> + Send;
}

/// The filesystem operations the cache core consumes (spec.md §4.1).
pub trait Filesystem: Send + Sync + 'static {
    type WriteFile: WriteFile;
    type ReadFile: ReadFile;

    fn create(&self, path: &Path) -> impl Future<Output = Result<Self::WriteFile, Error>> + Send;
    fn open(&self, path: &Path) -> impl Future<Output = Result<Self::ReadFile, Error>> + Send;
    fn mkdir_all(&self, path: &Path) -> impl Future<Output = Result<(), Error>> + Send;
    fn rename(&self, from: &Path, to: &Path) -> impl Future<Output = Result<(), Error>> + Send;
    fn remove(&self, path: &Path) -> impl Future<Output = Result<(), Error>> + Send;
    fn exists(&self, path: &Path) -> impl Future<Output = bool> + Send;
    fn read_dir(&self, path: &Path) -> impl Future<Output = Result<Vec<DirEntry>, Error>> + Send;
    fn file_size(&self, path: &Path) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Recursively visit every regular file under `root`, depth first.
    fn walk(&self, root: &Path) -> impl Future<Output = Result<Vec<PathBuf>, Error>> + Send;

    /// A unique directory name under `parent`; a polyfill (random suffix +
    /// retry) is used by backends with no native temp-dir primitive
    /// (spec.md §4.1: "a polyfill using random names and retries is required
    /// when not provided").
    fn temp_dir(&self, parent: &Path, prefix: &str) -> impl Future<Output = Result<PathBuf, Error>> + Send;
}

/// Shared polyfill: repeatedly try a randomized name under `parent` until
/// `mkdir_all` succeeds on a name that did not already exist.
pub(crate) async fn temp_dir_polyfill<FS: Filesystem>(
    fs: &FS,
    parent: &Path,
    prefix: &str,
) -> Result<PathBuf, Error> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    for _ in 0..64 {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let candidate = parent.join(format!("{prefix}-{pid}-{nanos}-{n}"));
        if !fs.exists(&candidate).await {
            fs.mkdir_all(&candidate).await?;
            return Ok(candidate);
        }
    }
    Err(Error::Io {
        path: parent.to_path_buf(),
        source: std::io::Error::other("could not allocate a unique temp dir"),
    })
}
