//! In-memory [`Filesystem`], existing purely to give the rest of this
//! crate's test suite (and `crate::storage`/`crate::index`/`crate::coordinator`
//! tests) a fast, deterministic double — spec.md §4.1 requires "two
//! implementations ... an OS-backed one and an in-memory one for tests".
//! Nothing in the teacher repo has an equivalent; it is new code in the
//! small-struct-plus-`Mutex` idiom the rest of this crate uses for shared
//! mutable state (`crate::metrics::Metrics`, `crate::index::Index`).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{DirEntry, Error, Filesystem, ReadFile, WriteFile, temp_dir_polyfill};

#[derive(Default)]
struct Inner {
    files: HashMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
}

#[derive(Clone, Default)]
pub struct MemoryFilesystem(Arc<Mutex<Inner>>);

pub struct MemoryWriteFile {
    fs: MemoryFilesystem,
    path: PathBuf,
    buf: Vec<u8>,
}

pub struct MemoryReadFile {
    data: Vec<u8>,
    pos: usize,
}

impl WriteFile for MemoryWriteFile {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        self.fs
            .0
            .lock()
            .unwrap()
            .files
            .insert(self.path.clone(), self.buf.clone());
        Ok(())
    }
}

impl ReadFile for MemoryReadFile {
    async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.extend_from_slice(&self.data[self.pos..]);
        self.pos = self.data.len();
        Ok(())
    }
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn implied_dirs(inner: &Inner) -> HashSet<PathBuf> {
        let mut out = inner.dirs.clone();
        for path in inner.files.keys() {
            let mut cur = path.parent();
            while let Some(p) = cur {
                if p.as_os_str().is_empty() {
                    break;
                }
                if !out.insert(p.to_path_buf()) {
                    break;
                }
                cur = p.parent();
            }
        }
        out
    }
}

impl Filesystem for MemoryFilesystem {
    type WriteFile = MemoryWriteFile;
    type ReadFile = MemoryReadFile;

    async fn create(&self, path: &Path) -> Result<Self::WriteFile, Error> {
        Ok(MemoryWriteFile {
            fs: self.clone(),
            path: path.to_path_buf(),
            buf: Vec::new(),
        })
    }

    async fn open(&self, path: &Path) -> Result<Self::ReadFile, Error> {
        let inner = self.0.lock().unwrap();
        let data = inner
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_path_buf()))?;
        Ok(MemoryReadFile { data, pos: 0 })
    }

    async fn mkdir_all(&self, path: &Path) -> Result<(), Error> {
        let mut inner = self.0.lock().unwrap();
        let mut cur = PathBuf::new();
        for comp in path.components() {
            cur.push(comp);
            inner.dirs.insert(cur.clone());
        }
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), Error> {
        let mut inner = self.0.lock().unwrap();
        if let Some(data) = inner.files.remove(from) {
            inner.files.insert(to.to_path_buf(), data);
            Ok(())
        } else if inner.dirs.remove(from) {
            inner.dirs.insert(to.to_path_buf());
            Ok(())
        } else {
            Err(Error::NotFound(from.to_path_buf()))
        }
    }

    async fn remove(&self, path: &Path) -> Result<(), Error> {
        let mut inner = self.0.lock().unwrap();
        if inner.files.remove(path).is_some() {
            Ok(())
        } else {
            Err(Error::NotFound(path.to_path_buf()))
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        let inner = self.0.lock().unwrap();
        inner.files.contains_key(path) || Self::implied_dirs(&inner).contains(path)
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, Error> {
        let inner = self.0.lock().unwrap();
        let dirs = Self::implied_dirs(&inner);
        let mut out = Vec::new();
        for dir in &dirs {
            if dir.parent() == Some(path) {
                out.push(DirEntry {
                    name: dir.file_name().unwrap().to_string_lossy().into_owned(),
                    is_dir: true,
                });
            }
        }
        for file in inner.files.keys() {
            if file.parent() == Some(path) {
                out.push(DirEntry {
                    name: file.file_name().unwrap().to_string_lossy().into_owned(),
                    is_dir: false,
                });
            }
        }
        Ok(out)
    }

    async fn file_size(&self, path: &Path) -> Result<u64, Error> {
        let inner = self.0.lock().unwrap();
        inner
            .files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| Error::NotFound(path.to_path_buf()))
    }

    async fn walk(&self, root: &Path) -> Result<Vec<PathBuf>, Error> {
        let inner = self.0.lock().unwrap();
        Ok(inner
            .files
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect())
    }

    async fn temp_dir(&self, parent: &Path, prefix: &str) -> Result<PathBuf, Error> {
        temp_dir_polyfill(self, parent, prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let fs = MemoryFilesystem::new();
        fs.mkdir_all(Path::new("a/b")).await.unwrap();
        let mut w = fs.create(Path::new("a/b/c.txt")).await.unwrap();
        w.write_all(b"hello").await.unwrap();
        w.flush().await.unwrap();

        let mut r = fs.open(Path::new("a/b/c.txt")).await.unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
        assert_eq!(fs.file_size(Path::new("a/b/c.txt")).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn read_dir_lists_files_and_dirs() {
        let fs = MemoryFilesystem::new();
        fs.mkdir_all(Path::new("root/sub")).await.unwrap();
        let mut w = fs.create(Path::new("root/file.txt")).await.unwrap();
        w.write_all(b"x").await.unwrap();
        w.flush().await.unwrap();

        let mut entries = fs.read_dir(Path::new("root")).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "file.txt".into(), is_dir: false },
                DirEntry { name: "sub".into(), is_dir: true },
            ]
        );
    }

    #[tokio::test]
    async fn remove_then_exists_is_false() {
        let fs = MemoryFilesystem::new();
        let mut w = fs.create(Path::new("f")).await.unwrap();
        w.write_all(b"x").await.unwrap();
        w.flush().await.unwrap();
        assert!(fs.exists(Path::new("f")).await);
        fs.remove(Path::new("f")).await.unwrap();
        assert!(!fs.exists(Path::new("f")).await);
    }
}
