//! OS-backed [`Filesystem`], built directly on `tokio::fs` the way the rest
//! of the teacher workspace leans on `tokio::fs`/`tokio::io` for async file
//! handling (`peoci/src/ocidist_cache.rs` uses `tokio::fs::File` for the
//! blob writer). The teacher's own `peoci/src/blobcache.rs` instead opens
//! files through raw `rustix` `*at` syscalls for directory-relative,
//! symlink-safe opens (`ResolveFlags::BENEATH`); that approach is Linux-only
//! and not expressible behind a portable trait with an in-memory twin, so
//! this backend uses plain absolute/relative `Path`s resolved by the OS the
//! ordinary way instead (see DESIGN.md "Dependency changes").

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{DirEntry, Error, Filesystem, ReadFile, WriteFile, temp_dir_polyfill};

#[derive(Debug, Default, Clone, Copy)]
pub struct OsFilesystem;

pub struct OsWriteFile(tokio::fs::File);
pub struct OsReadFile(tokio::fs::File);

impl WriteFile for OsWriteFile {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.0.write_all(buf).await
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush().await
    }
}

impl ReadFile for OsReadFile {
    async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        self.0.read_to_end(buf).await.map(|_| ())
    }
}

impl Filesystem for OsFilesystem {
    type WriteFile = OsWriteFile;
    type ReadFile = OsReadFile;

    async fn create(&self, path: &Path) -> Result<Self::WriteFile, Error> {
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        Ok(OsWriteFile(file))
    }

    async fn open(&self, path: &Path) -> Result<Self::ReadFile, Error> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        Ok(OsReadFile(file))
    }

    async fn mkdir_all(&self, path: &Path) -> Result<(), Error> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| Error::io(path, e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), Error> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| Error::io(from, e))
    }

    async fn remove(&self, path: &Path) -> Result<(), Error> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| Error::io(path, e))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, Error> {
        let mut read_dir = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(path, e)),
        };
        let mut out = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| Error::io(path, e))? {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| Error::io(path, e))?
                .is_dir();
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        Ok(out)
    }

    async fn file_size(&self, path: &Path) -> Result<u64, Error> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        Ok(meta.len())
    }

    async fn walk(&self, root: &Path) -> Result<Vec<PathBuf>, Error> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in self.read_dir(&dir).await? {
                let path = dir.join(&entry.name);
                if entry.is_dir {
                    stack.push(path);
                } else {
                    out.push(path);
                }
            }
        }
        Ok(out)
    }

    async fn temp_dir(&self, parent: &Path, prefix: &str) -> Result<PathBuf, Error> {
        temp_dir_polyfill(self, parent, prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips_on_real_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFilesystem;
        let path = dir.path().join("sub").join("file.txt");
        fs.mkdir_all(path.parent().unwrap()).await.unwrap();

        let mut w = fs.create(&path).await.unwrap();
        w.write_all(b"hello").await.unwrap();
        w.flush().await.unwrap();

        let mut r = fs.open(&path).await.unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn temp_dir_allocates_unique_directory() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFilesystem;
        let a = fs.temp_dir(dir.path(), "t").await.unwrap();
        let b = fs.temp_dir(dir.path(), "t").await.unwrap();
        assert_ne!(a, b);
        assert!(fs.exists(&a).await);
    }
}
