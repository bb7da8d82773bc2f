//! Filesystem content store

use crate::content::{StoreError, StoreResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

const TMP_SUFFIX: &str = ".tmp";

/// Read and write counts for one store instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub read: u64,
    pub written: u64,
}

/// Content store rooted at a downloads directory
///
/// Objects live at `{root}/{prefix}/{name}`. Writes go to a temporary file
/// that is renamed into place, so readers never observe a partial object.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    read: AtomicU64,
    written: AtomicU64,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read: AtomicU64::new(0),
            written: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root directory if needed
    pub async fn prepare(&self) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn path(&self, prefix: &str, name: &str) -> StoreResult<PathBuf> {
        check_component(prefix)?;
        check_component(name)?;
        Ok(self.root.join(prefix).join(name))
    }

    /// Atomically writes `bytes` to `prefix/name`, replacing any existing object
    pub async fn write(&self, prefix: &str, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let path = self.path(prefix, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.root.join(prefix).join(format!("{}{}", name, TMP_SUFFIX));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn read(&self, prefix: &str, name: &str) -> StoreResult<Vec<u8>> {
        let path = self.path(prefix, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                self.read.fetch_add(1, Ordering::Relaxed);
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{}/{}", prefix, name)))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    pub async fn exists(&self, prefix: &str, name: &str) -> StoreResult<bool> {
        let path = self.path(prefix, name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Lists shard directories, sorted
    pub async fn shards(&self) -> StoreResult<Vec<String>> {
        self.list_dir(&self.root, true).await
    }

    /// Lists the objects in a shard, sorted
    pub async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        check_component(prefix)?;
        self.list_dir(&self.root.join(prefix), false).await
    }

    async fn list_dir(&self, dir: &Path, dirs: bool) -> StoreResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() != dirs {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !dirs && name.ends_with(TMP_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Counts for this store instance only
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
        }
    }
}

fn check_component(component: &str) -> StoreResult<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\'])
    {
        return Err(StoreError::InvalidName(component.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());

        store.write("ab", "cdef", b"payload").await.unwrap();
        assert_eq!(store.read("ab", "cdef").await.unwrap(), b"payload");
        assert!(store.exists("ab", "cdef").await.unwrap());
        assert_eq!(store.stats(), StoreStats { read: 1, written: 1 });
    }

    #[tokio::test]
    async fn test_overwrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());

        store.write("ab", "cdef", b"first").await.unwrap();
        store.write("ab", "cdef", b"second").await.unwrap();
        assert_eq!(store.read("ab", "cdef").await.unwrap(), b"second");
        assert_eq!(store.list("ab").await.unwrap(), vec!["cdef".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        assert!(matches!(
            store.read("ab", "missing").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!store.exists("ab", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_listing() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path().join("downloads"));
        assert!(store.shards().await.unwrap().is_empty());

        store.write("ff", "2", b"x").await.unwrap();
        store.write("00", "1", b"x").await.unwrap();
        store.write("00", "0", b"x").await.unwrap();

        assert_eq!(store.shards().await.unwrap(), vec!["00", "ff"]);
        assert_eq!(store.list("00").await.unwrap(), vec!["0", "1"]);
        assert!(store.list("12").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        assert!(matches!(
            store.write("..", "x", b"x").await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.read("ab", "c/d").await,
            Err(StoreError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_counters_are_per_instance() {
        let dir = TempDir::new().unwrap();
        let first = FsStore::new(dir.path());
        first.write("aa", "1", b"x").await.unwrap();

        let second = FsStore::new(dir.path());
        assert_eq!(second.stats().written, 0);
        second.read("aa", "1").await.unwrap();
        assert_eq!(second.stats(), StoreStats { read: 1, written: 0 });
    }
}
