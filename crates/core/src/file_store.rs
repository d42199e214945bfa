//! Binary storage for uploaded `formdata` file parts, addressed by the
//! stored name recorded alongside an `UploadedFile` row.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persists `bytes`, returning the generated stored name.
    async fn put(&self, original_name: &str, bytes: &[u8]) -> Result<String, anyhow::Error>;
    async fn get(&self, stored_name: &str) -> Result<Vec<u8>, anyhow::Error>;
    async fn delete(&self, stored_name: &str) -> Result<(), anyhow::Error>;
    /// Every stored name currently on disk, for orphan-cleanup cross-checks.
    async fn list(&self) -> Result<Vec<String>, anyhow::Error>;
}

/// Stores files on the local filesystem under a single directory, named by a
/// random UUID with the original extension preserved for content-type hints.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, stored_name: &str) -> PathBuf {
        self.root.join(stored_name)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(&self, original_name: &str, bytes: &[u8]) -> Result<String, anyhow::Error> {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let stored_name = format!("{}{ext}", Uuid::new_v4());
        tokio::fs::write(self.path_for(&stored_name), bytes).await?;
        Ok(stored_name)
    }

    async fn get(&self, stored_name: &str) -> Result<Vec<u8>, anyhow::Error> {
        Ok(tokio::fs::read(self.path_for(stored_name)).await?)
    }

    async fn delete(&self, stored_name: &str) -> Result<(), anyhow::Error> {
        match tokio::fs::remove_file(self.path_for(stored_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, anyhow::Error> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();

        let stored = store.put("photo.jpg", b"binary-data").await.unwrap();
        assert!(stored.ends_with(".jpg"));

        let bytes = store.get(&stored).await.unwrap();
        assert_eq!(bytes, b"binary-data");

        store.delete(&stored).await.unwrap();
        assert!(store.get(&stored).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();
        assert!(store.delete("does-not-exist").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_reflects_stored_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path()).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        let stored = store.put("doc.pdf", b"bytes").await.unwrap();
        let names = store.list().await.unwrap();
        assert_eq!(names, vec![stored]);
    }
}
