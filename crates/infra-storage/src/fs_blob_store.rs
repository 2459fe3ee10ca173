// Filesystem BlobStore Implementation
// Keys are `/`-separated relative paths mapped under a root directory;
// public URLs are formed from a configured base. This mirrors the
// container-per-deployment layout of a hosted object store.

use crate::mime::content_type_for;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use terraflow_core::error::{AppError, Result};
use terraflow_core::port::BlobStore;
use tracing::debug;
use walkdir::WalkDir;

pub struct FsBlobStore {
    root: PathBuf,
    public_base: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let public_base = public_base.into().trim_end_matches('/').to_string();
        Ok(Self { root, public_base })
    }

    /// Map a key to a path under the root. Only plain relative
    /// components are accepted; anything else is a caller bug.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(AppError::Storage("empty blob key".to_string()));
        }
        for component in Path::new(key).components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(AppError::Storage(format!("invalid blob key: {}", key)));
                }
            }
        }
        Ok(self.root.join(key))
    }

    fn keys_under(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, local: &Path, key: &str, content_type: Option<&str>) -> Result<()> {
        let target = self.path_for(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &target).await?;
        debug!(key = %key, content_type = ?content_type, "Uploaded blob");
        Ok(())
    }

    async fn upload_tree(&self, dir: &Path, prefix: &str) -> Result<usize> {
        let mut uploaded = 0;
        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(|e| AppError::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| AppError::Storage(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            let key = format!("{}{}", prefix, rel);
            self.upload(entry.path(), &key, content_type_for(&rel))
                .await?;
            uploaded += 1;
        }
        Ok(uploaded)
    }

    async fn download(&self, key: &str, local: &Path) -> Result<()> {
        let source = self.path_for(key)?;
        if !source.is_file() {
            return Err(AppError::NotFound(format!("blob {}", key)));
        }
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, local).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let target = self.path_for(key)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!(key = %key, "Deleted blob");
                Ok(())
            }
            // Cleanup is idempotent: a missing key is not an error
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.keys_under(prefix);
        let mut deleted = 0;
        for key in &keys {
            self.delete(key).await?;
            deleted += 1;
        }

        // Drop the now-empty directory tree, best-effort
        let prefix_dir = self.root.join(prefix.trim_end_matches('/'));
        if prefix_dir.is_dir() {
            let _ = tokio::fs::remove_dir_all(&prefix_dir).await;
        }

        Ok(deleted)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.keys_under(prefix))
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (FsBlobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(
            dir.path().join("blobs"),
            "https://storage.example/container/",
        )
        .unwrap();
        (store, dir)
    }

    fn scratch_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn upload_download_round_trip() {
        let (store, dir) = store();
        let local = scratch_file(&dir, "in.laz", b"points");

        store
            .upload(&local, "jobs/j1.laz", Some("application/octet-stream"))
            .await
            .unwrap();

        let out = dir.path().join("out.laz");
        store.download("jobs/j1.laz", &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"points");
    }

    #[tokio::test]
    async fn download_of_missing_key_is_not_found() {
        let (store, dir) = store();
        let out = dir.path().join("out.bin");
        let err = store.download("ghost/key.bin", &out).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, dir) = store();
        let local = scratch_file(&dir, "x.png", b"png");
        store.upload(&local, "p/x.png", None).await.unwrap();

        store.delete("p/x.png").await.unwrap();
        store.delete("p/x.png").await.unwrap();
        assert!(store.list("p/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tree_upload_preserves_relative_paths() {
        let (store, dir) = store();
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("octree/nested")).unwrap();
        std::fs::write(tree.join("metadata.json"), b"{}").unwrap();
        std::fs::write(tree.join("octree/r0.bin"), b"a").unwrap();
        std::fs::write(tree.join("octree/nested/r01.bin"), b"b").unwrap();

        let count = store.upload_tree(&tree, "PROJ-1/").await.unwrap();
        assert_eq!(count, 3);

        let keys = store.list("PROJ-1/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "PROJ-1/metadata.json",
                "PROJ-1/octree/nested/r01.bin",
                "PROJ-1/octree/r0.bin",
            ]
        );
    }

    #[tokio::test]
    async fn delete_prefix_removes_exactly_the_prefix() {
        let (store, dir) = store();
        let a = scratch_file(&dir, "a", b"a");
        store.upload(&a, "PROJ-1/ortho/overlay.webp", None).await.unwrap();
        store.upload(&a, "PROJ-1/ortho/preview.png", None).await.unwrap();
        store.upload(&a, "PROJ-1/thumbnail.png", None).await.unwrap();
        store.upload(&a, "PROJ-2/thumbnail.png", None).await.unwrap();

        let deleted = store.delete_prefix("PROJ-1/ortho/").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            store.list("PROJ-1/").await.unwrap(),
            vec!["PROJ-1/thumbnail.png"]
        );
        assert_eq!(store.list("PROJ-2/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (store, dir) = store();
        let local = scratch_file(&dir, "x", b"x");

        for key in ["../escape", "/absolute/key", "a/../b", ""] {
            let err = store.upload(&local, key, None).await.unwrap_err();
            assert!(matches!(err, AppError::Storage(_)), "key {:?}", key);
        }
    }

    #[tokio::test]
    async fn public_urls_join_base_and_key() {
        let (store, _dir) = store();
        assert_eq!(
            store.url("PROJ-1/metadata.json"),
            "https://storage.example/container/PROJ-1/metadata.json"
        );
    }
}
