// Blob Storage Collaborator Port

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Durable blob storage. Keys are `/`-separated relative paths; the
/// pipeline treats every failure here as a step failure.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload one local file under `key` with an explicit content type.
    async fn upload(&self, local: &Path, key: &str, content_type: Option<&str>) -> Result<()>;

    /// Upload a directory tree under `prefix`, preserving relative paths
    /// and applying content types per extension. Returns the file count.
    async fn upload_tree(&self, dir: &Path, prefix: &str) -> Result<usize>;

    /// Download `key` to a local path. `AppError::NotFound` when absent.
    async fn download(&self, key: &str, local: &Path) -> Result<()>;

    /// Delete one blob. Deleting a missing key is a no-op (cleanup is
    /// idempotent).
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every blob under `prefix`; returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Keys under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Public access URL for a key.
    fn url(&self, key: &str) -> String;
}

// ============================================================================
// In-memory implementation for tests
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Map-backed blob store. `upload` reads the local file so tests
    /// exercise real scratch files.
    pub struct MemoryBlobStore {
        blobs: Mutex<BTreeMap<String, Vec<u8>>>,
        base_url: String,
    }

    impl MemoryBlobStore {
        pub fn new() -> Self {
            Self {
                blobs: Mutex::new(BTreeMap::new()),
                base_url: "memory://blobs".to_string(),
            }
        }

        pub fn put(&self, key: &str, data: &[u8]) {
            self.blobs
                .lock()
                .unwrap()
                .insert(key.to_string(), data.to_vec());
        }

        pub fn contains(&self, key: &str) -> bool {
            self.blobs.lock().unwrap().contains_key(key)
        }

        pub fn keys(&self) -> Vec<String> {
            self.blobs.lock().unwrap().keys().cloned().collect()
        }
    }

    impl Default for MemoryBlobStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn upload(
            &self,
            local: &Path,
            key: &str,
            _content_type: Option<&str>,
        ) -> Result<()> {
            let data = std::fs::read(local)?;
            self.put(key, &data);
            Ok(())
        }

        async fn upload_tree(&self, dir: &Path, prefix: &str) -> Result<usize> {
            fn visit(
                store: &MemoryBlobStore,
                root: &Path,
                dir: &Path,
                prefix: &str,
                count: &mut usize,
            ) -> Result<()> {
                for entry in std::fs::read_dir(dir)? {
                    let entry = entry?;
                    let path = entry.path();
                    if path.is_dir() {
                        visit(store, root, &path, prefix, count)?;
                    } else {
                        let rel = path
                            .strip_prefix(root)
                            .expect("entry under root")
                            .to_string_lossy()
                            .replace('\\', "/");
                        store.put(&format!("{}{}", prefix, rel), &std::fs::read(&path)?);
                        *count += 1;
                    }
                }
                Ok(())
            }

            let mut count = 0;
            visit(self, dir, dir, prefix, &mut count)?;
            Ok(count)
        }

        async fn download(&self, key: &str, local: &Path) -> Result<()> {
            let blobs = self.blobs.lock().unwrap();
            let data = blobs
                .get(key)
                .ok_or_else(|| crate::AppError::NotFound(format!("blob {}", key)))?;
            std::fs::write(local, data)?;
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.blobs.lock().unwrap().remove(key);
            Ok(())
        }

        async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
            let mut blobs = self.blobs.lock().unwrap();
            let before = blobs.len();
            blobs.retain(|k, _| !k.starts_with(prefix));
            Ok(before - blobs.len())
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .blobs
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        fn url(&self, key: &str) -> String {
            format!("{}/{}", self.base_url, key)
        }
    }
}
