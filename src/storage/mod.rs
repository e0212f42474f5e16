use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use object_store::{
    local::LocalFileSystem, memory::InMemory, path::Path as ObjectPath, ObjectMeta, ObjectStore,
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local { path: String },
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            path: "data".to_string(),
        }
    }
}

/// Byte-level document storage shared by the reservation and room stores.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<dyn ObjectStore>,
}

impl Storage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        match config {
            StorageConfig::Local { path } => {
                let root = PathBuf::from(path);
                std::fs::create_dir_all(&root)
                    .with_context(|| format!("create storage directory {}", path))?;
                let store = LocalFileSystem::new_with_prefix(&root)?;
                Ok(Self {
                    inner: Arc::new(store),
                })
            }
            StorageConfig::Memory => Ok(Self::memory()),
        }
    }

    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    fn object_path(&self, path: &str) -> ObjectPath {
        ObjectPath::from(path.trim_start_matches('/'))
    }

    /// Writes are complete (renamed into place for the local backend) when this returns.
    pub async fn write(&self, path: &str, bytes: Bytes) -> Result<()> {
        let object_path = self.object_path(path);
        self.inner.put(&object_path, bytes.into()).await?;
        Ok(())
    }

    pub async fn read(&self, path: &str) -> Result<Bytes> {
        let object_path = self.object_path(path);
        let result = self.inner.get(&object_path).await?;
        let bytes = result.bytes().await?;
        Ok(bytes)
    }

    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectMeta>> {
        let prefix = prefix
            .map(|p| self.object_path(p))
            .unwrap_or_else(|| self.object_path(""));
        let mut stream = self.inner.list(Some(&prefix));
        let mut files = Vec::new();
        while let Some(item) = stream.next().await {
            let meta = item?;
            files.push(meta);
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_storage() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().to_str().unwrap().to_string();

        let config = StorageConfig::Local { path: path.clone() };
        let storage = Storage::new(&config)?;

        let filename = "reservations/CA1234.json";
        let content = br#"{"id":"CA1234"}"#;
        storage.write(filename, Bytes::from_static(content)).await?;

        let read_content = storage.read(filename).await?;
        assert_eq!(read_content, Bytes::from_static(content));
        assert!(dir.path().join(filename).exists());

        let files = storage.list(Some("reservations")).await?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].location.as_ref(), filename);

        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_namespaces() -> Result<()> {
        let storage = Storage::new(&StorageConfig::Memory)?;

        storage
            .write("rooms/1000.json", Bytes::from_static(b"{}"))
            .await?;
        storage
            .write("reservations/CA1.json", Bytes::from_static(b"{}"))
            .await?;

        assert_eq!(storage.list(Some("rooms")).await?.len(), 1);
        assert_eq!(storage.list(None).await?.len(), 2);
        Ok(())
    }
}
