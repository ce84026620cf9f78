use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{validate_handle, Directory, DirectoryError, Entries};

/// Directory stored as a JSON file on the local disk. A missing file is an
/// empty directory.
#[derive(Debug)]
pub struct JsonFileDirectory {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn entries(&self) -> Result<Entries, DirectoryError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No directory file at {}, treating as empty", self.path.display());
                Ok(Entries::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, entries: &Entries) -> Result<(), DirectoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(entries)?;
        // Readers see the old file or the new one, never a partial write.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Directory for JsonFileDirectory {
    async fn lookup(&self, handle: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self.entries().await?.remove(handle))
    }

    async fn register(&self, handle: &str, address: &str) -> Result<(), DirectoryError> {
        validate_handle(handle)?;
        let _guard = self.write_lock.lock().await;
        let mut entries = self.entries().await?;
        entries.insert(handle.to_string(), address.to_string());
        self.store(&entries).await?;
        info!("Registered {} -> {} in {}", handle, address, self.path.display());
        Ok(())
    }
}
