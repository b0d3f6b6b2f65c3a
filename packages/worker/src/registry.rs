//! File-based registry of supervised worker processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::RegistryError;

/// File name of the registry inside its directory.
pub const REGISTRY_FILE: &str = "workers.json";

/// A worker process started by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    workers: BTreeMap<String, WorkerEntry>,
}

/// Registry of worker processes, persisted as JSON.
///
/// Writes go to a temp file first and are renamed into place, so readers
/// never observe a partially written registry.
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    dir: PathBuf,
}

impl WorkerRegistry {
    /// Registry stored as `workers.json` inside `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    /// All recorded workers, alive or not.
    ///
    /// A missing file is an empty registry. So is an unreadable one; it is
    /// overwritten by the next save.
    pub async fn load(&self) -> Result<Vec<WorkerEntry>, RegistryError> {
        Ok(self.read().await?.workers.into_values().collect())
    }

    /// Record newly started workers alongside the existing ones.
    pub async fn add(
        &self,
        entries: impl IntoIterator<Item = WorkerEntry>,
    ) -> Result<(), RegistryError> {
        let mut file = self.read().await?;
        for entry in entries {
            file.workers.insert(entry.id.clone(), entry);
        }
        self.write(&file).await
    }

    /// Forget every recorded worker.
    pub async fn clear(&self) -> Result<(), RegistryError> {
        self.write(&RegistryFile::default()).await
    }

    async fn read(&self) -> Result<RegistryFile, RegistryError> {
        let path = self.path();
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryFile::default());
            }
            Err(error) => return Err(error.into()),
        };

        match serde_json::from_str(&json) {
            Ok(file) => Ok(file),
            Err(error) => {
                tracing::warn!(?path, %error, "ignoring unreadable worker registry");
                Ok(RegistryFile::default())
            }
        }
    }

    async fn write(&self, file: &RegistryFile) -> Result<(), RegistryError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path();
        let json = serde_json::to_string_pretty(file)?;

        let temp_path = self.dir.join(format!("{REGISTRY_FILE}.tmp"));
        let mut temp = fs::File::create(&temp_path).await?;
        temp.write_all(json.as_bytes()).await?;
        temp.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!(?path, workers = file.workers.len(), "saved worker registry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, pid: u32) -> WorkerEntry {
        WorkerEntry {
            id: id.to_string(),
            pid,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WorkerRegistry::new(dir.path().join("nested"));
        assert!(registry.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_merges_with_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WorkerRegistry::new(dir.path());

        registry.add([entry("worker-a", 10)]).await.unwrap();
        registry
            .add([entry("worker-b", 11), entry("worker-a", 12)])
            .await
            .unwrap();

        let entries = registry.load().await.unwrap();
        let pids: Vec<_> = entries.iter().map(|e| (e.id.as_str(), e.pid)).collect();
        assert_eq!(pids, vec![("worker-a", 12), ("worker-b", 11)]);
        assert!(!dir.path().join("workers.json.tmp").exists());
    }

    #[tokio::test]
    async fn clear_empties_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WorkerRegistry::new(dir.path());
        registry.add([entry("worker-a", 10)]).await.unwrap();

        registry.clear().await.unwrap();
        assert!(registry.load().await.unwrap().is_empty());
        assert!(registry.path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = WorkerRegistry::new(dir.path());
        std::fs::write(registry.path(), "{not json").unwrap();

        assert!(registry.load().await.unwrap().is_empty());
        registry.add([entry("worker-a", 10)]).await.unwrap();
        assert_eq!(registry.load().await.unwrap().len(), 1);
    }
}
