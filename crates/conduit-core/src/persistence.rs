use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use conduit_types::{Artifact, Run};
use tokio::fs;
use tokio::sync::RwLock;

/// Durable storage for `Run` records, independent of the in-memory `Dispatcher`/
/// `EventStream`. A single implementation backs every deployment of this crate; the
/// trait exists so tests can swap in an in-memory double without touching disk.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, run: &Run) -> anyhow::Result<()>;
    async fn load(&self, run_id: &str) -> anyhow::Result<Option<Run>>;
    async fn list_by_tenant(&self, tenant_id: &str) -> anyhow::Result<Vec<Run>>;
    async fn delete(&self, run_id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, artifact: &Artifact, bytes: &[u8]) -> anyhow::Result<()>;
    async fn load_metadata(&self, artifact_id: &str) -> anyhow::Result<Option<Artifact>>;
    async fn load_bytes(&self, artifact_id: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// File-backed `RunStore`: an in-memory `RwLock<HashMap>` mirrored to
/// `{base}/runs.json` on every write. Loads the whole file once at startup; later
/// reads never touch disk. Simple, and sufficient at the scale this crate targets —
/// a real multi-node deployment would swap this for a database-backed implementation
/// behind the same trait.
pub struct FileRunStore {
    base: PathBuf,
    runs: RwLock<HashMap<String, Run>>,
}

impl FileRunStore {
    pub async fn new(base: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        let runs_file = base.join("runs.json");
        let runs = if runs_file.exists() {
            let raw = fs::read_to_string(&runs_file).await?;
            serde_json::from_str::<HashMap<String, Run>>(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self { base, runs: RwLock::new(runs) })
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let runs = self.runs.read().await;
        let payload = serde_json::to_string_pretty(&*runs)?;
        fs::write(self.base.join("runs.json"), payload).await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, run: &Run) -> anyhow::Result<()> {
        self.runs.write().await.insert(run.id.clone(), run.clone());
        self.flush().await
    }

    async fn load(&self, run_id: &str) -> anyhow::Result<Option<Run>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> anyhow::Result<Vec<Run>> {
        Ok(self.runs.read().await.values().filter(|run| run.tenant_id == tenant_id).cloned().collect())
    }

    async fn delete(&self, run_id: &str) -> anyhow::Result<()> {
        self.runs.write().await.remove(run_id);
        self.flush().await
    }
}

/// File-backed `ArtifactStore`: content-addressed by the SHA-256 of the bytes
/// (§3 Data Model — `Artifact` is content-addressed), metadata mirrored to
/// `{base}/artifacts.json` the same way `FileRunStore` mirrors runs.
pub struct FileArtifactStore {
    base: PathBuf,
    metadata: RwLock<HashMap<String, Artifact>>,
}

impl FileArtifactStore {
    pub async fn new(base: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(base.join("blobs")).await?;
        let metadata_file = base.join("artifacts.json");
        let metadata = if metadata_file.exists() {
            let raw = fs::read_to_string(&metadata_file).await?;
            serde_json::from_str::<HashMap<String, Artifact>>(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self { base, metadata: RwLock::new(metadata) })
    }

    pub fn content_hash(bytes: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    async fn flush_metadata(&self) -> anyhow::Result<()> {
        let metadata = self.metadata.read().await;
        let payload = serde_json::to_string_pretty(&*metadata)?;
        fs::write(self.base.join("artifacts.json"), payload).await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save(&self, artifact: &Artifact, bytes: &[u8]) -> anyhow::Result<()> {
        let content_hash = Self::content_hash(bytes);
        fs::write(self.base.join("blobs").join(&content_hash), bytes).await?;
        self.metadata.write().await.insert(artifact.id.clone(), artifact.clone());
        self.flush_metadata().await
    }

    async fn load_metadata(&self, artifact_id: &str) -> anyhow::Result<Option<Artifact>> {
        Ok(self.metadata.read().await.get(artifact_id).cloned())
    }

    async fn load_bytes(&self, artifact_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(artifact) = self.metadata.read().await.get(artifact_id).cloned() else {
            return Ok(None);
        };
        let content_hash = artifact
            .storage_path
            .rsplit('/')
            .next()
            .ok_or_else(|| anyhow::anyhow!("malformed storage_path on artifact {}", artifact_id))?;
        let bytes = fs::read(self.base.join("blobs").join(content_hash)).await?;
        Ok(Some(bytes))
    }
}

pub type SharedRunStore = Arc<dyn RunStore>;
pub type SharedArtifactStore = Arc<dyn ArtifactStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::RunConfig;

    #[tokio::test]
    async fn save_then_load_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).await.unwrap();
        let run = Run::new("run-1".to_string(), "tenant-1".to_string(), "user-1".to_string(), "do x".to_string(), RunConfig::default());
        store.save(&run).await.unwrap();

        let reopened = FileRunStore::new(dir.path()).await.unwrap();
        let loaded = reopened.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "run-1");
        assert_eq!(loaded.tenant_id, "tenant-1");
    }

    #[tokio::test]
    async fn list_by_tenant_filters_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).await.unwrap();
        store.save(&Run::new("run-1".to_string(), "tenant-a".to_string(), "u".to_string(), "p".to_string(), RunConfig::default())).await.unwrap();
        store.save(&Run::new("run-2".to_string(), "tenant-b".to_string(), "u".to_string(), "p".to_string(), RunConfig::default())).await.unwrap();
        let runs = store.list_by_tenant("tenant-a").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, "run-1");
    }

    #[tokio::test]
    async fn delete_removes_from_disk_too() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).await.unwrap();
        let run = Run::new("run-1".to_string(), "tenant-1".to_string(), "user-1".to_string(), "do x".to_string(), RunConfig::default());
        store.save(&run).await.unwrap();
        store.delete("run-1").await.unwrap();

        let reopened = FileRunStore::new(dir.path()).await.unwrap();
        assert!(reopened.load("run-1").await.unwrap().is_none());
    }
}
