// Deployment Loader
// Persistent store for a deployment's journal and its bound artifacts

use crate::artifacts::Artifact;
use crate::journal::{FileJournal, Journal, MemoryJournal};

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No artifact stored for future: {0}")]
    ArtifactNotStored(String),

    #[error("Invalid stored artifact: {0}")]
    Json(#[from] serde_json::Error),
}

/// Access to a deployment's durable records
#[async_trait::async_trait]
pub trait DeploymentLoader: Send + Sync {
    fn journal(&self) -> &dyn Journal;

    /// Record the artifact a future was bound to
    async fn store_artifact(&self, future_id: &str, artifact: &Artifact) -> Result<(), LoaderError>;

    async fn load_artifact(&self, future_id: &str) -> Result<Artifact, LoaderError>;
}

/// Deployment stored in a directory:
///
/// ```text
/// <dir>/journal.jsonl
/// <dir>/artifacts/<future id>.json
/// ```
pub struct FileDeploymentLoader {
    dir: PathBuf,
    journal: FileJournal,
}

impl FileDeploymentLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let journal = FileJournal::new(dir.join("journal.jsonl"));
        Self { dir, journal }
    }

    /// Loader for a named deployment under the default root
    pub fn for_deployment(name: &str) -> Self {
        Self::new(Self::default_root().join(name))
    }

    /// Default deployments directory (~/.ignition/deployments)
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ignition")
            .join("deployments")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Distinct future ids always map to distinct files
    fn artifact_path(&self, future_id: &str) -> PathBuf {
        let mut file_name = String::with_capacity(future_id.len());
        for byte in future_id.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'#') {
                file_name.push(char::from(byte));
            } else {
                file_name.push_str(&format!("%{:02X}", byte));
            }
        }
        self.dir.join("artifacts").join(format!("{}.json", file_name))
    }
}

#[async_trait::async_trait]
impl DeploymentLoader for FileDeploymentLoader {
    fn journal(&self) -> &dyn Journal {
        &self.journal
    }

    async fn store_artifact(&self, future_id: &str, artifact: &Artifact) -> Result<(), LoaderError> {
        let path = self.artifact_path(future_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_vec_pretty(artifact)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    async fn load_artifact(&self, future_id: &str) -> Result<Artifact, LoaderError> {
        let path = self.artifact_path(future_id);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LoaderError::ArtifactNotStored(future_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }
}

/// Deployment kept in memory
#[derive(Default)]
pub struct MemoryDeploymentLoader {
    journal: MemoryJournal,
    artifacts: Arc<RwLock<HashMap<String, Artifact>>>,
}

impl MemoryDeploymentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_journal(&self) -> &MemoryJournal {
        &self.journal
    }
}

#[async_trait::async_trait]
impl DeploymentLoader for MemoryDeploymentLoader {
    fn journal(&self) -> &dyn Journal {
        &self.journal
    }

    async fn store_artifact(&self, future_id: &str, artifact: &Artifact) -> Result<(), LoaderError> {
        self.artifacts
            .write()
            .await
            .insert(future_id.to_string(), artifact.clone());
        Ok(())
    }

    async fn load_artifact(&self, future_id: &str) -> Result<Artifact, LoaderError> {
        self.artifacts
            .read()
            .await
            .get(future_id)
            .cloned()
            .ok_or_else(|| LoaderError::ArtifactNotStored(future_id.to_string()))
    }
}
