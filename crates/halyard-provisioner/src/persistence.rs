use std::path::PathBuf;

use crate::error::ProvisionerError;
use crate::state::{StateSnapshot, StateStore, STATE_VERSION};

/// State file on local disk.
pub struct StatePersistence {
    pub local_path: PathBuf,
}

impl StatePersistence {
    pub fn new(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
        }
    }

    /// Write the store to disk (atomic: tmp + rename).
    pub async fn flush(&self, store: &StateStore) -> Result<(), ProvisionerError> {
        let json = serde_json::to_vec_pretty(&store.snapshot())?;
        if let Some(parent) = self.local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.local_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.local_path).await?;

        tracing::debug!(path = %self.local_path.display(), "state flushed to local disk");
        Ok(())
    }

    /// Load state, or return an empty snapshot if no file exists yet.
    pub async fn load(&self) -> Result<StateSnapshot, ProvisionerError> {
        let json = match tokio::fs::read(&self.local_path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no existing state found, starting fresh");
                return Ok(StateSnapshot {
                    version: STATE_VERSION,
                    resources: vec![],
                });
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: StateSnapshot = serde_json::from_slice(&json)?;
        if snapshot.version > STATE_VERSION {
            return Err(ProvisionerError::State(format!(
                "state file {} has version {}, newer than supported version {STATE_VERSION}",
                self.local_path.display(),
                snapshot.version
            )));
        }

        tracing::debug!(
            path = %self.local_path.display(),
            resources = snapshot.resources.len(),
            "state loaded from local disk"
        );
        Ok(snapshot)
    }
}
