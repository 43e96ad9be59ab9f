//! Persistence for the reconciler's candidate list between discovery and deletion.

use std::path::{Path, PathBuf};

use anyhow::Context;
use leadsync_core::CandidateList;
use tokio::fs;

use crate::workbook_file::write_atomic;

const FILE_NAME: &str = "candidates.json";

#[derive(Debug, Clone)]
pub struct CandidateStore {
    path: PathBuf,
}

impl CandidateStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace whatever list was stored before.
    pub async fn save(&self, list: &CandidateList) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(list).context("serializing candidate list")?;
        write_atomic(&self.path, &bytes).await
    }

    pub async fn load(&self) -> anyhow::Result<Option<CandidateList>> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking {}", self.path.display()))?
        {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let list = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(list))
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}
