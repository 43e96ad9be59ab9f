use std::path::PathBuf;

use chrono::{DateTime, Utc};
use leadsync_core::RowStoreError;
use leadsync_storage::RemoteError;
use thiserror::Error;
use uuid::Uuid;

/// Failures that abort a whole operation. Row-level problems are counted in the
/// operation summary instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("sheet `{0}` not found")]
    MissingSheet(String),
    #[error("required column `{column}` not found in row 1 of `{sheet}`")]
    MissingColumn { sheet: String, column: String },
    #[error("select data rows, not only the header row")]
    HeaderOnlySelection,
    #[error("selection `{0}` contains no data rows")]
    EmptySelection(String),
    #[error("invalid row selection `{0}`; use `N` or `START:END`")]
    InvalidSelection(String),
    #[error("invalid archive month `{0}`; use YYYY-MM")]
    InvalidMonth(String),
    #[error("remote store credential `{0}` is not configured")]
    MissingCredential(&'static str),
    #[error("no candidate list found; run identify first")]
    NoCandidates,
    #[error("candidate list {id} expired at {expires_at}; run identify again")]
    CandidatesExpired { id: Uuid, expires_at: DateTime<Utc> },
    #[error("another run holds the lock at {0}")]
    LockBusy(PathBuf),
    #[error(transparent)]
    RowStore(#[from] RowStoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn missing_column(sheet: &str, column: &str) -> Self {
        Self::MissingColumn {
            sheet: sheet.to_string(),
            column: column.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
