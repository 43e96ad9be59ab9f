//! The remote record store seam.

use async_trait::async_trait;
use leadsync_core::RemoteRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Largest record count accepted by one bulk create or bulk delete call.
pub const MAX_BATCH: usize = 10;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("rate limited by remote store at {url}")]
    RateLimited { url: String },
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("missing credential `{0}`")]
    MissingCredential(&'static str),
    #[error("invalid remote url: {0}")]
    InvalidUrl(String),
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Parameters of one paged list call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub filter_formula: Option<String>,
    /// Fields to return; empty means all.
    pub fields: Vec<String>,
    /// Continuation token from the previous page.
    pub offset: Option<String>,
}

impl ListQuery {
    pub fn filtered(formula: impl Into<String>) -> Self {
        Self {
            filter_formula: Some(formula.into()),
            ..Self::default()
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn at_offset(&self, offset: Option<String>) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

/// CRUD surface of the remote store, one table at a time.
///
/// `create_records` returns one entry per accepted payload in request order; an
/// entry without an id means the store did not create that record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, table: &str, id: &str) -> Result<Option<RemoteRecord>, RemoteError>;

    async fn create_records(
        &self,
        table: &str,
        records: Vec<Map<String, Value>>,
    ) -> Result<Vec<RemoteRecord>, RemoteError>;

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<RemoteRecord, RemoteError>;

    /// Returns the ids the store reports as deleted.
    async fn delete_records(&self, table: &str, ids: &[String]) -> Result<Vec<String>, RemoteError>;

    async fn list_records(&self, table: &str, query: &ListQuery) -> Result<RecordPage, RemoteError>;
}
