//! Core domain model for the lead pipeline: rows, headers, status state and remote records.

pub mod candidate;
pub mod header;
pub mod lead;
pub mod remote;
pub mod resolve;
pub mod status;
pub mod workbook;

pub use candidate::{Candidate, CandidateList};
pub use header::{normalize_header, HeaderMap};
pub use lead::{normalize_name, OverrideAction};
pub use remote::{ActivityFields, ActivitySignal, RemoteAssessment, RemoteRecord};
pub use resolve::{ColumnResolver, ResolveStrategy, ResolvedColumn};
pub use status::{extract_remote_id, is_already_processed, is_sent_status, LeadStatus};
pub use workbook::{RowStore, RowStoreError, SheetSnapshot, Workbook};

pub const CRATE_NAME: &str = "leadsync-core";
