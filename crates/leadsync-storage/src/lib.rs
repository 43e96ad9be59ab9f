//! Storage and remote I/O edges for the lead pipeline.

pub mod airtable;
pub mod candidates;
pub mod lock;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod record_store;
pub mod throttle;
pub mod workbook_file;

pub use airtable::{AirtableClient, AirtableConfig, DEFAULT_API_URL};
pub use candidates::CandidateStore;
pub use lock::RunLock;
#[cfg(any(test, feature = "test-support"))]
pub use memory::{MemoryRecordStore, RecordCall, RecordOp};
pub use record_store::{ListQuery, RecordPage, RecordStore, RemoteError, MAX_BATCH};
pub use throttle::{BackoffPolicy, SlidingWindowLimiter};
pub use workbook_file::{write_atomic, WorkbookFile};

pub const CRATE_NAME: &str = "leadsync-storage";
