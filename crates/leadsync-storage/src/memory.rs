//! In-process record store standing in for the hosted service in tests.
//!
//! Compiled for this crate's tests and, through the `test-support` feature, for
//! downstream test builds.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use leadsync_core::RemoteRecord;
use serde_json::{Map, Value};

use crate::record_store::{ListQuery, RecordPage, RecordStore, RemoteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    Get,
    Create,
    Update,
    Delete,
    List,
}

/// One observed call, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordCall {
    Get {
        table: String,
        id: String,
    },
    Create {
        table: String,
        records: Vec<Map<String, Value>>,
    },
    Update {
        table: String,
        id: String,
        fields: Map<String, Value>,
    },
    Delete {
        table: String,
        ids: Vec<String>,
    },
    List {
        table: String,
        query: ListQuery,
    },
}

struct PlannedFailure {
    op: RecordOp,
    /// Calls of `op` still allowed through before this failure fires.
    skip: usize,
    error: RemoteError,
}

type FormulaMatcher = Arc<dyn Fn(&str, &RemoteRecord) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    tables: BTreeMap<String, Vec<RemoteRecord>>,
    calls: Vec<RecordCall>,
    failures: VecDeque<PlannedFailure>,
    rejections: Vec<(String, Value)>,
    next_id: usize,
}

/// Records kept per table in insertion order.
///
/// Filter formulas are not interpreted; a matcher closure decides which records
/// a formula selects, and without one every record matches.
#[derive(Clone)]
pub struct MemoryRecordStore {
    state: Arc<Mutex<State>>,
    page_size: usize,
    matcher: Option<FormulaMatcher>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecordStore")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            page_size: 100,
            matcher: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&str, &RemoteRecord) -> bool + Send + Sync + 'static,
    {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the log from the others.
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Insert or replace a record by id.
    pub fn upsert(&self, table: &str, record: RemoteRecord) {
        let mut state = self.state();
        let rows = state.tables.entry(table.to_string()).or_default();
        match rows.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }
    }

    pub fn record(&self, table: &str, id: &str) -> Option<RemoteRecord> {
        self.state()
            .tables
            .get(table)
            .and_then(|rows| rows.iter().find(|r| r.id == id).cloned())
    }

    pub fn records(&self, table: &str) -> Vec<RemoteRecord> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RecordCall> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, op: RecordOp) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| call_op(c) == op)
            .count()
    }

    /// Ids passed to any delete call, flattened.
    pub fn deleted_ids(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                RecordCall::Delete { ids, .. } => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// The next call of kind `op` fails with `error` instead of running.
    pub fn fail_next(&self, op: RecordOp, error: RemoteError) {
        self.fail_after(op, 0, error);
    }

    /// Let `skip` calls of kind `op` run, then fail the one after with `error`.
    pub fn fail_after(&self, op: RecordOp, skip: usize, error: RemoteError) {
        self.state()
            .failures
            .push_back(PlannedFailure { op, skip, error });
    }

    /// Payloads whose `field` equals `value` come back from create without an id.
    pub fn reject_creates_where(&self, field: &str, value: Value) {
        self.state().rejections.push((field.to_string(), value));
    }

    fn begin(&self, call: RecordCall) -> Result<MutexGuard<'_, State>, RemoteError> {
        let op = call_op(&call);
        let mut state = self.state();
        state.calls.push(call);
        if let Some(pos) = state.failures.iter().position(|f| f.op == op) {
            if state.failures[pos].skip > 0 {
                state.failures[pos].skip -= 1;
            } else if let Some(planned) = state.failures.remove(pos) {
                return Err(planned.error);
            }
        }
        Ok(state)
    }
}

fn call_op(call: &RecordCall) -> RecordOp {
    match call {
        RecordCall::Get { .. } => RecordOp::Get,
        RecordCall::Create { .. } => RecordOp::Create,
        RecordCall::Update { .. } => RecordOp::Update,
        RecordCall::Delete { .. } => RecordOp::Delete,
        RecordCall::List { .. } => RecordOp::List,
    }
}

fn project(record: &RemoteRecord, fields: &[String]) -> RemoteRecord {
    if fields.is_empty() {
        return record.clone();
    }
    let mut projected = record.clone();
    projected.fields.retain(|k, _| fields.iter().any(|f| f == k));
    projected
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_record(&self, table: &str, id: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        let state = self.begin(RecordCall::Get {
            table: table.to_string(),
            id: id.to_string(),
        })?;
        Ok(state
            .tables
            .get(table)
            .and_then(|rows| rows.iter().find(|r| r.id == id).cloned()))
    }

    async fn create_records(
        &self,
        table: &str,
        records: Vec<Map<String, Value>>,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        let mut state = self.begin(RecordCall::Create {
            table: table.to_string(),
            records: records.clone(),
        })?;
        let mut created = Vec::with_capacity(records.len());
        for fields in records {
            let rejected = state
                .rejections
                .iter()
                .any(|(field, value)| fields.get(field) == Some(value));
            if rejected {
                created.push(RemoteRecord::new("", fields));
                continue;
            }
            state.next_id += 1;
            let record = RemoteRecord::new(format!("recMem{:05}", state.next_id), fields);
            state
                .tables
                .entry(table.to_string())
                .or_default()
                .push(record.clone());
            created.push(record);
        }
        Ok(created)
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<RemoteRecord, RemoteError> {
        let mut state = self.begin(RecordCall::Update {
            table: table.to_string(),
            id: id.to_string(),
            fields: fields.clone(),
        })?;
        let record = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| RemoteError::HttpStatus {
                status: 404,
                url: format!("memory://{table}/{id}"),
                body: "NOT_FOUND".to_string(),
            })?;
        record.fields.extend(fields);
        Ok(record.clone())
    }

    async fn delete_records(&self, table: &str, ids: &[String]) -> Result<Vec<String>, RemoteError> {
        let mut state = self.begin(RecordCall::Delete {
            table: table.to_string(),
            ids: ids.to_vec(),
        })?;
        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(Vec::new());
        };
        let mut deleted = Vec::new();
        rows.retain(|r| {
            if ids.contains(&r.id) {
                deleted.push(r.id.clone());
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }

    async fn list_records(&self, table: &str, query: &ListQuery) -> Result<RecordPage, RemoteError> {
        let state = self.begin(RecordCall::List {
            table: table.to_string(),
            query: query.clone(),
        })?;
        let matching: Vec<&RemoteRecord> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| match (&query.filter_formula, &self.matcher) {
                        (Some(formula), Some(matcher)) => matcher(formula, r),
                        _ => true,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let start = match &query.offset {
            Some(token) => token.parse::<usize>().map_err(|_| RemoteError::Decode {
                url: format!("memory://{table}"),
                message: format!("bad offset `{token}`"),
            })?,
            None => 0,
        };
        let end = (start + self.page_size).min(matching.len());
        let records = matching
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|r| project(r, &query.fields))
            .collect();
        let offset = (end < matching.len()).then(|| end.to_string());
        Ok(RecordPage { records, offset })
    }
}
