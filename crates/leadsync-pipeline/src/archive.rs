//! Month-scoped export of closed leads and their activities into archive sheets,
//! optionally followed by removal from the remote store.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{Datelike, Months, NaiveDate};
use leadsync_core::{RemoteRecord, RowStore};
use leadsync_storage::{ListQuery, RecordStore, RemoteError, MAX_BATCH};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{pause, Layout, Pacing, RemoteLayout};
use crate::error::{PipelineError, Result};
use crate::report::OperationSummary;
use crate::Confirm;

/// Lead ids per linked-activity lookup; keeps the filter formula short.
pub const ACTIVITY_LOOKUP_BATCH: usize = 15;

static MONTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-(0[1-9]|1[0-2])$").expect("valid regex"));

/// A calendar month, parsed from `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveMonth {
    first: NaiveDate,
}

impl ArchiveMonth {
    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    /// First day of the following month; the exclusive end of the range.
    pub fn next_month(&self) -> NaiveDate {
        self.first + Months::new(1)
    }
}

impl FromStr for ArchiveMonth {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || PipelineError::InvalidMonth(s.to_string());
        if !MONTH_RE.is_match(s) {
            return Err(invalid());
        }
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        Ok(Self { first })
    }
}

impl fmt::Display for ArchiveMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.first.year(), self.first.month())
    }
}

/// Closed leads whose close date falls in `[first day, next month)`.
///
/// `IS_AFTER` is strict, so the lower bound is the last day of the previous month.
pub fn closed_leads_formula(remote: &RemoteLayout, month: &ArchiveMonth) -> String {
    let after = month.first_day().pred_opt().unwrap_or(month.first_day());
    format!(
        "AND(FIND(\"Closed\", {{{stage}}}), IS_AFTER({{{closed}}}, '{after}'), IS_BEFORE({{{closed}}}, '{next}'))",
        stage = remote.activity.stage,
        closed = remote.date_closed_field,
        after = after.format("%Y-%m-%d"),
        next = month.next_month().format("%Y-%m-%d"),
    )
}

/// Activities linked to any of `lead_ids` through `link_field`.
pub fn linked_activities_formula(link_field: &str, lead_ids: &[String]) -> String {
    let clauses: Vec<String> = lead_ids
        .iter()
        .map(|id| format!("FIND(\"{id}\", ARRAYJOIN({{{link_field}}}))"))
        .collect();
    format!("OR({})", clauses.join(", "))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `recordId`, `createdTime`, then each field; non-scalar values become JSON text.
pub fn flatten(record: &RemoteRecord) -> Vec<(String, String)> {
    let mut cells = Vec::with_capacity(record.fields.len() + 2);
    cells.push(("recordId".to_string(), record.id.clone()));
    cells.push((
        "createdTime".to_string(),
        record.created_time.clone().unwrap_or_default(),
    ));
    cells.extend(
        record
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), cell_text(value))),
    );
    cells
}

/// Headers for a new archive sheet: the two fixed columns, then every field name sorted.
pub fn archive_headers(records: &[RemoteRecord]) -> Vec<String> {
    let fields: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();
    ["recordId", "createdTime"]
        .into_iter()
        .chain(fields)
        .map(str::to_string)
        .collect()
}

/// Append `records` to `sheet`, creating it when missing. Existing sheets keep their
/// header order and gain a column at the end for every field they lack, so nothing
/// exported is left out. Returns rows written.
pub fn write_records<S: RowStore + ?Sized>(
    store: &mut S,
    sheet: &str,
    records: &[RemoteRecord],
) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    let headers = match store.snapshot(sheet) {
        Some(snapshot) => extend_headers(store, sheet, snapshot.headers().to_vec(), records)?,
        None => {
            let headers = archive_headers(records);
            store.create_sheet(sheet, headers.clone())?;
            info!(sheet, columns = headers.len(), "archive sheet created");
            headers
        }
    };

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|record| {
            let mut row = vec![String::new(); headers.len()];
            for (name, text) in flatten(record) {
                if let Some(col) = headers.iter().position(|h| *h == name) {
                    row[col] = text;
                }
            }
            row
        })
        .collect();

    let written = rows.len();
    store.append_rows(sheet, rows)?;
    info!(sheet, rows = written, "records archived");
    Ok(written)
}

/// Write a header cell after the last existing one for each flattened name not yet present.
fn extend_headers<S: RowStore + ?Sized>(
    store: &mut S,
    sheet: &str,
    mut headers: Vec<String>,
    records: &[RemoteRecord],
) -> Result<Vec<String>> {
    let mut added = Vec::new();
    for record in records {
        for (name, _) in flatten(record) {
            if !headers.contains(&name) {
                store.set_cell(sheet, 1, headers.len(), &name)?;
                headers.push(name.clone());
                added.push(name);
            }
        }
    }
    if !added.is_empty() {
        info!(sheet, columns = ?added, "archive sheet extended with new columns");
    }
    Ok(headers)
}

async fn list_all(
    remote: &dyn RecordStore,
    table: &str,
    query: ListQuery,
    page_pause: Duration,
) -> std::result::Result<Vec<RemoteRecord>, RemoteError> {
    let mut records = Vec::new();
    let mut query = query;
    loop {
        let page = remote.list_records(table, &query).await?;
        records.extend(page.records);
        match page.offset {
            Some(offset) => {
                query = query.at_offset(Some(offset));
                pause(page_pause).await;
            }
            None => return Ok(records),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveMode {
    DryRun,
    Live,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub month: String,
    pub mode: ArchiveMode,
    pub leads_found: usize,
    pub activities_found: usize,
    pub leads_written: usize,
    pub activities_written: usize,
    pub leads_deleted: usize,
    pub activities_deleted: usize,
    pub failed_batches: usize,
    pub cancelled: bool,
}

impl ArchiveSummary {
    fn new(month: &ArchiveMonth, mode: ArchiveMode) -> Self {
        Self {
            month: month.to_string(),
            mode,
            leads_found: 0,
            activities_found: 0,
            leads_written: 0,
            activities_written: 0,
            leads_deleted: 0,
            activities_deleted: 0,
            failed_batches: 0,
            cancelled: false,
        }
    }
}

impl OperationSummary for ArchiveSummary {
    const OPERATION: &'static str = "archive";

    fn lines(&self) -> Vec<String> {
        if self.cancelled {
            return vec![format!("Archive of {} cancelled by operator", self.month)];
        }
        let mut lines = vec![
            format!("Month: {} ({:?})", self.month, self.mode),
            format!("Closed leads found: {}", self.leads_found),
            format!("Linked activities found: {}", self.activities_found),
            format!("Leads archived: {}", self.leads_written),
            format!("Activities archived: {}", self.activities_written),
        ];
        if self.mode == ArchiveMode::Live {
            lines.push(format!("Activities deleted: {}", self.activities_deleted));
            lines.push(format!("Leads deleted: {}", self.leads_deleted));
            lines.push(format!("Failed delete batches: {}", self.failed_batches));
        }
        lines
    }
}

async fn delete_in_chunks(
    remote: &dyn RecordStore,
    table: &str,
    ids: &[String],
    pacing: &Pacing,
    failed_batches: &mut usize,
) -> usize {
    let mut deleted = 0;
    for (i, chunk) in ids.chunks(MAX_BATCH).enumerate() {
        if i > 0 {
            pause(pacing.chunk_pause).await;
        }
        match remote.delete_records(table, chunk).await {
            Ok(ids) => deleted += ids.len(),
            Err(err) => {
                warn!(table, batch = i + 1, error = %err, "delete batch failed; continuing");
                *failed_batches += 1;
                if err.is_rate_limited() {
                    pause(pacing.rate_limit_backoff).await;
                }
            }
        }
    }
    info!(table, deleted, requested = ids.len(), "bulk delete finished");
    deleted
}

/// Export a month of closed leads and their activities; in live mode remove them
/// from the remote store afterwards, activities first.
pub async fn archive<S: RowStore + ?Sized>(
    store: &mut S,
    remote: &dyn RecordStore,
    layout: &Layout,
    month: ArchiveMonth,
    mode: ArchiveMode,
    pacing: &Pacing,
    confirm: &dyn Confirm,
) -> Result<ArchiveSummary> {
    let mut summary = ArchiveSummary::new(&month, mode);
    if mode == ArchiveMode::Live {
        let prompt = format!(
            "Archive and permanently delete all closed leads from {month} and their activities?"
        );
        if !confirm.confirm(&prompt) {
            info!(%month, "archive cancelled by operator");
            summary.cancelled = true;
            return Ok(summary);
        }
    }

    let rl = &layout.remote;
    let formula = closed_leads_formula(rl, &month);
    info!(%month, formula = %formula, "fetching closed leads");
    let leads = list_all(remote, &rl.leads_table, ListQuery::filtered(formula), pacing.page_pause).await?;
    summary.leads_found = leads.len();
    if leads.is_empty() {
        info!(%month, "no closed leads in range");
        return Ok(summary);
    }

    let lead_ids: Vec<String> = leads.iter().map(|r| r.id.clone()).collect();
    let mut seen = HashSet::new();
    let mut activities = Vec::new();
    for (i, batch) in lead_ids.chunks(ACTIVITY_LOOKUP_BATCH).enumerate() {
        if i > 0 {
            pause(pacing.page_pause).await;
        }
        let query = ListQuery::filtered(linked_activities_formula(&rl.lead_link_field, batch));
        for record in list_all(remote, &rl.activities_table, query, pacing.page_pause).await? {
            if seen.insert(record.id.clone()) {
                activities.push(record);
            }
        }
    }
    summary.activities_found = activities.len();
    info!(leads = leads.len(), activities = activities.len(), "archive set collected");

    summary.leads_written = write_records(store, &layout.sheets.archived_leads, &leads)?;
    summary.activities_written =
        write_records(store, &layout.sheets.archived_activities, &activities)?;

    if mode == ArchiveMode::DryRun {
        info!(%month, "dry run; remote records left in place");
        return Ok(summary);
    }

    let activity_ids: Vec<String> = activities.iter().map(|r| r.id.clone()).collect();
    summary.activities_deleted = delete_in_chunks(
        remote,
        &rl.activities_table,
        &activity_ids,
        pacing,
        &mut summary.failed_batches,
    )
    .await;
    summary.leads_deleted = delete_in_chunks(
        remote,
        &rl.leads_table,
        &lead_ids,
        pacing,
        &mut summary.failed_batches,
    )
    .await;
    Ok(summary)
}
