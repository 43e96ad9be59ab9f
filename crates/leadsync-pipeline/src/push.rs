//! Sync state machine: qualified rows to remote records, plus lookup-based verification.

use chrono::NaiveDate;
use leadsync_core::{is_already_processed, LeadStatus, RowStore};
use leadsync_storage::{ListQuery, RecordStore, MAX_BATCH};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{build_payload, pause, Layout, Pacing};
use crate::error::{PipelineError, Result};
use crate::report::OperationSummary;
use crate::selection::RowSelection;

static AMPERSAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*&\s*").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushOutcome {
    Sent,
    SkippedByFlag,
    AlreadyProcessed,
    MissingName,
    /// The store answered but returned no id for this row.
    Error,
    /// The batch call failed outright.
    ApiError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushEntry {
    pub row: usize,
    pub outcome: PushOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PushSummary {
    pub sent: usize,
    /// Missing names, rows without an id, and rows in failed batches.
    pub failed: usize,
    pub already_processed: usize,
    pub skipped_by_flag: usize,
    /// Header of the column the skip flag was read from, if any was found.
    pub override_column: Option<String>,
    pub entries: Vec<PushEntry>,
}

impl PushSummary {
    fn record(&mut self, row: usize, outcome: PushOutcome, remote_id: Option<String>) {
        match outcome {
            PushOutcome::Sent => self.sent += 1,
            PushOutcome::SkippedByFlag => self.skipped_by_flag += 1,
            PushOutcome::AlreadyProcessed => self.already_processed += 1,
            PushOutcome::MissingName | PushOutcome::Error | PushOutcome::ApiError => {
                self.failed += 1
            }
        }
        self.entries.push(PushEntry {
            row,
            outcome,
            remote_id,
        });
    }

    pub fn outcome_of(&self, row: usize) -> Option<PushOutcome> {
        self.entries.iter().find(|e| e.row == row).map(|e| e.outcome)
    }
}

impl OperationSummary for PushSummary {
    const OPERATION: &'static str = "push";

    fn lines(&self) -> Vec<String> {
        vec![
            format!("Successfully sent: {}", self.sent),
            format!("Failed: {}", self.failed),
            format!("Skipped (already processed): {}", self.already_processed),
            format!("Skipped (marked as 'skip'): {}", self.skipped_by_flag),
        ]
    }
}

struct Queued {
    row: usize,
    fields: Map<String, Value>,
}

/// Push the selected qualify rows to the remote leads table.
///
/// Each row passes three guards in order: the skip flag, then the status text, then
/// the name. Survivors are created in batches and their status cell records the result.
pub async fn push<S: RowStore + ?Sized>(
    store: &mut S,
    remote: &dyn RecordStore,
    layout: &Layout,
    selection: RowSelection,
    today: NaiveDate,
    pacing: &Pacing,
) -> Result<PushSummary> {
    let sheet = &layout.sheets.qualify;
    let snapshot = store
        .snapshot(sheet)
        .ok_or_else(|| PipelineError::MissingSheet(sheet.clone()))?;
    let headers = snapshot.header_map();
    let name_col = headers
        .get(&layout.columns.name)
        .ok_or_else(|| PipelineError::missing_column(sheet, &layout.columns.name))?;
    let status_col = headers
        .get(&layout.columns.status)
        .ok_or_else(|| PipelineError::missing_column(sheet, &layout.columns.status))?;
    let rows = selection.data_rows(snapshot.last_row())?;

    let flag = layout.override_column.resolve(&headers);
    match &flag {
        Some(col) => info!(header = %col.header, strategy = col.strategy, "override column resolved"),
        None => warn!(sheet = %sheet, "no override column found; skip flags disabled for this batch"),
    }

    let mut summary = PushSummary {
        override_column: flag.as_ref().map(|c| c.header.clone()),
        ..PushSummary::default()
    };
    let mut queued = Vec::new();

    for row in rows {
        let cell = |col: usize| snapshot.cell(row, col);

        if let Some(flag) = &flag {
            if cell(flag.index).trim().eq_ignore_ascii_case("skip") {
                info!(row, "skipping row flagged 'skip'");
                summary.record(row, PushOutcome::SkippedByFlag, None);
                continue;
            }
        }
        if is_already_processed(cell(status_col)) {
            summary.record(row, PushOutcome::AlreadyProcessed, None);
            continue;
        }
        if cell(name_col).trim().is_empty() {
            warn!(row, "skipping row with missing company name");
            summary.record(row, PushOutcome::MissingName, None);
            continue;
        }

        let cells = snapshot.row(row).unwrap_or(&[]);
        queued.push(Queued {
            row,
            fields: build_payload(&layout.field_mapping, &headers, cells, today),
        });
    }

    if queued.is_empty() {
        info!(
            already_processed = summary.already_processed,
            skipped_by_flag = summary.skipped_by_flag,
            "no new leads to send"
        );
        return Ok(summary);
    }

    let table = &layout.remote.leads_table;
    for (batch_no, batch) in queued.chunks(MAX_BATCH).enumerate() {
        if batch_no > 0 {
            pause(pacing.chunk_pause).await;
        }
        let payload: Vec<_> = batch.iter().map(|q| q.fields.clone()).collect();
        let span = info_span!("create_batch", batch_no, size = batch.len());
        match remote.create_records(table, payload).instrument(span).await {
            Ok(created) => {
                for (idx, item) in batch.iter().enumerate() {
                    let id = created.get(idx).filter(|r| r.has_id()).map(|r| r.id.clone());
                    match id {
                        Some(id) => {
                            let status = LeadStatus::sent(today, id.clone());
                            store.set_cell(sheet, item.row, status_col, &status.encode())?;
                            summary.record(item.row, PushOutcome::Sent, Some(id));
                        }
                        None => {
                            let status = LeadStatus::Error { date: today };
                            store.set_cell(sheet, item.row, status_col, &status.encode())?;
                            summary.record(item.row, PushOutcome::Error, None);
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, batch_no, "create batch failed");
                let status = LeadStatus::ApiError { date: today }.encode();
                for item in batch {
                    store.set_cell(sheet, item.row, status_col, &status)?;
                    summary.record(item.row, PushOutcome::ApiError, None);
                }
                if err.is_rate_limited() {
                    pause(pacing.rate_limit_backoff).await;
                }
            }
        }
    }

    info!(
        sent = summary.sent,
        failed = summary.failed,
        already_processed = summary.already_processed,
        skipped_by_flag = summary.skipped_by_flag,
        "push complete"
    );
    Ok(summary)
}

/// Formula matching a company name the way the remote side normalizes it:
/// trimmed, lowercased, `&` spelled `and`.
pub fn name_match_formula(field: &str, company_name: &str) -> String {
    let normalized = company_name.trim().to_lowercase();
    let normalized = AMPERSAND_RE.replace_all(&normalized, " and ");
    let escaped = normalized.replace('"', "\\\"");
    format!(r#"TRIM(LOWER(SUBSTITUTE({{{field}}},"&","and"))) = "{escaped}""#)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifySummary {
    pub verified: usize,
    pub not_found: usize,
    pub already_processed: usize,
    pub missing_name: usize,
    pub errors: usize,
}

impl OperationSummary for VerifySummary {
    const OPERATION: &'static str = "verify";

    fn lines(&self) -> Vec<String> {
        vec![
            format!("Found & Verified: {}", self.verified),
            format!("Not Found: {}", self.not_found),
            format!("Skipped (already processed): {}", self.already_processed),
            format!("Skipped (missing name): {}", self.missing_name),
            format!("Errors: {}", self.errors),
        ]
    }
}

/// Look up unsent qualify rows in the remote store by name and mark the ones that exist.
pub async fn verify<S: RowStore + ?Sized>(
    store: &mut S,
    remote: &dyn RecordStore,
    layout: &Layout,
    selection: RowSelection,
    today: NaiveDate,
    pacing: &Pacing,
) -> Result<VerifySummary> {
    let sheet = &layout.sheets.qualify;
    let snapshot = store
        .snapshot(sheet)
        .ok_or_else(|| PipelineError::MissingSheet(sheet.clone()))?;
    let headers = snapshot.header_map();
    let name_col = headers
        .get(&layout.columns.name)
        .ok_or_else(|| PipelineError::missing_column(sheet, &layout.columns.name))?;
    let status_col = headers
        .get(&layout.columns.status)
        .ok_or_else(|| PipelineError::missing_column(sheet, &layout.columns.status))?;
    let rows = selection.data_rows(snapshot.last_row())?;

    let mut summary = VerifySummary::default();
    for row in rows {
        if is_already_processed(snapshot.cell(row, status_col)) {
            summary.already_processed += 1;
            continue;
        }
        let name = snapshot.cell(row, name_col).trim();
        if name.is_empty() {
            summary.missing_name += 1;
            continue;
        }

        let query = ListQuery::filtered(name_match_formula(
            &layout.remote.company_name_field,
            name,
        ));
        match remote.list_records(&layout.remote.leads_table, &query).await {
            Ok(page) => match page.records.into_iter().find(|r| r.has_id()) {
                Some(record) => {
                    let status = LeadStatus::verified(today, record.id);
                    store.set_cell(sheet, row, status_col, &status.encode())?;
                    summary.verified += 1;
                }
                None => summary.not_found += 1,
            },
            Err(err) => {
                warn!(row, name, error = %err, "verification lookup failed");
                let status = LeadStatus::ApiError { date: today };
                store.set_cell(sheet, row, status_col, &status.encode())?;
                summary.errors += 1;
                if err.is_rate_limited() {
                    pause(pacing.rate_limit_backoff).await;
                }
            }
        }
    }

    info!(
        verified = summary.verified,
        not_found = summary.not_found,
        errors = summary.errors,
        "verify complete"
    );
    Ok(summary)
}
