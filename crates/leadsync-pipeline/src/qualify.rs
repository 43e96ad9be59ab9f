//! Raw-to-qualify transfer with cross-source deduplication.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use leadsync_core::{normalize_name, RowStore};
use leadsync_storage::RecordStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Layout, Pacing};
use crate::dedup::{optional_sheet_names, remote_names, sheet_names, DedupIndex, DuplicateSource};
use crate::error::{PipelineError, Result};
use crate::report::OperationSummary;
use crate::selection::RowSelection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferOutcome {
    Transferred,
    AlreadySent,
    InQualify,
    InArchive,
    InLegacy,
    InRemote,
    DuplicateInRaw,
    MissingName,
}

impl TransferOutcome {
    /// Operator-facing reason, also written into the notes column.
    pub fn reason(self) -> Option<&'static str> {
        match self {
            Self::Transferred => None,
            Self::AlreadySent => Some("Already marked as sent"),
            Self::InQualify => Some("Found in Qualify Sheet"),
            Self::InArchive => Some("Found in Archive"),
            Self::InLegacy => Some("Found in legacy Height data"),
            Self::InRemote => Some("Found in Airtable"),
            Self::DuplicateInRaw => Some("Duplicate in this selection"),
            Self::MissingName => Some("Missing company name"),
        }
    }
}

impl From<DuplicateSource> for TransferOutcome {
    fn from(source: DuplicateSource) -> Self {
        match source {
            DuplicateSource::InQualify => Self::InQualify,
            DuplicateSource::InArchive => Self::InArchive,
            DuplicateSource::InLegacy => Self::InLegacy,
            DuplicateSource::InRemote => Self::InRemote,
            DuplicateSource::DuplicateInRaw => Self::DuplicateInRaw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEntry {
    pub row: usize,
    pub name: String,
    pub outcome: TransferOutcome,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferSummary {
    pub entries: Vec<TransferEntry>,
    pub counts: BTreeMap<TransferOutcome, usize>,
}

impl TransferSummary {
    pub fn count(&self, outcome: TransferOutcome) -> usize {
        self.counts.get(&outcome).copied().unwrap_or(0)
    }

    fn record(&mut self, row: usize, name: &str, outcome: TransferOutcome) {
        let message = match outcome.reason() {
            None => format!("Row {row}: transferred {name}"),
            Some(reason) => format!("Row {row}: skipped {name} ({reason})"),
        };
        info!(row, name, outcome = ?outcome, "transfer row");
        *self.counts.entry(outcome).or_default() += 1;
        self.entries.push(TransferEntry {
            row,
            name: name.to_string(),
            outcome,
            message,
        });
    }
}

impl OperationSummary for TransferSummary {
    const OPERATION: &'static str = "qualify";

    fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Transferred: {}",
            self.count(TransferOutcome::Transferred)
        )];
        for (outcome, count) in &self.counts {
            if let Some(reason) = outcome.reason() {
                lines.push(format!("Skipped ({reason}): {count}"));
            }
        }
        lines
    }
}

/// Load the dedup sets for a transfer starting at `first_row` of the raw sheet.
///
/// The raw and qualify sheets are required; every other source degrades to empty.
pub async fn build_index<S: RowStore + ?Sized>(
    store: &S,
    remote: Option<&dyn RecordStore>,
    layout: &Layout,
    first_row: usize,
    pacing: &Pacing,
) -> Result<DedupIndex> {
    let sheets = &layout.sheets;
    let raw = store
        .snapshot(&sheets.raw)
        .ok_or_else(|| PipelineError::MissingSheet(sheets.raw.clone()))?;
    let qualify = store
        .snapshot(&sheets.qualify)
        .ok_or_else(|| PipelineError::MissingSheet(sheets.qualify.clone()))?;

    let raw_before = if first_row > 2 {
        sheet_names(&raw, &layout.columns.name, Some(2..=first_row - 1)).unwrap_or_default()
    } else {
        Default::default()
    };
    let qualify_names = sheet_names(&qualify, &layout.columns.name, None).unwrap_or_else(|| {
        warn!(sheet = %sheets.qualify, "qualify sheet has no name column; nothing to match against");
        Default::default()
    });

    let remote_set = if layout.include_remote_in_qualify {
        match remote {
            Some(remote) => match remote_names(
                remote,
                &layout.remote.leads_table,
                &layout.remote.company_name_field,
                pacing.page_pause,
            )
            .await
            {
                Ok(names) => Some(names),
                Err(err) => {
                    warn!(error = %err, "remote dedup source unavailable; skipping it");
                    None
                }
            },
            None => {
                warn!("remote dedup requested without a configured remote store; skipping it");
                None
            }
        }
    } else {
        None
    };

    Ok(DedupIndex {
        qualify: qualify_names,
        archive: optional_sheet_names(store, &sheets.archived_leads, &layout.columns.archive_name),
        legacy: optional_sheet_names(store, &sheets.legacy, &layout.columns.name),
        remote: remote_set,
        raw_before,
        accepted: Default::default(),
    })
}

/// Transfer the selected raw rows into the qualify sheet.
///
/// Preconditions are checked before any write: both sheets exist, the raw sheet has
/// a name column, and the selection holds data rows.
pub fn transfer<S: RowStore + ?Sized>(
    store: &mut S,
    layout: &Layout,
    selection: RowSelection,
    index: &mut DedupIndex,
    today: NaiveDate,
) -> Result<TransferSummary> {
    let sheets = &layout.sheets;
    let columns = &layout.columns;
    let raw = store
        .snapshot(&sheets.raw)
        .ok_or_else(|| PipelineError::MissingSheet(sheets.raw.clone()))?;
    let qualify = store
        .snapshot(&sheets.qualify)
        .ok_or_else(|| PipelineError::MissingSheet(sheets.qualify.clone()))?;

    let raw_headers = raw.header_map();
    let name_col = raw_headers
        .get(&columns.name)
        .ok_or_else(|| PipelineError::missing_column(&sheets.raw, &columns.name))?;
    let sent_col = raw_headers.get(&columns.sent_to_qualify);
    let notes_col = raw_headers.get(&columns.notes);
    let rows = selection.data_rows(raw.last_row())?;

    // Destination order is the qualify header order; unmatched headers stay blank.
    let dest_sources: Vec<Option<usize>> = qualify
        .headers()
        .iter()
        .map(|h| {
            let h = h.trim();
            if h.is_empty() {
                None
            } else {
                raw_headers.get(h)
            }
        })
        .collect();

    let stamp = format!("Sent on {}", today.format("%Y-%m-%d"));
    let mut summary = TransferSummary::default();
    let mut to_append = Vec::new();

    for row_number in rows {
        let cells = raw.row(row_number).unwrap_or(&[]);
        let name = cells.get(name_col).map(String::as_str).unwrap_or("").trim();
        if name.is_empty() {
            summary.record(row_number, name, TransferOutcome::MissingName);
            continue;
        }
        let key = normalize_name(name);

        let already_sent = sent_col
            .and_then(|col| cells.get(col))
            .is_some_and(|flag| !flag.trim().is_empty());
        let outcome = if already_sent {
            Some(TransferOutcome::AlreadySent)
        } else {
            index.classify(&key).map(TransferOutcome::from)
        };

        if let Some(outcome) = outcome {
            if let (Some(col), Some(reason)) = (notes_col, outcome.reason()) {
                store.set_cell(&sheets.raw, row_number, col, &format!("Skipped ({reason})"))?;
            }
            summary.record(row_number, name, outcome);
            continue;
        }

        to_append.push(
            dest_sources
                .iter()
                .map(|src| {
                    src.and_then(|col| cells.get(col))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect::<Vec<String>>(),
        );
        index.admit(key);
        if let Some(col) = sent_col {
            store.set_cell(&sheets.raw, row_number, col, &stamp)?;
        }
        summary.record(row_number, name, TransferOutcome::Transferred);
    }

    if !to_append.is_empty() {
        store.append_rows(&sheets.qualify, to_append)?;
    }
    info!(
        transferred = summary.count(TransferOutcome::Transferred),
        rows = summary.entries.len(),
        "transfer complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadsync_core::Workbook;

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 31).expect("date")
    }

    fn book() -> Workbook {
        Workbook::new()
            .with_sheet(
                "GM - RAW",
                &[
                    &["name", "phone", "senttoqualify", "notes"],
                    &["Earlier Co", "1", "", ""],
                    &["Acme Ltd", "111", "", ""],
                    &["Globex", "222", "Sent on 2025-07-01", ""],
                    &["In Qualify", "333", "", ""],
                    &["Archived Co", "444", "", ""],
                    &["Legacy Co", "555", "", ""],
                    &["earlier co ", "666", "", ""],
                    &["ACME LTD", "777", "", ""],
                    &["", "888", "", ""],
                ],
            )
            .with_sheet(
                "GM - Qualify",
                &[&["Phone", "Name", "processed"], &["000", "In Qualify", ""]],
            )
            .with_sheet("Archived Leads", &[&["recordId", "Company Name"], &["rec1", "archived co"]])
            .with_sheet("Height", &[&["name"], &["Legacy Co"]])
    }

    async fn run(wb: &mut Workbook, selection: RowSelection) -> Result<TransferSummary> {
        let layout = Layout::default();
        let mut index = build_index(&*wb, None, &layout, selection.start.max(2), &Pacing::none()).await?;
        transfer(wb, &layout, selection, &mut index, d())
    }

    #[tokio::test]
    async fn rows_are_classified_in_precedence_order() {
        let mut wb = book();
        let summary = run(&mut wb, RowSelection::new(3, 10)).await.expect("transfer");

        let outcomes: Vec<_> = summary.entries.iter().map(|e| (e.row, e.outcome)).collect();
        assert_eq!(
            outcomes,
            vec![
                (3, TransferOutcome::Transferred),
                (4, TransferOutcome::AlreadySent),
                (5, TransferOutcome::InQualify),
                (6, TransferOutcome::InArchive),
                (7, TransferOutcome::InLegacy),
                (8, TransferOutcome::DuplicateInRaw),
                (9, TransferOutcome::DuplicateInRaw),
                (10, TransferOutcome::MissingName),
            ]
        );

        let raw = wb.snapshot("GM - RAW").unwrap();
        assert_eq!(raw.cell(3, 2), "Sent on 2025-07-31");
        assert_eq!(raw.cell(4, 3), "Skipped (Already marked as sent)");
        assert_eq!(raw.cell(9, 3), "Skipped (Duplicate in this selection)");
        assert_eq!(raw.cell(10, 3), "");

        let qualify = wb.snapshot("GM - Qualify").unwrap();
        assert_eq!(qualify.last_row(), 3);
        assert_eq!(qualify.row(3).unwrap(), &["111".to_string(), "Acme Ltd".into(), "".into()]);
    }

    #[tokio::test]
    async fn second_identical_row_is_a_raw_duplicate_in_either_order() {
        for names in [["Acme", "acme "], ["acme ", "Acme"]] {
            let mut wb = Workbook::new()
                .with_sheet(
                    "GM - RAW",
                    &[&["name", "senttoqualify"], &[names[0], ""], &[names[1], ""]],
                )
                .with_sheet("GM - Qualify", &[&["name"]]);
            let summary = run(&mut wb, RowSelection::new(2, 3)).await.expect("transfer");
            assert_eq!(summary.entries[0].outcome, TransferOutcome::Transferred);
            assert_eq!(summary.entries[1].outcome, TransferOutcome::DuplicateInRaw);
            assert_eq!(wb.snapshot("GM - Qualify").unwrap().last_row(), 2);
        }
    }

    #[tokio::test]
    async fn missing_name_column_aborts_before_writing() {
        let mut wb = Workbook::new()
            .with_sheet("GM - RAW", &[&["company", "senttoqualify"], &["Acme", ""]])
            .with_sheet("GM - Qualify", &[&["name"]]);
        let before = wb.clone();
        let err = run(&mut wb, RowSelection::new(2, 2)).await.expect_err("abort");
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
        assert_eq!(wb, before);
    }

    #[tokio::test]
    async fn missing_qualify_sheet_aborts() {
        let mut wb = Workbook::new().with_sheet("GM - RAW", &[&["name"], &["Acme"]]);
        let err = run(&mut wb, RowSelection::new(2, 2)).await.expect_err("abort");
        assert!(matches!(err, PipelineError::MissingSheet(sheet) if sheet == "GM - Qualify"));
    }

    #[tokio::test]
    async fn header_only_selection_aborts() {
        let mut wb = book();
        let err = run(&mut wb, RowSelection::new(1, 1)).await.expect_err("abort");
        assert!(matches!(err, PipelineError::HeaderOnlySelection));
    }
}
