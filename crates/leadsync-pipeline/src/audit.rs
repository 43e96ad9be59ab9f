//! Read-only duplicate audit of selected qualify rows against every known name source.

use std::collections::{BTreeMap, HashSet};

use leadsync_core::{normalize_name, RowStore};
use leadsync_storage::RecordStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Layout, Pacing};
use crate::dedup::{optional_sheet_names, remote_names};
use crate::error::{PipelineError, Result};
use crate::report::OperationSummary;
use crate::selection::RowSelection;

/// Where one audited name was found. `in_remote` is `None` when the remote store
/// could not be consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub row: usize,
    pub name: String,
    pub in_remote: Option<bool>,
    pub in_archive: bool,
    pub in_legacy: bool,
    pub in_raw: bool,
    /// Every qualify row carrying the same normalized name, this one included.
    pub qualify_rows: Vec<usize>,
}

impl AuditEntry {
    pub fn repeated_in_qualify(&self) -> bool {
        self.qualify_rows.len() > 1
    }

    fn line(&self) -> String {
        let found = |hit: bool| if hit { "found" } else { "not found" };
        let remote = self.in_remote.map_or("not checked", found);
        let qualify = if self.repeated_in_qualify() {
            let rows: Vec<String> = self.qualify_rows.iter().map(ToString::to_string).collect();
            format!("repeated in qualify (rows {})", rows.join(", "))
        } else {
            "single qualify row".to_string()
        };
        format!(
            "Row {} {}: remote {remote}, archive {}, legacy {}, raw {}, {qualify}",
            self.row,
            self.name,
            found(self.in_archive),
            found(self.in_legacy),
            found(self.in_raw),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditSummary {
    pub selection: String,
    pub remote_checked: bool,
    pub entries: Vec<AuditEntry>,
}

impl AuditSummary {
    pub fn repeated(&self) -> usize {
        self.entries.iter().filter(|e| e.repeated_in_qualify()).count()
    }

    /// Rows found in at least one source besides their own qualify row.
    pub fn known_elsewhere(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| {
                e.in_remote == Some(true) || e.in_archive || e.in_legacy || e.in_raw || e.repeated_in_qualify()
            })
            .count()
    }
}

impl OperationSummary for AuditSummary {
    const OPERATION: &'static str = "audit";

    fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Rows audited: {}", self.entries.len()),
            format!("Known elsewhere: {}", self.known_elsewhere()),
            format!("Repeated in qualify: {}", self.repeated()),
        ];
        if !self.remote_checked {
            lines.push("Remote store: not checked".to_string());
        }
        lines.extend(self.entries.iter().map(AuditEntry::line));
        lines
    }
}

/// Report, for each named row in `selection` of the qualify sheet, which sources
/// already hold its name. Nothing is written to the row store.
///
/// The qualify sheet and its name column are required. The other sheets degrade to
/// empty sets, and an unreachable remote store leaves `in_remote` unset.
pub async fn audit<S: RowStore + ?Sized>(
    store: &S,
    remote: Option<&dyn RecordStore>,
    layout: &Layout,
    selection: RowSelection,
    pacing: &Pacing,
) -> Result<AuditSummary> {
    let sheets = &layout.sheets;
    let qualify = store
        .snapshot(&sheets.qualify)
        .ok_or_else(|| PipelineError::MissingSheet(sheets.qualify.clone()))?;
    let name_col = qualify
        .header_map()
        .get(&layout.columns.name)
        .ok_or_else(|| PipelineError::missing_column(&sheets.qualify, &layout.columns.name))?;
    let rows = selection.data_rows(qualify.last_row())?;

    let remote_set: Option<HashSet<String>> = match remote {
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
                warn!(error = %err, "remote names unavailable; audit continues without them");
                None
            }
        },
        None => {
            info!("no remote store configured; audit covers local sheets only");
            None
        }
    };
    let archive = optional_sheet_names(store, &sheets.archived_leads, &layout.columns.archive_name);
    let legacy = optional_sheet_names(store, &sheets.legacy, &layout.columns.name);
    let raw = optional_sheet_names(store, &sheets.raw, &layout.columns.name);

    let mut qualify_rows: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (row, cells) in qualify.data_rows() {
        let name = cells.get(name_col).map(String::as_str).unwrap_or("");
        if !name.trim().is_empty() {
            qualify_rows.entry(normalize_name(name)).or_default().push(row);
        }
    }

    let mut summary = AuditSummary {
        selection: selection.to_string(),
        remote_checked: remote_set.is_some(),
        entries: Vec::new(),
    };
    for row in rows {
        let name = qualify.cell(row, name_col).trim();
        if name.is_empty() {
            continue;
        }
        let key = normalize_name(name);
        let entry = AuditEntry {
            row,
            name: name.to_string(),
            in_remote: remote_set.as_ref().map(|set| set.contains(&key)),
            in_archive: archive.contains(&key),
            in_legacy: legacy.contains(&key),
            in_raw: raw.contains(&key),
            qualify_rows: qualify_rows.get(&key).cloned().unwrap_or_default(),
        };
        if entry.repeated_in_qualify() {
            warn!(row, name, rows = ?entry.qualify_rows, "name repeated in qualify sheet");
        }
        summary.entries.push(entry);
    }
    info!(
        audited = summary.entries.len(),
        known_elsewhere = summary.known_elsewhere(),
        repeated = summary.repeated(),
        "audit complete"
    );
    Ok(summary)
}
