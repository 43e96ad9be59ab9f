//! Normalized-name membership sets drawn from every place a lead may already live.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::time::Duration;

use leadsync_core::{normalize_name, RowStore, SheetSnapshot};
use leadsync_storage::{ListQuery, RecordStore, RemoteError};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::pause;

/// Which source already holds a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateSource {
    InQualify,
    InArchive,
    InLegacy,
    InRemote,
    DuplicateInRaw,
}

/// Names in `column` of `snapshot`, optionally limited to `rows`. `None` when the
/// column does not exist.
pub fn sheet_names(
    snapshot: &SheetSnapshot,
    column: &str,
    rows: Option<RangeInclusive<usize>>,
) -> Option<HashSet<String>> {
    let col = snapshot.header_map().get(column)?;
    let names = snapshot
        .data_rows()
        .filter(|(n, _)| rows.as_ref().is_none_or(|r| r.contains(n)))
        .filter_map(|(_, cells)| cells.get(col))
        .filter(|name| !name.trim().is_empty())
        .map(|name| normalize_name(name))
        .collect();
    Some(names)
}

/// Names from an auxiliary sheet. A missing sheet or column skips this source
/// with a warning instead of failing the operation.
pub fn optional_sheet_names<S: RowStore + ?Sized>(
    store: &S,
    sheet: &str,
    column: &str,
) -> HashSet<String> {
    let Some(snapshot) = store.snapshot(sheet) else {
        warn!(sheet, "dedup source sheet missing; skipping it");
        return HashSet::new();
    };
    match sheet_names(&snapshot, column, None) {
        Some(names) => {
            info!(sheet, names = names.len(), "dedup source loaded");
            names
        }
        None => {
            warn!(sheet, column, "dedup source column missing; skipping it");
            HashSet::new()
        }
    }
}

/// Every name in a remote table, following continuation tokens to the end.
pub async fn remote_names(
    store: &dyn RecordStore,
    table: &str,
    field: &str,
    page_pause: Duration,
) -> Result<HashSet<String>, RemoteError> {
    let mut names = HashSet::new();
    let mut query = ListQuery::default().with_fields([field]);
    let mut pages = 0usize;
    loop {
        let page = store.list_records(table, &query).await?;
        pages += 1;
        for record in &page.records {
            if let Some(name) = record.text(field).filter(|n| !n.trim().is_empty()) {
                names.insert(normalize_name(&name));
            }
        }
        match page.offset {
            Some(offset) => {
                query = query.at_offset(Some(offset));
                pause(page_pause).await;
            }
            None => break,
        }
    }
    info!(table, pages, names = names.len(), "remote dedup source loaded");
    Ok(names)
}

/// Membership sets consulted by the transfer, in precedence order.
#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    pub qualify: HashSet<String>,
    pub archive: HashSet<String>,
    pub legacy: HashSet<String>,
    pub remote: Option<HashSet<String>>,
    /// Raw-sheet names above the selection.
    pub raw_before: HashSet<String>,
    /// Names accepted earlier in the current transfer.
    pub accepted: HashSet<String>,
}

impl DedupIndex {
    /// First source holding `key` (already normalized), or `None` for a new lead.
    pub fn classify(&self, key: &str) -> Option<DuplicateSource> {
        if self.qualify.contains(key) {
            Some(DuplicateSource::InQualify)
        } else if self.archive.contains(key) {
            Some(DuplicateSource::InArchive)
        } else if self.legacy.contains(key) {
            Some(DuplicateSource::InLegacy)
        } else if self.remote.as_ref().is_some_and(|r| r.contains(key)) {
            Some(DuplicateSource::InRemote)
        } else if self.raw_before.contains(key) || self.accepted.contains(key) {
            Some(DuplicateSource::DuplicateInRaw)
        } else {
            None
        }
    }

    /// Record an accepted name so later rows of the same transfer see it.
    pub fn admit(&mut self, key: String) {
        self.accepted.insert(key);
    }
}
