//! Remote record reconciliation for qualify rows that were sent and later flagged `skip`.
//!
//! Discovery classifies each such row against the live remote record and persists a
//! [`CandidateList`]. Deletion and source re-tagging are separate, confirmed passes over
//! that list; deletion re-checks every record right before removing it.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use leadsync_core::{
    extract_remote_id, is_sent_status, Candidate, CandidateList, LeadStatus, OverrideAction,
    RemoteAssessment, RowStore, SheetSnapshot,
};
use leadsync_storage::{CandidateStore, RecordStore, RemoteError};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{pause, Layout, Pacing};
use crate::error::{PipelineError, Result};
use crate::report::OperationSummary;
use crate::Confirm;

/// How long a discovered candidate list stays valid.
pub fn default_candidate_ttl() -> Duration {
    Duration::hours(24)
}

/// Row whose status has no recoverable remote id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnparseableRow {
    pub row: usize,
    pub company_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Discovery {
    pub candidates: Vec<Candidate>,
    pub unparseable: Vec<UnparseableRow>,
}

struct QualifyColumns {
    name: usize,
    status: usize,
}

fn qualify_columns(snapshot: &SheetSnapshot, layout: &Layout) -> Result<QualifyColumns> {
    let headers = snapshot.header_map();
    let sheet = &layout.sheets.qualify;
    Ok(QualifyColumns {
        name: headers
            .get(&layout.columns.name)
            .ok_or_else(|| PipelineError::missing_column(sheet, &layout.columns.name))?,
        status: headers
            .get(&layout.columns.status)
            .ok_or_else(|| PipelineError::missing_column(sheet, &layout.columns.status))?,
    })
}

/// Rows flagged `skip` whose status starts with `Sent on`.
///
/// Without any override column nothing can be flagged, so that is a configuration
/// failure here rather than a silently empty result.
pub fn discover(snapshot: &SheetSnapshot, layout: &Layout) -> Result<Discovery> {
    let columns = qualify_columns(snapshot, layout)?;
    let flag = layout
        .override_column
        .resolve(&snapshot.header_map())
        .ok_or_else(|| PipelineError::missing_column(&layout.sheets.qualify, "airtableaction"))?;
    info!(header = %flag.header, strategy = flag.strategy, "override column resolved");

    let mut discovery = Discovery::default();
    for (row, _) in snapshot.data_rows() {
        let status = snapshot.cell(row, columns.status).trim();
        if !OverrideAction::parse(snapshot.cell(row, flag.index)).is_skip() || !is_sent_status(status)
        {
            continue;
        }
        let company_name = snapshot.cell(row, columns.name).to_string();
        match extract_remote_id(status) {
            Some(id) => discovery.candidates.push(Candidate {
                sheet_row: row,
                company_name,
                remote_id: id.to_string(),
                previous_status: status.to_string(),
            }),
            None => {
                warn!(row, status, "sent row has no remote id; excluded");
                discovery.unparseable.push(UnparseableRow {
                    row,
                    company_name,
                    status: status.to_string(),
                });
            }
        }
    }
    Ok(discovery)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentifySummary {
    pub list_id: Option<String>,
    pub candidates: usize,
    pub safe_to_delete: usize,
    pub has_activity: usize,
    pub not_found: usize,
    /// Lookups that failed; these rows keep their status and are found again next time.
    pub inconclusive: usize,
    pub unparseable: usize,
    pub source_patched: usize,
    pub source_patch_failed: usize,
}

impl OperationSummary for IdentifySummary {
    const OPERATION: &'static str = "identify";

    fn lines(&self) -> Vec<String> {
        vec![
            format!("Total candidates: {}", self.candidates),
            format!("Safe to delete: {}", self.safe_to_delete),
            format!("Has activities (cannot delete): {}", self.has_activity),
            format!("Not found: {}", self.not_found),
            format!("Inconclusive (lookup failed): {}", self.inconclusive),
            format!("Skipped (no remote id): {}", self.unparseable),
            format!(
                "Source re-tagged: {} ({} failed)",
                self.source_patched, self.source_patch_failed
            ),
        ]
    }
}

fn source_patch(layout: &Layout) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        layout.remote.source_field.clone(),
        Value::String(layout.remote.unqualified_source.clone()),
    );
    fields
}

async fn backoff_if_limited(err: &RemoteError, pacing: &Pacing) {
    if err.is_rate_limited() {
        warn!(wait_ms = pacing.rate_limit_backoff.as_millis() as u64, "rate limit hit; backing off");
        pause(pacing.rate_limit_backoff).await;
    }
}

/// Discovery plus remote classification. Writes local status for protected and
/// vanished records and replaces the stored candidate list.
pub async fn identify<S: RowStore + ?Sized>(
    store: &mut S,
    remote: &dyn RecordStore,
    candidates: &CandidateStore,
    layout: &Layout,
    pacing: &Pacing,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<IdentifySummary> {
    let sheet = &layout.sheets.qualify;
    let snapshot = store
        .snapshot(sheet)
        .ok_or_else(|| PipelineError::MissingSheet(sheet.clone()))?;
    let status_col = qualify_columns(&snapshot, layout)?.status;
    let discovery = discover(&snapshot, layout)?;

    let mut summary = IdentifySummary {
        candidates: discovery.candidates.len(),
        unparseable: discovery.unparseable.len(),
        ..IdentifySummary::default()
    };
    let mut list = CandidateList::new(sheet.clone(), now, ttl);
    let table = &layout.remote.leads_table;

    for (i, candidate) in discovery.candidates.into_iter().enumerate() {
        if i > 0 {
            pause(pacing.call_delay).await;
        }
        let record = match remote.get_record(table, &candidate.remote_id).await {
            Ok(record) => record,
            Err(err) => {
                warn!(row = candidate.sheet_row, id = %candidate.remote_id, error = %err, "lookup failed");
                summary.inconclusive += 1;
                backoff_if_limited(&err, pacing).await;
                continue;
            }
        };

        match layout.remote.activity.assess(record.as_ref()) {
            RemoteAssessment::NotFound => {
                info!(row = candidate.sheet_row, id = %candidate.remote_id, "remote record not found");
                let status = LeadStatus::NotFound {
                    was: candidate.previous_status.clone(),
                };
                store.set_cell(sheet, candidate.sheet_row, status_col, &status.encode())?;
                summary.not_found += 1;
                list.not_found.push(candidate);
            }
            RemoteAssessment::HasActivity { signals } => {
                info!(row = candidate.sheet_row, id = %candidate.remote_id, ?signals, "lead has activity; protected");
                match remote
                    .update_fields(table, &candidate.remote_id, source_patch(layout))
                    .await
                {
                    Ok(_) => summary.source_patched += 1,
                    Err(err) => {
                        warn!(id = %candidate.remote_id, error = %err, "source re-tag failed");
                        summary.source_patch_failed += 1;
                        backoff_if_limited(&err, pacing).await;
                    }
                }
                let status = LeadStatus::InPipeline {
                    was: candidate.previous_status.clone(),
                };
                store.set_cell(sheet, candidate.sheet_row, status_col, &status.encode())?;
                summary.has_activity += 1;
                list.has_activities.push(candidate);
            }
            RemoteAssessment::SafeToDelete => {
                info!(row = candidate.sheet_row, id = %candidate.remote_id, "no activity; safe to delete");
                summary.safe_to_delete += 1;
                list.to_delete.push(candidate);
            }
        }
    }

    candidates.save(&list).await?;
    summary.list_id = Some(list.id.to_string());
    info!(
        list_id = %list.id,
        safe_to_delete = summary.safe_to_delete,
        has_activity = summary.has_activity,
        not_found = summary.not_found,
        inconclusive = summary.inconclusive,
        "identify complete"
    );
    Ok(summary)
}

async fn load_active(candidates: &CandidateStore, now: DateTime<Utc>) -> Result<CandidateList> {
    let list = candidates.load().await?.ok_or(PipelineError::NoCandidates)?;
    if list.is_expired(now) {
        return Err(PipelineError::CandidatesExpired {
            id: list.id,
            expires_at: list.expires_at,
        });
    }
    Ok(list)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteSummary {
    pub list_id: Option<String>,
    pub total: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Records that gained activity since discovery; left untouched.
    pub now_active: usize,
    /// Records that disappeared since discovery.
    pub vanished: usize,
    /// Deleted remotely, but no local row still carried the id.
    pub local_unmatched: usize,
    /// Candidates whose lookup or delete call failed; kept in the list for another pass.
    pub retained: usize,
    pub cancelled: bool,
}

impl OperationSummary for DeleteSummary {
    const OPERATION: &'static str = "delete";

    fn lines(&self) -> Vec<String> {
        if self.cancelled {
            return vec!["Deletion cancelled by operator".to_string()];
        }
        vec![
            format!("Total records: {}", self.total),
            format!("Successfully deleted: {}", self.deleted),
            format!("Failed: {}", self.failed),
            format!("Now showing activity: {}", self.now_active),
            format!("No longer in remote store: {}", self.vanished),
            format!("Deleted without a matching local row: {}", self.local_unmatched),
            format!("Kept for retry: {}", self.retained),
        ]
    }
}

/// Row currently holding `candidate`'s remote id in the status column.
///
/// The recorded row is preferred; rows may have shifted since discovery, so the
/// status column is scanned as a fallback.
fn locate_row(snapshot: &SheetSnapshot, status_col: usize, candidate: &Candidate) -> Option<usize> {
    let holds_id = |row: usize| {
        extract_remote_id(snapshot.cell(row, status_col)) == Some(candidate.remote_id.as_str())
    };
    if holds_id(candidate.sheet_row) {
        return Some(candidate.sheet_row);
    }
    snapshot.data_rows().map(|(row, _)| row).find(|row| holds_id(*row))
}

/// Delete every safe-to-delete candidate still free of activity, after confirmation.
///
/// The stored list is cleared afterwards unless a lookup or delete call failed; those
/// candidates stay listed so the next pass can retry them without a fresh discovery.
#[allow(clippy::too_many_arguments)]
pub async fn delete_confirmed<S: RowStore + ?Sized>(
    store: &mut S,
    remote: &dyn RecordStore,
    candidates: &CandidateStore,
    layout: &Layout,
    pacing: &Pacing,
    now: DateTime<Utc>,
    today: NaiveDate,
    confirm: &dyn Confirm,
) -> Result<DeleteSummary> {
    let list = load_active(candidates, now).await?;
    let mut summary = DeleteSummary {
        list_id: Some(list.id.to_string()),
        total: list.to_delete.len(),
        ..DeleteSummary::default()
    };
    if list.to_delete.is_empty() {
        info!(list_id = %list.id, "no records to delete");
        return Ok(summary);
    }

    for (i, c) in list.to_delete.iter().enumerate() {
        info!(n = i + 1, row = c.sheet_row, name = %c.company_name, id = %c.remote_id, "pending deletion");
    }
    let prompt = format!(
        "Delete {} records from the remote store? This cannot be undone.",
        list.to_delete.len()
    );
    if !confirm.confirm(&prompt) {
        info!("deletion cancelled by operator");
        summary.cancelled = true;
        return Ok(summary);
    }

    let sheet = &list.source_sheet;
    let snapshot = store
        .snapshot(sheet)
        .ok_or_else(|| PipelineError::MissingSheet(sheet.clone()))?;
    let status_col = qualify_columns(&snapshot, layout)?.status;
    let table = &layout.remote.leads_table;
    let mut retry = Vec::new();

    for (i, candidate) in list.to_delete.iter().enumerate() {
        if i > 0 {
            pause(pacing.call_delay).await;
        }

        let record = match remote.get_record(table, &candidate.remote_id).await {
            Ok(record) => record,
            Err(err) => {
                warn!(id = %candidate.remote_id, error = %err, "re-verification failed");
                summary.failed += 1;
                retry.push(candidate.clone());
                backoff_if_limited(&err, pacing).await;
                continue;
            }
        };
        match layout.remote.activity.assess(record.as_ref()) {
            RemoteAssessment::SafeToDelete => {}
            RemoteAssessment::NotFound => {
                warn!(id = %candidate.remote_id, "record no longer exists; skipping");
                summary.vanished += 1;
                summary.failed += 1;
                continue;
            }
            RemoteAssessment::HasActivity { signals } => {
                warn!(id = %candidate.remote_id, ?signals, "record now has activity; skipping");
                summary.now_active += 1;
                summary.failed += 1;
                continue;
            }
        }

        pause(pacing.call_delay).await;
        let ids = [candidate.remote_id.clone()];
        let deleted = match remote.delete_records(table, &ids).await {
            Ok(deleted) => deleted.contains(&candidate.remote_id),
            Err(err) => {
                warn!(id = %candidate.remote_id, error = %err, "delete failed");
                backoff_if_limited(&err, pacing).await;
                false
            }
        };
        if !deleted {
            summary.failed += 1;
            retry.push(candidate.clone());
            continue;
        }

        summary.deleted += 1;
        match locate_row(&snapshot, status_col, candidate) {
            Some(row) => {
                let status = LeadStatus::Deleted {
                    date: today,
                    was: candidate.previous_status.clone(),
                };
                store.set_cell(sheet, row, status_col, &status.encode())?;
                info!(row, id = %candidate.remote_id, "deleted and marked");
            }
            None => {
                warn!(id = %candidate.remote_id, "deleted, but no local row carries this id");
                summary.local_unmatched += 1;
            }
        }
    }

    summary.retained = retry.len();
    if retry.is_empty() {
        candidates.clear().await?;
        info!(
            deleted = summary.deleted,
            failed = summary.failed,
            "deletion complete; candidate list cleared"
        );
    } else {
        let mut list = list;
        list.to_delete = retry;
        candidates.save(&list).await?;
        info!(
            deleted = summary.deleted,
            failed = summary.failed,
            retained = summary.retained,
            "deletion complete; failed calls kept for another pass"
        );
    }
    Ok(summary)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetagSummary {
    pub list_id: Option<String>,
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl OperationSummary for RetagSummary {
    const OPERATION: &'static str = "retag-pipeline";

    fn lines(&self) -> Vec<String> {
        if self.cancelled {
            return vec!["Update cancelled by operator".to_string()];
        }
        vec![
            format!("Total records: {}", self.total),
            format!("Successfully updated: {}", self.updated),
            format!("Failed: {}", self.failed),
        ]
    }
}

/// Re-apply the deprioritised source to every protected lead in the stored list.
pub async fn retag_pipeline(
    remote: &dyn RecordStore,
    candidates: &CandidateStore,
    layout: &Layout,
    pacing: &Pacing,
    now: DateTime<Utc>,
    confirm: &dyn Confirm,
) -> Result<RetagSummary> {
    let list = load_active(candidates, now).await?;
    let mut summary = RetagSummary {
        list_id: Some(list.id.to_string()),
        total: list.has_activities.len(),
        ..RetagSummary::default()
    };
    if list.has_activities.is_empty() {
        info!(list_id = %list.id, "no pipeline leads to update");
        return Ok(summary);
    }

    let prompt = format!(
        "Set {} to \"{}\" for {} pipeline leads?",
        layout.remote.source_field,
        layout.remote.unqualified_source,
        list.has_activities.len()
    );
    if !confirm.confirm(&prompt) {
        summary.cancelled = true;
        return Ok(summary);
    }

    for (i, candidate) in list.has_activities.iter().enumerate() {
        if i > 0 {
            pause(pacing.call_delay).await;
        }
        match remote
            .update_fields(&layout.remote.leads_table, &candidate.remote_id, source_patch(layout))
            .await
        {
            Ok(_) => summary.updated += 1,
            Err(err) => {
                warn!(id = %candidate.remote_id, error = %err, "source update failed");
                summary.failed += 1;
                backoff_if_limited(&err, pacing).await;
            }
        }
    }
    info!(updated = summary.updated, failed = summary.failed, "pipeline re-tag complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadsync_core::{RemoteRecord, Workbook};
    use leadsync_storage::{MemoryRecordStore, RecordOp};
    use serde_json::json;
    use tempfile::tempdir;

    fn book() -> Workbook {
        Workbook::new().with_sheet(
            "GM - Qualify",
            &[
                &["name", "processed", "airtableAction"],
                &["Acme Ltd", "Sent on 2025-07-31 (ID: rec123)", "skip"],
                &["Globex", "Sent on 2025-07-31 (ID: recG)", ""],
                &["Initech", "Sent on 2025-07-31", " Skip"],
                &["Hooli", "Verified on 2025-07-31 (ID: recH)", "skip"],
                &["Umbrella", "Sent on 2025-07-30 (ID: recU)", "SKIP"],
            ],
        )
    }

    fn record(id: &str, fields: Value) -> RemoteRecord {
        RemoteRecord::new(id, fields.as_object().cloned().unwrap())
    }

    #[test]
    fn discovery_needs_skip_and_sent_with_an_id() {
        let snapshot = book().snapshot("GM - Qualify").unwrap();
        let discovery = discover(&snapshot, &Layout::default()).expect("discover");

        let ids: Vec<_> = discovery.candidates.iter().map(|c| c.remote_id.as_str()).collect();
        assert_eq!(ids, vec!["rec123", "recU"]);
        assert_eq!(discovery.candidates[0].sheet_row, 2);
        assert_eq!(discovery.unparseable.len(), 1);
        assert_eq!(discovery.unparseable[0].row, 4);
    }

    #[test]
    fn discovery_without_override_column_fails() {
        let wb = Workbook::new().with_sheet("GM - Qualify", &[&["name", "processed"], &["Acme", ""]]);
        let err = discover(&wb.snapshot("GM - Qualify").unwrap(), &Layout::default()).expect_err("no flag column");
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }

    #[tokio::test]
    async fn identify_classifies_and_persists_list() {
        let dir = tempdir().expect("tempdir");
        let store = CandidateStore::new(dir.path());
        let remote = MemoryRecordStore::new();
        remote.upsert("Leads", record("rec123", json!({"Company Name": "Acme Ltd", "Activities": [], "Notes": "", "Stage": "Qualified"})));
        remote.upsert("Leads", record("recU", json!({"Company Name": "Umbrella", "Stage": "Contacted"})));

        let mut wb = book();
        let now = Utc::now();
        let summary = identify(&mut wb, &remote, &store, &Layout::default(), &Pacing::none(), now, default_candidate_ttl())
            .await
            .expect("identify");

        assert_eq!((summary.safe_to_delete, summary.has_activity, summary.not_found), (1, 1, 0));
        assert_eq!(summary.source_patched, 1);
        assert_eq!(
            remote.record("Leads", "recU").unwrap().text("Source").as_deref(),
            Some("GM - Unqualified")
        );

        let snap = wb.snapshot("GM - Qualify").unwrap();
        assert_eq!(snap.cell(2, 1), "Sent on 2025-07-31 (ID: rec123)");
        assert_eq!(
            snap.cell(6, 1),
            "In Pipeline - has activities (was: Sent on 2025-07-30 (ID: recU))"
        );

        let list = store.load().await.expect("load").expect("saved");
        assert_eq!(list.to_delete.len(), 1);
        assert_eq!(list.has_activities.len(), 1);
        assert_eq!(list.expires_at, now + Duration::hours(24));
        assert_eq!(summary.list_id, Some(list.id.to_string()));
    }

    #[tokio::test]
    async fn failed_lookup_is_inconclusive_and_leaves_status() {
        let dir = tempdir().expect("tempdir");
        let store = CandidateStore::new(dir.path());
        let remote = MemoryRecordStore::new();
        remote.fail_next(RecordOp::Get, RemoteError::RateLimited { url: "memory://Leads".into() });

        let mut wb = book();
        let summary = identify(&mut wb, &remote, &store, &Layout::default(), &Pacing::none(), Utc::now(), default_candidate_ttl())
            .await
            .expect("identify");

        assert_eq!(summary.inconclusive, 1);
        assert_eq!(summary.not_found, 1, "recU is simply absent");
        let snap = wb.snapshot("GM - Qualify").unwrap();
        assert_eq!(snap.cell(2, 1), "Sent on 2025-07-31 (ID: rec123)");
        assert_eq!(
            snap.cell(6, 1),
            "Record not found in Airtable (was: Sent on 2025-07-30 (ID: recU))"
        );
    }

    #[tokio::test]
    async fn expired_or_missing_lists_are_refused() {
        let dir = tempdir().expect("tempdir");
        let store = CandidateStore::new(dir.path());
        let remote = MemoryRecordStore::new();
        let mut wb = book();
        let yes = |_: &str| true;

        let err = delete_confirmed(&mut wb, &remote, &store, &Layout::default(), &Pacing::none(), Utc::now(), Utc::now().date_naive(), &yes)
            .await
            .expect_err("no list");
        assert!(matches!(err, PipelineError::NoCandidates));

        let created = Utc::now() - Duration::hours(30);
        store
            .save(&CandidateList::new("GM - Qualify", created, default_candidate_ttl()))
            .await
            .expect("save");
        let err = retag_pipeline(&remote, &store, &Layout::default(), &Pacing::none(), Utc::now(), &yes)
            .await
            .expect_err("expired");
        assert!(matches!(err, PipelineError::CandidatesExpired { .. }));
    }

    #[tokio::test]
    async fn declined_confirmation_changes_nothing() {
        let dir = tempdir().expect("tempdir");
        let store = CandidateStore::new(dir.path());
        let remote = MemoryRecordStore::new();
        remote.upsert("Leads", record("rec123", json!({"Stage": "Qualified"})));
        let mut wb = book();
        identify(&mut wb, &remote, &store, &Layout::default(), &Pacing::none(), Utc::now(), default_candidate_ttl())
            .await
            .expect("identify");

        let no = |_: &str| false;
        let summary = delete_confirmed(&mut wb, &remote, &store, &Layout::default(), &Pacing::none(), Utc::now(), Utc::now().date_naive(), &no)
            .await
            .expect("delete");

        assert!(summary.cancelled);
        assert!(remote.deleted_ids().is_empty());
        assert!(store.load().await.expect("load").is_some(), "list kept for a later run");
    }

    #[tokio::test]
    async fn failed_deletes_stay_listed_for_the_next_pass() {
        let dir = tempdir().expect("tempdir");
        let store = CandidateStore::new(dir.path());
        let remote = MemoryRecordStore::new();
        remote.upsert("Leads", record("rec123", json!({"Stage": "Qualified"})));
        remote.upsert("Leads", record("recU", json!({"Stage": "Qualified"})));
        let mut wb = book();
        identify(&mut wb, &remote, &store, &Layout::default(), &Pacing::none(), Utc::now(), default_candidate_ttl())
            .await
            .expect("identify");
        remote.fail_after(RecordOp::Delete, 1, RemoteError::RateLimited { url: "memory://Leads".into() });

        let yes = |_: &str| true;
        let today = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let summary = delete_confirmed(&mut wb, &remote, &store, &Layout::default(), &Pacing::none(), Utc::now(), today, &yes)
            .await
            .expect("delete");

        assert_eq!((summary.deleted, summary.failed, summary.retained), (1, 1, 1));
        let snap = wb.snapshot("GM - Qualify").unwrap();
        assert_eq!(
            snap.cell(2, 1),
            "Deleted from Airtable on 2025-08-01 (was: Sent on 2025-07-31 (ID: rec123))"
        );
        assert_eq!(snap.cell(6, 1), "Sent on 2025-07-30 (ID: recU)");

        let list = store.load().await.expect("load").expect("kept");
        let ids: Vec<_> = list.to_delete.iter().map(|c| c.remote_id.as_str()).collect();
        assert_eq!(ids, ["recU"]);

        let again = delete_confirmed(&mut wb, &remote, &store, &Layout::default(), &Pacing::none(), Utc::now(), today, &yes)
            .await
            .expect("retry");
        assert_eq!((again.total, again.deleted, again.retained), (1, 1, 0));
        assert!(store.load().await.expect("load").is_none(), "cleared once nothing failed");
    }

    #[test]
    fn rows_are_relocated_by_id_when_they_shift() {
        let wb = Workbook::new().with_sheet(
            "GM - Qualify",
            &[
                &["name", "processed"],
                &["Inserted", ""],
                &["Acme Ltd", "Sent on 2025-07-31 (ID: rec123)"],
            ],
        );
        let snap = wb.snapshot("GM - Qualify").unwrap();
        let candidate = Candidate {
            sheet_row: 2,
            company_name: "Acme Ltd".into(),
            remote_id: "rec123".into(),
            previous_status: "Sent on 2025-07-31 (ID: rec123)".into(),
        };
        assert_eq!(locate_row(&snap, 1, &candidate), Some(3));
    }
}
