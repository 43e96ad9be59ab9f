use std::sync::Arc;

use chrono::NaiveDate;
use leadsync_core::{RemoteRecord, RowStore, Workbook};
use leadsync_pipeline::{
    Layout, LeadPipeline, Pacing, PipelineConfig, PipelineError, RowSelection, TransferOutcome,
};
use leadsync_storage::{MemoryRecordStore, RecordOp};
use serde_json::json;
use tempfile::TempDir;

const QUALIFY: &str = "GM - Qualify";
const STATUS: usize = 2;
const FLAG: usize = 3;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 31).expect("date")
}

struct Harness {
    _state: TempDir,
    remote: MemoryRecordStore,
    pipeline: LeadPipeline,
}

fn harness() -> Harness {
    let state = tempfile::tempdir().expect("tempdir");
    let config = PipelineConfig {
        state_dir: state.path().to_path_buf(),
        lock_wait_secs: 1,
        ..PipelineConfig::default()
    };
    let remote = MemoryRecordStore::new();
    let pipeline = LeadPipeline::new(config, Layout::default())
        .with_remote(Arc::new(remote.clone()))
        .with_pacing(Pacing::none())
        .with_today(today());
    Harness {
        _state: state,
        remote,
        pipeline,
    }
}

fn qualify_book(rows: &[&[&str]]) -> Workbook {
    let mut all: Vec<&[&str]> = Vec::with_capacity(rows.len() + 1);
    all.push(&["name", "phone", "processed", "airtableAction"]);
    all.extend_from_slice(rows);
    Workbook::new().with_sheet(QUALIFY, &all)
}

fn status(wb: &Workbook, row: usize) -> String {
    wb.snapshot(QUALIFY).expect("sheet").cell(row, STATUS).to_string()
}

fn yes(_: &str) -> bool {
    true
}

#[tokio::test]
async fn skip_flag_beats_an_otherwise_sendable_row() {
    let h = harness();
    let mut wb = qualify_book(&[&["Acme Ltd", "555-0100", "", "Skip "], &["Globex", "555-0101", "", ""]]);

    let report = h.pipeline.push(&mut wb, RowSelection::all()).await.expect("push");

    assert_eq!(report.summary.skipped_by_flag, 1);
    assert_eq!(report.summary.sent, 1);
    assert_eq!(status(&wb, 2), "");
    let names: Vec<_> = h
        .remote
        .records("Leads")
        .iter()
        .filter_map(|r| r.text("Company Name"))
        .collect();
    assert_eq!(names, ["Globex"]);
}

#[tokio::test]
async fn a_second_push_creates_nothing() {
    let h = harness();
    let mut wb = qualify_book(&[&["Acme Ltd", "555-0100", "", ""]]);

    h.pipeline.push(&mut wb, RowSelection::all()).await.expect("first");
    assert_eq!(status(&wb, 2), "Sent on 2025-07-31 (ID: recMem00001)");
    let creates = h.remote.count_calls(RecordOp::Create);

    let again = h.pipeline.push(&mut wb, RowSelection::all()).await.expect("second");
    assert_eq!(again.summary.already_processed, 1);
    assert_eq!(h.remote.count_calls(RecordOp::Create), creates);
}

#[tokio::test]
async fn duplicates_within_a_selection_keep_the_first() {
    for (first, second) in [("Acme Ltd", " ACME ltd"), ("acme ltd ", "Acme Ltd")] {
        let h = harness();
        let mut wb = Workbook::new()
            .with_sheet(
                "GM - RAW",
                &[
                    &["name", "senttoqualify", "notes"],
                    &[first, "", ""],
                    &["Globex", "", ""],
                    &[second, "", ""],
                ],
            )
            .with_sheet(QUALIFY, &[&["name", "processed"]]);

        let report = h.pipeline.qualify(&mut wb, RowSelection::all()).await.expect("qualify");

        let outcomes: Vec<_> = report.summary.entries.iter().map(|e| e.outcome).collect();
        assert_eq!(
            outcomes,
            [
                TransferOutcome::Transferred,
                TransferOutcome::Transferred,
                TransferOutcome::DuplicateInRaw
            ]
        );
        let raw = wb.snapshot("GM - RAW").expect("raw");
        assert_eq!(raw.cell(2, 1), "Sent on 2025-07-31");
        assert_eq!(raw.cell(4, 2), "Skipped (Duplicate in this selection)");
        assert_eq!(wb.snapshot(QUALIFY).expect("qualify").last_row(), 3);
    }
}

#[tokio::test]
async fn withdrawn_lead_without_activity_is_deleted_and_marked() {
    let h = harness();
    let mut wb = qualify_book(&[&["Acme Ltd", "555-0100", "", ""]]);
    h.pipeline.push(&mut wb, RowSelection::all()).await.expect("push");
    let sent = status(&wb, 2);
    wb.set_cell(QUALIFY, 2, FLAG, "skip").expect("flag");

    let found = h.pipeline.identify(&mut wb).await.expect("identify");
    assert_eq!(found.summary.safe_to_delete, 1);
    assert_eq!(status(&wb, 2), sent, "identify leaves deletable rows alone");

    let deleted = h.pipeline.delete(&mut wb, &yes).await.expect("delete");
    assert_eq!(deleted.summary.deleted, 1);
    assert_eq!(h.remote.deleted_ids(), ["recMem00001"]);
    assert_eq!(
        status(&wb, 2),
        "Deleted from Airtable on 2025-07-31 (was: Sent on 2025-07-31 (ID: recMem00001))"
    );

    let err = h.pipeline.delete(&mut wb, &yes).await.expect_err("list cleared");
    assert!(matches!(err, PipelineError::NoCandidates));
}

#[tokio::test]
async fn worked_lead_is_retagged_and_never_deleted() {
    let h = harness();
    let mut wb = qualify_book(&[&["Acme Ltd", "555-0100", "Sent on 2025-07-31 (ID: rec123)", "skip"]]);
    let fields = json!({"Company Name": "Acme Ltd", "Activities": [], "Notes": "", "Stage": "Contacted"});
    h.remote
        .upsert("Leads", RemoteRecord::new("rec123", fields.as_object().cloned().expect("object")));

    let found = h.pipeline.identify(&mut wb).await.expect("identify");
    assert_eq!(found.summary.has_activity, 1);
    assert_eq!(
        h.remote.record("Leads", "rec123").and_then(|r| r.text("Source")).as_deref(),
        Some("GM - Unqualified")
    );
    let marked = "In Pipeline - has activities (was: Sent on 2025-07-31 (ID: rec123))";
    assert_eq!(status(&wb, 2), marked);

    let deleted = h.pipeline.delete(&mut wb, &yes).await.expect("delete");
    assert_eq!(deleted.summary.total, 0);
    assert_eq!(h.remote.count_calls(RecordOp::Delete), 0);

    let retag = h.pipeline.retag_pipeline(&yes).await.expect("retag");
    assert_eq!((retag.summary.total, retag.summary.updated), (1, 1));

    // The rewritten status no longer starts with `Sent on`, so it is not rediscovered.
    let again = h.pipeline.identify(&mut wb).await.expect("identify again");
    assert_eq!(again.summary.candidates, 0);
    assert_eq!(status(&wb, 2), marked);
}

#[tokio::test]
async fn activity_added_after_discovery_blocks_the_delete() {
    let h = harness();
    let mut wb = qualify_book(&[&["Acme Ltd", "555-0100", "Sent on 2025-07-31 (ID: rec123)", "skip"]]);
    let quiet = json!({"Activities": [], "Notes": "", "Stage": "Qualified"});
    h.remote
        .upsert("Leads", RemoteRecord::new("rec123", quiet.as_object().cloned().expect("object")));

    let found = h.pipeline.identify(&mut wb).await.expect("identify");
    assert_eq!(found.summary.safe_to_delete, 1);

    let worked = json!({"Activities": ["recAct1"], "Notes": "", "Stage": "Qualified"});
    h.remote
        .upsert("Leads", RemoteRecord::new("rec123", worked.as_object().cloned().expect("object")));

    let deleted = h.pipeline.delete(&mut wb, &yes).await.expect("delete");
    assert_eq!((deleted.summary.deleted, deleted.summary.now_active), (0, 1));
    assert_eq!(h.remote.count_calls(RecordOp::Delete), 0);
    assert!(h.remote.record("Leads", "rec123").is_some());
    assert_eq!(status(&wb, 2), "Sent on 2025-07-31 (ID: rec123)");
}

#[tokio::test]
async fn remote_operations_without_candidates_are_refused() {
    let h = harness();
    let err = h.pipeline.retag_pipeline(&yes).await.expect_err("nothing identified");
    assert!(matches!(err, PipelineError::NoCandidates));
}

#[tokio::test]
async fn audit_reports_pushed_and_repeated_names_without_writing() {
    let h = harness();
    let mut wb = qualify_book(&[
        &["Acme Ltd", "555-0100", "", ""],
        &["Globex", "555-0101", "", ""],
        &["ACME LTD ", "555-0102", "", ""],
    ])
    .with_sheet("Archived Leads", &[&["recordId", "Company Name"], &["recOld", "Globex"]]);
    h.pipeline.push(&mut wb, RowSelection::new(2, 2)).await.expect("push");
    let before = wb.clone();

    let report = h.pipeline.audit(&wb, RowSelection::all()).await.expect("audit");

    let summary = &report.summary;
    assert!(summary.remote_checked);
    let flags: Vec<_> = summary
        .entries
        .iter()
        .map(|e| (e.row, e.in_remote, e.in_archive, e.repeated_in_qualify()))
        .collect();
    assert_eq!(
        flags,
        [
            (2, Some(true), false, true),
            (3, Some(false), true, false),
            (4, Some(true), false, true),
        ]
    );
    assert_eq!(wb, before);
    assert!(report.report_dir.join("audit.json").exists());
}
