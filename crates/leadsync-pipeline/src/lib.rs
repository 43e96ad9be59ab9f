//! Lead pipeline engines: dedup-guarded qualification transfer, remote sync with a
//! row-level status state machine, safe reconciliation of withdrawn leads,
//! month-scoped archival, and a read-only duplicate audit.
//!
//! [`LeadPipeline`] wraps each engine in a run: a run id, the cross-process lock for
//! operations that write, and a report under `<state>/reports/<run_id>/`.

pub mod archive;
pub mod audit;
pub mod config;
pub mod dedup;
pub mod error;
pub mod push;
pub mod qualify;
pub mod reconcile;
pub mod report;
pub mod selection;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use leadsync_core::RowStore;
use leadsync_storage::{AirtableClient, CandidateStore, RecordStore, RunLock};
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

pub use archive::{ArchiveMode, ArchiveMonth, ArchiveSummary};
pub use audit::{AuditEntry, AuditSummary};
pub use config::{Layout, Pacing, PipelineConfig};
pub use error::{PipelineError, Result};
pub use push::{PushSummary, VerifySummary};
pub use qualify::{TransferOutcome, TransferSummary};
pub use reconcile::{DeleteSummary, IdentifySummary, RetagSummary};
pub use report::OperationSummary;
pub use selection::RowSelection;

pub const CRATE_NAME: &str = "leadsync-pipeline";

/// Operator yes/no gate in front of destructive remote changes.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Identity and clock of one operation run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    /// Date stamped into status and transfer cells.
    pub today: NaiveDate,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::at(Local::now().date_naive())
    }

    pub fn at(today: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            today,
            started_at: Utc::now(),
        }
    }

    fn span(&self, operation: &'static str) -> Span {
        info_span!("run", run_id = %self.run_id, operation)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A finished operation and where its report landed.
#[derive(Debug, Clone)]
pub struct RunReport<T> {
    pub run: RunContext,
    pub summary: T,
    pub report_dir: PathBuf,
}

pub struct LeadPipeline {
    config: PipelineConfig,
    layout: Layout,
    pacing: Pacing,
    remote: Option<Arc<dyn RecordStore>>,
    candidates: CandidateStore,
    today: Option<NaiveDate>,
}

impl LeadPipeline {
    pub fn new(config: PipelineConfig, layout: Layout) -> Self {
        let candidates = CandidateStore::new(&config.state_dir);
        Self {
            config,
            layout,
            pacing: Pacing::default(),
            remote: None,
            candidates,
            today: None,
        }
    }

    /// Layout from `config.layout_path` and, when credentials are set, the hosted store.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let layout = Layout::load_or_default(&config.layout_path)?;
        let remote: Option<Arc<dyn RecordStore>> = match config.airtable() {
            Ok(airtable) => Some(Arc::new(AirtableClient::new(airtable, config.limiter())?)),
            Err(err) => {
                info!(reason = %err, "remote store not configured; local operations only");
                None
            }
        };
        let mut pipeline = Self::new(config, layout);
        pipeline.remote = remote;
        Ok(pipeline)
    }

    pub fn with_remote(mut self, remote: Arc<dyn RecordStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Pin the run date instead of reading the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn context(&self) -> RunContext {
        match self.today {
            Some(today) => RunContext::at(today),
            None => RunContext::new(),
        }
    }

    fn remote(&self) -> Result<&dyn RecordStore> {
        match &self.remote {
            Some(remote) => Ok(remote.as_ref()),
            None => Err(self
                .config
                .airtable()
                .err()
                .unwrap_or(PipelineError::MissingCredential("AIRTABLE_API_KEY"))),
        }
    }

    async fn lock(&self) -> Result<RunLock> {
        let path = self.config.lock_path();
        RunLock::acquire(&path, self.config.lock_wait(), self.config.lock_stale_after())
            .await?
            .ok_or(PipelineError::LockBusy(path))
    }

    async fn finish<T: OperationSummary>(&self, run: RunContext, summary: T) -> Result<RunReport<T>> {
        let report_dir = report::write_report(&self.config.reports_dir(), &run, &summary).await?;
        for line in summary.lines() {
            info!(run_id = %run.run_id, operation = T::OPERATION, "{line}");
        }
        Ok(RunReport {
            run,
            summary,
            report_dir,
        })
    }

    /// Move the selected raw rows into the qualify sheet, skipping known names.
    pub async fn qualify<S: RowStore + ?Sized>(
        &self,
        store: &mut S,
        selection: RowSelection,
    ) -> Result<RunReport<TransferSummary>> {
        let run = self.context();
        let _lock = self.lock().await?;
        let span = run.span(TransferSummary::OPERATION);
        let mut index = qualify::build_index(
            &*store,
            self.remote.as_deref(),
            &self.layout,
            selection.start.max(2),
            &self.pacing,
        )
        .instrument(span.clone())
        .await?;
        let summary = span.in_scope(|| {
            qualify::transfer(store, &self.layout, selection, &mut index, run.today)
        })?;
        self.finish(run, summary).await
    }

    pub async fn push<S: RowStore + ?Sized>(
        &self,
        store: &mut S,
        selection: RowSelection,
    ) -> Result<RunReport<PushSummary>> {
        let run = self.context();
        let remote = self.remote()?;
        let _lock = self.lock().await?;
        let summary = push::push(store, remote, &self.layout, selection, run.today, &self.pacing)
            .instrument(run.span(PushSummary::OPERATION))
            .await?;
        self.finish(run, summary).await
    }

    pub async fn verify<S: RowStore + ?Sized>(
        &self,
        store: &mut S,
        selection: RowSelection,
    ) -> Result<RunReport<VerifySummary>> {
        let run = self.context();
        let remote = self.remote()?;
        let _lock = self.lock().await?;
        let summary = push::verify(store, remote, &self.layout, selection, run.today, &self.pacing)
            .instrument(run.span(VerifySummary::OPERATION))
            .await?;
        self.finish(run, summary).await
    }

    /// Report which sources already hold each selected qualify name. Reads only, so
    /// no lock is taken.
    pub async fn audit<S: RowStore + ?Sized>(
        &self,
        store: &S,
        selection: RowSelection,
    ) -> Result<RunReport<AuditSummary>> {
        let run = self.context();
        let summary = audit::audit(store, self.remote.as_deref(), &self.layout, selection, &self.pacing)
            .instrument(run.span(AuditSummary::OPERATION))
            .await?;
        self.finish(run, summary).await
    }

    /// Classify withdrawn sent leads and store the candidate list for later passes.
    pub async fn identify<S: RowStore + ?Sized>(
        &self,
        store: &mut S,
    ) -> Result<RunReport<IdentifySummary>> {
        let run = self.context();
        let remote = self.remote()?;
        let _lock = self.lock().await?;
        let summary = reconcile::identify(
            store,
            remote,
            &self.candidates,
            &self.layout,
            &self.pacing,
            run.started_at,
            self.config.candidate_ttl(),
        )
        .instrument(run.span(IdentifySummary::OPERATION))
        .await?;
        self.finish(run, summary).await
    }

    pub async fn delete<S: RowStore + ?Sized>(
        &self,
        store: &mut S,
        confirm: &dyn Confirm,
    ) -> Result<RunReport<DeleteSummary>> {
        let run = self.context();
        let remote = self.remote()?;
        let _lock = self.lock().await?;
        let summary = reconcile::delete_confirmed(
            store,
            remote,
            &self.candidates,
            &self.layout,
            &self.pacing,
            run.started_at,
            run.today,
            confirm,
        )
        .instrument(run.span(DeleteSummary::OPERATION))
        .await?;
        self.finish(run, summary).await
    }

    pub async fn retag_pipeline(&self, confirm: &dyn Confirm) -> Result<RunReport<RetagSummary>> {
        let run = self.context();
        let remote = self.remote()?;
        let _lock = self.lock().await?;
        let summary = reconcile::retag_pipeline(
            remote,
            &self.candidates,
            &self.layout,
            &self.pacing,
            run.started_at,
            confirm,
        )
        .instrument(run.span(RetagSummary::OPERATION))
        .await?;
        self.finish(run, summary).await
    }

    pub async fn archive<S: RowStore + ?Sized>(
        &self,
        store: &mut S,
        month: ArchiveMonth,
        mode: ArchiveMode,
        confirm: &dyn Confirm,
    ) -> Result<RunReport<ArchiveSummary>> {
        let run = self.context();
        let remote = self.remote()?;
        let _lock = self.lock().await?;
        let summary = archive::archive(store, remote, &self.layout, month, mode, &self.pacing, confirm)
            .instrument(run.span(ArchiveSummary::OPERATION))
            .await?;
        self.finish(run, summary).await
    }
}
