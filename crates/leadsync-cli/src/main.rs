mod logging;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use leadsync_core::Workbook;
use leadsync_pipeline::{
    ArchiveMode, ArchiveMonth, Confirm, LeadPipeline, OperationSummary, PipelineConfig,
    PipelineError, RowSelection, RunReport,
};
use leadsync_storage::WorkbookFile;
use tracing::{error, warn};

#[derive(Debug, Parser)]
#[command(name = "leadsync")]
#[command(about = "Lead qualification, CRM sync, reconciliation and archival")]
struct Cli {
    /// Workbook JSON file; overrides LEADSYNC_WORKBOOK.
    #[arg(long, global = true)]
    workbook: Option<PathBuf>,
    /// State directory for locks, candidate lists and reports; overrides LEADSYNC_STATE_DIR.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Move raw rows into the qualify sheet, skipping names already known elsewhere.
    Qualify {
        #[arg(long, default_value = "2:")]
        rows: RowSelection,
    },
    /// Create remote records for unsent qualify rows.
    Push {
        #[arg(long, default_value = "2:")]
        rows: RowSelection,
    },
    /// Mark qualify rows whose company already exists remotely.
    Verify {
        #[arg(long, default_value = "2:")]
        rows: RowSelection,
    },
    /// Report where each selected qualify name already exists; changes nothing.
    Audit {
        #[arg(long, default_value = "2:")]
        rows: RowSelection,
    },
    /// Classify sent rows flagged `skip` and store the candidate list.
    Identify,
    /// Delete the stored safe-to-delete candidates after re-checking each one.
    Delete {
        /// Answer yes to the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Re-apply the deprioritised source to stored leads that have activity.
    RetagPipeline {
        #[arg(long)]
        yes: bool,
    },
    /// Export a month of closed leads and their activities to the archive sheets.
    Archive {
        /// Month to archive, `YYYY-MM`.
        #[arg(long)]
        month: ArchiveMonth,
        /// Delete the archived records from the remote store afterwards.
        #[arg(long)]
        live: bool,
        #[arg(long)]
        yes: bool,
    },
}

/// Reads the operator's answer from stdin unless `--yes` was given.
struct StdinConfirm {
    assume_yes: bool,
}

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{prompt} [y/N] ");
        let _ = stderr.flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

fn print_report<T: OperationSummary>(report: &RunReport<T>) {
    println!("{} complete: run_id={}", T::OPERATION, report.run.run_id);
    for line in report.summary.lines() {
        println!("  {line}");
    }
    println!("  report: {}", report.report_dir.display());
}

/// Lock contention ends the invocation quietly; every other failure propagates.
fn finish<T: OperationSummary>(result: Result<RunReport<T>, PipelineError>) -> Result<()> {
    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(PipelineError::LockBusy(path)) => {
            warn!(lock = %path.display(), "another run is in progress; nothing done");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "operation failed");
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env();
    if let Some(path) = cli.workbook {
        config.workbook_path = path;
    }
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }
    let file = WorkbookFile::new(&config.workbook_path);
    let pipeline = LeadPipeline::from_config(config)?;

    if let Commands::RetagPipeline { yes } = cli.command {
        return finish(pipeline.retag_pipeline(&StdinConfirm { assume_yes: yes }).await);
    }

    let mut wb: Workbook = file.load().await?;
    let outcome = match cli.command {
        Commands::Qualify { rows } => finish(pipeline.qualify(&mut wb, rows).await),
        Commands::Push { rows } => finish(pipeline.push(&mut wb, rows).await),
        Commands::Verify { rows } => finish(pipeline.verify(&mut wb, rows).await),
        Commands::Audit { rows } => return finish(pipeline.audit(&wb, rows).await),
        Commands::Identify => finish(pipeline.identify(&mut wb).await),
        Commands::Delete { yes } => {
            let confirm = StdinConfirm { assume_yes: yes };
            finish(pipeline.delete(&mut wb, &confirm).await)
        }
        Commands::Archive { month, live, yes } => {
            let mode = if live { ArchiveMode::Live } else { ArchiveMode::DryRun };
            let confirm = StdinConfirm { assume_yes: yes };
            finish(pipeline.archive(&mut wb, month, mode, &confirm).await)
        }
        Commands::RetagPipeline { .. } => Ok(()),
    };
    // Row-level writes made before a failure are kept, as the sheet would keep them.
    file.save(&wb).await?;
    outcome
}
