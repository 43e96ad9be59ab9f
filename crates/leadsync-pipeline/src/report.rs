//! Per-run reports: `reports/<run_id>/<operation>.json` plus a readable `summary.md`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;

use crate::RunContext;

/// A batch result that can be reported.
pub trait OperationSummary: Serialize {
    const OPERATION: &'static str;

    /// Count-bearing lines shown to the operator.
    fn lines(&self) -> Vec<String>;
}

#[derive(Serialize)]
struct ReportEnvelope<'a, T: Serialize> {
    run_id: String,
    operation: &'static str,
    run_date: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    summary: &'a T,
}

pub fn render_markdown<T: OperationSummary>(ctx: &RunContext, summary: &T) -> String {
    let mut out = format!(
        "# leadsync {}\n\n- Run ID: `{}`\n- Run date: {}\n- Started: {}\n\n## Counts\n",
        T::OPERATION,
        ctx.run_id,
        ctx.today,
        ctx.started_at,
    );
    for line in summary.lines() {
        out.push_str("- ");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

pub async fn write_report<T: OperationSummary>(
    reports_root: &Path,
    ctx: &RunContext,
    summary: &T,
) -> anyhow::Result<PathBuf> {
    let run_dir = reports_root.join(ctx.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let envelope = ReportEnvelope {
        run_id: ctx.run_id.to_string(),
        operation: T::OPERATION,
        run_date: ctx.today.format("%Y-%m-%d").to_string(),
        started_at: ctx.started_at,
        finished_at: Utc::now(),
        summary,
    };
    let json = serde_json::to_vec_pretty(&envelope)
        .with_context(|| format!("serializing {} report", T::OPERATION))?;
    let json_path = run_dir.join(format!("{}.json", T::OPERATION));
    fs::write(&json_path, json)
        .await
        .with_context(|| format!("writing {}", json_path.display()))?;

    fs::write(run_dir.join("summary.md"), render_markdown(ctx, summary))
        .await
        .context("writing summary.md")?;

    Ok(run_dir)
}
