//! Cooperative cross-process run lock backed by an exclusively created file.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held while a batch runs; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock, polling for at most `wait`.
    ///
    /// Returns `Ok(None)` when another run still holds it after the wait. A lock file
    /// older than `stale_after` belongs to a run that was terminated and is removed.
    pub async fn acquire(
        path: impl Into<PathBuf>,
        wait: Duration,
        stale_after: Duration,
    ) -> anyhow::Result<Option<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating lock directory {}", parent.display()))?;
        }

        let deadline = Instant::now() + wait;
        loop {
            match std::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let stamp = chrono::Utc::now().to_rfc3339();
                    writeln!(file, "pid={} acquired_at={stamp}", std::process::id())
                        .with_context(|| format!("writing lock file {}", path.display()))?;
                    info!(lock = %path.display(), "run lock acquired");
                    return Ok(Some(Self { path }));
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path, stale_after) {
                        warn!(lock = %path.display(), "removing stale run lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("creating lock file {}", path.display()))
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(lock = %path.display(), waited_ms = wait.as_millis() as u64, "run lock busy");
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %err, "failed to release run lock");
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= stale_after)
}
