use std::{
    path::Path,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::{fs, sync::Mutex};
use tracing::{info, warn};

use crate::{config::Config, AppState};

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepSummary {
    pub uploads_removed: usize,
    pub outputs_removed: usize,
}

/// Deletes entries of `dir` whose modification time is older than
/// `max_age`. Individual deletion failures are logged and skipped; only a
/// failure to list the directory aborts the sweep.
pub async fn sweep_dir(dir: &Path, max_age: Duration) -> Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Failed to stat {}: {err}", path.display());
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                warn!("Failed to read mtime of {}: {err}", path.display());
                continue;
            }
        };
        if !is_expired(modified, now, max_age) {
            continue;
        }

        // Directories show up here only as leftovers from failed
        // conversions; they age out the same way as files.
        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match result {
            Ok(()) => {
                info!("Removed stale entry {}", path.display());
                removed += 1;
            }
            Err(err) => warn!("Failed to remove {}: {err}", path.display()),
        }
    }

    Ok(removed)
}

fn is_expired(modified: SystemTime, now: SystemTime, max_age: Duration) -> bool {
    now.duration_since(modified)
        .map(|age| age > max_age)
        .unwrap_or(false)
}

pub async fn sweep_all(config: &Config) -> Result<SweepSummary> {
    let max_age = Duration::from_secs(config.max_file_age_hours * 3600);
    let uploads_removed = sweep_dir(&config.upload_root, max_age).await?;
    let outputs_removed = sweep_dir(&config.output_root, max_age).await?;
    Ok(SweepSummary {
        uploads_removed,
        outputs_removed,
    })
}

/// Allows at most one background sweep per calendar day. The caller passes
/// the current time so tests can drive the gate with fixed clocks.
#[derive(Default)]
pub struct SweepGate {
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl SweepGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn try_claim(&self, now: DateTime<Utc>) -> bool {
        let mut last_run = self.last_run.lock().await;
        if last_run.map(|ts| ts.date_naive()) == Some(now.date_naive()) {
            return false;
        }
        *last_run = Some(now);
        true
    }
}

/// Per-request trigger: claims the daily gate and, when due, dispatches the
/// sweep as a detached task. The caller never waits for the sweep itself.
pub async fn maybe_spawn_sweep(state: &AppState) {
    if !state.sweep_gate.try_claim(Utc::now()).await {
        return;
    }
    let config = state.config.clone();
    tokio::spawn(async move {
        match sweep_all(&config).await {
            Ok(summary) => info!(
                uploads = summary.uploads_removed,
                outputs = summary.outputs_removed,
                "Scheduled sweep finished"
            ),
            Err(err) => warn!("Scheduled sweep failed: {err:#}"),
        }
    });
}
