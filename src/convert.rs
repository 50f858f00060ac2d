use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{
    artifact_store,
    config::Config,
    models::{ConversionRequest, ConvertOptions, TaskState},
    task_table::TaskTable,
};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unknown task id {0}")]
    UnknownTask(String),
    #[error("conversion engine not found at {}", .path.display())]
    EngineNotFound { path: PathBuf },
    #[error("failed to start conversion engine: {0}")]
    EngineStart(#[source] io::Error),
    #[error("conversion failed: {stderr}")]
    EngineFailed {
        code: Option<i32>,
        stderr: String,
        log: String,
    },
    #[error("failed to package conversion output: {source}")]
    ArchivePackaging {
        #[source]
        source: anyhow::Error,
        log: String,
    },
}

impl ConvertError {
    /// Captured engine output, when the run got far enough to produce any.
    pub fn engine_log(&self) -> Option<&str> {
        match self {
            Self::EngineFailed { log, .. } | Self::ArchivePackaging { log, .. } => Some(log),
            _ => None,
        }
    }
}

pub fn build_engine_args(
    input_path: &Path,
    output_dir: &Path,
    options: &ConvertOptions,
    log_path: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        input_path.into(),
        "-o".into(),
        output_dir.into(),
        "--fmt".into(),
        options.format.as_flag().into(),
        "--threads".into(),
        options.threads.to_string().into(),
        "--dpi".into(),
        options.dpi.to_string().into(),
        "--quality".into(),
        options.quality.to_string().into(),
        "--log-file".into(),
        log_path.into(),
    ];

    if let Some(size) = options.size.as_deref().filter(|s| !s.is_empty()) {
        args.push("--size".into());
        args.push(size.into());
    }
    if options.grayscale {
        args.push("--grayscale".into());
    }
    if let Some(prefix) = options.prefix.as_deref().filter(|p| !p.is_empty()) {
        args.push("--prefix".into());
        args.push(prefix.into());
    }

    args
}

pub fn engine_log_path(config: &Config, task_id: &str) -> PathBuf {
    config.output_root.join(format!("conversion_{task_id}.log"))
}

/// Runs one conversion to a terminal outcome. On success the task record is
/// updated here; on error the caller records the failure so the record can
/// never be left in `processing`.
pub async fn run_conversion(
    config: Config,
    tasks: TaskTable,
    task_id: String,
) -> Result<(), ConvertError> {
    let request = claim_request(&tasks, &task_id).await?;

    let log_path = engine_log_path(&config, &task_id);
    let args = build_engine_args(
        &request.input_path,
        &request.output_dir,
        &request.options,
        &log_path,
    );

    info!(
        task_id = %task_id,
        input = %request.input_path.display(),
        engine = %config.engine_path.display(),
        "Starting conversion"
    );

    let output = Command::new(&config.engine_path)
        .args(&args)
        .output()
        .await
        .map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ConvertError::EngineNotFound {
                path: config.engine_path.clone(),
            },
            _ => ConvertError::EngineStart(err),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let log = format!("{stdout}\n{stderr}");

    if !output.status.success() {
        return Err(ConvertError::EngineFailed {
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
            log,
        });
    }

    let dir = request.output_dir.clone();
    let packed = tokio::task::spawn_blocking(move || artifact_store::pack_directory(&dir)).await;
    let archive_path = match packed {
        Ok(Ok(path)) => path,
        Ok(Err(err)) => {
            return Err(ConvertError::ArchivePackaging { source: err, log });
        }
        Err(err) => {
            return Err(ConvertError::ArchivePackaging {
                source: anyhow::anyhow!(err),
                log,
            });
        }
    };

    let archive_name = archive_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{task_id}.zip"));

    tasks
        .update(&task_id, |task| {
            task.complete(archive_name.clone(), log.clone(), Utc::now());
        })
        .await
        .map_err(|_| ConvertError::UnknownTask(task_id.clone()))?;

    if let Err(err) = tokio::fs::remove_dir_all(&request.output_dir).await {
        warn!(
            task_id = %task_id,
            "Failed to remove output directory {}: {err}",
            request.output_dir.display()
        );
    }

    info!(task_id = %task_id, archive = %archive_name, "Conversion completed");
    Ok(())
}

async fn claim_request(
    tasks: &TaskTable,
    task_id: &str,
) -> Result<ConversionRequest, ConvertError> {
    tasks
        .update(task_id, |task| {
            task.status = TaskState::Processing;
            task.start_time = Some(Utc::now());
            task.request.take()
        })
        .await
        .ok()
        .flatten()
        .ok_or_else(|| ConvertError::UnknownTask(task_id.to_string()))
}
