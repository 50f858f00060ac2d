use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    convert::{self, ConvertError},
    models::{ConversionRequest, ConvertOptions, TaskRecord},
    task_table::TaskTable,
};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("a task with id {0} is already registered")]
    DuplicateTask(String),
    #[error("conversion queue is not accepting work")]
    QueueUnavailable,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Bounded-concurrency conversion scheduler. A fixed set of workers drains
/// a shared queue; submissions beyond the cap wait in the channel rather
/// than being rejected.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: Config,
    tasks: TaskTable,
    queue_tx: Mutex<Option<mpsc::Sender<String>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn start(config: Config, tasks: TaskTable) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&queue_rx),
                config.clone(),
                tasks.clone(),
            )));
        }

        Self {
            inner: Arc::new(SchedulerInner {
                config,
                tasks,
                queue_tx: Mutex::new(Some(queue_tx)),
                workers: Mutex::new(workers),
            }),
        }
    }

    /// Registers a new conversion task and enqueues it for the worker pool.
    /// Returns the task id synchronously; the conversion itself runs later.
    pub async fn submit(
        &self,
        input_path: &Path,
        options: ConvertOptions,
    ) -> Result<String, SubmitError> {
        if tokio::fs::metadata(input_path).await.is_err() {
            return Err(SubmitError::InputNotFound(input_path.to_path_buf()));
        }

        let source_filename = input_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| SubmitError::InputNotFound(input_path.to_path_buf()))?;

        let now = Utc::now();
        let task_id = generate_task_id(input_path, now);
        let output_dir = self.inner.config.output_root.join(&task_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let record = TaskRecord::new(
            task_id.clone(),
            source_filename,
            ConversionRequest {
                input_path: input_path.to_path_buf(),
                output_dir,
                options,
            },
            now,
        );
        self.inner
            .tasks
            .insert(record)
            .await
            .map_err(|_| SubmitError::DuplicateTask(task_id.clone()))?;

        let sender = self.inner.queue_tx.lock().await.clone();
        let Some(sender) = sender else {
            self.inner.tasks.remove(&task_id).await;
            return Err(SubmitError::QueueUnavailable);
        };
        if sender.send(task_id.clone()).await.is_err() {
            self.inner.tasks.remove(&task_id).await;
            return Err(SubmitError::QueueUnavailable);
        }

        info!(task_id = %task_id, "Conversion task queued");
        Ok(task_id)
    }

    /// Closes the queue, lets the workers drain outstanding tasks, and
    /// joins them. Further submissions are rejected.
    pub async fn shutdown(&self) {
        self.inner.queue_tx.lock().await.take();
        let mut workers = self.inner.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(err) = handle.await {
                warn!("Conversion worker exited abnormally: {err}");
            }
        }
    }
}

fn generate_task_id(input_path: &Path, now: DateTime<Utc>) -> String {
    let stem = input_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "document".to_string());
    // The short random suffix keeps same-stem submissions within one
    // second from colliding.
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stem}_{}_{}", now.format("%Y%m%d%H%M%S"), &suffix[..6])
}

async fn worker_loop(
    worker_id: usize,
    queue_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    config: Config,
    tasks: TaskTable,
) {
    loop {
        let next = { queue_rx.lock().await.recv().await };
        let Some(task_id) = next else { break };

        info!(worker = worker_id, task_id = %task_id, "Worker picked conversion task");
        let run = tokio::spawn(convert::run_conversion(
            config.clone(),
            tasks.clone(),
            task_id.clone(),
        ));
        match run.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => record_failure(&tasks, &task_id, &err).await,
            Err(err) => {
                error!(task_id = %task_id, "Conversion task aborted: {err}");
                let message = format!("internal error: {err}");
                let log = message.clone();
                if let Err(table_err) = tasks
                    .update(&task_id, move |task| task.fail(message, log, Utc::now()))
                    .await
                {
                    warn!(task_id = %task_id, "Could not record failure: {table_err}");
                }
            }
        }
    }
    info!(worker = worker_id, "Conversion worker stopped");
}

async fn record_failure(tasks: &TaskTable, task_id: &str, err: &ConvertError) {
    error!(task_id = %task_id, "Conversion task failed: {err:#}");
    let message = err.to_string();
    let log = err
        .engine_log()
        .map(str::to_owned)
        .unwrap_or_else(|| message.clone());
    if let Err(table_err) = tasks
        .update(task_id, move |task| task.fail(message, log, Utc::now()))
        .await
    {
        warn!(task_id = %task_id, "Could not record failure: {table_err}");
    }
}
