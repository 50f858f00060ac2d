use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::TaskRecord;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("task id {0} is already registered")]
    DuplicateId(String),
    #[error("unknown task id {0}")]
    UnknownId(String),
}

/// Shared map from task id to task record. Records are inserted once, read
/// as cloned snapshots, and mutated only through atomic read-modify-write
/// closures. There is no eviction; the table lives as long as the process.
#[derive(Clone, Default)]
pub struct TaskTable {
    inner: Arc<RwLock<HashMap<String, TaskRecord>>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: TaskRecord) -> Result<(), TableError> {
        let mut tasks = self.inner.write().await;
        if tasks.contains_key(&record.task_id) {
            return Err(TableError::DuplicateId(record.task_id.clone()));
        }
        tasks.insert(record.task_id.clone(), record);
        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.read().await.get(task_id).cloned()
    }

    pub async fn update<T>(
        &self,
        task_id: &str,
        mutate: impl FnOnce(&mut TaskRecord) -> T,
    ) -> Result<T, TableError> {
        let mut tasks = self.inner.write().await;
        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| TableError::UnknownId(task_id.to_string()))?;
        Ok(mutate(record))
    }

    /// Backs out a submission whose enqueue failed; the task was never
    /// accepted, so this does not violate the no-removal lifecycle rule.
    pub async fn remove(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.write().await.remove(task_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{ConversionRequest, ConvertOptions, TaskState};

    fn record(task_id: &str) -> TaskRecord {
        TaskRecord::new(
            task_id.to_string(),
            "report.pdf".to_string(),
            ConversionRequest {
                input_path: "uploads/report.pdf".into(),
                output_dir: format!("output_images/{task_id}").into(),
                options: ConvertOptions::default(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn insert_then_get_returns_snapshot() {
        let table = TaskTable::new();
        table.insert(record("report_1")).await.expect("insert");

        let snapshot = table.get("report_1").await.expect("present");
        assert_eq!(snapshot.status, TaskState::Queued);
        assert_eq!(snapshot.source_filename, "report.pdf");
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let table = TaskTable::new();
        table.insert(record("report_1")).await.expect("insert");

        let err = table.insert(record("report_1")).await;
        assert!(matches!(err, Err(TableError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn update_unknown_id_fails() {
        let table = TaskTable::new();
        let err = table
            .update("missing", |task| task.status = TaskState::Processing)
            .await;
        assert!(matches!(err, Err(TableError::UnknownId(_))));
    }

    #[tokio::test]
    async fn update_is_visible_to_subsequent_reads() {
        let table = TaskTable::new();
        table.insert(record("report_1")).await.expect("insert");

        let taken = table
            .update("report_1", |task| {
                task.status = TaskState::Processing;
                task.start_time = Some(Utc::now());
                task.request.take()
            })
            .await
            .expect("update");
        assert!(taken.is_some());

        let snapshot = table.get("report_1").await.expect("present");
        assert_eq!(snapshot.status, TaskState::Processing);
        assert!(snapshot.start_time.is_some());
        assert!(snapshot.request.is_none());
    }

    #[tokio::test]
    async fn get_unknown_id_is_none() {
        let table = TaskTable::new();
        assert!(table.get("missing").await.is_none());
    }
}
