use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use crate::store::{StoreError, StoreOrigin, TaskEvent, TaskEventKind, TaskStore};
use crate::task::{Address, Task, TaskId};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Local task store: the runnable stand-in for the on-chain
/// collaborator. Enforces the same observable contract (ownership,
/// privacy, soft-delete slot reservation, event emission) and
/// optionally persists its records as JSONL in a data directory.
pub struct LocalStore {
    origin: StoreOrigin,
    data_path: Option<PathBuf>,
    max_content: usize,
    records: Mutex<Vec<Task>>,
    events: broadcast::Sender<TaskEvent>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("origin", &self.origin)
            .field("data_path", &self.data_path)
            .field("max_content", &self.max_content)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, max_content: usize) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let data_path = data_dir.join("tasks.data");
        if !data_path.exists() {
            fs::write(&data_path, "")?;
        }

        let records = load_jsonl(&data_path).context("failed to load tasks.data")?;
        info!(
            data_path = %data_path.display(),
            count = records.len(),
            "opened local store"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            origin: StoreOrigin::fresh(),
            data_path: Some(data_path),
            max_content,
            records: Mutex::new(records),
            events,
        })
    }

    /// Ephemeral store with no backing file.
    pub fn in_memory(max_content: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            origin: StoreOrigin::fresh(),
            data_path: None,
            max_content,
            records: Mutex::new(Vec::new()),
            events,
        }
    }

    fn persist(&self, records: &[Task]) -> Result<(), StoreError> {
        if let Some(path) = &self.data_path {
            save_jsonl_atomic(path, records)
                .map_err(|err| StoreError::Other(format!("failed to persist store: {err:#}")))?;
        }
        Ok(())
    }

    fn emit(&self, kind: TaskEventKind) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.events.send(TaskEvent {
            origin: self.origin,
            kind,
        });
    }
}

#[async_trait]
impl TaskStore for LocalStore {
    fn origin(&self) -> StoreOrigin {
        self.origin
    }

    fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    #[tracing::instrument(skip(self, signer), fields(signer = %signer, id = %id))]
    async fn create_task(
        &self,
        signer: &Address,
        id: &TaskId,
        content: &str,
        private: bool,
    ) -> Result<(), StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Rejected("Content cannot be empty".to_string()));
        }
        if content.chars().count() > self.max_content {
            return Err(StoreError::Rejected(format!(
                "Content exceeds {} characters",
                self.max_content
            )));
        }

        let mut records = self.records.lock().await;
        // A soft-deleted slot still reserves its identifier.
        if records.iter().any(|t| t.id == *id) {
            return Err(StoreError::Rejected("Task id already used".to_string()));
        }

        let task = Task::new(
            id.clone(),
            content.trim().to_string(),
            private,
            signer.clone(),
            Utc::now().timestamp(),
        );
        records.push(task);
        self.persist(&records)?;
        debug!(count = records.len(), "task created");
        drop(records);

        self.emit(TaskEventKind::Created(id.clone()));
        Ok(())
    }

    #[tracing::instrument(skip(self, signer), fields(signer = %signer, id = %id))]
    async fn delete_task(&self, signer: &Address, id: &TaskId) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let task = records
            .iter_mut()
            .find(|t| t.id == *id && !t.is_deleted())
            .ok_or_else(|| StoreError::Rejected("Task already deleted".to_string()))?;

        if task.owner != *signer {
            return Err(StoreError::Rejected(
                "Only the task owner can delete it".to_string(),
            ));
        }

        task.content.clear();
        self.persist(&records)?;
        drop(records);

        self.emit(TaskEventKind::Deleted(id.clone()));
        Ok(())
    }

    #[tracing::instrument(skip(self, signer), fields(signer = %signer, id = %id))]
    async fn toggle_completed(&self, signer: &Address, id: &TaskId) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let task = records
            .iter_mut()
            .find(|t| t.id == *id && !t.is_deleted())
            .ok_or_else(|| StoreError::Rejected("Task already deleted".to_string()))?;

        if task.private && task.owner != *signer {
            return Err(StoreError::Rejected(
                "Only the task owner can complete it".to_string(),
            ));
        }

        task.completed = !task.completed;
        task.completed_at = if task.completed {
            Utc::now().timestamp()
        } else {
            0
        };
        let now_completed = task.completed;
        self.persist(&records)?;
        drop(records);

        self.emit(TaskEventKind::Completed(id.clone(), now_completed));
        Ok(())
    }

    #[tracing::instrument(skip(self, signer), fields(signer = %signer))]
    async fn clear_completed_tasks(&self, signer: &Address) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let mut cleared = Vec::new();

        for task in records.iter_mut() {
            if !task.is_deleted() && task.completed && task.owner == *signer {
                task.content.clear();
                cleared.push(task.id.clone());
            }
        }

        self.persist(&records)?;
        debug!(cleared = cleared.len(), "cleared completed tasks");
        drop(records);

        self.emit(TaskEventKind::Cleared(cleared));
        Ok(())
    }

    #[tracing::instrument(skip(self, caller), fields(caller = %caller))]
    async fn get_my_tasks(&self, caller: &Address) -> Result<Vec<Task>, StoreError> {
        let records = self.records.lock().await;
        let listing: Vec<Task> = records
            .iter()
            .filter(|t| !t.private || t.owner == *caller)
            .cloned()
            .collect();
        debug!(count = listing.len(), "listed tasks");
        Ok(listing)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Task>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: Task = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(task);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for task in tasks {
        let serialized = serde_json::to_string(task)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
