use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::task::{Address, Task, TaskId};

/// Failure taxonomy for store calls.
///
/// `Cancelled` is a signer declining to authorize the transaction,
/// `Rejected` is a store-side revert carrying its reason string, and
/// `Other` covers connectivity and anything else.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("transaction cancelled by user")]
    Cancelled,

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

/// Identifies which store handle emitted an event, so notifications
/// from a stale handle can be dropped after a handle swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreOrigin(Uuid);

impl StoreOrigin {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEventKind {
    Created(TaskId),
    Completed(TaskId, bool),
    Deleted(TaskId),
    Cleared(Vec<TaskId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub origin: StoreOrigin,
    pub kind: TaskEventKind,
}

/// The authoritative task store.
///
/// Mutating calls resolve only once the transaction is confirmed;
/// callers await them to completion before re-reading. `get_my_tasks`
/// returns all public records plus the caller's private records,
/// including soft-deleted slots (empty content) that the store has not
/// yet omitted.
#[async_trait]
pub trait TaskStore: Send + Sync {
    fn origin(&self) -> StoreOrigin;

    fn subscribe(&self) -> broadcast::Receiver<TaskEvent>;

    async fn create_task(
        &self,
        signer: &Address,
        id: &TaskId,
        content: &str,
        private: bool,
    ) -> Result<(), StoreError>;

    async fn delete_task(&self, signer: &Address, id: &TaskId) -> Result<(), StoreError>;

    async fn toggle_completed(&self, signer: &Address, id: &TaskId) -> Result<(), StoreError>;

    async fn clear_completed_tasks(&self, signer: &Address) -> Result<(), StoreError>;

    async fn get_my_tasks(&self, caller: &Address) -> Result<Vec<Task>, StoreError>;
}
