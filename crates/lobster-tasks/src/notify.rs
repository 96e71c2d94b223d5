use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lobster_types::{AccountId, Credits, ListingId, Task, TaskEvent, TaskId, TaskState};

/// What a seller agent receives about one of its tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotice {
    pub task_id: TaskId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub listing_id: ListingId,
    pub price: Credits,
    pub state: TaskState,
    /// `None` when the task was just created.
    pub event: Option<TaskEvent>,
    pub input: serde_json::Value,
    pub deadline: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

impl TaskNotice {
    pub fn new(task: &Task, event: Option<TaskEvent>) -> Self {
        Self {
            task_id: task.id,
            buyer: task.buyer,
            seller: task.seller,
            listing_id: task.listing_id,
            price: task.price,
            state: task.state,
            event,
            input: task.input.clone(),
            deadline: task.deadline,
            at: task.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Receives a notice after every committed task transition. Called outside any
/// lock; delivery failures must not propagate back into the engine.
#[async_trait]
pub trait TaskNotifier: Send + Sync {
    async fn notify(&self, notice: TaskNotice);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl TaskNotifier for NoopNotifier {
    async fn notify(&self, _notice: TaskNotice) {}
}
