use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use lobster_types::{AccountId, LobsterError, Result, Task, TaskId, TaskState};

/// Which side of a task an account is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
}

/// Selection for [`TaskStore::list`]. Empty fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub account: Option<AccountId>,
    pub role: Option<Role>,
    pub state: Option<TaskState>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        let party = match (self.account, self.role) {
            (None, _) => true,
            (Some(a), Some(Role::Buyer)) => task.buyer == a,
            (Some(a), Some(Role::Seller)) => task.seller == a,
            (Some(a), None) => task.buyer == a || task.seller == a,
        };
        party && self.state.is_none_or(|s| task.state == s)
    }
}

/// Outcome of [`TaskStore::insert_if_absent`].
#[derive(Debug, Clone)]
pub enum Inserted {
    New(Task),
    Existing(Task),
}

/// Versioned task records. Every update is a compare-and-swap on `version`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_if_absent(&self, task: Task) -> Result<Inserted>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    /// Replace the stored task if its version still equals `expected_version`.
    /// A stale version fails with `Conflict`.
    async fn compare_and_swap(&self, task: Task, expected_version: u64) -> Result<()>;

    /// Matching tasks, oldest first.
    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>>;

    /// Non-terminal tasks whose deadline is at or before `now`.
    async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Terminal tasks whose ledger effect is not yet confirmed.
    async fn unsettled(&self) -> Result<Vec<Task>>;

    async fn all(&self) -> Result<Vec<Task>>;
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a persisted set of tasks.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let store = Self::new();
        for task in tasks {
            store.tasks.insert(task.id, task);
        }
        store
    }

    fn collect(&self, pred: impl Fn(&Task) -> bool) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| pred(t.value()))
            .map(|t| t.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_if_absent(&self, task: Task) -> Result<Inserted> {
        use dashmap::mapref::entry::Entry;

        match self.tasks.entry(task.id) {
            Entry::Occupied(existing) => Ok(Inserted::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                Ok(Inserted::New(task))
            }
        }
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn compare_and_swap(&self, task: Task, expected_version: u64) -> Result<()> {
        let mut current = self
            .tasks
            .get_mut(&task.id)
            .ok_or(LobsterError::TaskNotFound(task.id))?;
        if current.version != expected_version {
            return Err(LobsterError::Conflict(format!(
                "task {} is at version {}, expected {}",
                task.id, current.version, expected_version
            )));
        }
        *current = task;
        Ok(())
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        Ok(self.collect(|t| filter.matches(t)))
    }

    async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        Ok(self.collect(|t| t.is_overdue(now)))
    }

    async fn unsettled(&self) -> Result<Vec<Task>> {
        Ok(self.collect(Task::needs_settlement))
    }

    async fn all(&self) -> Result<Vec<Task>> {
        Ok(self.collect(|_| true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn task(buyer: AccountId, seller: AccountId) -> Task {
        Task::new(
            Uuid::new_v4(),
            buyer,
            seller,
            Uuid::new_v4(),
            100,
            serde_json::json!({}),
            60,
            Duration::seconds(30),
        )
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first() {
        let store = InMemoryTaskStore::new();
        let first = task(Uuid::new_v4(), Uuid::new_v4());
        let mut second = first.clone();
        second.price = 999;

        assert!(matches!(
            store.insert_if_absent(first.clone()).await.unwrap(),
            Inserted::New(_)
        ));
        match store.insert_if_absent(second).await.unwrap() {
            Inserted::Existing(t) => assert_eq!(t.price, 100),
            Inserted::New(_) => panic!("second insert should not win"),
        }
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let store = InMemoryTaskStore::new();
        let original = task(Uuid::new_v4(), Uuid::new_v4());
        store.insert_if_absent(original.clone()).await.unwrap();

        let mut next = original.clone();
        next.version = 1;
        store.compare_and_swap(next.clone(), 0).await.unwrap();

        let mut stale = original.clone();
        stale.version = 1;
        let result = store.compare_and_swap(stale, 0).await;
        assert!(matches!(result, Err(LobsterError::Conflict(_))));

        let missing = task(Uuid::new_v4(), Uuid::new_v4());
        let result = store.compare_and_swap(missing, 0).await;
        assert!(matches!(result, Err(LobsterError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters_by_role() {
        let store = InMemoryTaskStore::new();
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        store.insert_if_absent(task(buyer, seller)).await.unwrap();
        store.insert_if_absent(task(seller, Uuid::new_v4())).await.unwrap();

        let as_buyer = TaskFilter {
            account: Some(seller),
            role: Some(Role::Buyer),
            state: None,
        };
        assert_eq!(store.list(as_buyer).await.unwrap().len(), 1);

        let any = TaskFilter {
            account: Some(seller),
            ..TaskFilter::default()
        };
        assert_eq!(store.list(any).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_overdue() {
        let store = InMemoryTaskStore::new();
        let t = task(Uuid::new_v4(), Uuid::new_v4());
        let deadline = t.deadline;
        store.insert_if_absent(t).await.unwrap();

        assert!(store.overdue(deadline - Duration::seconds(1)).await.unwrap().is_empty());
        assert_eq!(store.overdue(deadline).await.unwrap().len(), 1);
    }
}
