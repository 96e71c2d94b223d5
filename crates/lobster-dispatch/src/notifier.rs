use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use lobster_tasks::{TaskNotice, TaskNotifier};
use lobster_types::{LobsterError, Result, TaskId};

use crate::endpoint::{DeliveryMode, EndpointRegistry};
use crate::queue::PollQueue;
use crate::webhook::{RetryPolicy, WebhookTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting in the seller's poll queue.
    Queued,
    Delivered,
    /// Push exhausted its retries; the task fell back to the poll queue.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub task_id: TaskId,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Last delivery outcome per task.
#[derive(Debug, Default)]
pub struct DeliveryLog {
    records: DashMap<TaskId, DeliveryRecord>,
}

impl DeliveryLog {
    pub fn record(
        &self,
        task_id: TaskId,
        status: DeliveryStatus,
        attempts: u32,
        last_error: Option<String>,
    ) -> DeliveryRecord {
        let record = DeliveryRecord {
            task_id,
            status,
            attempts,
            last_error,
            at: Utc::now(),
        };
        self.records.insert(task_id, record.clone());
        record
    }

    pub fn get(&self, task_id: TaskId) -> Option<DeliveryRecord> {
        self.records.get(&task_id).map(|r| r.clone())
    }
}

/// Routes task notices to sellers by their delivery mode.
///
/// New tasks are pushed to webhook sellers (in the background, with retries)
/// or queued for polling sellers. Terminal tasks are withdrawn from the poll
/// queue. Delivery problems are logged and never change task state.
#[derive(Clone)]
pub struct Dispatcher {
    endpoints: Arc<EndpointRegistry>,
    queue: Arc<PollQueue>,
    transport: Arc<dyn WebhookTransport>,
    retry: RetryPolicy,
    log: Arc<DeliveryLog>,
}

impl Dispatcher {
    pub fn new(
        endpoints: Arc<EndpointRegistry>,
        queue: Arc<PollQueue>,
        transport: Arc<dyn WebhookTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            endpoints,
            queue,
            transport,
            retry,
            log: Arc::new(DeliveryLog::default()),
        }
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn queue(&self) -> &PollQueue {
        &self.queue
    }

    pub fn delivery(&self, task_id: TaskId) -> Option<DeliveryRecord> {
        self.log.get(task_id)
    }

    /// Deliver right away, waiting for the outcome. Polling sellers get the
    /// task queued; webhook sellers fail with `DeliveryFailed` once retries
    /// run out, and the task is queued for polling instead.
    pub async fn deliver_now(&self, notice: &TaskNotice) -> Result<DeliveryRecord> {
        match self.endpoints.mode(notice.seller) {
            DeliveryMode::Pull => Ok(self.enqueue(notice)),
            DeliveryMode::Push { url } => {
                let record = self.push(&url, notice).await;
                match record.status {
                    DeliveryStatus::Failed => Err(LobsterError::DeliveryFailed {
                        task_id: notice.task_id,
                        attempts: record.attempts,
                    }),
                    _ => Ok(record),
                }
            }
        }
    }

    fn enqueue(&self, notice: &TaskNotice) -> DeliveryRecord {
        self.queue.enqueue(notice.seller, notice.task_id);
        tracing::debug!("Task {} queued for seller {}", notice.task_id, notice.seller);
        self.log
            .record(notice.task_id, DeliveryStatus::Queued, 0, None)
    }

    async fn push(&self, url: &str, notice: &TaskNotice) -> DeliveryRecord {
        let mut last_error = None;
        for attempt in 1..=self.retry.max_attempts.max(1) {
            match self.transport.post(url, notice).await {
                Ok(()) => {
                    tracing::info!(
                        "Task {} delivered to {} on attempt {}",
                        notice.task_id,
                        url,
                        attempt
                    );
                    return self.log.record(
                        notice.task_id,
                        DeliveryStatus::Delivered,
                        attempt,
                        None,
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Delivery of task {} to {} failed (attempt {}): {}",
                        notice.task_id,
                        url,
                        attempt,
                        e
                    );
                    last_error = Some(e.to_string());
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                }
            }
        }

        let attempts = self.retry.max_attempts.max(1);
        tracing::error!(
            "Giving up on pushing task {} after {} attempts, queueing for poll",
            notice.task_id,
            attempts
        );
        self.queue.enqueue(notice.seller, notice.task_id);
        self.log
            .record(notice.task_id, DeliveryStatus::Failed, attempts, last_error)
    }
}

#[async_trait]
impl TaskNotifier for Dispatcher {
    async fn notify(&self, notice: TaskNotice) {
        if notice.is_terminal() {
            self.queue.withdraw(notice.seller, notice.task_id);
            if let DeliveryMode::Push { url } = self.endpoints.mode(notice.seller) {
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.transport.post(&url, &notice).await {
                        tracing::debug!("Terminal notice for task {} not delivered: {}", notice.task_id, e);
                    }
                });
            }
            return;
        }
        if notice.event.is_some() {
            return;
        }

        match self.endpoints.mode(notice.seller) {
            DeliveryMode::Pull => {
                self.enqueue(&notice);
            }
            DeliveryMode::Push { url } => {
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    dispatcher.push(&url, &notice).await;
                });
            }
        }
    }
}
