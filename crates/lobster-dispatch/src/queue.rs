use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use lobster_types::{AccountId, TaskId};

#[derive(Debug, Default)]
struct SellerQueue {
    pending: VecDeque<TaskId>,
    /// Claimed ids and when they were handed out.
    claimed: HashMap<TaskId, DateTime<Utc>>,
}

impl SellerQueue {
    fn contains(&self, task: TaskId) -> bool {
        self.claimed.contains_key(&task) || self.pending.contains(&task)
    }
}

/// Per-seller queue of task ids for sellers that poll.
///
/// `poll` moves ids from pending to claimed under the seller's entry lock, so
/// two concurrent pollers never receive the same id. Claims not acked within
/// the lease go back to pending.
#[derive(Debug, Default)]
pub struct PollQueue {
    queues: DashMap<AccountId, SellerQueue>,
}

impl PollQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task unless it is already queued or claimed.
    pub fn enqueue(&self, seller: AccountId, task: TaskId) -> bool {
        let mut queue = self.queues.entry(seller).or_default();
        if queue.contains(task) {
            return false;
        }
        queue.pending.push_back(task);
        true
    }

    pub fn poll(&self, seller: AccountId, max: usize, now: DateTime<Utc>) -> Vec<TaskId> {
        let Some(mut queue) = self.queues.get_mut(&seller) else {
            return Vec::new();
        };
        let take = max.min(queue.pending.len());
        let batch: Vec<TaskId> = queue.pending.drain(..take).collect();
        for task in &batch {
            queue.claimed.insert(*task, now);
        }
        batch
    }

    /// Drop a claim. Returns false if the seller held no claim on the task.
    pub fn ack(&self, seller: AccountId, task: TaskId) -> bool {
        self.queues
            .get_mut(&seller)
            .is_some_and(|mut q| q.claimed.remove(&task).is_some())
    }

    /// Remove a task that no longer needs delivery.
    pub fn withdraw(&self, seller: AccountId, task: TaskId) {
        if let Some(mut queue) = self.queues.get_mut(&seller) {
            queue.pending.retain(|t| *t != task);
            queue.claimed.remove(&task);
        }
    }

    /// Return claims older than `lease` to the front of their queue.
    pub fn requeue_stale(&self, lease: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - lease;
        let mut requeued = 0;
        for mut queue in self.queues.iter_mut() {
            let mut stale: Vec<(TaskId, DateTime<Utc>)> = queue
                .claimed
                .iter()
                .filter(|(_, at)| **at <= cutoff)
                .map(|(t, at)| (*t, *at))
                .collect();
            stale.sort_by_key(|(_, at)| std::cmp::Reverse(*at));
            for (task, _) in stale {
                queue.claimed.remove(&task);
                queue.pending.push_front(task);
                requeued += 1;
            }
        }
        if requeued > 0 {
            tracing::info!("Requeued {} unacknowledged task claim(s)", requeued);
        }
        requeued
    }

    pub fn pending_len(&self, seller: AccountId) -> usize {
        self.queues.get(&seller).map_or(0, |q| q.pending.len())
    }
}
