use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lobster_types::{
    AccountId, Credits, LedgerEffect, ListingId, LobsterError, OpTag, QuoteId, Result, Task,
    TaskEvent, TaskId, TaskState,
};
use lobster_wallet::WalletService;

use crate::catalog::Catalog;
use crate::notify::{TaskNotice, TaskNotifier};
use crate::store::{Inserted, Role, TaskFilter, TaskStore};

#[derive(Debug, Clone, Copy)]
pub struct TaskEngineConfig {
    /// How long a seller has to accept a submitted task.
    pub submit_timeout: Duration,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    /// CAS attempts before a contended transition gives up with `Conflict`.
    pub max_cas_retries: u32,
    /// Age after which a freeze with no task behind it is refunded.
    pub orphan_grace: Duration,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::seconds(300),
            default_timeout_secs: 600,
            max_timeout_secs: 86_400,
            max_cas_retries: 8,
            orphan_grace: Duration::seconds(60),
        }
    }
}

/// Price agreed through a quote, overriding the listing price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgreedQuote {
    pub quote_id: QuoteId,
    pub price: Credits,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTask {
    /// Client-chosen id. Resubmitting the same request under the same id
    /// returns the existing task.
    #[serde(default)]
    pub id: Option<TaskId>,
    pub listing_id: ListingId,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default, alias = "timeout_seconds")]
    pub timeout_secs: Option<u64>,
    #[serde(skip)]
    pub quote: Option<AgreedQuote>,
}

/// Who is driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Buyer(AccountId),
    Seller(AccountId),
    /// Sweeps and internal compensation.
    System,
}

impl Actor {
    fn check(self, task: &Task, event: TaskEvent) -> Result<()> {
        use TaskEvent as E;

        let allowed = match (self, event) {
            (Actor::System, E::Timeout | E::Cancel) => true,
            (Actor::Buyer(account), E::Cancel) => account == task.buyer,
            (
                Actor::Seller(account),
                E::Accept | E::Reject | E::Start | E::SubmitResult | E::Fail,
            ) => account == task.seller,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(LobsterError::Forbidden(format!(
                "{:?} may not apply {:?} to task {}",
                self, event, task.id
            )))
        }
    }
}

/// Drives tasks through their lifecycle and ties each terminal transition to
/// exactly one ledger effect.
pub struct TaskEngine {
    store: Arc<dyn TaskStore>,
    wallets: WalletService,
    catalog: Arc<dyn Catalog>,
    notifier: Arc<dyn TaskNotifier>,
    config: TaskEngineConfig,
}

impl TaskEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        wallets: WalletService,
        catalog: Arc<dyn Catalog>,
        notifier: Arc<dyn TaskNotifier>,
        config: TaskEngineConfig,
    ) -> Self {
        Self {
            store,
            wallets,
            catalog,
            notifier,
            config,
        }
    }

    pub fn wallets(&self) -> &WalletService {
        &self.wallets
    }

    pub fn catalog(&self) -> Arc<dyn Catalog> {
        self.catalog.clone()
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    pub fn config(&self) -> TaskEngineConfig {
        self.config
    }

    /// Freeze the price on the buyer's wallet, then record the task as
    /// `submitted`. No task exists if the freeze fails.
    pub async fn create(&self, buyer: AccountId, request: CreateTask) -> Result<Task> {
        let id = request.id.unwrap_or_else(Uuid::new_v4);
        if let Some(existing) = self.store.get(id).await? {
            return same_request(existing, buyer, &request);
        }

        let listing = self.catalog.listing(request.listing_id).await?;
        if listing.seller == buyer {
            return Err(LobsterError::SelfDealing);
        }
        let price = request.quote.map_or(listing.price, |q| q.price);
        if price == 0 {
            return Err(LobsterError::InvalidAmount("task price must be positive".into()));
        }
        let timeout_secs = request
            .timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(self.config.default_timeout_secs)
            .min(self.config.max_timeout_secs);

        self.wallets.freeze(buyer, price, id).await?;
        if self.wallets.applied(id, OpTag::Refund).await?.is_some() {
            return Err(LobsterError::Conflict(format!(
                "task id {id} was released and cannot be reused"
            )));
        }

        let mut task = Task::new(
            id,
            buyer,
            listing.seller,
            listing.id,
            price,
            request.input.clone(),
            timeout_secs,
            self.config.submit_timeout,
        );
        if let Some(quote) = request.quote {
            task = task.with_quote(quote.quote_id);
        }

        match self.store.insert_if_absent(task).await? {
            Inserted::New(task) => {
                tracing::info!(
                    "Task {} submitted: buyer {} -> seller {} for {}",
                    task.id,
                    task.buyer,
                    task.seller,
                    task.price
                );
                self.notifier.notify(TaskNotice::new(&task, None)).await;
                Ok(task)
            }
            Inserted::Existing(existing) => same_request(existing, buyer, &request),
        }
    }

    /// A task is visible to its buyer and its seller only.
    pub async fn get(&self, account: AccountId, id: TaskId) -> Result<Task> {
        match self.store.get(id).await? {
            Some(task) if task.buyer == account || task.seller == account => Ok(task),
            _ => Err(LobsterError::TaskNotFound(id)),
        }
    }

    pub async fn list(
        &self,
        account: AccountId,
        role: Option<Role>,
        state: Option<TaskState>,
    ) -> Result<Vec<Task>> {
        self.store
            .list(TaskFilter {
                account: Some(account),
                role,
                state,
            })
            .await
    }

    /// Tasks waiting for the seller to accept or reject.
    pub async fn pending_for_seller(&self, seller: AccountId) -> Result<Vec<Task>> {
        self.list(seller, Some(Role::Seller), Some(TaskState::Submitted))
            .await
    }

    pub async fn accept(&self, seller: AccountId, id: TaskId) -> Result<Task> {
        self.transition(Actor::Seller(seller), id, TaskEvent::Accept, Utc::now(), |_| {})
            .await
    }

    pub async fn reject(&self, seller: AccountId, id: TaskId, reason: Option<String>) -> Result<Task> {
        self.transition(Actor::Seller(seller), id, TaskEvent::Reject, Utc::now(), |task| {
            task.error = reason.clone();
        })
        .await
    }

    pub async fn start(&self, seller: AccountId, id: TaskId) -> Result<Task> {
        self.transition(Actor::Seller(seller), id, TaskEvent::Start, Utc::now(), |_| {})
            .await
    }

    pub async fn submit_result(
        &self,
        seller: AccountId,
        id: TaskId,
        output: serde_json::Value,
        tokens_used: Option<u64>,
    ) -> Result<Task> {
        self.transition(
            Actor::Seller(seller),
            id,
            TaskEvent::SubmitResult,
            Utc::now(),
            |task| {
                task.output = Some(output.clone());
                task.tokens_used = tokens_used;
            },
        )
        .await
    }

    pub async fn fail(&self, seller: AccountId, id: TaskId, error: String) -> Result<Task> {
        self.transition(Actor::Seller(seller), id, TaskEvent::Fail, Utc::now(), |task| {
            task.error = Some(error.clone());
        })
        .await
    }

    pub async fn cancel(&self, buyer: AccountId, id: TaskId) -> Result<Task> {
        self.transition(Actor::Buyer(buyer), id, TaskEvent::Cancel, Utc::now(), |_| {})
            .await
    }

    /// Cancel on behalf of the platform, refunding the buyer.
    pub async fn abort(&self, id: TaskId, reason: &str) -> Result<Task> {
        self.transition(Actor::System, id, TaskEvent::Cancel, Utc::now(), |task| {
            task.error = Some(reason.to_string());
        })
        .await
    }

    /// Fail every task whose deadline has passed. Tasks that another caller
    /// moved on in the meantime are skipped.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<TaskId>> {
        let mut expired = Vec::new();
        for task in self.store.overdue(now).await? {
            let result = self
                .transition(Actor::System, task.id, TaskEvent::Timeout, now, |t| {
                    t.error = Some("deadline exceeded".into());
                })
                .await;
            match result {
                Ok(_) => expired.push(task.id),
                Err(LobsterError::InvalidTransition { .. } | LobsterError::Conflict(_)) => {
                    tracing::debug!("Task {} no longer overdue, skipping", task.id);
                }
                Err(e) => tracing::warn!("Failed to expire task {}: {}", task.id, e),
            }
        }
        if !expired.is_empty() {
            tracing::info!("Expired {} overdue task(s)", expired.len());
        }
        Ok(expired)
    }

    /// Apply ledger effects still owed by terminal tasks and release freezes
    /// that never got a task. Returns how many were settled or released.
    pub async fn reconcile(&self) -> Result<usize> {
        let mut settled = 0;
        for task in self.store.unsettled().await? {
            tracing::warn!("Task {} is terminal with funds still held, reconciling", task.id);
            if self.apply_effect(task).await.reservation.is_none() {
                settled += 1;
            }
        }
        Ok(settled + self.release_orphans(Utc::now()).await?)
    }

    /// Refund freezes older than the grace period whose task was never
    /// recorded, e.g. after a crash between freeze and insert.
    async fn release_orphans(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut released = 0;
        for freeze in self.wallets.open_freezes().await? {
            if now - freeze.applied_at < self.config.orphan_grace {
                continue;
            }
            let subject = freeze.op.subject;
            if self.store.get(subject).await?.is_some() {
                continue;
            }
            match self.wallets.refund(freeze.account, freeze.amount, subject).await {
                Ok(_) => {
                    tracing::warn!(
                        "Released {} frozen on {} for {}, no task was recorded",
                        freeze.amount,
                        freeze.account,
                        subject
                    );
                    released += 1;
                }
                Err(e) => tracing::error!("Failed to release orphaned freeze {}: {}", freeze.op, e),
            }
        }
        Ok(released)
    }

    /// Re-apply ledger operations a restored task relies on but the restored
    /// ledger lacks: its freeze, and the terminal effect once it was recorded
    /// as applied. A reservation that can no longer be funded is dropped and
    /// the task canceled without a refund. Returns how many tasks changed.
    pub async fn align_with_ledger(&self) -> Result<usize> {
        let mut repaired = 0;
        for task in self.store.all().await? {
            let amount = task.reservation.map_or(task.price, |r| r.amount);
            let mut touched = false;

            if self.wallets.applied(task.id, OpTag::Freeze).await?.is_none() {
                match self.wallets.freeze(task.buyer, amount, task.id).await {
                    Ok(_) => {
                        tracing::warn!("Re-applied freeze of {} for task {}", amount, task.id);
                        touched = true;
                    }
                    Err(e) => {
                        tracing::error!("Task {} holds no funds and cannot be refrozen: {}", task.id, e);
                        if task.reservation.is_some() {
                            self.drop_reservation(task).await?;
                            repaired += 1;
                        }
                        continue;
                    }
                }
            }

            let recorded = match (task.reservation, task.outcome) {
                (None, Some(effect)) => effect_tag(effect).map(|tag| (effect, tag)),
                _ => None,
            };
            if let Some((effect, tag)) = recorded {
                if self.wallets.applied(task.id, tag).await?.is_none() {
                    self.run_effect(&task, effect, amount).await?;
                    tracing::warn!("Re-applied {:?} for task {}", effect, task.id);
                    touched = true;
                }
            }

            if touched {
                repaired += 1;
            }
        }
        if repaired > 0 {
            tracing::info!("Aligned {} task(s) with the ledger", repaired);
        }
        Ok(repaired)
    }

    async fn drop_reservation(&self, task: Task) -> Result<()> {
        let now = Utc::now();
        let mut next = task.clone();
        if !next.is_terminal() {
            next.apply_event(TaskEvent::Cancel, now)?;
        }
        next.reservation = None;
        next.error = Some("held funds missing from the ledger".into());
        next.version = task.version + 1;
        next.updated_at = now;
        self.store.compare_and_swap(next, task.version).await
    }

    /// Claim-then-act: compute the transition on a read copy, commit it with
    /// a version CAS, then run the ledger effect the winning commit owes.
    async fn transition<F>(
        &self,
        actor: Actor,
        id: TaskId,
        event: TaskEvent,
        now: DateTime<Utc>,
        edit: F,
    ) -> Result<Task>
    where
        F: Fn(&mut Task) + Send + Sync,
    {
        let mut attempts = 0;
        loop {
            let current = self
                .store
                .get(id)
                .await?
                .ok_or(LobsterError::TaskNotFound(id))?;
            actor.check(&current, event)?;

            let mut next = current.clone();
            let transition = next.apply_event(event, now)?;
            if event == TaskEvent::Timeout && !current.is_overdue(now) {
                return Err(LobsterError::Conflict(format!("task {id} is not overdue")));
            }
            edit(&mut next);

            match self.store.compare_and_swap(next.clone(), current.version).await {
                Ok(()) => {
                    tracing::info!(
                        "Task {} {:?} -> {:?} on {:?}",
                        id,
                        current.state,
                        next.state,
                        event
                    );
                    let task = match transition.effect {
                        LedgerEffect::None => next,
                        _ => self.apply_effect(next).await,
                    };
                    self.notifier.notify(TaskNotice::new(&task, Some(event))).await;
                    return Ok(task);
                }
                Err(LobsterError::Conflict(reason)) if attempts < self.config.max_cas_retries => {
                    attempts += 1;
                    tracing::warn!("Task {} changed underneath {:?}, retrying: {}", id, event, reason);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the owed ledger effect, then clear the reservation. On failure the
    /// task is returned as is and `reconcile` picks it up later.
    async fn apply_effect(&self, task: Task) -> Task {
        let Some(reservation) = task.reservation else {
            return task;
        };
        let effect = task.owed_effect();
        if effect == LedgerEffect::None {
            return task;
        }
        let applied = self.run_effect(&task, effect, reservation.amount).await;
        if let Err(e) = applied {
            tracing::error!(
                "Ledger effect {:?} for task {} failed, left for reconcile: {}",
                effect,
                task.id,
                e
            );
            return task;
        }

        match self.finish(task.id, effect).await {
            Ok(finished) => finished,
            Err(e) => {
                tracing::error!("Failed to record settlement of task {}: {}", task.id, e);
                task
            }
        }
    }

    async fn run_effect(&self, task: &Task, effect: LedgerEffect, amount: Credits) -> Result<()> {
        match effect {
            LedgerEffect::Settle => {
                self.wallets
                    .settle(task.buyer, task.seller, amount, task.id)
                    .await?;
            }
            LedgerEffect::Refund => {
                self.wallets.refund(task.buyer, amount, task.id).await?;
            }
            LedgerEffect::None => {}
        }
        Ok(())
    }

    async fn finish(&self, id: TaskId, effect: LedgerEffect) -> Result<Task> {
        let mut attempts = 0;
        loop {
            let current = self
                .store
                .get(id)
                .await?
                .ok_or(LobsterError::TaskNotFound(id))?;
            if current.reservation.is_none() {
                return Ok(current);
            }
            let mut next = current.clone();
            next.finish_settlement(effect, Utc::now());
            match self.store.compare_and_swap(next.clone(), current.version).await {
                Ok(()) => {
                    tracing::debug!("Task {} settled with {:?}", id, effect);
                    return Ok(next);
                }
                Err(LobsterError::Conflict(_)) if attempts < self.config.max_cas_retries => {
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn effect_tag(effect: LedgerEffect) -> Option<OpTag> {
    match effect {
        LedgerEffect::Settle => Some(OpTag::Settle),
        LedgerEffect::Refund => Some(OpTag::Refund),
        LedgerEffect::None => None,
    }
}

/// An existing task answers a create only if it is the same request: same
/// buyer, listing and quote, and the agreed price when a quote is involved.
fn same_request(task: Task, buyer: AccountId, request: &CreateTask) -> Result<Task> {
    let same = task.buyer == buyer
        && task.listing_id == request.listing_id
        && task.quote_id == request.quote.map(|q| q.quote_id)
        && request.quote.is_none_or(|q| q.price == task.price);
    if same {
        Ok(task)
    } else {
        Err(LobsterError::Conflict(format!("task id {} is already in use", task.id)))
    }
}
