//! Task lifecycle scenarios run against the in-memory ledger.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use lobster_ledger::{InMemoryLedgerStore, LedgerEntryKind};
use lobster_tasks::{
    CreateTask, InMemoryCatalog, InMemoryTaskStore, Listing, NoopNotifier, TaskEngine,
    TaskEngineConfig, TaskNotice, TaskNotifier, TaskStore,
};
use lobster_types::{AccountId, LedgerEffect, LobsterError, TaskEvent, TaskState};
use lobster_wallet::{CommissionPolicy, WalletService};

struct Market {
    engine: Arc<TaskEngine>,
    wallets: WalletService,
    buyer: AccountId,
    seller: AccountId,
    listing: Uuid,
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<TaskNotice>>,
}

#[async_trait]
impl TaskNotifier for RecordingNotifier {
    async fn notify(&self, notice: TaskNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

async fn market_with(notifier: Arc<dyn TaskNotifier>) -> Market {
    let wallets = WalletService::new(
        Arc::new(InMemoryLedgerStore::new()),
        CommissionPolicy::default(),
    );
    let buyer = Uuid::new_v4();
    let seller = Uuid::new_v4();
    let listing = Uuid::new_v4();
    let catalog = InMemoryCatalog::with_listings([Listing {
        id: listing,
        seller,
        price: 200,
        name: "summarize".into(),
    }]);
    wallets.top_up(buyer, 1000, None).await.unwrap();

    let engine = TaskEngine::new(
        Arc::new(InMemoryTaskStore::new()),
        wallets.clone(),
        Arc::new(catalog),
        notifier,
        TaskEngineConfig::default(),
    );
    Market {
        engine: Arc::new(engine),
        wallets,
        buyer,
        seller,
        listing,
    }
}

async fn market() -> Market {
    market_with(Arc::new(NoopNotifier)).await
}

impl Market {
    fn order(&self) -> CreateTask {
        CreateTask {
            listing_id: self.listing,
            input: serde_json::json!({"text": "long document"}),
            ..CreateTask::default()
        }
    }

    async fn funds(&self, account: AccountId) -> (u64, u64) {
        let view = self.wallets.balance(account).await.unwrap();
        (view.balance, view.frozen)
    }
}

#[tokio::test]
async fn test_completed_task_pays_seller_minus_commission() {
    let m = market().await;

    let task = m.engine.create(m.buyer, m.order()).await.unwrap();
    assert_eq!(task.state, TaskState::Submitted);
    assert_eq!(m.funds(m.buyer).await, (800, 200));

    m.engine.accept(m.seller, task.id).await.unwrap();
    let working = m.engine.start(m.seller, task.id).await.unwrap();
    assert_eq!(working.state, TaskState::Working);

    let done = m
        .engine
        .submit_result(m.seller, task.id, serde_json::json!({"summary": "short"}), Some(42))
        .await
        .unwrap();
    assert_eq!(done.state, TaskState::Completed);
    assert_eq!(done.outcome, Some(LedgerEffect::Settle));
    assert!(done.reservation.is_none());
    assert_eq!(done.tokens_used, Some(42));

    assert_eq!(m.funds(m.buyer).await, (800, 0));
    assert_eq!(m.funds(m.seller).await, (190, 0));
    assert_eq!(m.funds(AccountId::nil()).await, (10, 0));
}

#[tokio::test]
async fn test_seller_failure_refunds_buyer() {
    let m = market().await;
    let task = m.engine.create(m.buyer, m.order()).await.unwrap();
    m.engine.accept(m.seller, task.id).await.unwrap();

    let failed = m
        .engine
        .fail(m.seller, task.id, "model unavailable".into())
        .await
        .unwrap();
    assert_eq!(failed.state, TaskState::Failed);
    assert_eq!(failed.error.as_deref(), Some("model unavailable"));
    assert_eq!(failed.outcome, Some(LedgerEffect::Refund));
    assert_eq!(m.funds(m.buyer).await, (1000, 0));
    assert_eq!(m.funds(m.seller).await, (0, 0));
}

#[tokio::test]
async fn test_reject_and_cancel_refund() {
    let m = market().await;

    let rejected = m.engine.create(m.buyer, m.order()).await.unwrap();
    let rejected = m
        .engine
        .reject(m.seller, rejected.id, Some("busy".into()))
        .await
        .unwrap();
    assert_eq!(rejected.state, TaskState::Rejected);

    let canceled = m.engine.create(m.buyer, m.order()).await.unwrap();
    m.engine.accept(m.seller, canceled.id).await.unwrap();
    let canceled = m.engine.cancel(m.buyer, canceled.id).await.unwrap();
    assert_eq!(canceled.state, TaskState::Canceled);

    assert_eq!(m.funds(m.buyer).await, (1000, 0));
}

#[tokio::test]
async fn test_only_parties_may_act() {
    let m = market().await;
    let task = m.engine.create(m.buyer, m.order()).await.unwrap();

    let result = m.engine.cancel(m.seller, task.id).await;
    assert!(matches!(result, Err(LobsterError::Forbidden(_))));
    let result = m.engine.accept(m.buyer, task.id).await;
    assert!(matches!(result, Err(LobsterError::Forbidden(_))));

    let result = m.engine.get(Uuid::new_v4(), task.id).await;
    assert!(matches!(result, Err(LobsterError::TaskNotFound(_))));
    assert_eq!(m.engine.get(m.seller, task.id).await.unwrap().id, task.id);
}

#[tokio::test]
async fn test_terminal_task_makes_no_ledger_call() {
    let m = market().await;
    let task = m.engine.create(m.buyer, m.order()).await.unwrap();
    m.engine.accept(m.seller, task.id).await.unwrap();
    m.engine
        .submit_result(m.seller, task.id, serde_json::json!("ok"), None)
        .await
        .unwrap();
    let entries_before = m.wallets.transactions(m.buyer, 100).await.unwrap().len();

    for result in [
        m.engine.cancel(m.buyer, task.id).await,
        m.engine.fail(m.seller, task.id, "late".into()).await,
        m.engine
            .submit_result(m.seller, task.id, serde_json::json!("again"), None)
            .await,
    ] {
        assert!(matches!(result, Err(LobsterError::InvalidTransition { .. })));
    }
    let entries_after = m.wallets.transactions(m.buyer, 100).await.unwrap().len();
    assert_eq!(entries_before, entries_after);
    assert_eq!(m.funds(m.seller).await, (190, 0));
}

#[tokio::test]
async fn test_create_is_idempotent_by_client_id() {
    let m = market().await;
    let order = CreateTask {
        id: Some(Uuid::new_v4()),
        ..m.order()
    };

    let first = m.engine.create(m.buyer, order.clone()).await.unwrap();
    let second = m.engine.create(m.buyer, order.clone()).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(m.funds(m.buyer).await, (800, 200));

    let stranger = Uuid::new_v4();
    let result = m.engine.create(stranger, order.clone()).await;
    assert!(matches!(result, Err(LobsterError::Conflict(_))));

    let elsewhere = CreateTask {
        listing_id: Uuid::new_v4(),
        ..order
    };
    let result = m.engine.create(m.buyer, elsewhere).await;
    assert!(matches!(result, Err(LobsterError::Conflict(_))));
    assert_eq!(m.funds(m.buyer).await, (800, 200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_buyers_racing_on_one_id_freeze_once() {
    for _ in 0..50 {
        let m = market().await;
        let rival = Uuid::new_v4();
        m.wallets.top_up(rival, 1000, None).await.unwrap();
        let order = CreateTask {
            id: Some(Uuid::new_v4()),
            ..m.order()
        };

        let handles: Vec<_> = [m.buyer, rival]
            .into_iter()
            .map(|buyer| {
                let engine = m.engine.clone();
                let order = order.clone();
                tokio::spawn(async move { engine.create(buyer, order).await })
            })
            .collect();
        let mut created = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(task) => created.push(task),
                Err(LobsterError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(created.len(), 1);

        let winner = created[0].buyer;
        let loser = if winner == m.buyer { rival } else { m.buyer };
        assert_eq!(m.funds(winner).await, (800, 200));
        assert_eq!(m.funds(loser).await, (1000, 0));
    }
}

#[tokio::test]
async fn test_insufficient_funds_creates_nothing() {
    let m = market().await;
    let poor = Uuid::new_v4();
    m.wallets.top_up(poor, 150, None).await.unwrap();

    let result = m.engine.create(poor, m.order()).await;
    assert!(matches!(
        result,
        Err(LobsterError::InsufficientFunds {
            available: 150,
            required: 200
        })
    ));
    assert!(m.engine.list(poor, None, None).await.unwrap().is_empty());
    assert_eq!(m.funds(poor).await, (150, 0));
}

#[tokio::test]
async fn test_seller_cannot_buy_own_listing() {
    let m = market().await;
    m.wallets.top_up(m.seller, 500, None).await.unwrap();
    let result = m.engine.create(m.seller, m.order()).await;
    assert!(matches!(result, Err(LobsterError::SelfDealing)));
}

#[tokio::test]
async fn test_pending_for_seller() {
    let m = market().await;
    let a = m.engine.create(m.buyer, m.order()).await.unwrap();
    let b = m.engine.create(m.buyer, m.order()).await.unwrap();
    m.engine.accept(m.seller, a.id).await.unwrap();

    let pending = m.engine.pending_for_seller(m.seller).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, b.id);
}

#[tokio::test]
async fn test_accept_moves_deadline_to_execution_window() {
    let m = market().await;
    let order = CreateTask {
        timeout_secs: Some(30),
        ..m.order()
    };
    let task = m.engine.create(m.buyer, order).await.unwrap();
    assert_eq!(task.deadline, task.created_at + Duration::seconds(300));

    let before = Utc::now();
    let accepted = m.engine.accept(m.seller, task.id).await.unwrap();
    assert!(accepted.deadline >= before + Duration::seconds(30));
    assert!(accepted.deadline <= Utc::now() + Duration::seconds(30));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sweeps_refund_once() {
    let m = market().await;
    let task = m.engine.create(m.buyer, m.order()).await.unwrap();
    let later = task.deadline + Duration::seconds(1);

    let (a, b) = tokio::join!(
        {
            let engine = m.engine.clone();
            tokio::spawn(async move { engine.expire_overdue(later).await })
        },
        {
            let engine = m.engine.clone();
            tokio::spawn(async move { engine.expire_overdue(later).await })
        }
    );
    let expired = a.unwrap().unwrap().len() + b.unwrap().unwrap().len();
    assert_eq!(expired, 1);

    let task = m.engine.get(m.buyer, task.id).await.unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(m.funds(m.buyer).await, (1000, 0));
    let refunds = m
        .wallets
        .transactions(m.buyer, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == LedgerEntryKind::Refund)
        .count();
    assert_eq!(refunds, 1);
}

#[tokio::test]
async fn test_sweep_ignores_tasks_within_deadline() {
    let m = market().await;
    let task = m.engine.create(m.buyer, m.order()).await.unwrap();

    let expired = m
        .engine
        .expire_overdue(task.deadline - Duration::seconds(1))
        .await
        .unwrap();
    assert!(expired.is_empty());
    assert_eq!(
        m.engine.get(m.buyer, task.id).await.unwrap().state,
        TaskState::Submitted
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_result_and_cancel_race_has_one_winner() {
    for _ in 0..20 {
        let m = market().await;
        let task = m.engine.create(m.buyer, m.order()).await.unwrap();
        m.engine.accept(m.seller, task.id).await.unwrap();

        let result = {
            let engine = m.engine.clone();
            let seller = m.seller;
            tokio::spawn(async move {
                engine
                    .submit_result(seller, task.id, serde_json::json!("done"), None)
                    .await
            })
        };
        let cancel = {
            let engine = m.engine.clone();
            let buyer = m.buyer;
            tokio::spawn(async move { engine.cancel(buyer, task.id).await })
        };
        let (result, cancel) = (result.await.unwrap(), cancel.await.unwrap());
        assert!(result.is_ok() != cancel.is_ok());

        let final_task = m.engine.get(m.buyer, task.id).await.unwrap();
        if result.is_ok() {
            assert_eq!(final_task.state, TaskState::Completed);
            assert_eq!(m.funds(m.buyer).await, (800, 0));
            assert_eq!(m.funds(m.seller).await, (190, 0));
        } else {
            assert_eq!(final_task.state, TaskState::Canceled);
            assert_eq!(m.funds(m.buyer).await, (1000, 0));
            assert_eq!(m.funds(m.seller).await, (0, 0));
        }
    }
}

#[tokio::test]
async fn test_reconcile_applies_owed_effect() {
    let m = market().await;
    let task = m.engine.create(m.buyer, m.order()).await.unwrap();

    // Commit a terminal state without running its ledger effect.
    let store = m.engine.store();
    let mut stranded = store.get(task.id).await.unwrap().unwrap();
    stranded.apply_event(TaskEvent::Cancel, Utc::now()).unwrap();
    store
        .compare_and_swap(stranded, task.version)
        .await
        .unwrap();
    assert_eq!(m.funds(m.buyer).await, (800, 200));

    assert_eq!(m.engine.reconcile().await.unwrap(), 1);
    assert_eq!(m.funds(m.buyer).await, (1000, 0));
    let task = m.engine.get(m.buyer, task.id).await.unwrap();
    assert!(task.reservation.is_none());
    assert_eq!(task.outcome, Some(LedgerEffect::Refund));

    assert_eq!(m.engine.reconcile().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fresh_freeze_without_task_is_left_alone() {
    let m = market().await;
    let pending = Uuid::new_v4();
    m.wallets.freeze(m.buyer, 200, pending).await.unwrap();

    // Still inside the grace period: a create may be about to insert it.
    assert_eq!(m.engine.reconcile().await.unwrap(), 0);
    assert_eq!(m.funds(m.buyer).await, (800, 200));

    let order = CreateTask {
        id: Some(pending),
        ..m.order()
    };
    let task = m.engine.create(m.buyer, order).await.unwrap();
    assert_eq!(task.id, pending);
    assert_eq!(m.funds(m.buyer).await, (800, 200));
}

#[tokio::test]
async fn test_notices_follow_transitions() {
    let notifier = Arc::new(RecordingNotifier::default());
    let m = market_with(notifier.clone()).await;
    let task = m.engine.create(m.buyer, m.order()).await.unwrap();
    m.engine.accept(m.seller, task.id).await.unwrap();
    m.engine.cancel(m.buyer, task.id).await.unwrap();

    let notices = notifier.notices.lock().unwrap().clone();
    let events: Vec<_> = notices.iter().map(|n| n.event).collect();
    assert_eq!(
        events,
        vec![None, Some(TaskEvent::Accept), Some(TaskEvent::Cancel)]
    );
    assert!(notices[2].is_terminal());
    assert_eq!(notices[0].seller, m.seller);
}
