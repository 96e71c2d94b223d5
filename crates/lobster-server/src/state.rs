use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use lobster_dispatch::{DeliveryMode, Dispatcher, EndpointRegistry, PollQueue, WebhookTransport};
use lobster_ledger::{InMemoryLedgerStore, LedgerSnapshot, LedgerStore, SnapshotFile};
use lobster_quotes::{InMemoryQuoteStore, QuoteEngine};
use lobster_tasks::{InMemoryCatalog, InMemoryTaskStore, TaskEngine};
use lobster_types::TaskState;
use lobster_wallet::WalletService;

use crate::auth::{IdentityResolver, StaticIdentity};
use crate::config::LobsterConfig;
use crate::persistence::{PersistedState, StateFile};
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LobsterConfig>,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub wallets: WalletService,
    pub tasks: Arc<TaskEngine>,
    pub quotes: Arc<QuoteEngine>,
    pub dispatcher: Dispatcher,
    pub identity: Arc<dyn IdentityResolver>,
    pub limiter: RateLimiter,
    /// Where snapshots go. `None` keeps everything in memory.
    pub state_dir: Option<PathBuf>,
}

impl AppState {
    /// Fresh in-memory state.
    pub fn new(config: LobsterConfig, transport: Arc<dyn WebhookTransport>) -> Self {
        Self::restore(
            config,
            transport,
            LedgerSnapshot::default(),
            PersistedState::default(),
            None,
        )
    }

    /// Restore from the snapshots in `state_dir` and keep saving there.
    pub fn load(
        config: LobsterConfig,
        transport: Arc<dyn WebhookTransport>,
        state_dir: &Path,
    ) -> Result<Self> {
        let ledger = SnapshotFile::new(state_dir).load()?;
        let persisted = StateFile::new(state_dir).load()?;
        tracing::info!(
            "Restored {} wallet(s), {} task(s), {} quote(s) from {}",
            ledger.wallets.len(),
            persisted.tasks.len(),
            persisted.quotes.len(),
            state_dir.display()
        );
        Ok(Self::restore(
            config,
            transport,
            ledger,
            persisted,
            Some(state_dir.to_path_buf()),
        ))
    }

    pub fn restore(
        config: LobsterConfig,
        transport: Arc<dyn WebhookTransport>,
        ledger: LedgerSnapshot,
        persisted: PersistedState,
        state_dir: Option<PathBuf>,
    ) -> Self {
        let ledger = Arc::new(InMemoryLedgerStore::from_snapshot(ledger));
        let wallets = WalletService::new(ledger.clone(), config.commission());
        let catalog = Arc::new(InMemoryCatalog::with_listings(config.listings.clone()));

        let endpoints = Arc::new(EndpointRegistry::from_endpoints(persisted.endpoints));
        let dispatcher = Dispatcher::new(
            endpoints,
            Arc::new(PollQueue::new()),
            transport,
            config.webhook.retry_policy(),
        );
        // Poll queues are not persisted; rebuild them from open tasks.
        for task in persisted
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Submitted)
        {
            if dispatcher.endpoints().mode(task.seller) == DeliveryMode::Pull {
                dispatcher.queue().enqueue(task.seller, task.id);
            }
        }

        let tasks = Arc::new(TaskEngine::new(
            Arc::new(InMemoryTaskStore::from_tasks(persisted.tasks)),
            wallets.clone(),
            catalog,
            Arc::new(dispatcher.clone()),
            config.task_engine(),
        ));
        let quotes = Arc::new(QuoteEngine::new(
            Arc::new(InMemoryQuoteStore::from_quotes(persisted.quotes)),
            tasks.clone(),
            config.quote_ttl(),
        ));

        Self {
            identity: Arc::new(StaticIdentity::from_config(&config.api_keys)),
            limiter: RateLimiter::per_minute(config.rate_limit_per_minute),
            config: Arc::new(config),
            ledger,
            wallets,
            tasks,
            quotes,
            dispatcher,
            state_dir,
        }
    }

    /// Bring restored tasks and the restored ledger back in line, then apply
    /// whatever ledger effects are still owed. Returns how many tasks or
    /// freezes were touched.
    pub async fn recover(&self) -> Result<usize> {
        let aligned = self.tasks.align_with_ledger().await?;
        let reconciled = self.tasks.reconcile().await?;
        Ok(aligned + reconciled)
    }

    /// Write ledger and marketplace snapshots, if a state directory is set.
    ///
    /// The ledger is captured before the tasks, so a restored ledger is never
    /// ahead of the restored tasks and [`AppState::recover`] only has to
    /// re-apply operations, never undo them.
    pub async fn persist(&self) -> Result<()> {
        let Some(dir) = &self.state_dir else {
            return Ok(());
        };
        let snapshot = self.ledger.snapshot().await?;
        SnapshotFile::new(dir).save(&snapshot)?;

        let state = PersistedState {
            tasks: self.tasks.store().all().await?,
            quotes: self.quotes.store().all().await?,
            endpoints: self.dispatcher.endpoints().endpoints(),
        };
        StateFile::new(dir).save(&state)?;
        tracing::debug!("State saved to {}", dir.display());
        Ok(())
    }
}
