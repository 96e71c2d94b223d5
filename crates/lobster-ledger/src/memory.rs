use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};

use lobster_types::{
    split_commission, AccountId, Credits, LobsterError, OpTag, OpToken, Result, Wallet,
};

use crate::entry::{LedgerEntry, LedgerEntryKind, OpReceipt, verify_chain};
use crate::snapshot::LedgerSnapshot;
use crate::traits::{LedgerStore, Settlement};

/// A wallet together with its journal. Guarded by one mutex per account.
#[derive(Debug)]
struct Account {
    wallet: Wallet,
    journal: Vec<LedgerEntry>,
}

impl Account {
    fn new(account: AccountId) -> Self {
        Self {
            wallet: Wallet::new(account),
            journal: Vec::new(),
        }
    }

    fn record(
        &mut self,
        kind: LedgerEntryKind,
        op: OpToken,
        counterparty: Option<AccountId>,
        amount: Credits,
        description: String,
    ) -> uuid::Uuid {
        self.wallet.updated_at = Utc::now();
        let previous = self.journal.last().map(|e| e.hash.clone());
        let entry = LedgerEntry::new(
            kind,
            op,
            &self.wallet,
            counterparty,
            amount,
            description,
            previous,
        );
        let id = entry.id;
        self.journal.push(entry);
        id
    }
}

/// In-memory ledger store (default).
///
/// Each account sits behind its own async mutex so mutations on unrelated
/// wallets never contend. The receipt index is only touched while the lock of
/// the op's primary wallet is held.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    accounts: Arc<DashMap<AccountId, Arc<Mutex<Account>>>>,
    receipts: Arc<DashMap<OpToken, OpReceipt>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from an exported snapshot.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let store = Self::new();
        let mut journals: BTreeMap<AccountId, Vec<LedgerEntry>> = BTreeMap::new();
        for entry in snapshot.entries {
            journals.entry(entry.account).or_default().push(entry);
        }
        for wallet in snapshot.wallets {
            let account = wallet.account;
            let journal = journals.remove(&account).unwrap_or_default();
            store
                .accounts
                .insert(account, Arc::new(Mutex::new(Account { wallet, journal })));
        }
        for receipt in snapshot.receipts {
            store.receipts.insert(receipt.op, receipt);
        }
        store
    }

    fn cell(&self, account: AccountId) -> Arc<Mutex<Account>> {
        self.accounts
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(Account::new(account))))
            .clone()
    }

    /// Run `apply` unless `op` already has a receipt. The receipt slot stays
    /// claimed while `apply` runs, so two callers racing on the same token
    /// cannot both mutate, even from different wallets. A replay that asks for
    /// something different from the recorded receipt is a conflict.
    ///
    /// `apply` must not touch the receipt index.
    fn apply_once<F>(
        &self,
        op: OpToken,
        account: AccountId,
        counterparty: Option<AccountId>,
        amount: Credits,
        apply: F,
    ) -> Result<OpReceipt>
    where
        F: FnOnce() -> Result<OpReceipt>,
    {
        match self.receipts.entry(op) {
            Entry::Occupied(slot) => {
                let receipt = slot.get().clone();
                if !receipt.matches(account, counterparty, amount) {
                    return Err(LobsterError::Conflict(format!(
                        "operation {op} was already applied with different parameters"
                    )));
                }
                tracing::warn!("Replayed ledger operation {}", op);
                Ok(receipt)
            }
            Entry::Vacant(slot) => {
                let receipt = apply()?;
                slot.insert(receipt.clone());
                Ok(receipt)
            }
        }
    }

    fn expect_tag(op: OpToken, tag: OpTag) -> Result<()> {
        if op.tag == tag {
            Ok(())
        } else {
            Err(LobsterError::Internal(format!(
                "operation {op} used for {}",
                tag.as_str()
            )))
        }
    }
}

fn positive(amount: Credits) -> Result<()> {
    if amount == 0 {
        return Err(LobsterError::InvalidAmount(
            "amount must be greater than zero".into(),
        ));
    }
    Ok(())
}

fn overflow() -> LobsterError {
    LobsterError::InvalidAmount("wallet total would overflow".into())
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn ensure_wallet(&self, account: AccountId) -> Result<Wallet> {
        let cell = self.cell(account);
        let guard = cell.lock().await;
        Ok(guard.wallet.clone())
    }

    async fn wallet(&self, account: AccountId) -> Result<Option<Wallet>> {
        let Some(cell) = self.accounts.get(&account).map(|c| c.clone()) else {
            return Ok(None);
        };
        let guard = cell.lock().await;
        Ok(Some(guard.wallet.clone()))
    }

    async fn top_up(&self, account: AccountId, amount: Credits, op: OpToken) -> Result<OpReceipt> {
        Self::expect_tag(op, OpTag::TopUp)?;
        positive(amount)?;

        let cell = self.cell(account);
        let mut acct = cell.lock().await;
        self.apply_once(op, account, None, amount, || {
            acct.wallet.balance = acct.wallet.balance.checked_add(amount).ok_or_else(overflow)?;
            let entry = acct.record(LedgerEntryKind::TopUp, op, None, amount, "top-up".into());

            tracing::info!(
                "Top-up of {} credited to {} (balance {})",
                amount,
                account,
                acct.wallet.balance
            );
            Ok(OpReceipt {
                op,
                account,
                counterparty: None,
                amount,
                commission: 0,
                entry_ids: vec![entry],
                applied_at: Utc::now(),
            })
        })
    }

    async fn freeze(&self, account: AccountId, amount: Credits, op: OpToken) -> Result<OpReceipt> {
        Self::expect_tag(op, OpTag::Freeze)?;
        positive(amount)?;

        let cell = self.cell(account);
        let mut acct = cell.lock().await;
        self.apply_once(op, account, None, amount, || {
            if acct.wallet.balance < amount {
                return Err(LobsterError::InsufficientFunds {
                    available: acct.wallet.balance,
                    required: amount,
                });
            }
            let frozen = acct.wallet.frozen.checked_add(amount).ok_or_else(overflow)?;
            acct.wallet.balance -= amount;
            acct.wallet.frozen = frozen;
            let entry = acct.record(
                LedgerEntryKind::Freeze,
                op,
                None,
                amount,
                format!("freeze for {}", op.subject),
            );

            tracing::info!("Froze {} on {} for {}", amount, account, op.subject);
            Ok(OpReceipt {
                op,
                account,
                counterparty: None,
                amount,
                commission: 0,
                entry_ids: vec![entry],
                applied_at: Utc::now(),
            })
        })
    }

    async fn settle(&self, settlement: Settlement) -> Result<OpReceipt> {
        let Settlement {
            from,
            to,
            platform,
            amount,
            commission_bps,
            op,
        } = settlement;
        Self::expect_tag(op, OpTag::Settle)?;
        positive(amount)?;
        if from == to {
            return Err(LobsterError::SelfDealing);
        }

        // Lock every involved wallet in ascending account order.
        let mut ids = vec![from, to, platform];
        ids.sort();
        ids.dedup();
        let mut guards: BTreeMap<AccountId, OwnedMutexGuard<Account>> = BTreeMap::new();
        for id in ids {
            let guard = self.cell(id).lock_owned().await;
            guards.insert(id, guard);
        }

        self.apply_once(op, from, Some(to), amount, || {
            let (payout, commission) = split_commission(amount, commission_bps);

            let held = guards[&from].wallet.frozen;
            if held < amount {
                return Err(LobsterError::InsufficientFunds {
                    available: held,
                    required: amount,
                });
            }
            // Check every credit before mutating anything.
            let seller_balance = guards[&to].wallet.balance;
            seller_balance.checked_add(payout).ok_or_else(overflow)?;
            if platform != to {
                guards[&platform]
                    .wallet
                    .balance
                    .checked_add(commission)
                    .ok_or_else(overflow)?;
            } else {
                seller_balance.checked_add(amount).ok_or_else(overflow)?;
            }

            let mut entry_ids = Vec::with_capacity(3);
            let buyer = guards
                .get_mut(&from)
                .ok_or_else(|| LobsterError::Internal("buyer wallet lock missing".into()))?;
            buyer.wallet.frozen -= amount;
            entry_ids.push(buyer.record(
                LedgerEntryKind::Settle,
                op,
                Some(to),
                amount,
                format!("settlement for {}", op.subject),
            ));

            let seller = guards
                .get_mut(&to)
                .ok_or_else(|| LobsterError::Internal("seller wallet lock missing".into()))?;
            seller.wallet.balance += payout;
            entry_ids.push(seller.record(
                LedgerEntryKind::Payout,
                op,
                Some(from),
                payout,
                format!("payout for {}", op.subject),
            ));

            if commission > 0 {
                let house = guards
                    .get_mut(&platform)
                    .ok_or_else(|| LobsterError::Internal("platform wallet lock missing".into()))?;
                house.wallet.balance += commission;
                entry_ids.push(house.record(
                    LedgerEntryKind::Commission,
                    op,
                    Some(from),
                    commission,
                    format!("commission for {}", op.subject),
                ));
            }

            tracing::info!(
                "Settled {} from {} to {} (payout {}, commission {})",
                amount,
                from,
                to,
                payout,
                commission
            );
            Ok(OpReceipt {
                op,
                account: from,
                counterparty: Some(to),
                amount,
                commission,
                entry_ids,
                applied_at: Utc::now(),
            })
        })
    }

    async fn refund(&self, account: AccountId, amount: Credits, op: OpToken) -> Result<OpReceipt> {
        Self::expect_tag(op, OpTag::Refund)?;
        positive(amount)?;

        let cell = self.cell(account);
        let mut acct = cell.lock().await;
        self.apply_once(op, account, None, amount, || {
            if acct.wallet.frozen < amount {
                return Err(LobsterError::InsufficientFunds {
                    available: acct.wallet.frozen,
                    required: amount,
                });
            }
            let balance = acct.wallet.balance.checked_add(amount).ok_or_else(overflow)?;
            acct.wallet.frozen -= amount;
            acct.wallet.balance = balance;
            let entry = acct.record(
                LedgerEntryKind::Refund,
                op,
                None,
                amount,
                format!("refund for {}", op.subject),
            );

            tracing::info!("Refunded {} to {} for {}", amount, account, op.subject);
            Ok(OpReceipt {
                op,
                account,
                counterparty: None,
                amount,
                commission: 0,
                entry_ids: vec![entry],
                applied_at: Utc::now(),
            })
        })
    }

    async fn entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>> {
        let Some(cell) = self.accounts.get(&account).map(|c| c.clone()) else {
            return Ok(Vec::new());
        };
        let guard = cell.lock().await;
        Ok(guard.journal.clone())
    }

    async fn receipt(&self, op: OpToken) -> Result<Option<OpReceipt>> {
        Ok(self.receipts.get(&op).map(|r| r.clone()))
    }

    async fn receipts(&self, tag: OpTag) -> Result<Vec<OpReceipt>> {
        Ok(self
            .receipts
            .iter()
            .filter(|r| r.key().tag == tag)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn verify_chain(&self, account: AccountId) -> Result<bool> {
        let entries = self.entries(account).await?;
        Ok(verify_chain(&entries))
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        let cells: Vec<Arc<Mutex<Account>>> =
            self.accounts.iter().map(|r| r.value().clone()).collect();

        let mut snapshot = LedgerSnapshot::default();
        for cell in cells {
            let guard = cell.lock().await;
            snapshot.wallets.push(guard.wallet.clone());
            snapshot.entries.extend(guard.journal.iter().cloned());
        }
        snapshot.receipts = self.receipts.iter().map(|r| r.value().clone()).collect();
        Ok(snapshot)
    }
}
