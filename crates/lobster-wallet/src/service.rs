use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lobster_ledger::{LedgerEntry, LedgerStore, OpReceipt, Settlement};
use lobster_types::{AccountId, Credits, OpTag, OpToken, Result, Wallet};

use crate::commission::CommissionPolicy;

/// Caller-facing view of a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletView {
    pub account: AccountId,
    pub balance: Credits,
    pub frozen: Credits,
    pub total: Credits,
}

impl From<&Wallet> for WalletView {
    fn from(wallet: &Wallet) -> Self {
        Self {
            account: wallet.account,
            balance: wallet.balance,
            frozen: wallet.frozen,
            total: wallet.total(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpReceipt {
    pub receipt: OpReceipt,
    pub wallet: WalletView,
}

/// Wallet operations over the ledger store. Derives operation tokens from the
/// triggering entity so callers never build them by hand.
#[derive(Clone)]
pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    policy: CommissionPolicy,
}

impl WalletService {
    pub fn new(store: Arc<dyn LedgerStore>, policy: CommissionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> CommissionPolicy {
        self.policy
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        self.store.clone()
    }

    pub async fn ensure(&self, account: AccountId) -> Result<Wallet> {
        self.store.ensure_wallet(account).await
    }

    pub async fn balance(&self, account: AccountId) -> Result<WalletView> {
        let wallet = self.store.ensure_wallet(account).await?;
        Ok(WalletView::from(&wallet))
    }

    /// Credit `amount`. Passing the same `request_id` again is a no-op.
    pub async fn top_up(
        &self,
        account: AccountId,
        amount: Credits,
        request_id: Option<Uuid>,
    ) -> Result<TopUpReceipt> {
        let op = OpToken::top_up(request_id.unwrap_or_else(Uuid::new_v4));
        let receipt = self.store.top_up(account, amount, op).await?;
        let wallet = self.balance(account).await?;
        Ok(TopUpReceipt { receipt, wallet })
    }

    pub async fn freeze(&self, account: AccountId, amount: Credits, subject: Uuid) -> Result<OpReceipt> {
        self.store
            .freeze(account, amount, OpToken::freeze(subject))
            .await
    }

    /// Pay `seller` out of `buyer`'s frozen funds, minus commission.
    pub async fn settle(
        &self,
        buyer: AccountId,
        seller: AccountId,
        amount: Credits,
        subject: Uuid,
    ) -> Result<OpReceipt> {
        let receipt = self
            .store
            .settle(Settlement {
                from: buyer,
                to: seller,
                platform: self.policy.platform_account,
                amount,
                commission_bps: self.policy.bps,
                op: OpToken::settle(subject),
            })
            .await?;
        tracing::debug!(
            "Settled {} for {}: commission {}",
            amount,
            subject,
            receipt.commission
        );
        Ok(receipt)
    }

    pub async fn refund(&self, account: AccountId, amount: Credits, subject: Uuid) -> Result<OpReceipt> {
        self.store
            .refund(account, amount, OpToken::refund(subject))
            .await
    }

    /// Most recent transactions first.
    pub async fn transactions(&self, account: AccountId, limit: usize) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.store.entries(account).await?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// Receipt of the `tag` operation applied for `subject`, if any.
    pub async fn applied(&self, subject: Uuid, tag: OpTag) -> Result<Option<OpReceipt>> {
        self.store.receipt(OpToken::new(subject, tag)).await
    }

    /// Freezes whose subject has been neither settled nor refunded.
    pub async fn open_freezes(&self) -> Result<Vec<OpReceipt>> {
        let closed: HashSet<Uuid> = self
            .store
            .receipts(OpTag::Settle)
            .await?
            .into_iter()
            .chain(self.store.receipts(OpTag::Refund).await?)
            .map(|r| r.op.subject)
            .collect();
        Ok(self
            .store
            .receipts(OpTag::Freeze)
            .await?
            .into_iter()
            .filter(|r| !closed.contains(&r.op.subject))
            .collect())
    }

    pub async fn verify(&self, account: AccountId) -> Result<bool> {
        self.store.verify_chain(account).await
    }
}
