use async_trait::async_trait;

use lobster_types::{AccountId, Credits, OpTag, OpToken, Result, Wallet};

use crate::entry::{LedgerEntry, OpReceipt};
use crate::snapshot::LedgerSnapshot;

/// Parameters of a settlement: frozen funds on `from` become a payout to `to`
/// minus the platform's commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub from: AccountId,
    pub to: AccountId,
    pub platform: AccountId,
    pub amount: Credits,
    pub commission_bps: u32,
    pub op: OpToken,
}

/// Authoritative store of wallets and their journals.
///
/// Every mutation is compare-and-apply under the exclusive scope of the
/// wallets it touches and is idempotent by its [`OpToken`]: a replay returns
/// the original receipt without changing any totals.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a zero-balance wallet if none exists.
    async fn ensure_wallet(&self, account: AccountId) -> Result<Wallet>;

    async fn wallet(&self, account: AccountId) -> Result<Option<Wallet>>;

    async fn top_up(&self, account: AccountId, amount: Credits, op: OpToken) -> Result<OpReceipt>;

    /// Move `amount` from balance to frozen. Fails with `InsufficientFunds`
    /// without touching the wallet if the balance is short.
    async fn freeze(&self, account: AccountId, amount: Credits, op: OpToken) -> Result<OpReceipt>;

    async fn settle(&self, settlement: Settlement) -> Result<OpReceipt>;

    /// Move `amount` from frozen back to balance.
    async fn refund(&self, account: AccountId, amount: Credits, op: OpToken) -> Result<OpReceipt>;

    /// Journal of one account, oldest first.
    async fn entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>>;

    async fn receipt(&self, op: OpToken) -> Result<Option<OpReceipt>>;

    /// Every receipt of one kind of operation, in no particular order.
    async fn receipts(&self, tag: OpTag) -> Result<Vec<OpReceipt>>;

    /// Verify the hash chain of one account's journal.
    async fn verify_chain(&self, account: AccountId) -> Result<bool>;

    /// Export wallets, journals and receipts.
    async fn snapshot(&self) -> Result<LedgerSnapshot>;
}
