use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use lobster_types::{AccountId, Credits, OpToken, Wallet};

/// Balance-affecting event types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    TopUp,
    Freeze,
    /// Frozen funds leaving the buyer's wallet.
    Settle,
    /// Seller's share of a settlement.
    Payout,
    /// Platform's share of a settlement.
    Commission,
    Refund,
}

/// An immutable transaction record on one account's journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub op: OpToken,
    pub kind: LedgerEntryKind,
    pub account: AccountId,
    pub counterparty: Option<AccountId>,
    pub amount: Credits,
    pub balance_after: Credits,
    pub frozen_after: Credits,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub hash: String,
}

impl LedgerEntry {
    /// Build an entry describing `wallet` after the change has been applied.
    pub fn new(
        kind: LedgerEntryKind,
        op: OpToken,
        wallet: &Wallet,
        counterparty: Option<AccountId>,
        amount: Credits,
        description: impl Into<String>,
        previous_hash: Option<String>,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            op,
            kind,
            account: wallet.account,
            counterparty,
            amount,
            balance_after: wallet.balance,
            frozen_after: wallet.frozen,
            description: description.into(),
            created_at: Utc::now(),
            previous_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entry
    }

    pub fn compute_hash(&self) -> String {
        let input = format!(
            "{}:{}:{:?}:{}:{}:{}:{}:{}:{}:{}",
            self.id,
            self.op,
            self.kind,
            self.account,
            self.counterparty.map(|c| c.to_string()).unwrap_or_default(),
            self.amount,
            self.balance_after,
            self.frozen_after,
            self.created_at.timestamp_nanos_opt().unwrap_or(0),
            self.previous_hash.as_deref().unwrap_or("genesis"),
        );
        format!("{:x}", Sha256::digest(input.as_bytes()))
    }

    /// Signed effect on the account's spendable balance, for statements.
    pub fn balance_delta(&self) -> i128 {
        let amount = i128::from(self.amount);
        match self.kind {
            LedgerEntryKind::TopUp
            | LedgerEntryKind::Payout
            | LedgerEntryKind::Commission
            | LedgerEntryKind::Refund => amount,
            LedgerEntryKind::Freeze => -amount,
            LedgerEntryKind::Settle => 0,
        }
    }
}

/// Check hashes and links of one account's journal, oldest first.
pub fn verify_chain(entries: &[LedgerEntry]) -> bool {
    let mut previous: Option<&str> = None;
    for entry in entries {
        if entry.previous_hash.as_deref() != previous || entry.hash != entry.compute_hash() {
            return false;
        }
        previous = Some(entry.hash.as_str());
    }
    true
}

/// Result of an applied ledger mutation, kept for idempotent replays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpReceipt {
    pub op: OpToken,
    pub account: AccountId,
    pub counterparty: Option<AccountId>,
    pub amount: Credits,
    pub commission: Credits,
    pub entry_ids: Vec<Uuid>,
    pub applied_at: DateTime<Utc>,
}

impl OpReceipt {
    /// Whether a replayed call asks for the same thing this receipt records.
    pub fn matches(&self, account: AccountId, counterparty: Option<AccountId>, amount: Credits) -> bool {
        self.account == account && self.counterparty == counterparty && self.amount == amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(balance: Credits, frozen: Credits) -> Wallet {
        let mut w = Wallet::new(Uuid::new_v4());
        w.balance = balance;
        w.frozen = frozen;
        w
    }

    #[test]
    fn test_entry_creation() {
        let w = wallet(100, 0);
        let entry = LedgerEntry::new(
            LedgerEntryKind::TopUp,
            OpToken::top_up(Uuid::new_v4()),
            &w,
            None,
            100,
            "top-up",
            None,
        );
        assert_eq!(entry.hash, entry.compute_hash());
        assert_eq!(entry.balance_after, 100);
        assert_eq!(entry.balance_delta(), 100);
    }

    #[test]
    fn test_chained_entries() {
        let w = wallet(50, 50);
        let first = LedgerEntry::new(
            LedgerEntryKind::TopUp,
            OpToken::top_up(Uuid::new_v4()),
            &w,
            None,
            100,
            "top-up",
            None,
        );
        let second = LedgerEntry::new(
            LedgerEntryKind::Freeze,
            OpToken::freeze(Uuid::new_v4()),
            &w,
            None,
            50,
            "freeze",
            Some(first.hash.clone()),
        );
        let mut chain = vec![first, second];
        assert!(verify_chain(&chain));

        chain[0].amount = 1_000;
        assert!(!verify_chain(&chain));
    }

    #[test]
    fn test_broken_link_detected() {
        let w = wallet(10, 0);
        let a = LedgerEntry::new(
            LedgerEntryKind::TopUp,
            OpToken::top_up(Uuid::new_v4()),
            &w,
            None,
            10,
            "top-up",
            None,
        );
        let b = LedgerEntry::new(
            LedgerEntryKind::TopUp,
            OpToken::top_up(Uuid::new_v4()),
            &w,
            None,
            10,
            "top-up",
            Some("not-the-previous-hash".into()),
        );
        assert!(!verify_chain(&[a, b]));
    }
}
