use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AccountId, Credits};

/// Per-account funds. `balance` is spendable, `frozen` is held by in-flight tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub account: AccountId,
    pub balance: Credits,
    pub frozen: Credits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(account: AccountId) -> Self {
        let now = Utc::now();
        Self {
            account,
            balance: 0,
            frozen: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total(&self) -> Credits {
        self.balance + self.frozen
    }
}

/// Which ledger primitive an operation token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpTag {
    TopUp,
    Freeze,
    Settle,
    Refund,
}

impl OpTag {
    pub fn as_str(self) -> &'static str {
        match self {
            OpTag::TopUp => "top_up",
            OpTag::Freeze => "freeze",
            OpTag::Settle => "settle",
            OpTag::Refund => "refund",
        }
    }
}

/// Idempotency token for a ledger mutation: the triggering entity plus the operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpToken {
    pub subject: Uuid,
    pub tag: OpTag,
}

impl OpToken {
    pub fn new(subject: Uuid, tag: OpTag) -> Self {
        Self { subject, tag }
    }

    pub fn freeze(subject: Uuid) -> Self {
        Self::new(subject, OpTag::Freeze)
    }

    pub fn settle(subject: Uuid) -> Self {
        Self::new(subject, OpTag::Settle)
    }

    pub fn refund(subject: Uuid) -> Self {
        Self::new(subject, OpTag::Refund)
    }

    pub fn top_up(subject: Uuid) -> Self {
        Self::new(subject, OpTag::TopUp)
    }
}

impl fmt::Display for OpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject, self.tag.as_str())
    }
}

/// Funds a task holds on its buyer's wallet while it is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub owner: AccountId,
    pub amount: Credits,
    pub freeze_op: OpToken,
}

/// Basis-point denominator for commission rates (`500` = 5%).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Split a settled amount into `(payout, commission)`.
///
/// Commission is rounded down so any remainder goes to the seller.
pub fn split_commission(amount: Credits, commission_bps: u32) -> (Credits, Credits) {
    let bps = u64::from(commission_bps).min(BPS_DENOMINATOR);
    let commission = (u128::from(amount) * u128::from(bps) / u128::from(BPS_DENOMINATOR)) as u64;
    (amount - commission, commission)
}
