use serde::{Deserialize, Serialize};

use lobster_types::{AccountId, Credits, split_commission};

/// Platform commission applied at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionPolicy {
    /// Rate in basis points (`500` = 5%).
    pub bps: u32,
    /// Account that retains the commission.
    pub platform_account: AccountId,
}

impl CommissionPolicy {
    pub fn new(bps: u32, platform_account: AccountId) -> Self {
        Self {
            bps,
            platform_account,
        }
    }

    /// `(payout, commission)` for a settled amount.
    pub fn split(&self, amount: Credits) -> (Credits, Credits) {
        split_commission(amount, self.bps)
    }
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        Self::new(500, AccountId::nil())
    }
}
