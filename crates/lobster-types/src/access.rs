use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Key tier resolved from a caller's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadOnly,
    CallAndRead,
    Full,
}

/// Operations a caller may invoke on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ReadTasks,
    ReadQuotes,
    ReadWallet,
    CreateTask,
    CancelTask,
    SellerAction,
    Negotiate,
    Poll,
    TopUp,
    ManageEndpoints,
}

impl Capability {
    pub fn permits(self, op: Operation) -> bool {
        match op {
            Operation::ReadTasks | Operation::ReadQuotes | Operation::ReadWallet => true,
            Operation::CreateTask
            | Operation::CancelTask
            | Operation::SellerAction
            | Operation::Negotiate
            | Operation::Poll => self >= Capability::CallAndRead,
            Operation::TopUp | Operation::ManageEndpoints => self == Capability::Full,
        }
    }
}

/// An authenticated caller. Passed explicitly into every engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub account: AccountId,
    pub capability: Capability,
}

impl Principal {
    pub fn new(account: AccountId, capability: Capability) -> Self {
        Self {
            account,
            capability,
        }
    }

    pub fn authorize(&self, op: Operation) -> crate::Result<()> {
        if self.capability.permits(op) {
            Ok(())
        } else {
            Err(crate::LobsterError::Forbidden(format!(
                "{:?} key cannot perform {:?}",
                self.capability, op
            )))
        }
    }
}
