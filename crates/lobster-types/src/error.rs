use thiserror::Error;
use uuid::Uuid;

use crate::quote::{QuoteEvent, QuoteState};
use crate::task::{TaskEvent, TaskState};
use crate::Credits;

/// Coarse error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InsufficientFunds,
    InvalidTransition,
    NotFound,
    DeliveryFailed,
    Conflict,
    InvalidRequest,
    Unauthenticated,
    Forbidden,
    RateLimited,
    Internal,
}

#[derive(Debug, Clone, Error)]
pub enum LobsterError {
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Credits, required: Credits },

    #[error("Invalid task transition: cannot apply {event:?} in state {from:?}")]
    InvalidTransition { from: TaskState, event: TaskEvent },

    #[error("Invalid quote transition: cannot apply {event:?} in state {from:?}")]
    QuoteTransition { from: QuoteState, event: QuoteEvent },

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Quote not found: {0}")]
    QuoteNotFound(Uuid),

    #[error("Listing not found: {0}")]
    ListingNotFound(Uuid),

    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    #[error("Delivery of task {task_id} failed after {attempts} attempts")]
    DeliveryFailed { task_id: Uuid, attempts: u32 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Buyer and seller must be different accounts")]
    SelfDealing,

    #[error("Credential missing, invalid or expired")]
    Unauthenticated,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LobsterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::InvalidTransition { .. } | Self::QuoteTransition { .. } => {
                ErrorKind::InvalidTransition
            }
            Self::TaskNotFound(_)
            | Self::QuoteNotFound(_)
            | Self::ListingNotFound(_)
            | Self::WalletNotFound(_) => ErrorKind::NotFound,
            Self::DeliveryFailed { .. } => ErrorKind::DeliveryFailed,
            Self::Conflict(_) | Self::SelfDealing => ErrorKind::Conflict,
            Self::InvalidAmount(_) | Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Storage(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, LobsterError>;
