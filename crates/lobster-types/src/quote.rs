use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LobsterError, Result};
use crate::{AccountId, Credits, ListingId, QuoteId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteState {
    Pending,
    Quoted,
    Accepted,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteEvent {
    Submit,
    Accept,
    Reject,
    Expire,
}

impl QuoteState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QuoteState::Accepted | QuoteState::Rejected | QuoteState::Expired
        )
    }

    pub fn transition(self, event: QuoteEvent) -> Result<QuoteState> {
        match (self, event) {
            (QuoteState::Pending, QuoteEvent::Submit) => Ok(QuoteState::Quoted),
            (QuoteState::Quoted, QuoteEvent::Accept) => Ok(QuoteState::Accepted),
            // A buyer may withdraw a request the seller never answered.
            (QuoteState::Pending | QuoteState::Quoted, QuoteEvent::Reject) => {
                Ok(QuoteState::Rejected)
            }
            (QuoteState::Pending | QuoteState::Quoted, QuoteEvent::Expire) => {
                Ok(QuoteState::Expired)
            }
            (from, event) => Err(LobsterError::QuoteTransition { from, event }),
        }
    }
}

/// Price negotiation that may precede a task. Never holds funds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub listing_id: ListingId,
    pub input: serde_json::Value,
    /// Buyer's opening offer. `None` asks the seller to name a price.
    pub proposed_price: Option<Credits>,
    pub quoted_price: Option<Credits>,
    pub reason: Option<String>,
    pub estimated_secs: Option<u64>,
    pub state: QuoteState,
    /// Id the task created on acceptance will carry.
    pub task_id: TaskId,
    pub expires_at: DateTime<Utc>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(
        buyer: AccountId,
        seller: AccountId,
        listing_id: ListingId,
        input: serde_json::Value,
        proposed_price: Option<Credits>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            buyer,
            seller,
            listing_id,
            input,
            proposed_price,
            quoted_price: None,
            reason: None,
            estimated_secs: None,
            state: QuoteState::Pending,
            task_id: Uuid::new_v4(),
            expires_at: now + ttl,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal() && self.expires_at <= now
    }

    pub fn apply_event(&mut self, event: QuoteEvent, now: DateTime<Utc>) -> Result<()> {
        self.state = self.state.transition(event)?;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }
}
