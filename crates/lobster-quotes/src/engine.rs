use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use lobster_tasks::{Actor, AgreedQuote, CreateTask, TaskEngine};
use lobster_types::{
    AccountId, Credits, ListingId, LobsterError, Quote, QuoteEvent, QuoteId, QuoteState, Result,
    Task,
};

use crate::store::{QuoteFilter, QuoteStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateQuote {
    pub listing_id: ListingId,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub proposed_price: Option<Credits>,
}

/// The seller's answer to a quote request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitQuote {
    pub price: Credits,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, alias = "estimated_seconds")]
    pub estimated_secs: Option<u64>,
    /// Extends the quote's validity from now.
    #[serde(default, alias = "ttl_seconds")]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedQuote {
    pub quote: Quote,
    pub task: Task,
}

fn permits(actor: Actor, quote: &Quote, event: QuoteEvent) -> Result<()> {
    let allowed = match (actor, event) {
        (Actor::System, QuoteEvent::Expire) => true,
        (Actor::Seller(account), QuoteEvent::Submit) => account == quote.seller,
        (Actor::Buyer(account), QuoteEvent::Accept | QuoteEvent::Reject) => account == quote.buyer,
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(LobsterError::Forbidden(format!(
            "{:?} may not apply {:?} to quote {}",
            actor, event, quote.id
        )))
    }
}

/// Price negotiation ahead of a task. Quotes never hold funds; acceptance
/// hands off to the task engine, which freezes the agreed price.
pub struct QuoteEngine {
    store: Arc<dyn QuoteStore>,
    tasks: Arc<TaskEngine>,
    ttl: Duration,
    max_cas_retries: u32,
}

impl QuoteEngine {
    pub fn new(store: Arc<dyn QuoteStore>, tasks: Arc<TaskEngine>, ttl: Duration) -> Self {
        Self {
            store,
            tasks,
            ttl,
            max_cas_retries: 8,
        }
    }

    pub fn store(&self) -> Arc<dyn QuoteStore> {
        self.store.clone()
    }

    pub async fn create(&self, buyer: AccountId, request: CreateQuote) -> Result<Quote> {
        let listing = self.tasks.catalog().listing(request.listing_id).await?;
        if listing.seller == buyer {
            return Err(LobsterError::SelfDealing);
        }
        if request.proposed_price == Some(0) {
            return Err(LobsterError::InvalidAmount("proposed price must be positive".into()));
        }

        let quote = Quote::new(
            buyer,
            listing.seller,
            listing.id,
            request.input,
            request.proposed_price,
            self.ttl,
        );
        self.store.insert(quote.clone()).await?;
        tracing::info!(
            "Quote {} requested by {} from seller {}",
            quote.id,
            buyer,
            quote.seller
        );
        Ok(quote)
    }

    pub async fn get(&self, account: AccountId, id: QuoteId) -> Result<Quote> {
        match self.store.get(id).await? {
            Some(quote) if quote.buyer == account || quote.seller == account => Ok(quote),
            _ => Err(LobsterError::QuoteNotFound(id)),
        }
    }

    pub async fn list_for_buyer(&self, buyer: AccountId) -> Result<Vec<Quote>> {
        self.store
            .list(QuoteFilter {
                buyer: Some(buyer),
                ..QuoteFilter::default()
            })
            .await
    }

    /// Requests the seller has not priced yet.
    pub async fn pending_for_seller(&self, seller: AccountId) -> Result<Vec<Quote>> {
        self.store
            .list(QuoteFilter {
                seller: Some(seller),
                state: Some(QuoteState::Pending),
                ..QuoteFilter::default()
            })
            .await
    }

    pub async fn submit(&self, seller: AccountId, id: QuoteId, offer: SubmitQuote) -> Result<Quote> {
        if offer.price == 0 {
            return Err(LobsterError::InvalidAmount("quoted price must be positive".into()));
        }
        let now = Utc::now();
        let quote = self
            .transition(Actor::Seller(seller), id, QuoteEvent::Submit, now, |quote| {
                quote.quoted_price = Some(offer.price);
                quote.reason = offer.reason.clone();
                quote.estimated_secs = offer.estimated_secs;
                if let Some(ttl) = offer.ttl_secs {
                    quote.expires_at = now + Duration::seconds(i64::try_from(ttl).unwrap_or(i64::MAX));
                }
            })
            .await?;
        tracing::info!("Quote {} priced at {}", quote.id, offer.price);
        Ok(quote)
    }

    /// Accept a priced quote, creating exactly one task at the quoted price.
    ///
    /// The task is created first under the id reserved on the quote, so a
    /// retry never creates a second one. If funds are short the quote stays
    /// `quoted`. If a concurrent reject or expiry wins, the task is canceled
    /// and its funds returned.
    pub async fn accept(&self, buyer: AccountId, id: QuoteId) -> Result<AcceptedQuote> {
        let now = Utc::now();
        let quote = self.load(id).await?;
        permits(Actor::Buyer(buyer), &quote, QuoteEvent::Accept)?;
        if quote.is_expired(now) {
            self.expire_stale(&quote, now).await;
            return Err(LobsterError::QuoteTransition {
                from: QuoteState::Expired,
                event: QuoteEvent::Accept,
            });
        }
        quote.state.transition(QuoteEvent::Accept)?;
        let price = quote
            .quoted_price
            .ok_or_else(|| LobsterError::Internal(format!("quote {id} has no price")))?;

        let task = self
            .tasks
            .create(
                buyer,
                CreateTask {
                    id: Some(quote.task_id),
                    listing_id: quote.listing_id,
                    input: quote.input.clone(),
                    timeout_secs: None,
                    quote: Some(AgreedQuote {
                        quote_id: quote.id,
                        price,
                    }),
                },
            )
            .await?;
        if task.quote_id != Some(quote.id) || task.price != price {
            return Err(LobsterError::Conflict(format!(
                "task {} does not belong to quote {}",
                task.id, quote.id
            )));
        }

        match self
            .transition(Actor::Buyer(buyer), id, QuoteEvent::Accept, Utc::now(), |_| {})
            .await
        {
            Ok(quote) => {
                tracing::info!("Quote {} accepted, task {} created", quote.id, task.id);
                Ok(AcceptedQuote { quote, task })
            }
            Err(e) => {
                let state = self.store.get(id).await?.map(|q| q.state);
                if state != Some(QuoteState::Accepted) {
                    tracing::warn!("Quote {} moved to {:?} during accept, canceling task {}", id, state, task.id);
                    if let Err(abort) = self.tasks.abort(task.id, "quote no longer acceptable").await {
                        tracing::error!("Failed to cancel task {} of lost quote {}: {}", task.id, id, abort);
                    }
                }
                Err(e)
            }
        }
    }

    pub async fn reject(&self, buyer: AccountId, id: QuoteId) -> Result<Quote> {
        let quote = self
            .transition(Actor::Buyer(buyer), id, QuoteEvent::Reject, Utc::now(), |_| {})
            .await?;
        tracing::info!("Quote {} rejected", quote.id);
        Ok(quote)
    }

    /// Expire open quotes past their deadline.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<QuoteId>> {
        let mut expired = Vec::new();
        for quote in self.store.expiring(now).await? {
            match self
                .transition(Actor::System, quote.id, QuoteEvent::Expire, now, |_| {})
                .await
            {
                Ok(_) => expired.push(quote.id),
                Err(LobsterError::QuoteTransition { .. } | LobsterError::Conflict(_)) => {}
                Err(e) => tracing::warn!("Failed to expire quote {}: {}", quote.id, e),
            }
        }
        if !expired.is_empty() {
            tracing::info!("Expired {} quote(s)", expired.len());
        }
        Ok(expired)
    }

    async fn load(&self, id: QuoteId) -> Result<Quote> {
        self.store
            .get(id)
            .await?
            .ok_or(LobsterError::QuoteNotFound(id))
    }

    /// Best-effort expiry of a quote found past its deadline.
    async fn expire_stale(&self, quote: &Quote, now: DateTime<Utc>) {
        let mut expired = quote.clone();
        if expired.apply_event(QuoteEvent::Expire, now).is_ok()
            && self
                .store
                .compare_and_swap(expired, quote.version)
                .await
                .is_ok()
        {
            tracing::info!("Quote {} expired", quote.id);
        }
    }

    async fn transition<F>(
        &self,
        actor: Actor,
        id: QuoteId,
        event: QuoteEvent,
        now: DateTime<Utc>,
        edit: F,
    ) -> Result<Quote>
    where
        F: Fn(&mut Quote) + Send + Sync,
    {
        let mut attempts = 0;
        loop {
            let current = self.load(id).await?;
            permits(actor, &current, event)?;
            if event != QuoteEvent::Expire && current.is_expired(now) {
                self.expire_stale(&current, now).await;
                return Err(LobsterError::QuoteTransition {
                    from: QuoteState::Expired,
                    event,
                });
            }
            if event == QuoteEvent::Expire && !current.is_expired(now) && !current.state.is_terminal() {
                return Err(LobsterError::Conflict(format!("quote {id} has not expired")));
            }

            let mut next = current.clone();
            next.apply_event(event, now)?;
            edit(&mut next);

            match self.store.compare_and_swap(next.clone(), current.version).await {
                Ok(()) => return Ok(next),
                Err(LobsterError::Conflict(reason)) if attempts < self.max_cas_retries => {
                    attempts += 1;
                    tracing::warn!("Quote {} changed underneath {:?}, retrying: {}", id, event, reason);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_permits() {
        let quote = Quote::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            serde_json::Value::Null,
            None,
            Duration::seconds(60),
        );
        assert!(permits(Actor::Seller(quote.seller), &quote, QuoteEvent::Submit).is_ok());
        assert!(permits(Actor::Buyer(quote.buyer), &quote, QuoteEvent::Accept).is_ok());
        assert!(permits(Actor::System, &quote, QuoteEvent::Expire).is_ok());
        assert!(permits(Actor::Buyer(quote.buyer), &quote, QuoteEvent::Submit).is_err());
        assert!(permits(Actor::Seller(quote.seller), &quote, QuoteEvent::Reject).is_err());
        assert!(permits(Actor::System, &quote, QuoteEvent::Accept).is_err());
    }
}
