use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use lobster_types::{AccountId, LobsterError, Quote, QuoteId, QuoteState, Result};

/// Selection for [`QuoteStore::list`]. Empty fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuoteFilter {
    pub buyer: Option<AccountId>,
    pub seller: Option<AccountId>,
    pub state: Option<QuoteState>,
}

impl QuoteFilter {
    pub fn matches(&self, quote: &Quote) -> bool {
        self.buyer.is_none_or(|b| quote.buyer == b)
            && self.seller.is_none_or(|s| quote.seller == s)
            && self.state.is_none_or(|s| quote.state == s)
    }
}

/// Versioned quote records, updated by compare-and-swap.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn insert(&self, quote: Quote) -> Result<()>;

    async fn get(&self, id: QuoteId) -> Result<Option<Quote>>;

    /// A stale `expected_version` fails with `Conflict`.
    async fn compare_and_swap(&self, quote: Quote, expected_version: u64) -> Result<()>;

    /// Matching quotes, oldest first.
    async fn list(&self, filter: QuoteFilter) -> Result<Vec<Quote>>;

    /// Open quotes past their expiry.
    async fn expiring(&self, now: DateTime<Utc>) -> Result<Vec<Quote>>;

    async fn all(&self) -> Result<Vec<Quote>>;
}

#[derive(Debug, Default)]
pub struct InMemoryQuoteStore {
    quotes: DashMap<QuoteId, Quote>,
}

impl InMemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_quotes(quotes: impl IntoIterator<Item = Quote>) -> Self {
        let store = Self::new();
        for quote in quotes {
            store.quotes.insert(quote.id, quote);
        }
        store
    }

    fn collect(&self, pred: impl Fn(&Quote) -> bool) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self
            .quotes
            .iter()
            .filter(|q| pred(q.value()))
            .map(|q| q.value().clone())
            .collect();
        quotes.sort_by_key(|q| q.created_at);
        quotes
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn insert(&self, quote: Quote) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.quotes.entry(quote.id) {
            Entry::Occupied(_) => Err(LobsterError::Conflict(format!(
                "quote {} already exists",
                quote.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(quote);
                Ok(())
            }
        }
    }

    async fn get(&self, id: QuoteId) -> Result<Option<Quote>> {
        Ok(self.quotes.get(&id).map(|q| q.clone()))
    }

    async fn compare_and_swap(&self, quote: Quote, expected_version: u64) -> Result<()> {
        let mut current = self
            .quotes
            .get_mut(&quote.id)
            .ok_or(LobsterError::QuoteNotFound(quote.id))?;
        if current.version != expected_version {
            return Err(LobsterError::Conflict(format!(
                "quote {} is at version {}, expected {}",
                quote.id, current.version, expected_version
            )));
        }
        *current = quote;
        Ok(())
    }

    async fn list(&self, filter: QuoteFilter) -> Result<Vec<Quote>> {
        Ok(self.collect(|q| filter.matches(q)))
    }

    async fn expiring(&self, now: DateTime<Utc>) -> Result<Vec<Quote>> {
        Ok(self.collect(|q| q.is_expired(now)))
    }

    async fn all(&self) -> Result<Vec<Quote>> {
        Ok(self.collect(|_| true))
    }
}
