use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use lobster_types::{AccountId, Credits, ListingId, LobsterError, Result};

/// What the engine needs to know about a listed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub seller: AccountId,
    pub price: Credits,
    #[serde(default)]
    pub name: String,
}

/// Listing directory, owned by the catalog service.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Unknown listings fail with `ListingNotFound`.
    async fn listing(&self, id: ListingId) -> Result<Listing>;

    async fn price(&self, id: ListingId) -> Result<Credits> {
        Ok(self.listing(id).await?.price)
    }

    async fn seller_account(&self, id: ListingId) -> Result<AccountId> {
        Ok(self.listing(id).await?.seller)
    }
}

/// Catalog backed by a concurrent map, seeded from configuration or tests.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    listings: DashMap<ListingId, Listing>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listings(listings: impl IntoIterator<Item = Listing>) -> Self {
        let catalog = Self::new();
        for listing in listings {
            catalog.upsert(listing);
        }
        catalog
    }

    pub fn upsert(&self, listing: Listing) {
        self.listings.insert(listing.id, listing);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn listing(&self, id: ListingId) -> Result<Listing> {
        self.listings
            .get(&id)
            .map(|l| l.clone())
            .ok_or(LobsterError::ListingNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_lookup() {
        let seller = Uuid::new_v4();
        let listing = Listing {
            id: Uuid::new_v4(),
            seller,
            price: 80,
            name: "translate".into(),
        };
        let catalog = InMemoryCatalog::with_listings([listing.clone()]);

        assert_eq!(catalog.price(listing.id).await.unwrap(), 80);
        assert_eq!(catalog.seller_account(listing.id).await.unwrap(), seller);
        assert!(matches!(
            catalog.listing(Uuid::new_v4()).await,
            Err(LobsterError::ListingNotFound(_))
        ));
    }
}
