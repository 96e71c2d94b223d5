use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use lobster_types::{AccountId, LobsterError, Result};

/// How a seller receives new tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Tasks are posted to the seller's webhook.
    Push { url: String },
    /// The seller polls for work.
    #[default]
    #[serde(alias = "poll")]
    Pull,
}

/// Registered delivery endpoint of one seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub seller: AccountId,
    #[serde(flatten)]
    pub mode: DeliveryMode,
}

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    modes: DashMap<AccountId, DeliveryMode>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let registry = Self::new();
        for endpoint in endpoints {
            registry.modes.insert(endpoint.seller, endpoint.mode);
        }
        registry
    }

    /// Sellers without a registration poll.
    pub fn mode(&self, seller: AccountId) -> DeliveryMode {
        self.modes
            .get(&seller)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn register_webhook(&self, seller: AccountId, url: &str) -> Result<Endpoint> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(LobsterError::InvalidRequest(format!(
                "webhook url must be http(s): {url}"
            )));
        }
        self.set(seller, DeliveryMode::Push { url: url.to_string() })
    }

    pub fn set(&self, seller: AccountId, mode: DeliveryMode) -> Result<Endpoint> {
        tracing::info!("Seller {} delivery mode set to {:?}", seller, mode);
        self.modes.insert(seller, mode.clone());
        Ok(Endpoint { seller, mode })
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.modes
            .iter()
            .map(|e| Endpoint {
                seller: *e.key(),
                mode: e.value().clone(),
            })
            .collect()
    }
}
