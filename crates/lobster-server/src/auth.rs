use std::collections::HashMap;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};

use lobster_types::{AccountId, LobsterError, Operation, Principal, Result};

use crate::config::ApiKeyConfig;
use crate::error::ApiError;
use crate::state::AppState;

/// Maps a credential to the principal it belongs to.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Unknown or expired credentials fail with `Unauthenticated`.
    async fn resolve(&self, credential: &str) -> Result<Principal>;
}

/// Fixed set of API keys from configuration.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    keys: HashMap<String, Principal>,
}

impl StaticIdentity {
    pub fn new(keys: impl IntoIterator<Item = (String, Principal)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn from_config(keys: &[ApiKeyConfig]) -> Self {
        Self::new(
            keys.iter()
                .map(|k| (k.key.clone(), Principal::new(k.account, k.capability))),
        )
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn resolve(&self, credential: &str) -> Result<Principal> {
        self.keys
            .get(credential)
            .copied()
            .ok_or(LobsterError::Unauthenticated)
    }
}

/// Credential from `Authorization: Bearer <key>` or `X-Api-Key: <key>`.
pub fn credential(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    bearer
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

/// Authenticated and rate-checked caller of a route.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Principal);

impl Caller {
    pub fn account(&self) -> AccountId {
        self.0.account
    }

    pub fn authorize(&self, op: Operation) -> Result<AccountId> {
        self.0.authorize(op)?;
        Ok(self.0.account)
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let credential = credential(&parts.headers).ok_or(LobsterError::Unauthenticated)?;
        let principal = state.identity.resolve(credential).await?;
        state.limiter.check(principal.account).await?;
        Ok(Caller(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use lobster_types::Capability;
    use uuid::Uuid;

    #[test]
    fn test_credential_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(credential(&headers), None);

        headers.insert("x-api-key", HeaderValue::from_static("key-b"));
        assert_eq!(credential(&headers), Some("key-b"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer key-a"));
        assert_eq!(credential(&headers), Some("key-a"));

        let mut blank = HeaderMap::new();
        blank.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  "));
        assert_eq!(credential(&blank), None);
    }

    #[tokio::test]
    async fn test_static_identity() {
        let account = Uuid::new_v4();
        let identity = StaticIdentity::new([(
            "sk-1".to_string(),
            Principal::new(account, Capability::ReadOnly),
        )]);
        let principal = identity.resolve("sk-1").await.unwrap();
        assert_eq!(principal.account, account);
        assert!(matches!(
            identity.resolve("sk-2").await,
            Err(LobsterError::Unauthenticated)
        ));
    }
}
