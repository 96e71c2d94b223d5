use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use lobster_ledger::LedgerEntry;
use lobster_types::{Credits, Operation};
use lobster_wallet::{TopUpReceipt, WalletView};

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::state::AppState;

const MAX_TRANSACTIONS: usize = 500;

pub async fn get_wallet(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Json<WalletView>> {
    let account = caller.authorize(Operation::ReadWallet)?;
    Ok(Json(state.wallets.balance(account).await?))
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    amount: Credits,
    /// Retrying with the same id credits once.
    #[serde(default)]
    request_id: Option<Uuid>,
}

pub async fn top_up(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<TopUpRequest>,
) -> ApiResult<Json<TopUpReceipt>> {
    let account = caller.authorize(Operation::TopUp)?;
    let receipt = state
        .wallets
        .top_up(account, req.amount, req.request_id)
        .await?;
    Ok(Json(receipt))
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn transactions(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    let account = caller.authorize(Operation::ReadWallet)?;
    let limit = query.limit.unwrap_or(50).min(MAX_TRANSACTIONS);
    Ok(Json(state.wallets.transactions(account, limit).await?))
}
