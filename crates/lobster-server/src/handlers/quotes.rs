use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use lobster_quotes::{AcceptedQuote, CreateQuote, SubmitQuote};
use lobster_types::{Operation, Quote};

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_quote(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateQuote>,
) -> ApiResult<(StatusCode, Json<Quote>)> {
    let buyer = caller.authorize(Operation::Negotiate)?;
    let quote = state.quotes.create(buyer, req).await?;
    Ok((StatusCode::CREATED, Json(quote)))
}

pub async fn list_quotes(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Json<Vec<Quote>>> {
    let buyer = caller.authorize(Operation::ReadQuotes)?;
    Ok(Json(state.quotes.list_for_buyer(buyer).await?))
}

pub async fn pending_quotes(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Json<Vec<Quote>>> {
    let seller = caller.authorize(Operation::ReadQuotes)?;
    Ok(Json(state.quotes.pending_for_seller(seller).await?))
}

pub async fn get_quote(
    State(state): State<AppState>,
    caller: Caller,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<Json<Quote>> {
    let account = caller.authorize(Operation::ReadQuotes)?;
    Ok(Json(state.quotes.get(account, quote_id).await?))
}

pub async fn submit_quote(
    State(state): State<AppState>,
    caller: Caller,
    Path(quote_id): Path<Uuid>,
    Json(req): Json<SubmitQuote>,
) -> ApiResult<Json<Quote>> {
    let seller = caller.authorize(Operation::Negotiate)?;
    Ok(Json(state.quotes.submit(seller, quote_id, req).await?))
}

pub async fn accept_quote(
    State(state): State<AppState>,
    caller: Caller,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<AcceptedQuote>)> {
    let buyer = caller.authorize(Operation::Negotiate)?;
    let accepted = state.quotes.accept(buyer, quote_id).await?;
    Ok((StatusCode::CREATED, Json(accepted)))
}

pub async fn reject_quote(
    State(state): State<AppState>,
    caller: Caller,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<Json<Quote>> {
    let buyer = caller.authorize(Operation::Negotiate)?;
    Ok(Json(state.quotes.reject(buyer, quote_id).await?))
}
