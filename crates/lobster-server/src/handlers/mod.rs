mod dispatch;
mod quotes;
mod tasks;
mod wallet;

use axum::{
    Json, Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .route("/tasks/pending", get(tasks::pending_tasks))
        .route("/tasks/{task_id}", get(tasks::get_task))
        .route("/tasks/{task_id}/cancel", post(tasks::cancel_task))
        .route("/tasks/{task_id}/accept", post(tasks::accept_task))
        .route("/tasks/{task_id}/reject", post(tasks::reject_task))
        .route("/tasks/{task_id}/start", post(tasks::start_task))
        .route("/tasks/{task_id}/result", post(tasks::submit_result))
        .route("/tasks/{task_id}/fail", post(tasks::fail_task))
        .route("/tasks/{task_id}/deliver", post(dispatch::deliver_task))
        .route("/quotes", post(quotes::create_quote).get(quotes::list_quotes))
        .route("/quotes/pending", get(quotes::pending_quotes))
        .route("/quotes/{quote_id}", get(quotes::get_quote))
        .route("/quotes/{quote_id}/submit", post(quotes::submit_quote))
        .route("/quotes/{quote_id}/accept", post(quotes::accept_quote))
        .route("/quotes/{quote_id}/reject", post(quotes::reject_quote))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/topup", post(wallet::top_up))
        .route("/transactions", get(wallet::transactions))
        .route("/webhooks", post(dispatch::register_webhook))
        .route("/poll/{seller}", get(dispatch::poll))
        .route("/poll/{seller}/ack", post(dispatch::ack))
        .route("/health", get(health));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
