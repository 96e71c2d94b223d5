use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lobster_dispatch::{DeliveryMode, DeliveryRecord, Endpoint};
use lobster_tasks::TaskNotice;
use lobster_types::{LobsterError, Operation, Task};

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::state::AppState;

const MAX_POLL_BATCH: usize = 100;

#[derive(Debug, Deserialize)]
pub struct RegisterEndpointRequest {
    /// "push"/"webhook" or "pull"/"poll". Defaults to push when a url is given.
    #[serde(default, alias = "comm_mode")]
    mode: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

pub async fn register_webhook(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<RegisterEndpointRequest>,
) -> ApiResult<Json<Endpoint>> {
    let seller = caller.authorize(Operation::ManageEndpoints)?;
    let endpoints = state.dispatcher.endpoints();
    let endpoint = match (req.mode.as_deref(), req.url) {
        (Some("pull" | "poll"), _) => endpoints.set(seller, DeliveryMode::Pull)?,
        (Some("push" | "webhook") | None, Some(url)) => endpoints.register_webhook(seller, &url)?,
        (Some("push" | "webhook") | None, None) => {
            return Err(LobsterError::InvalidRequest("webhook url is required".into()).into());
        }
        (Some(other), _) => {
            return Err(
                LobsterError::InvalidRequest(format!("unknown delivery mode: {other}")).into(),
            );
        }
    };
    Ok(Json(endpoint))
}

#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    #[serde(default)]
    max: Option<usize>,
}

/// Claim queued tasks. Claims not acked within the lease are handed out again.
pub async fn poll(
    State(state): State<AppState>,
    caller: Caller,
    Path(seller): Path<Uuid>,
    Query(query): Query<PollQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let account = caller.authorize(Operation::Poll)?;
    if account != seller {
        return Err(LobsterError::Forbidden("cannot poll another seller's queue".into()).into());
    }

    let max = query.max.unwrap_or(10).clamp(1, MAX_POLL_BATCH);
    let queue = state.dispatcher.queue();
    let mut tasks = Vec::new();
    for task_id in queue.poll(seller, max, Utc::now()) {
        match state.tasks.get(seller, task_id).await {
            Ok(task) if !task.is_terminal() => tasks.push(task),
            _ => queue.withdraw(seller, task_id),
        }
    }
    Ok(Json(tasks))
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    task_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    task_id: Uuid,
    acked: bool,
}

pub async fn ack(
    State(state): State<AppState>,
    caller: Caller,
    Path(seller): Path<Uuid>,
    Json(req): Json<AckRequest>,
) -> ApiResult<Json<AckResponse>> {
    let account = caller.authorize(Operation::Poll)?;
    if account != seller {
        return Err(LobsterError::Forbidden("cannot ack for another seller".into()).into());
    }
    if !state.dispatcher.queue().ack(seller, req.task_id) {
        return Err(LobsterError::TaskNotFound(req.task_id).into());
    }
    Ok(Json(AckResponse {
        task_id: req.task_id,
        acked: true,
    }))
}

/// Push a task to its seller now and report the outcome.
pub async fn deliver_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<DeliveryRecord>> {
    let account = caller.authorize(Operation::CreateTask)?;
    let task = state.tasks.get(account, task_id).await?;
    if task.is_terminal() {
        return Err(LobsterError::Conflict(format!("task {task_id} is already {:?}", task.state)).into());
    }
    let record = state
        .dispatcher
        .deliver_now(&TaskNotice::new(&task, None))
        .await?;
    Ok(Json(record))
}
