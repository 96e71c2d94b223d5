use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use lobster_tasks::{CreateTask, Role};
use lobster_types::{Operation, Task, TaskState};

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_task(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateTask>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let buyer = caller.authorize(Operation::CreateTask)?;
    let task = state.tasks.create(buyer, req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    state: Option<TaskState>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let account = caller.authorize(Operation::ReadTasks)?;
    let tasks = state.tasks.list(account, query.role, query.state).await?;
    Ok(Json(tasks))
}

pub async fn pending_tasks(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Json<Vec<Task>>> {
    let seller = caller.authorize(Operation::ReadTasks)?;
    Ok(Json(state.tasks.pending_for_seller(seller).await?))
}

pub async fn get_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let account = caller.authorize(Operation::ReadTasks)?;
    Ok(Json(state.tasks.get(account, task_id).await?))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let buyer = caller.authorize(Operation::CancelTask)?;
    Ok(Json(state.tasks.cancel(buyer, task_id).await?))
}

pub async fn accept_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let seller = caller.authorize(Operation::SellerAction)?;
    Ok(Json(state.tasks.accept(seller, task_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    reason: Option<String>,
}

pub async fn reject_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<Task>> {
    let seller = caller.authorize(Operation::SellerAction)?;
    Ok(Json(state.tasks.reject(seller, task_id, req.reason).await?))
}

pub async fn start_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let seller = caller.authorize(Operation::SellerAction)?;
    Ok(Json(state.tasks.start(seller, task_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ResultRequest {
    output: serde_json::Value,
    #[serde(default, alias = "token_used")]
    tokens_used: Option<u64>,
}

pub async fn submit_result(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
    Json(req): Json<ResultRequest>,
) -> ApiResult<Json<Task>> {
    let seller = caller.authorize(Operation::SellerAction)?;
    let task = state
        .tasks
        .submit_result(seller, task_id, req.output, req.tokens_used)
        .await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    error: String,
}

pub async fn fail_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(task_id): Path<Uuid>,
    Json(req): Json<FailRequest>,
) -> ApiResult<Json<Task>> {
    let seller = caller.authorize(Operation::SellerAction)?;
    Ok(Json(state.tasks.fail(seller, task_id, req.error).await?))
}
