// --------------------------------------------------
// Handles API endpoints for task lifecycle.
//
// Responsibilities:
// - Create / read / update / delete tasks
// - Complete and skip tasks (advance the due date, append history)
// - Hand every due-date change to the notification planner
//
// The caller is identified by the `x-user-id` header, set by the
// authentication layer in front of this service.
// --------------------------------------------------

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::models::{NotificationPrefs, Task, TaskHistory};
use crate::planner::TaskGuard;
use crate::recurrence::{self, FrequencySpec, RecurrenceRule};
use crate::store::StoreError;

pub const USER_HEADER: &str = "x-user-id";

fn current_user(headers: &HeaderMap) -> Option<Uuid> {
    headers.get(USER_HEADER)?.to_str().ok()?.parse().ok()
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn store_failure(e: &StoreError, action: &'static str) -> Response {
    if let StoreError::TaskNotFound(_) = e {
        return (StatusCode::NOT_FOUND, "task not found").into_response();
    }
    tracing::error!(action, error = %e, "Store operation failed");
    (StatusCode::INTERNAL_SERVER_ERROR, action).into_response()
}

fn caller_and_id(headers: &HeaderMap, id: &str) -> Result<(Uuid, Uuid), Response> {
    let Some(user) = current_user(headers) else {
        return Err((StatusCode::UNAUTHORIZED, "login required").into_response());
    };
    let Ok(id) = Uuid::parse_str(id) else {
        return Err((StatusCode::BAD_REQUEST, "invalid id").into_response());
    };
    Ok((user, id))
}

// Loads the task behind `id` and checks the caller owns it.
pub(crate) async fn owned_task(state: &AppState, headers: &HeaderMap, id: &str) -> Result<Task, Response> {
    let (user, id) = caller_and_id(headers, id)?;
    load_owned(state, user, id).await
}

// Like `owned_task`, but takes the task's lock first and hands it back, so a
// read-modify-write cannot interleave with another one on the same task.
async fn locked_task(state: &AppState, headers: &HeaderMap, id: &str) -> Result<(TaskGuard, Task), Response> {
    let (user, id) = caller_and_id(headers, id)?;
    let guard = state.locks.acquire(id).await;
    let task = load_owned(state, user, id).await?;
    Ok((guard, task))
}

async fn load_owned(state: &AppState, user: Uuid, id: Uuid) -> Result<Task, Response> {
    let task = match state.tasks.get_task(id).await {
        Ok(Some(t)) => t,
        Ok(None) => return Err((StatusCode::NOT_FOUND, "task not found").into_response()),
        Err(e) => return Err(store_failure(&e, "failed to load task")),
    };

    if task.owner_id != user {
        return Err((StatusCode::FORBIDDEN, "not allowed to access this task").into_response());
    }
    Ok(task)
}

#[derive(Debug, Deserialize)]
pub struct TaskInput {
    pub title: String,
    pub next_due_date: Option<String>, // RFC3339
    #[serde(default)]
    pub is_rolling: bool,
    pub frequency: FrequencySpec,
    #[serde(default)]
    pub notification: NotificationPrefs,
}

struct ValidTask {
    title: String,
    next_due_date: Option<DateTime<Utc>>,
    is_rolling: bool,
    frequency: RecurrenceRule,
    notification: NotificationPrefs,
}

fn validate(input: TaskInput) -> Result<ValidTask, Response> {
    if input.title.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "title required").into_response());
    }

    let next_due_date = match input.next_due_date.as_deref() {
        None => None,
        Some(raw) => match parse_time(raw) {
            Some(dt) => Some(dt),
            None => return Err((StatusCode::BAD_REQUEST, "invalid next_due_date").into_response()),
        },
    };

    let frequency = RecurrenceRule::try_from(input.frequency)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?;

    Ok(ValidTask {
        title: input.title,
        next_due_date,
        is_rolling: input.is_rolling,
        frequency,
        notification: input.notification,
    })
}

// -----------------------------
// GET /api/tasks
// Returns the caller's tasks
// -----------------------------
pub async fn get_tasks(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(user) = current_user(&headers) else {
        return (StatusCode::UNAUTHORIZED, "login required").into_response();
    };

    match state.tasks.list_tasks(user).await {
        Ok(tasks) => Json(serde_json::json!({ "tasks": tasks })).into_response(),
        Err(e) => store_failure(&e, "failed to load tasks"),
    }
}

// -----------------------------
// GET /api/tasks/:id
// -----------------------------
pub async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match owned_task(&state, &headers, &id).await {
        Ok(task) => Json(task).into_response(),
        Err(resp) => resp,
    }
}

// -----------------------------
// POST /api/tasks
// Creates a task and plans its notifications
// -----------------------------
pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<TaskInput>,
) -> impl IntoResponse {
    let Some(user) = current_user(&headers) else {
        return (StatusCode::UNAUTHORIZED, "login required").into_response();
    };
    let valid = match validate(input) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut task = Task::new(
        valid.title,
        user,
        valid.frequency,
        valid.next_due_date,
        state.clock.now(),
    );
    task.is_rolling = valid.is_rolling;
    task.notification = valid.notification;

    if let Err(e) = state.tasks.insert_task(task.clone()).await {
        return store_failure(&e, "failed to create task");
    }
    tracing::info!(task_id = %task.id, owner_id = %user, kind = ?task.frequency.kind(), "Task created");

    state.planner.spawn_replan(task.id, state.planning_timeout);
    (StatusCode::CREATED, Json(task)).into_response()
}

// -----------------------------
// PUT /api/tasks/:id
// Replaces title, rule, due date and preferences wholesale
// -----------------------------
pub async fn update_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<TaskInput>,
) -> impl IntoResponse {
    let valid = match validate(input) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (guard, mut task) = match locked_task(&state, &headers, &id).await {
        Ok(locked) => locked,
        Err(resp) => return resp,
    };

    task.title = valid.title;
    task.frequency = valid.frequency;
    task.next_due_date = valid.next_due_date;
    task.is_rolling = valid.is_rolling;
    task.notification = valid.notification;
    task.updated_at = Some(state.clock.now());

    let saved = state.tasks.update_task(task.clone()).await;
    drop(guard);
    if let Err(e) = saved {
        return store_failure(&e, "failed to update task");
    }

    state.planner.spawn_replan(task.id, state.planning_timeout);
    Json(task).into_response()
}

// -----------------------------
// DELETE /api/tasks/:id
// Removes a task with its history and notifications
// -----------------------------
pub async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    // held so an in-flight plan cannot re-insert rows after the cascade
    let (_guard, task) = match locked_task(&state, &headers, &id).await {
        Ok(locked) => locked,
        Err(resp) => return resp,
    };

    match state.tasks.delete_task(task.id).await {
        Ok(true) => Json(serde_json::json!({ "ok": true })).into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "task not found").into_response(),
        Err(e) => store_failure(&e, "failed to delete task"),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteInput {
    pub completed_at: Option<String>, // RFC3339, defaults to now
}

// Advances the task past its reference time and records the history row.
// `reference` maps the freshly locked task to the anchor: the completion time
// for `/do`, the current due date for `/skip`.
async fn advance(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    reference: impl FnOnce(&Task) -> DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
) -> Response {
    let (guard, mut task) = match locked_task(state, headers, id).await {
        Ok(locked) => locked,
        Err(resp) => return resp,
    };
    if !task.is_active {
        return (StatusCode::CONFLICT, "task is not active").into_response();
    }

    let next = match recurrence::next_due_date(&task, reference(&task)) {
        Ok(next) => next,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let entry = TaskHistory::new(task.id, task.next_due_date, completed_at);
    task.advance(next, state.clock.now());

    let saved = state.tasks.complete_task(task.clone(), entry).await;
    drop(guard);
    if let Err(e) = saved {
        return store_failure(&e, "failed to complete task");
    }
    tracing::info!(
        task_id = %task.id,
        skipped = completed_at.is_none(),
        next_due_date = ?task.next_due_date,
        "Task advanced"
    );

    state.planner.spawn_replan(task.id, state.planning_timeout);
    Json(task).into_response()
}

// -----------------------------
// POST /api/tasks/:id/do
// Completes a task; rolling tasks float from the completion time
// -----------------------------
pub async fn complete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(resp) = caller_and_id(&headers, &id) {
        return resp;
    }

    // an absent body means "completed now"; anything else must parse
    let input = if body.iter().all(u8::is_ascii_whitespace) {
        CompleteInput::default()
    } else {
        match serde_json::from_slice::<CompleteInput>(&body) {
            Ok(input) => input,
            Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid body: {e}")).into_response(),
        }
    };
    let completed_at = match input.completed_at.as_deref() {
        None => state.clock.now(),
        Some(raw) => match parse_time(raw) {
            Some(dt) => dt,
            None => return (StatusCode::BAD_REQUEST, "invalid completed_at").into_response(),
        },
    };

    advance(&state, &headers, &id, |_| completed_at, Some(completed_at)).await
}

// -----------------------------
// POST /api/tasks/:id/skip
// Steps over the current occurrence without completing it
// -----------------------------
pub async fn skip_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    // anchor on the schedule, not on when the user clicked skip
    let now = state.clock.now();
    advance(&state, &headers, &id, |task| task.next_due_date.unwrap_or(now), None).await
}

#[derive(Debug, Deserialize)]
pub struct DueDateInput {
    pub due_date: String, // RFC3339
}

// -----------------------------
// PUT /api/tasks/:id/due-date
// -----------------------------
pub async fn update_due_date(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<DueDateInput>,
) -> impl IntoResponse {
    let Some(due) = parse_time(&input.due_date) else {
        return (StatusCode::BAD_REQUEST, "invalid due_date").into_response();
    };
    let (guard, mut task) = match locked_task(&state, &headers, &id).await {
        Ok(locked) => locked,
        Err(resp) => return resp,
    };

    task.next_due_date = Some(due);
    task.updated_at = Some(state.clock.now());

    let saved = state.tasks.update_task(task.clone()).await;
    drop(guard);
    if let Err(e) = saved {
        return store_failure(&e, "failed to update due date");
    }

    state.planner.spawn_replan(task.id, state.planning_timeout);
    Json(task).into_response()
}

// -----------------------------
// GET /api/tasks/:id/history
// -----------------------------
pub async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let task = match owned_task(&state, &headers, &id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match state.tasks.history(task.id).await {
        Ok(history) => Json(serde_json::json!({ "history": history })).into_response(),
        Err(e) => store_failure(&e, "failed to load history"),
    }
}
