use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::app::AppState;
use crate::models::NotificationKind;
use crate::routes_tasks::{owned_task, store_failure};

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub task_id: String,
    pub now: String,
    pub notifications: Vec<NotificationResponse>,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: String,
    pub kind: NotificationKind,
    pub scheduled_for: String,
    pub text: String,
    pub is_sent: bool,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub task_id: String,
    pub planned: usize,
}

// -----------------------------
// GET /api/tasks/:id/notifications
// Reminders on file for a task, soonest first
// -----------------------------
pub async fn get_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let task = match owned_task(&state, &headers, &id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let mut rows = match state.notifications.list_for_task(task.id).await {
        Ok(rows) => rows,
        Err(e) => return store_failure(&e, "failed to load notifications"),
    };
    rows.sort_by_key(|n| n.scheduled_for);

    let notifications = rows
        .into_iter()
        .map(|n| NotificationResponse {
            id: n.id.to_string(),
            kind: n.kind,
            scheduled_for: n.scheduled_for.to_rfc3339(),
            text: n.text,
            is_sent: n.is_sent,
        })
        .collect();

    Json(NotificationsResponse {
        task_id: task.id.to_string(),
        now: state.clock.now().to_rfc3339(),
        notifications,
    })
    .into_response()
}

// -----------------------------
// POST /api/tasks/:id/notifications/plan
// Rebuilds pending reminders now and reports how many were written
// -----------------------------
pub async fn plan_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let task = match owned_task(&state, &headers, &id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match tokio::time::timeout(state.planning_timeout, state.planner.replan(task.id)).await {
        Ok(Ok(planned)) => Json(PlanResponse {
            task_id: task.id.to_string(),
            planned,
        })
        .into_response(),
        Ok(Err(e)) => {
            tracing::error!(task_id = %task.id, error = %e, "Planning failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to plan notifications").into_response()
        }
        Err(_) => {
            tracing::warn!(task_id = %task.id, "Planning timed out");
            (StatusCode::GATEWAY_TIMEOUT, "planning timed out").into_response()
        }
    }
}
