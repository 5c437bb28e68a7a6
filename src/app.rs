use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::clock::Clock;
use crate::planner::{NotificationPlanner, TaskLocks};
use crate::routes_notifications;
use crate::routes_tasks;
use crate::store::{JsonStore, NotificationStore, TaskStore};

// Shared handles passed to every handler and sweep
#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<dyn TaskStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub planner: Arc<NotificationPlanner>,
    pub clock: Arc<dyn Clock>,
    pub locks: TaskLocks,
    pub planning_timeout: Duration,
}

impl AppState {
    pub fn new(store: Arc<JsonStore>, clock: Arc<dyn Clock>, planning_timeout: Duration) -> Self {
        let locks = TaskLocks::default();
        let planner = Arc::new(NotificationPlanner::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            locks.clone(),
        ));
        Self {
            tasks: store.clone(),
            notifications: store,
            planner,
            clock,
            locks,
            planning_timeout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // tasks
        .route("/tasks", get(routes_tasks::get_tasks).post(routes_tasks::create_task))
        .route(
            "/tasks/:id",
            get(routes_tasks::get_task)
                .put(routes_tasks::update_task)
                .delete(routes_tasks::delete_task),
        )
        .route("/tasks/:id/do", post(routes_tasks::complete_task))
        .route("/tasks/:id/skip", post(routes_tasks::skip_task))
        .route("/tasks/:id/due-date", put(routes_tasks::update_due_date))
        .route("/tasks/:id/history", get(routes_tasks::get_history))
        // notifications
        .route("/tasks/:id/notifications", get(routes_notifications::get_notifications))
        .route("/tasks/:id/notifications/plan", post(routes_notifications::plan_notifications));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
