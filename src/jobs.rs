// --------------------------------------------------
// Background sweeps around the planner:
// - delivery: send due reminders and mark them sent
// - overdue scan: one overdue reminder per late task
// - housekeeping: drop sent reminders past retention
// --------------------------------------------------

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::app::AppState;
use crate::config::SchedulerConfig;
use crate::models::{Notification, NotificationKind};
use crate::planner::TaskLocks;
use crate::store::{NotificationStore, StoreError, TaskStore, has_pending_kind};

#[derive(Debug, Error)]
#[error("Delivery failed: {0}")]
pub struct DeliveryError(pub String);

// Outbound channel for reminders (email, chat, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

// Writes reminders to the log. Stands in until a real channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        tracing::info!(
            notification_id = %notification.id,
            task_id = %notification.task_id,
            owner_id = %notification.owner_id,
            kind = ?notification.kind,
            text = %notification.text,
            "Reminder delivered"
        );
        Ok(())
    }
}

/// Sends every pending notification scheduled at or before `now`.
/// Failed sends stay pending for the next sweep.
pub async fn deliver_due(
    store: &dyn NotificationStore,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let due = store.find_due(now).await?;
    let mut sent = Vec::with_capacity(due.len());

    for n in &due {
        match notifier.send(n).await {
            Ok(()) => sent.push(n.id),
            Err(e) => {
                tracing::warn!(notification_id = %n.id, error = %e, "Reminder not delivered, will retry");
            }
        }
    }

    store.mark_sent(&sent).await
}

/// Emits one overdue reminder for each late task that does not already have
/// an unsent one.
pub async fn scan_overdue(
    tasks: &dyn TaskStore,
    notifications: &dyn NotificationStore,
    locks: &TaskLocks,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let mut emitted = 0;

    for candidate in tasks.overdue_tasks(now).await? {
        let _guard = locks.acquire(candidate.id).await;

        // completed, rescheduled or deleted while we waited for the lock
        let Some(task) = tasks.get_task(candidate.id).await? else {
            continue;
        };
        let wants_reminder = task.notification.enabled && task.notification.overdue;
        if !task.is_active || !wants_reminder || task.next_due_date.is_none_or(|due| due > now) {
            continue;
        }

        let existing = notifications.list_for_task(task.id).await?;
        if has_pending_kind(&existing, NotificationKind::Overdue) {
            continue;
        }

        let reminder = Notification::pending(
            &task,
            NotificationKind::Overdue,
            now,
            format!("🚨 *{}* is overdue", task.title),
            now,
        );
        notifications.insert_batch(vec![reminder]).await?;
        emitted += 1;
    }

    Ok(emitted)
}

pub async fn purge_sent(
    store: &dyn NotificationStore,
    now: DateTime<Utc>,
    retention: StdDuration,
) -> Result<usize, StoreError> {
    let cutoff = Duration::from_std(retention)
        .ok()
        .and_then(|r| now.checked_sub_signed(r))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    store.delete_sent_before(cutoff).await
}

fn log_sweep(job: &'static str, result: Result<usize, StoreError>) {
    match result {
        Ok(0) => tracing::trace!(job, "Sweep found nothing to do"),
        Ok(count) => tracing::info!(job, count, "Sweep finished"),
        Err(e) => tracing::error!(job, error = %e, "Sweep failed"),
    }
}

/// Starts the three sweep loops. The handles run until the runtime shuts down.
pub fn spawn_sweeps(
    state: &AppState,
    cfg: &SchedulerConfig,
    notifier: Arc<dyn Notifier>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let s = state.clone();
    let every = StdDuration::from_secs(cfg.due_frequency_secs.max(1));
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let now = s.clock.now();
            log_sweep("delivery", deliver_due(s.notifications.as_ref(), notifier.as_ref(), now).await);
        }
    }));

    let s = state.clone();
    let every = StdDuration::from_secs(cfg.overdue_frequency_secs.max(1));
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let now = s.clock.now();
            let result = scan_overdue(s.tasks.as_ref(), s.notifications.as_ref(), &s.locks, now).await;
            log_sweep("overdue", result);
        }
    }));

    let s = state.clone();
    let every = StdDuration::from_secs(cfg.cleanup_frequency_secs.max(1));
    let retention = StdDuration::from_secs(cfg.retention_secs);
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let now = s.clock.now();
            log_sweep("housekeeping", purge_sent(s.notifications.as_ref(), now, retention).await);
        }
    }));

    handles
}
