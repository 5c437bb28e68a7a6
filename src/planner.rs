/*
Notification planning.
Derives a task's pending reminders from its due date and preferences and
swaps them in for whatever was pending before.
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Utc};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{Notification, NotificationKind, Task};
use crate::store::{NotificationStore, StoreError, TaskStore};

// How far ahead of the due time the pre-due reminder fires
pub const PRE_DUE_LEAD_HOURS: i64 = 3;

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Planning timed out after {0:?}")]
    TimedOut(StdDuration),
}

// Per-task mutual exclusion. Entries are created on demand and dropped again
// once nobody holds or waits for them.
#[derive(Debug, Clone, Default)]
pub struct TaskLocks {
    inner: Arc<parking_lot::Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TaskLocks {
    pub async fn acquire(&self, task_id: Uuid) -> TaskGuard {
        let slot = {
            let mut map = self.inner.lock();
            Arc::clone(map.entry(task_id).or_default())
        };
        let guard = slot.lock_owned().await;
        TaskGuard {
            task_id,
            guard: Some(guard),
            locks: self.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[derive(Debug)]
pub struct TaskGuard {
    task_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: TaskLocks,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock();
        if map
            .get(&self.task_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            map.remove(&self.task_id);
        }
    }
}

/// "January 2nd"
pub fn format_due_day(due: DateTime<Utc>) -> String {
    let day = due.day();
    let suffix = match (day % 10, day % 100) {
        (1, n) if n != 11 => "st",
        (2, n) if n != 12 => "nd",
        (3, n) if n != 13 => "rd",
        _ => "th",
    };
    format!("{} {day}{suffix}", due.format("%B"))
}

/// The reminders `task` should have right now. Empty when notifications are
/// switched off or the task has no due date.
pub fn build_notifications(task: &Task, now: DateTime<Utc>) -> Vec<Notification> {
    let prefs = task.notification;
    let Some(due) = task.next_due_date else {
        return Vec::new();
    };
    if !prefs.enabled {
        return Vec::new();
    }

    let mut batch = Vec::new();
    if prefs.due_date {
        batch.push(Notification::pending(
            task,
            NotificationKind::DueDate,
            due,
            format!("📅 *{}* is due", task.title),
            now,
        ));
    }
    if prefs.pre_due {
        batch.push(Notification::pending(
            task,
            NotificationKind::PreDue,
            due - Duration::hours(PRE_DUE_LEAD_HOURS),
            format!("📢 *{}* is coming up on {}", task.title, format_due_day(due)),
            now,
        ));
    }
    batch
}

pub struct NotificationPlanner {
    tasks: Arc<dyn TaskStore>,
    notifications: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    locks: TaskLocks,
}

impl NotificationPlanner {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        notifications: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        locks: TaskLocks,
    ) -> Self {
        Self {
            tasks,
            notifications,
            clock,
            locks,
        }
    }

    /// Replaces the pending notifications of `task`. Returns how many were planned.
    pub async fn plan(&self, task: &Task) -> Result<usize, PlanningError> {
        let _guard = self.locks.acquire(task.id).await;
        self.plan_locked(task).await
    }

    /// Like [`plan`](Self::plan), but plans against the stored version of the
    /// task read under the task's lock, so the newest edit always wins.
    pub async fn replan(&self, task_id: Uuid) -> Result<usize, PlanningError> {
        let _guard = self.locks.acquire(task_id).await;
        match self.tasks.get_task(task_id).await? {
            Some(task) => self.plan_locked(&task).await,
            // deleted in the meantime; the cascade already took its rows
            None => Ok(0),
        }
    }

    /// Runs [`replan`](Self::replan) in the background. Failures are logged,
    /// never returned: the task mutation that triggered planning stands.
    pub fn spawn_replan(self: &Arc<Self>, task_id: Uuid, timeout: StdDuration) -> JoinHandle<()> {
        let planner = Arc::clone(self);
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, planner.replan(task_id)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(PlanningError::TimedOut(timeout)),
            };
            match result {
                Ok(planned) => {
                    tracing::debug!(task_id = %task_id, planned, "Notifications planned");
                }
                Err(e) => {
                    tracing::error!(
                        task_id = %task_id,
                        error = %e,
                        "Notification planning failed, reminders are stale until the next plan"
                    );
                }
            }
        })
    }

    async fn plan_locked(&self, task: &Task) -> Result<usize, PlanningError> {
        let batch = build_notifications(task, self.clock.now());

        if batch.is_empty() {
            let removed = self.notifications.delete_pending_for_task(task.id).await?;
            tracing::debug!(task_id = %task.id, removed, "No notifications to plan");
            return Ok(0);
        }

        let planned = batch.len();
        self.notifications
            .replace_pending_for_task(task.id, batch)
            .await?;
        Ok(planned)
    }
}
