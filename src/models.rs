use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recurrence::RecurrenceRule;

// Which reminders a task wants. `overdue` is read by the overdue scan,
// not by the planner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPrefs {
    #[serde(default)]
    pub enabled: bool, // master switch
    #[serde(default)]
    pub due_date: bool,
    #[serde(default)]
    pub pre_due: bool,
    #[serde(default)]
    pub overdue: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub owner_id: Uuid,
    pub frequency: RecurrenceRule,
    pub next_due_date: Option<DateTime<Utc>>,
    pub is_rolling: bool,
    pub is_active: bool,
    pub notification: NotificationPrefs,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        title: String,
        owner_id: Uuid,
        frequency: RecurrenceRule,
        next_due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            owner_id,
            frequency,
            next_due_date,
            is_rolling: false,
            is_active: true,
            notification: NotificationPrefs::default(),
            created_at: now,
            updated_at: None,
        }
    }

    /// Move the task to its next occurrence. `None` means the task has run
    /// its course and is deactivated.
    pub fn advance(&mut self, next: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        self.next_due_date = next;
        self.is_active = next.is_some();
        self.updated_at = Some(now);
    }
}

// One row per completion or skip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistory {
    pub id: Uuid,
    pub task_id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>, // None for a skip
}

impl TaskHistory {
    pub fn new(
        task_id: Uuid,
        due_date: Option<DateTime<Utc>>,
        completed_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            due_date,
            completed_date,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DueDate,
    PreDue,
    Overdue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub task_id: Uuid,
    pub owner_id: Uuid,
    pub kind: NotificationKind,
    pub scheduled_for: DateTime<Utc>,
    pub text: String,
    pub is_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn pending(
        task: &Task,
        kind: NotificationKind,
        scheduled_for: DateTime<Utc>,
        text: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            owner_id: task.owner_id,
            kind,
            scheduled_for,
            text,
            is_sent: false,
            created_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.is_sent
    }
}

// Whole persisted document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Db {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub history: Vec<TaskHistory>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}
