// --------------------------------------------------
// Persistence for tasks, history and notifications.
//
// The collaborators the engines talk to are the two traits below.
// JsonStore implements both on top of a single JSON document
// (data/db.json by default), rewritten atomically after each mutation.
// --------------------------------------------------

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Db, Notification, NotificationKind, Task, TaskHistory};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: Task) -> Result<(), StoreError>;
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError>;
    async fn list_tasks(&self, owner_id: Uuid) -> Result<Vec<Task>, StoreError>;
    async fn update_task(&self, task: Task) -> Result<(), StoreError>;
    /// Stores the advanced task and appends its history row in one step.
    async fn complete_task(&self, task: Task, entry: TaskHistory) -> Result<(), StoreError>;
    /// Removes the task along with its history and notifications.
    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn history(&self, task_id: Uuid) -> Result<Vec<TaskHistory>, StoreError>;
    /// Active tasks past due at `now` that asked for an overdue reminder.
    async fn overdue_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn delete_pending_for_task(&self, task_id: Uuid) -> Result<usize, StoreError>;
    async fn insert_batch(&self, batch: Vec<Notification>) -> Result<(), StoreError>;
    /// Deletes the task's pending rows and inserts `batch` as one atomic step.
    async fn replace_pending_for_task(&self, task_id: Uuid, batch: Vec<Notification>) -> Result<(), StoreError>;
    async fn mark_sent(&self, ids: &[Uuid]) -> Result<usize, StoreError>;
    /// Unsent notifications scheduled at or before `before`.
    async fn find_due(&self, before: DateTime<Utc>) -> Result<Vec<Notification>, StoreError>;
    /// Sent notifications scheduled before `cutoff`.
    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Notification>, StoreError>;
}

pub const DB_PATH: &str = "data/db.json";

pub fn load_db(path: &Path) -> Result<Db, StoreError> {
    let text = std::fs::read_to_string(path)?;
    let db: Db = serde_json::from_str(&text)?;
    Ok(db)
}

pub async fn save_db(path: &Path, db: &Db) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(db)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(&tmp_path, text).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// JSON document store. Every mutation runs against a draft copy that only
/// replaces the live state once it has been written to disk, so a failed or
/// cancelled write leaves the previous state untouched.
#[derive(Debug)]
pub struct JsonStore {
    path: Option<PathBuf>,
    db: Mutex<Db>,
}

impl JsonStore {
    /// Store that never touches the disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            db: Mutex::new(Db::default()),
        }
    }

    /// Opens the document at `path`, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let db = if path.exists() { load_db(&path)? } else { Db::default() };
        tracing::info!(
            path = %path.display(),
            tasks = db.tasks.len(),
            notifications = db.notifications.len(),
            "Opened task store"
        );
        Ok(Self {
            path: Some(path),
            db: Mutex::new(db),
        })
    }

    async fn read<T>(&self, f: impl FnOnce(&Db) -> T) -> T {
        let db = self.db.lock().await;
        f(&db)
    }

    async fn transact<T>(&self, f: impl FnOnce(&mut Db) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut db = self.db.lock().await;
        let mut draft = db.clone();
        let out = f(&mut draft)?;
        if let Some(path) = &self.path {
            save_db(path, &draft).await?;
        }
        *db = draft;
        Ok(out)
    }
}

fn find_task_mut(db: &mut Db, id: Uuid) -> Result<&mut Task, StoreError> {
    db.tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or(StoreError::TaskNotFound(id))
}

fn remove_pending(db: &mut Db, task_id: Uuid) -> usize {
    let before = db.notifications.len();
    db.notifications
        .retain(|n| !(n.task_id == task_id && n.is_pending()));
    before - db.notifications.len()
}

#[async_trait]
impl TaskStore for JsonStore {
    async fn insert_task(&self, task: Task) -> Result<(), StoreError> {
        self.transact(|db| {
            db.tasks.push(task);
            Ok(())
        })
        .await
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.read(|db| db.tasks.iter().find(|t| t.id == id).cloned()).await)
    }

    async fn list_tasks(&self, owner_id: Uuid) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .read(|db| {
                db.tasks
                    .iter()
                    .filter(|t| t.owner_id == owner_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn update_task(&self, task: Task) -> Result<(), StoreError> {
        self.transact(|db| {
            let slot = find_task_mut(db, task.id)?;
            *slot = task;
            Ok(())
        })
        .await
    }

    async fn complete_task(&self, task: Task, entry: TaskHistory) -> Result<(), StoreError> {
        self.transact(|db| {
            let slot = find_task_mut(db, task.id)?;
            *slot = task;
            db.history.push(entry);
            Ok(())
        })
        .await
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError> {
        self.transact(|db| {
            let before = db.tasks.len();
            db.tasks.retain(|t| t.id != id);
            if db.tasks.len() == before {
                return Ok(false);
            }
            db.history.retain(|h| h.task_id != id);
            db.notifications.retain(|n| n.task_id != id);
            Ok(true)
        })
        .await
    }

    async fn history(&self, task_id: Uuid) -> Result<Vec<TaskHistory>, StoreError> {
        Ok(self
            .read(|db| {
                db.history
                    .iter()
                    .filter(|h| h.task_id == task_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn overdue_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .read(|db| {
                db.tasks
                    .iter()
                    .filter(|t| t.is_active)
                    .filter(|t| t.notification.enabled && t.notification.overdue)
                    .filter(|t| t.next_due_date.is_some_and(|due| due <= now))
                    .cloned()
                    .collect()
            })
            .await)
    }
}

#[async_trait]
impl NotificationStore for JsonStore {
    async fn delete_pending_for_task(&self, task_id: Uuid) -> Result<usize, StoreError> {
        self.transact(|db| Ok(remove_pending(db, task_id))).await
    }

    async fn insert_batch(&self, batch: Vec<Notification>) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.transact(|db| {
            db.notifications.extend(batch);
            Ok(())
        })
        .await
    }

    async fn replace_pending_for_task(&self, task_id: Uuid, batch: Vec<Notification>) -> Result<(), StoreError> {
        self.transact(|db| {
            remove_pending(db, task_id);
            db.notifications.extend(batch);
            Ok(())
        })
        .await
    }

    async fn mark_sent(&self, ids: &[Uuid]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.transact(|db| {
            let mut marked = 0;
            for n in db.notifications.iter_mut().filter(|n| ids.contains(&n.id)) {
                n.is_sent = true;
                marked += 1;
            }
            Ok(marked)
        })
        .await
    }

    async fn find_due(&self, before: DateTime<Utc>) -> Result<Vec<Notification>, StoreError> {
        Ok(self
            .read(|db| {
                db.notifications
                    .iter()
                    .filter(|n| n.is_pending() && n.scheduled_for <= before)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.transact(|db| {
            let before = db.notifications.len();
            db.notifications
                .retain(|n| !(n.is_sent && n.scheduled_for < cutoff));
            Ok(before - db.notifications.len())
        })
        .await
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        Ok(self
            .read(|db| {
                db.notifications
                    .iter()
                    .filter(|n| n.task_id == task_id)
                    .cloned()
                    .collect()
            })
            .await)
    }
}

// Convenience used by the overdue scan
pub fn has_pending_kind(notifications: &[Notification], kind: NotificationKind) -> bool {
    notifications.iter().any(|n| n.is_pending() && n.kind == kind)
}
