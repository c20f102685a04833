//! SQLite-backed queue of image tasks.
//!
//! Tasks go READY → RUNNING → SUCCEEDED | FAILED. Finished tasks are kept
//! for inspection.

use crate::catalog_store::ImageOwner;
use crate::sqlite_column;
use crate::sqlite_persistence::{self, Column, SqlType, Table, VersionedSchema};
use anyhow::{anyhow, bail, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

const IMAGE_TASKS_TABLE_V0: Table = Table {
    name: "image_tasks",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("task", &SqlType::Text, non_null = true),
        sqlite_column!("entity_id", &SqlType::Integer),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("enqueued_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("finished_at", &SqlType::Integer),
        sqlite_column!("error_message", &SqlType::Text),
    ],
    indices: &[("idx_image_tasks_status", "status, id")],
    unique_constraints: &[],
};

pub const IMAGE_TASK_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[IMAGE_TASKS_TABLE_V0],
    migration: None,
}];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ImageTaskKind {
    StorePartImage,
    StoreSetImage,
}

impl ImageTaskKind {
    pub fn for_owner(owner: ImageOwner) -> Self {
        match owner {
            ImageOwner::Part => ImageTaskKind::StorePartImage,
            ImageOwner::Set => ImageTaskKind::StoreSetImage,
        }
    }

    pub fn owner(&self) -> ImageOwner {
        match self {
            ImageTaskKind::StorePartImage => ImageOwner::Part,
            ImageTaskKind::StoreSetImage => ImageOwner::Set,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageTaskKind::StorePartImage => "store_part_image",
            ImageTaskKind::StoreSetImage => "store_set_image",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "store_part_image" => Some(ImageTaskKind::StorePartImage),
            "store_set_image" => Some(ImageTaskKind::StoreSetImage),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TaskStatus {
    Ready,
    Running,
    Succeeded, // terminal
    Failed,    // terminal
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ready => "READY",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(TaskStatus::Ready),
            "RUNNING" => Some(TaskStatus::Running),
            "SUCCEEDED" => Some(TaskStatus::Succeeded),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageTask {
    pub id: i64,
    pub kind: ImageTaskKind,
    /// `None` means "newest entity still missing its image".
    pub entity_id: Option<i64>,
    pub status: TaskStatus,
    pub enqueued_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub error_message: Option<String>,
}

pub trait ImageTaskStore: Send + Sync {
    /// Adds a READY task. An identical task that is still READY is reused.
    fn enqueue(&self, kind: ImageTaskKind, entity_id: Option<i64>) -> Result<i64>;

    /// Atomically moves the oldest READY task to RUNNING and returns it.
    fn claim_next(&self) -> Result<Option<ImageTask>>;

    fn mark_succeeded(&self, id: i64) -> Result<()>;

    fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    fn get_task(&self, id: i64) -> Result<Option<ImageTask>>;

    fn count_by_status(&self, status: TaskStatus) -> Result<usize>;

    /// Puts tasks left RUNNING by an interrupted worker back to READY.
    fn requeue_running(&self) -> Result<usize>;
}

#[derive(Clone)]
pub struct SqliteImageTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteImageTaskStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn =
            sqlite_persistence::open_database(db_path, IMAGE_TASK_VERSIONED_SCHEMAS, "image task")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = sqlite_persistence::open_in_memory(IMAGE_TASK_VERSIONED_SCHEMAS, "image task")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Image task db connection mutex poisoned"))
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<ImageTask> {
        let kind: String = row.get(1)?;
        let status: String = row.get(3)?;
        Ok(ImageTask {
            id: row.get(0)?,
            kind: ImageTaskKind::from_db_str(&kind).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(1, kind.clone(), rusqlite::types::Type::Text)
            })?,
            entity_id: row.get(2)?,
            status: TaskStatus::from_db_str(&status).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(3, status.clone(), rusqlite::types::Type::Text)
            })?,
            enqueued_at: row.get(4)?,
            started_at: row.get(5)?,
            finished_at: row.get(6)?,
            error_message: row.get(7)?,
        })
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    fn finish(&self, id: i64, status: TaskStatus, error: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE image_tasks SET status = ?1, finished_at = ?2, error_message = ?3 \
             WHERE id = ?4 AND status = ?5",
            params![
                status.as_str(),
                Self::now(),
                error,
                id,
                TaskStatus::Running.as_str()
            ],
        )?;
        if updated == 0 {
            bail!("Image task {} is not running", id);
        }
        Ok(())
    }
}

const TASK_COLUMNS: &str =
    "id, task, entity_id, status, enqueued_at, started_at, finished_at, error_message";

impl ImageTaskStore for SqliteImageTaskStore {
    fn enqueue(&self, kind: ImageTaskKind, entity_id: Option<i64>) -> Result<i64> {
        let conn = self.conn()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM image_tasks WHERE task = ?1 AND entity_id IS ?2 AND status = ?3",
                params![kind.as_str(), entity_id, TaskStatus::Ready.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute(
            "INSERT INTO image_tasks (task, entity_id, status, enqueued_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                kind.as_str(),
                entity_id,
                TaskStatus::Ready.as_str(),
                Self::now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn claim_next(&self) -> Result<Option<ImageTask>> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE image_tasks SET status = ?1, started_at = ?2 \
             WHERE id = (SELECT id FROM image_tasks WHERE status = ?3 ORDER BY id LIMIT 1) \
             RETURNING {}",
            TASK_COLUMNS
        );
        Ok(conn
            .query_row(
                &sql,
                params![
                    TaskStatus::Running.as_str(),
                    Self::now(),
                    TaskStatus::Ready.as_str()
                ],
                Self::row_to_task,
            )
            .optional()?)
    }

    fn mark_succeeded(&self, id: i64) -> Result<()> {
        self.finish(id, TaskStatus::Succeeded, None)
    }

    fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        self.finish(id, TaskStatus::Failed, Some(error))
    }

    fn get_task(&self, id: i64) -> Result<Option<ImageTask>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM image_tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                Self::row_to_task,
            )
            .optional()?)
    }

    fn count_by_status(&self, status: TaskStatus) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM image_tasks WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    fn requeue_running(&self) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE image_tasks SET status = ?1, started_at = NULL WHERE status = ?2",
            params![TaskStatus::Ready.as_str(), TaskStatus::Running.as_str()],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueued_task_is_ready() {
        let store = SqliteImageTaskStore::in_memory().unwrap();
        let id = store.enqueue(ImageTaskKind::StoreSetImage, Some(7)).unwrap();

        let task = store.get_task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
        assert_eq!(task.kind, ImageTaskKind::StoreSetImage);
        assert_eq!(task.entity_id, Some(7));
        assert!(task.started_at.is_none());
    }

    #[test]
    fn duplicate_ready_task_is_reused() {
        let store = SqliteImageTaskStore::in_memory().unwrap();
        let first = store.enqueue(ImageTaskKind::StorePartImage, Some(3)).unwrap();
        let second = store.enqueue(ImageTaskKind::StorePartImage, Some(3)).unwrap();
        let other = store.enqueue(ImageTaskKind::StorePartImage, Some(4)).unwrap();
        let candidate = store.enqueue(ImageTaskKind::StorePartImage, None).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_ne!(first, candidate);
        assert_eq!(store.count_by_status(TaskStatus::Ready).unwrap(), 3);
    }

    #[test]
    fn claims_in_fifo_order() {
        let store = SqliteImageTaskStore::in_memory().unwrap();
        let first = store.enqueue(ImageTaskKind::StorePartImage, Some(1)).unwrap();
        let second = store.enqueue(ImageTaskKind::StoreSetImage, Some(1)).unwrap();

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(claimed.started_at.is_some());

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, second);
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn finishing_records_status() {
        let store = SqliteImageTaskStore::in_memory().unwrap();
        let ok = store.enqueue(ImageTaskKind::StorePartImage, Some(1)).unwrap();
        let ko = store.enqueue(ImageTaskKind::StorePartImage, Some(2)).unwrap();
        store.claim_next().unwrap();
        store.claim_next().unwrap();

        store.mark_succeeded(ok).unwrap();
        store.mark_failed(ko, "Part 2 not found").unwrap();

        let ok = store.get_task(ok).unwrap().unwrap();
        assert_eq!(ok.status, TaskStatus::Succeeded);
        assert!(ok.finished_at.is_some());
        let ko = store.get_task(ko).unwrap().unwrap();
        assert_eq!(ko.status, TaskStatus::Failed);
        assert_eq!(ko.error_message.as_deref(), Some("Part 2 not found"));

        // already finished
        assert!(store.mark_succeeded(ko.id).is_err());
    }

    #[test]
    fn requeue_running_resets_interrupted_tasks() {
        let store = SqliteImageTaskStore::in_memory().unwrap();
        let id = store.enqueue(ImageTaskKind::StoreSetImage, Some(1)).unwrap();
        store.claim_next().unwrap();

        assert_eq!(store.requeue_running().unwrap(), 1);
        let task = store.get_task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
        assert!(task.started_at.is_none());
    }
}
