use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::{ActionTask, TaskStatus, TaskUsefulness};
use crate::portrait::{TaskStats, UserPortrait};

/// Durable storage for the portrait singleton, the pending-task list, and
/// the daily API quota counter.
///
/// Loads never fail outward: any storage error degrades to the empty
/// sentinel (portrait) or an empty list, with a warning logged. Saves
/// return a `Result` so callers can retry.
pub trait PortraitStore: Send + Sync {
    fn load_portrait(&self) -> UserPortrait;
    fn save_portrait(&self, portrait: &UserPortrait) -> Result<()>;
    fn clear_portrait(&self) -> Result<()>;

    /// Pending tasks ordered by creation time, oldest first.
    fn load_pending_tasks(&self) -> Vec<ActionTask>;
    /// Full replace of the stored set.
    fn save_pending_tasks(&self, tasks: &[ActionTask]) -> Result<()>;
    fn clear_pending_tasks(&self) -> Result<()>;

    /// Calls consumed on `day` (a `YYYY-MM-DD` key). 0 on any error.
    fn quota_used(&self, day: &str) -> u32;
    fn bump_quota(&self, day: &str, amount: u32) -> Result<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create data dir {:?}", parent))?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS portrait (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                summary TEXT NOT NULL,
                focus_areas TEXT NOT NULL,
                helpful_strategies TEXT NOT NULL,
                preference_weights TEXT NOT NULL,
                total_suggested INTEGER NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                usefulness_high INTEGER NOT NULL DEFAULT 0,
                usefulness_medium INTEGER NOT NULL DEFAULT 0,
                usefulness_low INTEGER NOT NULL DEFAULT 0,
                last_updated TEXT NOT NULL
            )"#,
            [],
        )?;
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS pending_tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                details TEXT,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL,
                usefulness TEXT NOT NULL
            )"#,
            [],
        )?;
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS api_quota (
                day TEXT PRIMARY KEY,
                used INTEGER NOT NULL DEFAULT 0
            )"#,
            [],
        )?;
        Ok(())
    }

    fn load_portrait_inner(&self) -> Result<Option<UserPortrait>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT summary, focus_areas, helpful_strategies, preference_weights,
                        total_suggested, completed, skipped,
                        usefulness_high, usefulness_medium, usefulness_low, last_updated
                 FROM portrait WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, u32>(7)?,
                        row.get::<_, u32>(8)?,
                        row.get::<_, u32>(9)?,
                        row.get::<_, String>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            summary,
            focus_json,
            strategies_json,
            weights_json,
            total_suggested,
            completed,
            skipped,
            usefulness_high,
            usefulness_medium,
            usefulness_low,
            last_updated,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(UserPortrait {
            summary,
            focus_areas: serde_json::from_str(&focus_json).unwrap_or_default(),
            helpful_strategies: serde_json::from_str(&strategies_json).unwrap_or_default(),
            preference_weights: serde_json::from_str(&weights_json).unwrap_or_default(),
            task_stats: TaskStats {
                total_suggested,
                completed,
                skipped,
                usefulness_high,
                usefulness_medium,
                usefulness_low,
            },
            last_updated: last_updated
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    fn load_pending_tasks_inner(&self) -> Result<Vec<ActionTask>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, details, created_at, status, usefulness
             FROM pending_tasks
             ORDER BY created_at ASC",
        )?;

        let tasks = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let created_at: String = row.get(3)?;
                let status: String = row.get(4)?;
                let usefulness: String = row.get(5)?;
                Ok(ActionTask {
                    id: id.parse::<Uuid>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    title: row.get(1)?,
                    details: row.get(2)?,
                    created_at: created_at.parse().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    status: TaskStatus::from_db(&status),
                    usefulness: TaskUsefulness::from_db(&usefulness),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tasks)
    }
}

impl PortraitStore for SqliteStore {
    fn load_portrait(&self) -> UserPortrait {
        match self.load_portrait_inner() {
            Ok(Some(portrait)) => portrait,
            Ok(None) => UserPortrait::empty(),
            Err(error) => {
                tracing::warn!("Failed to load portrait, using empty sentinel: {}", error);
                UserPortrait::empty()
            }
        }
    }

    fn save_portrait(&self, portrait: &UserPortrait) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO portrait
                (id, summary, focus_areas, helpful_strategies, preference_weights,
                 total_suggested, completed, skipped,
                 usefulness_high, usefulness_medium, usefulness_low, last_updated)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                portrait.summary,
                serde_json::to_string(&portrait.focus_areas)?,
                serde_json::to_string(&portrait.helpful_strategies)?,
                serde_json::to_string(&portrait.preference_weights)?,
                portrait.task_stats.total_suggested,
                portrait.task_stats.completed,
                portrait.task_stats.skipped,
                portrait.task_stats.usefulness_high,
                portrait.task_stats.usefulness_medium,
                portrait.task_stats.usefulness_low,
                portrait.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn clear_portrait(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM portrait WHERE id = 1", [])?;
        Ok(())
    }

    fn load_pending_tasks(&self) -> Vec<ActionTask> {
        match self.load_pending_tasks_inner() {
            Ok(tasks) => tasks,
            Err(error) => {
                tracing::warn!("Failed to load pending tasks: {}", error);
                Vec::new()
            }
        }
    }

    fn save_pending_tasks(&self, tasks: &[ActionTask]) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM pending_tasks", [])?;
        for task in tasks {
            tx.execute(
                "INSERT INTO pending_tasks (id, title, details, created_at, status, usefulness)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task.id.to_string(),
                    task.title,
                    task.details,
                    task.created_at.to_rfc3339(),
                    task.status.as_db_str(),
                    task.usefulness.as_db_str(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn clear_pending_tasks(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM pending_tasks", [])?;
        Ok(())
    }

    fn quota_used(&self, day: &str) -> u32 {
        let result: Result<Option<u32>> = (|| {
            let conn = self.lock_conn()?;
            let used = conn
                .query_row(
                    "SELECT used FROM api_quota WHERE day = ?1",
                    [day],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(used)
        })();

        match result {
            Ok(used) => used.unwrap_or(0),
            Err(error) => {
                tracing::warn!("Failed to read quota counter: {}", error);
                0
            }
        }
    }

    fn bump_quota(&self, day: &str, amount: u32) -> Result<()> {
        let conn = self.lock_conn()?;
        // Stale day rows are useless once the day rolls over.
        conn.execute("DELETE FROM api_quota WHERE day != ?1", [day])?;
        conn.execute(
            "INSERT INTO api_quota (day, used) VALUES (?1, ?2)
             ON CONFLICT(day) DO UPDATE SET used = used + ?2",
            params![day, amount],
        )?;
        Ok(())
    }
}
