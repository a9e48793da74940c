//! SQLite-backed task store implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    ConversionParams, CreateTaskRequest, Task, TaskError, TaskFilter, TaskKind, TaskStatus,
    TaskStore, TaskUpdate,
};

const TASK_COLUMNS: &str = "id, kind, status, progress, input_path, output_path, params, \
     error_message, title, original_url, input_size, output_size, duration_secs, \
     created_at, updated_at, claimed_at";

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn db_err(e: impl std::fmt::Display) -> TaskError {
    TaskError::Database(e.to_string())
}

impl SqliteTaskStore {
    /// Open (or create) a database file and its tables.
    pub fn new(path: &Path) -> Result<Self, TaskError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, TaskError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TaskError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                input_path TEXT NOT NULL,
                output_path TEXT,
                params TEXT NOT NULL,
                error_message TEXT,
                title TEXT,
                original_url TEXT,
                input_size INTEGER,
                output_size INTEGER,
                duration_secs REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                claimed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status_created ON tasks(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_updated_at ON tasks(updated_at);
            "#,
        )
        .map_err(db_err)
    }

    fn build_where_clause(filter: &TaskFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(kind) = filter.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let kind: String = row.get(1)?;
        let status: String = row.get(2)?;
        let input_path: String = row.get(4)?;
        let output_path: Option<String> = row.get(5)?;
        let params_json: String = row.get(6)?;
        let input_size: Option<i64> = row.get(10)?;
        let output_size: Option<i64> = row.get(11)?;
        let created_at: String = row.get(13)?;
        let updated_at: String = row.get(14)?;
        let claimed_at: Option<String> = row.get(15)?;

        let to_conversion_err = |idx: usize, msg: String| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                msg.into(),
            )
        };

        Ok(Task {
            id: row.get(0)?,
            kind: kind.parse::<TaskKind>().map_err(|e| to_conversion_err(1, e))?,
            status: status
                .parse::<TaskStatus>()
                .map_err(|e| to_conversion_err(2, e))?,
            progress: row.get(3)?,
            input_path: PathBuf::from(input_path),
            output_path: output_path.map(PathBuf::from),
            params: serde_json::from_str::<ConversionParams>(&params_json).unwrap_or_default(),
            error_message: row.get(7)?,
            title: row.get(8)?,
            original_url: row.get(9)?,
            input_size_bytes: input_size.map(|v| v as u64),
            output_size_bytes: output_size.map(|v| v as u64),
            duration_secs: row.get(12)?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            claimed_at: claimed_at.as_deref().map(parse_ts),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Task>, TaskError> {
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS),
            params![id],
            Self::row_to_task,
        )
        .optional()
        .map_err(db_err)
    }

    fn check_transition(current: &Task, update: &TaskUpdate) -> Result<(), TaskError> {
        let Some(next) = update.status else {
            return Ok(());
        };
        let allowed = if next == current.status {
            !current.status.is_terminal()
        } else {
            current.status.can_transition_to(next, current.ever_claimed())
        };
        if allowed {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                task_id: current.id.clone(),
                from: current.status,
                to: next,
            })
        }
    }

    /// Writes the non-empty fields of `update`, guarded on the current status.
    /// Returns the number of rows changed.
    fn write_update(
        conn: &Connection,
        current: &Task,
        update: &TaskUpdate,
    ) -> Result<usize, TaskError> {
        let mut sets = vec!["updated_at = ?"];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(format_ts(&Utc::now()))];

        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Box::new(status.as_str()));
        }
        if let Some(progress) = update.progress {
            let progress = if progress.is_nan() {
                0.0
            } else {
                progress.clamp(0.0, 100.0)
            };
            sets.push("progress = ?");
            values.push(Box::new(progress));
        }
        if let Some(ref path) = update.output_path {
            sets.push("output_path = ?");
            values.push(Box::new(path.to_string_lossy().into_owned()));
        }
        if let Some(size) = update.output_size_bytes {
            sets.push("output_size = ?");
            values.push(Box::new(size as i64));
        }
        if let Some(size) = update.input_size_bytes {
            sets.push("input_size = ?");
            values.push(Box::new(size as i64));
        }
        if let Some(duration) = update.duration_secs {
            sets.push("duration_secs = ?");
            values.push(Box::new(duration));
        }
        if let Some(ref message) = update.error_message {
            sets.push("error_message = ?");
            values.push(Box::new(message.clone()));
        }

        let sql = format!(
            "UPDATE tasks SET {} WHERE id = ? AND status = ?",
            sets.join(", ")
        );
        values.push(Box::new(current.id.clone()));
        values.push(Box::new(current.status.as_str()));

        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();
        conn.execute(&sql, param_refs.as_slice()).map_err(db_err)
    }
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, request: CreateTaskRequest) -> Result<Task, TaskError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let params_json = serde_json::to_string(&request.params).map_err(db_err)?;

        conn.execute(
            "INSERT INTO tasks (id, kind, status, progress, input_path, params, title, original_url, input_size, created_at, updated_at) VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.kind.as_str(),
                TaskStatus::Queued.as_str(),
                request.input_path.to_string_lossy(),
                params_json,
                request.title,
                request.original_url,
                request.input_size_bytes.map(|v| v as i64),
                format_ts(&now),
                format_ts(&now),
            ],
        )
        .map_err(db_err)?;

        Ok(Task {
            id,
            kind: request.kind,
            status: TaskStatus::Queued,
            progress: 0.0,
            input_path: request.input_path,
            output_path: None,
            params: request.params,
            error_message: None,
            title: request.title,
            original_url: request.original_url,
            input_size_bytes: request.input_size_bytes,
            output_size_bytes: None,
            duration_secs: None,
            created_at: now,
            updated_at: now,
            claimed_at: None,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch(&conn, id)
    }

    fn find_queued(&self, limit: usize) -> Result<Vec<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks WHERE status = ? ORDER BY created_at ASC, rowid ASC LIMIT ?",
                TASK_COLUMNS
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(
                params![TaskStatus::Queued.as_str(), limit as i64],
                Self::row_to_task,
            )
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM tasks {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            TASK_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_task)
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn count(&self, filter: &TaskFilter) -> Result<i64, TaskError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM tasks {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn claim(&self, id: &str) -> Result<bool, TaskError> {
        let conn = self.conn.lock().unwrap();
        let now = format_ts(&Utc::now());

        let changed = conn
            .execute(
                "UPDATE tasks SET status = ?, claimed_at = ?, updated_at = ? WHERE id = ? AND status = ?",
                params![
                    TaskStatus::Processing.as_str(),
                    now,
                    now,
                    id,
                    TaskStatus::Queued.as_str(),
                ],
            )
            .map_err(db_err)?;

        Ok(changed == 1)
    }

    fn update(&self, id: &str, update: TaskUpdate) -> Result<Task, TaskError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::fetch(&conn, id)?.ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        Self::check_transition(&current, &update)?;
        Self::write_update(&conn, &current, &update)?;

        Self::fetch(&conn, id)?.ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    fn update_if(
        &self,
        id: &str,
        expected: TaskStatus,
        update: TaskUpdate,
    ) -> Result<bool, TaskError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::fetch(&conn, id)?.ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if current.status != expected {
            return Ok(false);
        }
        Self::check_transition(&current, &update)?;

        Ok(Self::write_update(&conn, &current, &update)? == 1)
    }

    fn delete(&self, id: &str) -> Result<Task, TaskError> {
        let conn = self.conn.lock().unwrap();

        let task = Self::fetch(&conn, id)?.ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        conn.execute("DELETE FROM tasks WHERE id = ?", params![id])
            .map_err(db_err)?;

        Ok(task)
    }
}
