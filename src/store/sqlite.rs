//! SQLite-backed run store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{MetisError, Result};
use crate::wes::{self, Log, RunLog, RunRequest, State};

use super::{Completion, RunDocument, RunStore, DEFAULT_USER_ID};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    cursor      INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      TEXT NOT NULL UNIQUE,
    user_id     INTEGER NOT NULL,
    state       TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    run_log     TEXT NOT NULL,
    task_logs   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_state ON runs(state);
"#;

const COLUMNS: &str = "cursor, run_id, user_id, created_at, updated_at, run_log, task_logs";

/// Run store kept in a single SQLite database.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    /// Opens (and creates if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening run store at {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    /// Creates a store that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MetisError::Config(format!("run store lock poisoned: {}", e)))
    }

    /// Loads a run, applies `change` and writes it back in one transaction.
    fn modify<F>(&self, run_id: &str, change: F) -> Result<RunDocument>
    where
        F: FnOnce(&mut RunDocument) -> Result<()>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut doc = select_run(&tx, run_id)?
            .ok_or_else(|| MetisError::NotFound(format!("run '{}'", run_id)))?;
        change(&mut doc)?;
        doc.updated_at = wes::timestamp();

        tx.execute(
            "UPDATE runs SET state = ?1, updated_at = ?2, run_log = ?3, task_logs = ?4 WHERE run_id = ?5",
            params![
                doc.state().as_str(),
                doc.updated_at,
                serde_json::to_string(&doc.run_log)?,
                serde_json::to_string(&doc.task_logs)?,
                run_id,
            ],
        )?;
        tx.commit()?;

        Ok(doc)
    }
}

fn select_run(conn: &Connection, run_id: &str) -> Result<Option<RunDocument>> {
    let sql = format!("SELECT {} FROM runs WHERE run_id = ?1", COLUMNS);
    let raw = conn
        .query_row(&sql, params![run_id], RawRow::from_row)
        .optional()?;
    raw.map(RawRow::into_document).transpose()
}

/// Row as stored, before the JSON columns are decoded.
struct RawRow {
    cursor: i64,
    run_id: String,
    user_id: i64,
    created_at: String,
    updated_at: String,
    run_log: String,
    task_logs: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cursor: row.get("cursor")?,
            run_id: row.get("run_id")?,
            user_id: row.get("user_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            run_log: row.get("run_log")?,
            task_logs: row.get("task_logs")?,
        })
    }

    fn into_document(self) -> Result<RunDocument> {
        Ok(RunDocument {
            cursor: self.cursor,
            run_id: self.run_id,
            user_id: self.user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            run_log: serde_json::from_str(&self.run_log)?,
            task_logs: serde_json::from_str(&self.task_logs)?,
        })
    }
}

/// Fails unless the run may move to `next`.
fn check_transition(doc: &RunDocument, next: State) -> Result<()> {
    let current = doc.state();
    if current.can_transition(next) {
        Ok(())
    } else {
        Err(MetisError::InvalidTransition {
            run_id: doc.run_id.clone(),
            from: current,
            to: next,
        })
    }
}

impl RunStore for SqliteRunStore {
    fn insert_run(&self, run_id: &str, request: &RunRequest) -> Result<RunDocument> {
        let now = wes::timestamp();
        let run_log = RunLog {
            run_id: run_id.to_string(),
            request: Some(request.clone()),
            state: Some(State::Queued),
            run_log: Some(Log {
                name: Some(run_id.to_string()),
                start_time: Some(now.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (run_id, user_id, state, created_at, updated_at, run_log, task_logs)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, '[]')",
            params![
                run_id,
                DEFAULT_USER_ID,
                State::Queued.as_str(),
                now,
                serde_json::to_string(&run_log)?,
            ],
        )?;
        debug!("Inserted run {}", run_id);

        Ok(RunDocument {
            cursor: conn.last_insert_rowid(),
            run_id: run_id.to_string(),
            user_id: DEFAULT_USER_ID,
            created_at: now.clone(),
            updated_at: now,
            run_log,
            task_logs: Vec::new(),
        })
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunDocument>> {
        let conn = self.lock()?;
        select_run(&conn, run_id)
    }

    fn list_runs(&self, limit: usize, after: Option<i64>) -> Result<Vec<RunDocument>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM runs WHERE cursor > ?1 ORDER BY cursor ASC LIMIT ?2",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![after.unwrap_or(0), limit], RawRow::from_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?.into_document()?);
        }
        Ok(runs)
    }

    fn update_state(
        &self,
        run_id: &str,
        state: State,
        start_time: Option<String>,
    ) -> Result<RunDocument> {
        self.modify(run_id, |doc| {
            check_transition(doc, state)?;
            doc.run_log.state = Some(state);
            if state == State::Running {
                if let Some(start) = start_time {
                    doc.run_log.run_log.get_or_insert_with(Log::default).start_time = Some(start);
                }
            }
            info!("Run {} is now {}", doc.run_id, state);
            Ok(())
        })
    }

    fn record_error(
        &self,
        run_id: &str,
        message: &str,
        system_logs: Vec<String>,
    ) -> Result<RunDocument> {
        self.modify(run_id, |doc| {
            check_transition(doc, State::SystemError)?;
            doc.run_log.state = Some(State::SystemError);

            let log = doc.run_log.run_log.get_or_insert_with(Log::default);
            log.stderr = Some(message.to_string());
            log.system_logs = Some(system_logs);
            log.end_time = Some(wes::timestamp());
            info!("Run {} failed: {}", doc.run_id, message);
            Ok(())
        })
    }

    fn record_completion(&self, run_id: &str, completion: Completion) -> Result<RunDocument> {
        self.modify(run_id, |doc| {
            check_transition(doc, completion.state)?;
            doc.run_log.state = Some(completion.state);

            let previous = doc.run_log.run_log.take().unwrap_or_default();
            let mut log = completion.run_log.unwrap_or_default();
            log.name = log.name.or(previous.name);
            log.start_time = log.start_time.or(previous.start_time);
            log.end_time = Some(log.end_time.unwrap_or_else(wes::timestamp));
            doc.run_log.run_log = Some(log);

            doc.run_log.outputs = completion.outputs;
            doc.task_logs = completion.task_logs;
            info!("Run {} finished as {}", doc.run_id, completion.state);
            Ok(())
        })
    }

    fn state_counts(&self) -> Result<BTreeMap<State, i64>> {
        let mut counts: BTreeMap<State, i64> = State::ALL.iter().map(|s| (*s, 0)).collect();

        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM runs GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (name, count) = row?;
            let state = name.parse::<State>().unwrap_or(State::Unknown);
            *counts.entry(state).or_insert(0) += count;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wes::TaskLog;
    use tempfile::tempdir;

    fn request() -> RunRequest {
        RunRequest {
            workflow_url: "https://example.com/main.cwl".to_string(),
            workflow_type: "CWL".to_string(),
            workflow_type_version: "v1.2".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = SqliteRunStore::in_memory().unwrap();
        let doc = store.insert_run("r1", &request()).unwrap();

        assert_eq!(doc.state(), State::Queued);
        assert_eq!(doc.user_id, -1);
        let fetched = store.get_run("r1").unwrap().unwrap();
        assert_eq!(fetched.run_log.request, Some(request()));
        let log = fetched.run_log.run_log.unwrap();
        assert_eq!(log.name.as_deref(), Some("r1"));
        assert!(log.start_time.is_some());

        assert!(store.get_run("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_run_id_rejected() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.insert_run("r1", &request()).unwrap();
        assert!(matches!(
            store.insert_run("r1", &request()),
            Err(MetisError::Database(_))
        ));
    }

    #[test]
    fn test_list_runs_pages_by_cursor() {
        let store = SqliteRunStore::in_memory().unwrap();
        for i in 0..5 {
            store.insert_run(&format!("r{}", i), &request()).unwrap();
        }

        let first = store.list_runs(2, None).unwrap();
        let ids: Vec<_> = first.iter().map(|d| d.run_id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1"]);

        let rest = store.list_runs(10, Some(first[1].cursor)).unwrap();
        let ids: Vec<_> = rest.iter().map(|d| d.run_id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3", "r4"]);
    }

    #[test]
    fn test_update_state_sets_start_time() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.insert_run("r1", &request()).unwrap();
        store.update_state("r1", State::Initializing, None).unwrap();

        let doc = store
            .update_state("r1", State::Running, Some("2025-01-01T00:00:00Z".to_string()))
            .unwrap();
        assert_eq!(doc.state(), State::Running);
        assert_eq!(
            doc.run_log.run_log.unwrap().start_time.as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_illegal_transition() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.insert_run("r1", &request()).unwrap();

        let err = store.update_state("r1", State::Complete, None).unwrap_err();
        assert!(matches!(
            err,
            MetisError::InvalidTransition { from: State::Queued, to: State::Complete, .. }
        ));
        assert_eq!(store.get_run("r1").unwrap().unwrap().state(), State::Queued);
    }

    #[test]
    fn test_unknown_run() {
        let store = SqliteRunStore::in_memory().unwrap();
        assert!(matches!(
            store.update_state("nope", State::Running, None),
            Err(MetisError::NotFound(_))
        ));
    }

    #[test]
    fn test_record_error() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.insert_run("r1", &request()).unwrap();

        let doc = store
            .record_error("r1", "download failed", vec!["download: 3 ms".to_string()])
            .unwrap();
        assert_eq!(doc.state(), State::SystemError);
        let log = doc.run_log.run_log.unwrap();
        assert_eq!(log.stderr.as_deref(), Some("download failed"));
        assert_eq!(log.system_logs, Some(vec!["download: 3 ms".to_string()]));
        assert!(log.end_time.is_some());
    }

    #[test]
    fn test_record_completion() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.insert_run("r1", &request()).unwrap();
        store.update_state("r1", State::Running, None).unwrap();

        let mut outputs = serde_json::Map::new();
        outputs.insert("result".to_string(), serde_json::json!("s3://metis/workflows/r1/out.txt"));
        let completion = Completion {
            state: State::Complete,
            run_log: Some(Log {
                stdout: Some("done".to_string()),
                exit_code: Some(0),
                ..Default::default()
            }),
            task_logs: vec![TaskLog {
                id: "task-1".to_string(),
                name: Some("align".to_string()),
                ..Default::default()
            }],
            outputs: Some(outputs.clone()),
        };

        let doc = store.record_completion("r1", completion).unwrap();
        assert_eq!(doc.state(), State::Complete);
        assert_eq!(doc.task_logs.len(), 1);
        assert_eq!(doc.run_log.outputs, Some(outputs));

        let log = doc.run_log.run_log.unwrap();
        assert_eq!(log.name.as_deref(), Some("r1"));
        assert_eq!(log.stdout.as_deref(), Some("done"));
        assert!(log.start_time.is_some());
        assert!(log.end_time.is_some());
    }

    #[test]
    fn test_state_counts() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.insert_run("r1", &request()).unwrap();
        store.insert_run("r2", &request()).unwrap();
        store.update_state("r2", State::Canceled, None).unwrap();

        let counts = store.state_counts().unwrap();
        assert_eq!(counts.len(), State::ALL.len());
        assert_eq!(counts[&State::Queued], 1);
        assert_eq!(counts[&State::Canceled], 1);
        assert_eq!(counts[&State::Running], 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs.db");
        {
            let store = SqliteRunStore::open(&path).unwrap();
            store.insert_run("r1", &request()).unwrap();
        }
        let store = SqliteRunStore::open(&path).unwrap();
        assert!(store.get_run("r1").unwrap().is_some());
    }
}
