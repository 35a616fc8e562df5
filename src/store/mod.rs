//! Run Store
//!
//! Persistence of run documents. The API server owns the store; the
//! metel agent updates runs through the internal HTTP callback.
//!
//! The [`RunStore`] trait defines operations for:
//! - Creating a run when it is submitted
//! - Paging through runs in submission order
//! - Moving a run through the state machine
//! - Recording failures and final results

mod sqlite;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::wes::{Log, RunLog, RunRequest, State, TaskLog};

pub use sqlite::SqliteRunStore;

/// Owner recorded for every run; Metis has no user model.
pub const DEFAULT_USER_ID: i64 = -1;

/// A stored run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunDocument {
    /// Position in submission order, used as the page token
    pub cursor: i64,
    pub run_id: String,
    pub user_id: i64,
    pub created_at: String,
    pub updated_at: String,
    pub run_log: RunLog,
    pub task_logs: Vec<TaskLog>,
}

impl RunDocument {
    pub fn state(&self) -> State {
        self.run_log.state_or_unknown()
    }
}

/// Final result of a run as reported by the metel agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Completion {
    pub state: State,
    #[serde(default)]
    pub run_log: Option<Log>,
    #[serde(default)]
    pub task_logs: Vec<TaskLog>,
    #[serde(default)]
    pub outputs: Option<Map<String, Value>>,
}

/// Storage operations on runs.
pub trait RunStore: Send + Sync {
    /// Creates a QUEUED run.
    fn insert_run(&self, run_id: &str, request: &RunRequest) -> Result<RunDocument>;

    fn get_run(&self, run_id: &str) -> Result<Option<RunDocument>>;

    /// Returns up to `limit` runs whose cursor is greater than `after`.
    fn list_runs(&self, limit: usize, after: Option<i64>) -> Result<Vec<RunDocument>>;

    /// Moves a run to `state`, recording `start_time` when it starts running.
    fn update_state(
        &self,
        run_id: &str,
        state: State,
        start_time: Option<String>,
    ) -> Result<RunDocument>;

    /// Marks a run as SYSTEM_ERROR with the failure message.
    fn record_error(
        &self,
        run_id: &str,
        message: &str,
        system_logs: Vec<String>,
    ) -> Result<RunDocument>;

    fn record_completion(&self, run_id: &str, completion: Completion) -> Result<RunDocument>;

    /// Number of runs in each state; every state is present.
    fn state_counts(&self) -> Result<BTreeMap<State, i64>>;
}
