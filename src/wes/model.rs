//! WES Data Model
//!
//! Request and response bodies of the GA4GH Workflow Execution Service
//! 1.1.0 API. Field names follow the WES wire format (snake_case).
//!
//! # Example Run Log
//!
//! ```json
//! {
//!   "run_id": "4a1e...",
//!   "state": "RUNNING",
//!   "request": {
//!     "workflow_url": "trs://workflowhub.eu/107/1",
//!     "workflow_type": "CWL",
//!     "workflow_type_version": "v1.2"
//!   },
//!   "run_log": { "name": "4a1e...", "start_time": "2025-01-01T00:00:00Z" }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::state::State;

/// A workflow submission, as received on `POST /runs`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RunRequest {
    /// Input parameters for the workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_params: Option<Map<String, Value>>,

    /// Workflow language, e.g. "CWL", "WDL", "NFL"
    pub workflow_type: String,

    pub workflow_type_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_engine: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_engine_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_engine_parameters: Option<BTreeMap<String, String>>,

    /// Location of the primary workflow descriptor (http, https, file or trs)
    pub workflow_url: String,
}

/// Log and timing information for a run or a task.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Log {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_logs: Option<Vec<String>>,
}

/// Log of a single task inside a run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TaskLog {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_logs: Option<Vec<String>>,
    /// Link to the TES task, when the task ran through TES
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tes_uri: Option<String>,
}

impl TaskLog {
    /// Returns true when `key` names this task by id or by name.
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name.as_deref() == Some(key)
    }
}

/// Full log of a workflow run (`GET /runs/{run_id}`).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RunLog {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RunRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_log: Option<Log>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_logs_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
}

impl RunLog {
    /// Returns the recorded state, or UNKNOWN when none was set.
    pub fn state_or_unknown(&self) -> State {
        self.state.unwrap_or(State::Unknown)
    }
}

/// Minimal run status (`GET /runs/{run_id}/status`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunStatus {
    pub run_id: String,
    pub state: State,
}

/// Entry of `GET /runs`: status plus timing and tags.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl From<&RunLog> for RunSummary {
    fn from(log: &RunLog) -> Self {
        let timing = log.run_log.as_ref();
        Self {
            run_id: log.run_id.clone(),
            state: log.state_or_unknown(),
            start_time: timing.and_then(|l| l.start_time.clone()),
            end_time: timing.and_then(|l| l.end_time.clone()),
            tags: log
                .request
                .as_ref()
                .and_then(|r| r.tags.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunListResponse {
    pub runs: Vec<RunSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskListResponse {
    pub task_logs: Vec<TaskLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunId {
    pub run_id: String,
}

/// Error body returned by every failing endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub msg: String,
    pub status_code: u16,
}

/// GA4GH service type triple.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceType {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Organization {
    pub name: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkflowTypeVersion {
    pub workflow_type_version: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkflowEngineVersion {
    pub workflow_engine_version: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DefaultWorkflowEngineParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub default_value: String,
}

/// Service description (`GET /service-info`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub description: String,
    pub organization: Organization,
    pub contact_url: String,
    pub documentation_url: String,
    pub created_at: String,
    pub updated_at: String,
    pub environment: String,
    pub version: String,
    pub workflow_type_versions: BTreeMap<String, WorkflowTypeVersion>,
    pub supported_wes_versions: Vec<String>,
    pub supported_filesystem_protocols: Vec<String>,
    pub workflow_engine_versions: BTreeMap<String, WorkflowEngineVersion>,
    pub default_workflow_engine_parameters: Vec<DefaultWorkflowEngineParameter>,
    pub system_state_counts: BTreeMap<String, i64>,
    pub auth_instructions_url: String,
    pub tags: BTreeMap<String, String>,
}
