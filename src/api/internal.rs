//! Metel Callback
//!
//! The run store lives with the API server, so the metel agent reports
//! progress through `PATCH /internal/runs/{run_id}`.

use axum::extract::{Path, State};
use axum::Json;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::store::Completion;
use crate::wes::{RunStatus, State as RunState};

use super::{ApiError, AppState};

/// A progress report from the metel agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunUpdate {
    /// Plain state change; `start_time` is kept when the run starts
    State {
        state: RunState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<String>,
    },
    /// The agent gave up before the workflow produced a result
    Failure {
        message: String,
        #[serde(default)]
        system_logs: Vec<String>,
    },
    Completion(Completion),
}

/// `PATCH /internal/runs/{run_id}`
pub async fn update_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(update): Json<RunUpdate>,
) -> Result<Json<RunStatus>, ApiError> {
    debug!("Run {} update: {:?}", run_id, update);

    let doc = match update {
        RunUpdate::State { state: next, start_time } => {
            state.store.update_state(&run_id, next, start_time)?
        }
        RunUpdate::Failure { message, system_logs } => {
            state.store.record_error(&run_id, &message, system_logs)?
        }
        RunUpdate::Completion(completion) => state.store.record_completion(&run_id, completion)?,
    };

    Ok(Json(RunStatus {
        state: doc.state(),
        run_id,
    }))
}
