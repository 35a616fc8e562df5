//! WES Endpoints
//!
//! Read-side routes of the WES API plus cancellation. Submission lives
//! in [`super::submit`].

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use log::{info, warn};
use serde::Deserialize;

use crate::config::PluginConfig;
use crate::error::{MetisError, Result};
use crate::store::RunDocument;
use crate::wes::model::{
    Organization, ServiceType, WorkflowEngineVersion, WorkflowTypeVersion,
};
use crate::wes::{
    RunId, RunListResponse, RunLog, RunStatus, RunSummary, ServiceInfo, State as RunState,
    TaskListResponse, TaskLog, WES_VERSION,
};
use crate::VERSION;

use super::{ApiError, AppState};

/// Page size used when the client does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Prefix of task page tokens (`task_{index}`).
const TASK_TOKEN_PREFIX: &str = "task_";

/// Filesystem protocols workflows and outputs may use.
pub const FILESYSTEM_PROTOCOLS: &[&str] = &["http", "https", "file", "s3", "trs"];

type HandlerResult<T> = std::result::Result<Json<T>, ApiError>;

/// Query parameters of paged listings.
#[derive(Deserialize, Debug, Default)]
pub struct PageParams {
    pub page_size: Option<i64>,
    pub page_token: Option<String>,
}

impl PageParams {
    fn limit(&self) -> usize {
        match self.page_size {
            Some(size) if size > 0 => usize::try_from(size).unwrap_or(DEFAULT_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        }
    }

    fn token(&self) -> Option<&str> {
        self.page_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

fn find_run(state: &AppState, run_id: &str) -> Result<RunDocument> {
    state
        .store
        .get_run(run_id)?
        .ok_or_else(|| MetisError::NotFound(format!("run '{}'", run_id)))
}

/// Workflow type and engine versions advertised for the configured plugins.
fn advertised_versions(
    plugins: &[PluginConfig],
) -> (
    BTreeMap<String, WorkflowTypeVersion>,
    BTreeMap<String, WorkflowEngineVersion>,
) {
    let mut types: BTreeMap<String, WorkflowTypeVersion> = BTreeMap::new();
    let mut engines: BTreeMap<String, WorkflowEngineVersion> = BTreeMap::new();

    for plugin in plugins {
        let versions = &mut types
            .entry(plugin.workflow_type.clone())
            .or_default()
            .workflow_type_version;
        if !plugin.workflow_type_version.is_empty()
            && !versions.contains(&plugin.workflow_type_version)
        {
            versions.push(plugin.workflow_type_version.clone());
        }

        let engine = plugin
            .workflow_engine
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| plugin.workflow_type.clone());
        let versions = &mut engines.entry(engine).or_default().workflow_engine_version;
        if !plugin.workflow_engine_version.is_empty()
            && !versions.contains(&plugin.workflow_engine_version)
        {
            versions.push(plugin.workflow_engine_version.clone());
        }
    }

    (types, engines)
}

/// `GET /service-info`
pub async fn get_service_info(State(state): State<AppState>) -> HandlerResult<ServiceInfo> {
    let (workflow_type_versions, workflow_engine_versions) =
        advertised_versions(&state.config.plugins);
    let system_state_counts = state
        .store
        .state_counts()?
        .into_iter()
        .map(|(s, count)| (s.as_str().to_string(), count))
        .collect();

    Ok(Json(ServiceInfo {
        id: "metis".to_string(),
        name: "Metis Workflow Execution Service".to_string(),
        service_type: ServiceType {
            group: "org.ga4gh".to_string(),
            artifact: "wes".to_string(),
            version: WES_VERSION.to_string(),
        },
        description: "Kubernetes-native workflow execution service".to_string(),
        organization: Organization {
            name: "Metis".to_string(),
            url: "https://github.com/jaeaeich/metis".to_string(),
        },
        contact_url: "https://github.com/jaeaeich/metis".to_string(),
        documentation_url: "https://github.com/jaeaeich/metis/blob/main/README.md".to_string(),
        created_at: "2025-01-01T00:00:00Z".to_string(),
        updated_at: "2025-01-01T00:00:00Z".to_string(),
        environment: "production".to_string(),
        version: VERSION.to_string(),
        workflow_type_versions,
        supported_wes_versions: vec![WES_VERSION.to_string()],
        supported_filesystem_protocols: FILESYSTEM_PROTOCOLS.iter().map(|p| p.to_string()).collect(),
        workflow_engine_versions,
        default_workflow_engine_parameters: Vec::new(),
        system_state_counts,
        auth_instructions_url: String::new(),
        tags: BTreeMap::from([("version".to_string(), VERSION.to_string())]),
    }))
}

/// `GET /runs`
///
/// The page token is the cursor of the last run on the previous page.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> HandlerResult<RunListResponse> {
    let limit = params.limit();
    let after = params
        .token()
        .map(|t| {
            t.parse::<i64>()
                .ok()
                .filter(|c| *c >= 0)
                .ok_or_else(|| MetisError::InvalidPageToken(t.to_string()))
        })
        .transpose()?;

    let mut docs = state.store.list_runs(limit.saturating_add(1), after)?;
    let next_page_token = if docs.len() > limit {
        docs.truncate(limit);
        docs.last().map(|d| d.cursor.to_string())
    } else {
        None
    };

    Ok(Json(RunListResponse {
        runs: docs.iter().map(|d| RunSummary::from(&d.run_log)).collect(),
        next_page_token,
    }))
}

/// `GET /runs/{run_id}`
pub async fn get_run_log(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> HandlerResult<RunLog> {
    let doc = find_run(&state, &run_id)?;
    let mut log = doc.run_log;
    log.task_logs_url = Some(format!(
        "{}/runs/{}/tasks",
        state.config.api.server.base_path.trim_end_matches('/'),
        run_id
    ));
    Ok(Json(log))
}

/// `GET /runs/{run_id}/status`
pub async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> HandlerResult<RunStatus> {
    let doc = find_run(&state, &run_id)?;
    Ok(Json(RunStatus {
        state: doc.state(),
        run_id,
    }))
}

/// `POST /runs/{run_id}/cancel`
///
/// Deletes the metel and workflow-execution jobs. A run that already
/// finished is left untouched.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> HandlerResult<RunId> {
    let doc = find_run(&state, &run_id)?;
    if doc.state().is_terminal() {
        info!("Run {} already finished as {}, nothing to cancel", run_id, doc.state());
        return Ok(Json(RunId { run_id }));
    }

    state.store.update_state(&run_id, RunState::Canceling, None)?;

    let k8s = &state.config.k8s;
    for job in [k8s.metel_job_name(&run_id), k8s.we_job_name(&run_id)] {
        if let Err(e) = state.cluster.delete_job(&job).await {
            warn!("Failed to delete job {} of run {}: {}", job, run_id, e);
            return Err(e.into());
        }
    }

    state.store.update_state(&run_id, RunState::Canceled, None)?;
    info!("Run {} canceled", run_id);
    Ok(Json(RunId { run_id }))
}

/// Parses a `task_{index}` token.
fn parse_task_token(token: &str) -> Result<usize> {
    token
        .strip_prefix(TASK_TOKEN_PREFIX)
        .and_then(|index| index.parse::<usize>().ok())
        .ok_or_else(|| MetisError::InvalidPageToken(token.to_string()))
}

/// Cuts one page out of a run's task logs.
fn page_tasks(tasks: &[TaskLog], params: &PageParams) -> Result<TaskListResponse> {
    let start = params
        .token()
        .map(parse_task_token)
        .transpose()?
        .unwrap_or(0)
        .min(tasks.len());
    let end = start.saturating_add(params.limit()).min(tasks.len());

    Ok(TaskListResponse {
        task_logs: tasks[start..end].to_vec(),
        next_page_token: (end < tasks.len()).then(|| format!("{}{}", TASK_TOKEN_PREFIX, end)),
    })
}

/// `GET /runs/{run_id}/tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<PageParams>,
) -> HandlerResult<TaskListResponse> {
    let doc = find_run(&state, &run_id)?;
    Ok(Json(page_tasks(&doc.task_logs, &params)?))
}

/// `GET /runs/{run_id}/tasks/{task_id}`
pub async fn get_task(
    State(state): State<AppState>,
    Path((run_id, task_id)): Path<(String, String)>,
) -> HandlerResult<TaskLog> {
    let doc = find_run(&state, &run_id)?;
    doc.task_logs
        .into_iter()
        .find(|t| t.matches(&task_id))
        .map(Json)
        .ok_or_else(|| MetisError::NotFound(format!("task '{}' of run '{}'", task_id, run_id)).into())
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(n: usize) -> Vec<TaskLog> {
        (0..n)
            .map(|i| TaskLog {
                id: format!("t{}", i),
                ..Default::default()
            })
            .collect()
    }

    fn params(size: Option<i64>, token: Option<&str>) -> PageParams {
        PageParams {
            page_size: size,
            page_token: token.map(str::to_string),
        }
    }

    #[test]
    fn test_page_limit() {
        assert_eq!(params(None, None).limit(), 20);
        assert_eq!(params(Some(0), None).limit(), 20);
        assert_eq!(params(Some(-3), None).limit(), 20);
        assert_eq!(params(Some(5), None).limit(), 5);
    }

    #[test]
    fn test_task_pages() {
        let all = tasks(5);

        let first = page_tasks(&all, &params(Some(2), None)).unwrap();
        assert_eq!(first.task_logs.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("task_2"));

        let last = page_tasks(&all, &params(Some(10), Some("task_2"))).unwrap();
        assert_eq!(last.task_logs[0].id, "t2");
        assert_eq!(last.task_logs.len(), 3);
        assert!(last.next_page_token.is_none());

        let beyond = page_tasks(&all, &params(None, Some("task_99"))).unwrap();
        assert!(beyond.task_logs.is_empty());
    }

    #[test]
    fn test_bad_task_token() {
        assert!(matches!(
            page_tasks(&tasks(1), &params(None, Some("page_2"))),
            Err(MetisError::InvalidPageToken(_))
        ));
        assert!(parse_task_token("task_x").is_err());
    }

    #[test]
    fn test_advertised_versions() {
        let plugin = |kind: &str, tv: &str, engine: Option<&str>, ev: &str| PluginConfig {
            workflow_type: kind.to_string(),
            workflow_type_version: tv.to_string(),
            workflow_engine: engine.map(str::to_string),
            workflow_engine_version: ev.to_string(),
            plugin_url: "http://plugin".to_string(),
        };
        let plugins = vec![
            plugin("CWL", "v1.2", Some("cwltool"), "3.1"),
            plugin("CWL", "v1.0", Some("cwltool"), "3.1"),
            plugin("NFL", "DSL2", None, "24.04"),
        ];

        let (types, engines) = advertised_versions(&plugins);
        assert_eq!(types["CWL"].workflow_type_version, vec!["v1.2", "v1.0"]);
        assert_eq!(engines["cwltool"].workflow_engine_version, vec!["3.1"]);
        assert_eq!(engines["NFL"].workflow_engine_version, vec!["24.04"]);
    }
}
