//! Workflow Engine Plugin Client
//!
//! Plugins translate a WES request into a concrete container to run and
//! turn the finished job's logs back into a WES run log. They are plain
//! HTTP services speaking JSON:
//!
//! - `POST {plugin_url}/execution-spec`
//! - `POST {plugin_url}/parse-execution`

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::PluginConfig;
use crate::error::{MetisError, Result};
use crate::wes::{Log, RunRequest, TaskLog};

/// Where the run's outputs are staged, as handed to plugins.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StagingInfo {
    pub staging_url: String,
    pub endpoint_url: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ExecutionSpecRequest<'a> {
    pub wes_request: &'a RunRequest,
    pub staging_info: &'a StagingInfo,
    /// Path of the downloaded primary descriptor inside the PVC
    pub primary_descriptor: &'a str,
}

/// What the workflow-execution job should run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ExecutionSpec {
    pub image: String,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Absolute path to file content, mounted as-is
    pub root_mount_files: BTreeMap<String, String>,
    /// Path relative to the PVC mount to file content
    pub project_mount_files: BTreeMap<String, String>,
    /// Paths relative to the PVC mount uploaded after success
    pub outputs_to_stage: Vec<String>,
}

/// How the job ended, as reported to the plugin.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseState {
    Success,
    Failure,
    UnknownState,
}

#[derive(Serialize, Debug, Clone)]
pub struct ParseExecutionRequest<'a> {
    pub job_logs: &'a str,
    pub staging_info: &'a StagingInfo,
    pub state: ParseState,
}

/// The plugin's reading of a finished job.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ParseResponse {
    pub run_log: Option<Log>,
    pub task_logs: Vec<TaskLog>,
    pub outputs: Option<Map<String, Value>>,
}

/// Calls made to a workflow engine plugin.
#[async_trait]
pub trait PluginClient: Send + Sync {
    async fn execution_spec(&self, request: &ExecutionSpecRequest<'_>) -> Result<ExecutionSpec>;

    async fn parse_execution(&self, request: &ParseExecutionRequest<'_>) -> Result<ParseResponse>;
}

/// [`PluginClient`] over HTTP.
pub struct HttpPlugin {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPlugin {
    pub fn new(plugin: &PluginConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: plugin.plugin_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("Calling plugin {}", url);

        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MetisError::Plugin(format!(
                "{} answered {}: {}",
                url,
                status,
                text.trim()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MetisError::Plugin(format!("unreadable answer from {}: {}", url, e)))
    }
}

#[async_trait]
impl PluginClient for HttpPlugin {
    async fn execution_spec(&self, request: &ExecutionSpecRequest<'_>) -> Result<ExecutionSpec> {
        let spec: ExecutionSpec = self.post("execution-spec", request).await?;
        if spec.image.trim().is_empty() {
            return Err(MetisError::Plugin("execution spec has no image".to_string()));
        }
        Ok(spec)
    }

    async fn parse_execution(&self, request: &ParseExecutionRequest<'_>) -> Result<ParseResponse> {
        self.post("parse-execution", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn execution_spec(Json(body): Json<Value>) -> Json<Value> {
        let descriptor = body["primary_descriptor"].as_str().unwrap_or_default().to_string();
        Json(json!({
            "image": "cwltool:3.1",
            "command": ["cwltool", descriptor],
            "environment": {"STAGING": body["staging_info"]["staging_url"]},
            "outputs_to_stage": ["outputs"]
        }))
    }

    async fn parse_execution(Json(body): Json<Value>) -> Json<Value> {
        Json(json!({
            "run_log": {"stdout": body["job_logs"], "exit_code": 0},
            "task_logs": [{"id": body["state"]}]
        }))
    }

    async fn serve(router: Router) -> HttpPlugin {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let config = PluginConfig {
            workflow_type: "CWL".to_string(),
            plugin_url: format!("http://{}/", addr),
            ..Default::default()
        };
        HttpPlugin::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn staging() -> StagingInfo {
        StagingInfo {
            staging_url: "s3://metis/workflows/r1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_execution_spec_round_trip() {
        let plugin = serve(
            Router::new()
                .route("/execution-spec", post(execution_spec))
                .route("/parse-execution", post(parse_execution)),
        )
        .await;

        let request = RunRequest {
            workflow_type: "CWL".to_string(),
            workflow_url: "file:///pvc/main.cwl".to_string(),
            ..Default::default()
        };
        let staging = staging();
        let spec = plugin
            .execution_spec(&ExecutionSpecRequest {
                wes_request: &request,
                staging_info: &staging,
                primary_descriptor: "/pvc/main.cwl",
            })
            .await
            .unwrap();

        assert_eq!(spec.image, "cwltool:3.1");
        assert_eq!(spec.command, vec!["cwltool", "/pvc/main.cwl"]);
        assert_eq!(spec.environment["STAGING"], "s3://metis/workflows/r1");
        assert!(spec.root_mount_files.is_empty());

        let parsed = plugin
            .parse_execution(&ParseExecutionRequest {
                job_logs: "hello",
                staging_info: &staging,
                state: ParseState::Failure,
            })
            .await
            .unwrap();
        assert_eq!(parsed.run_log.unwrap().stdout.as_deref(), Some("hello"));
        assert_eq!(parsed.task_logs[0].id, "FAILURE");
    }

    #[tokio::test]
    async fn test_plugin_error_status() {
        let plugin = serve(Router::new().route(
            "/parse-execution",
            post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "engine down") }),
        ))
        .await;

        let staging = staging();
        let err = plugin
            .parse_execution(&ParseExecutionRequest {
                job_logs: "",
                staging_info: &staging,
                state: ParseState::Success,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MetisError::Plugin(msg) if msg.contains("engine down")));
    }

    #[test]
    fn test_parse_state_wire_names() {
        assert_eq!(serde_json::to_value(ParseState::UnknownState).unwrap(), json!("UNKNOWN_STATE"));
        assert_eq!(serde_json::to_value(ParseState::Success).unwrap(), json!("SUCCESS"));
    }
}
