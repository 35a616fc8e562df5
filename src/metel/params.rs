//! Metel Command Line
//!
//! The API server launches the agent as `/metis metel --flag=value ...`.
//! This module builds that argument list from a run request and parses
//! it back on the agent side. Map-valued fields travel as JSON strings.

use std::collections::BTreeMap;

use clap::Args;
use log::warn;
use serde::de::DeserializeOwned;

use crate::wes::RunRequest;

/// Binary path inside the Metis image.
pub const METIS_BINARY: &str = "/metis";

/// Flags of the `metel` subcommand.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct MetelArgs {
    /// Run identifier assigned by the API server
    #[arg(long)]
    pub run_id: String,

    #[arg(long, default_value = "")]
    pub workflow_url: String,

    #[arg(long, default_value = "")]
    pub workflow_type: String,

    #[arg(long, default_value = "")]
    pub workflow_type_version: String,

    #[arg(long)]
    pub workflow_engine: Option<String>,

    #[arg(long)]
    pub workflow_engine_version: Option<String>,

    /// JSON object of workflow inputs
    #[arg(long)]
    pub workflow_params: Option<String>,

    /// JSON object of string engine parameters
    #[arg(long)]
    pub workflow_engine_parameters: Option<String>,

    /// JSON object of string tags
    #[arg(long)]
    pub tags: Option<String>,
}

/// Decodes an optional JSON flag; invalid JSON is logged and dropped.
fn decode_json<T: DeserializeOwned>(flag: &str, raw: Option<&str>) -> Option<T> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring --{}: invalid JSON: {}", flag, e);
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl MetelArgs {
    /// Rebuilds the run request the API server received.
    pub fn into_run_request(self) -> RunRequest {
        RunRequest {
            workflow_params: decode_json("workflow-params", self.workflow_params.as_deref()),
            workflow_type: self.workflow_type,
            workflow_type_version: self.workflow_type_version,
            tags: decode_json::<BTreeMap<String, String>>("tags", self.tags.as_deref()),
            workflow_engine: non_empty(self.workflow_engine),
            workflow_engine_version: non_empty(self.workflow_engine_version),
            workflow_engine_parameters: decode_json(
                "workflow-engine-parameters",
                self.workflow_engine_parameters.as_deref(),
            ),
            workflow_url: self.workflow_url,
        }
    }
}

/// Builds the container arguments of the metel job for a run.
///
/// Each value is joined to its flag with `=` so values starting with a
/// dash are not taken for flags.
pub fn build_metel_args(run_id: &str, request: &RunRequest) -> Vec<String> {
    let mut args = vec![METIS_BINARY.to_string(), "metel".to_string()];
    let mut push = |flag: &str, value: &str| {
        if !value.is_empty() {
            args.push(format!("--{}={}", flag, value));
        }
    };

    push("run-id", run_id);
    push("workflow-url", &request.workflow_url);
    push("workflow-type", &request.workflow_type);
    push("workflow-type-version", &request.workflow_type_version);
    push("workflow-engine", request.workflow_engine.as_deref().unwrap_or_default());
    push(
        "workflow-engine-version",
        request.workflow_engine_version.as_deref().unwrap_or_default(),
    );

    if let Some(params) = &request.workflow_params {
        push("workflow-params", &serde_json::Value::Object(params.clone()).to_string());
    }
    if let Some(params) = &request.workflow_engine_parameters {
        push(
            "workflow-engine-parameters",
            &serde_json::to_string(params).unwrap_or_default(),
        );
    }
    if let Some(tags) = &request.tags {
        push("tags", &serde_json::to_string(tags).unwrap_or_default());
    }

    args
}
