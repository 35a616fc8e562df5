//! Run Request Validation
//!
//! Checks a submission before any cluster resources are created:
//! - Required fields are present
//! - The workflow URL uses a scheme Metis can fetch
//! - A configured plugin can execute the workflow type

use log::{debug, info};

use crate::config::{select_plugin, PluginConfig};
use crate::error::{MetisError, Result};

use super::model::RunRequest;

/// URL schemes understood by the workflow downloaders.
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file", "trs"];

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingField(&'static str),
    UnsupportedScheme(String),
    NoSuitablePlugin {
        workflow_type: String,
        engine_version: Option<String>,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "Field '{}' is required", field),
            Self::UnsupportedScheme(url) => {
                write!(f, "Workflow URL '{}' uses an unsupported scheme", url)
            }
            Self::NoSuitablePlugin {
                workflow_type,
                engine_version: Some(version),
            } => write!(
                f,
                "No plugin configured for workflow type '{}' with engine version '{}'",
                workflow_type, version
            ),
            Self::NoSuitablePlugin { workflow_type, .. } => {
                write!(f, "No plugin configured for workflow type '{}'", workflow_type)
            }
        }
    }
}

/// Collects every problem with a run request.
fn collect_errors(request: &RunRequest, plugins: &[PluginConfig]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let required = [
        ("workflow_url", &request.workflow_url),
        ("workflow_type", &request.workflow_type),
        ("workflow_type_version", &request.workflow_type_version),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            errors.push(ValidationError::MissingField(name));
        }
    }

    if !request.workflow_url.trim().is_empty() {
        let scheme = request
            .workflow_url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase());
        match scheme {
            Some(s) if SUPPORTED_SCHEMES.contains(&s.as_str()) => {}
            _ => errors.push(ValidationError::UnsupportedScheme(
                request.workflow_url.clone(),
            )),
        }
    }

    if !request.workflow_type.trim().is_empty() && select_plugin(plugins, request).is_err() {
        errors.push(ValidationError::NoSuitablePlugin {
            workflow_type: request.workflow_type.clone(),
            engine_version: request.workflow_engine_version.clone(),
        });
    }

    errors
}

/// Validates a run request against the configured plugins.
///
/// All problems are reported together, one per line.
pub fn validate_run_request(request: &RunRequest, plugins: &[PluginConfig]) -> Result<()> {
    debug!("Validating run request for {}", request.workflow_url);

    let errors = collect_errors(request, plugins);
    if errors.is_empty() {
        info!(
            "Run request valid: {} {} ({})",
            request.workflow_type, request.workflow_type_version, request.workflow_url
        );
        return Ok(());
    }

    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    Err(MetisError::InvalidInput(messages.join("\n")))
}
