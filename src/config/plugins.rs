//! Workflow Engine Plugins
//!
//! Each plugin entry names the workflow type and engine version it
//! executes and the URL of the plugin service.

use serde::{Deserialize, Serialize};

use crate::error::{MetisError, Result};
use crate::wes::RunRequest;

/// Configuration for a single plugin.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PluginConfig {
    pub workflow_type: String,
    #[serde(default)]
    pub workflow_type_version: String,
    #[serde(default)]
    pub workflow_engine: Option<String>,
    #[serde(default)]
    pub workflow_engine_version: String,
    pub plugin_url: String,
}

impl PluginConfig {
    /// Returns true if this plugin can run the request.
    fn supports(&self, request: &RunRequest) -> bool {
        if !self.workflow_type.eq_ignore_ascii_case(request.workflow_type.trim()) {
            return false;
        }

        if let Some(version) = non_empty(&request.workflow_engine_version) {
            if self.workflow_engine_version != version {
                return false;
            }
        }

        match (non_empty(&request.workflow_engine), self.workflow_engine.as_deref()) {
            (Some(wanted), Some(engine)) => engine.eq_ignore_ascii_case(wanted),
            _ => true,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Picks the plugin that should execute a run.
///
/// The first entry whose type matches, and whose engine version equals
/// the requested one when a version is given, wins. Entry order in the
/// plugins file is the priority.
pub fn select_plugin<'a>(
    plugins: &'a [PluginConfig],
    request: &RunRequest,
) -> Result<&'a PluginConfig> {
    plugins
        .iter()
        .find(|p| p.supports(request))
        .ok_or_else(|| MetisError::NoSuitablePlugin(request.workflow_type.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(kind: &str, type_version: &str, engine: Option<&str>, version: &str) -> PluginConfig {
        PluginConfig {
            workflow_type: kind.to_string(),
            workflow_type_version: type_version.to_string(),
            workflow_engine: engine.map(str::to_string),
            workflow_engine_version: version.to_string(),
            plugin_url: format!("http://{}-{}", kind.to_lowercase(), version),
        }
    }

    fn request(kind: &str) -> RunRequest {
        RunRequest {
            workflow_type: kind.to_string(),
            workflow_type_version: "v1.2".to_string(),
            workflow_url: "https://example.com/wf".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_select_by_type_case_insensitive() {
        let plugins = vec![plugin("WDL", "1.0", None, "85"), plugin("CWL", "v1.2", None, "3.1")];
        let selected = select_plugin(&plugins, &request("cwl")).unwrap();
        assert_eq!(selected.plugin_url, "http://cwl-3.1");
    }

    #[test]
    fn test_select_by_engine_version() {
        let plugins = vec![plugin("CWL", "v1.2", None, "3.0"), plugin("CWL", "v1.2", None, "3.1")];
        let mut req = request("CWL");
        req.workflow_engine_version = Some("3.1".to_string());

        let selected = select_plugin(&plugins, &req).unwrap();
        assert_eq!(selected.workflow_engine_version, "3.1");
    }

    #[test]
    fn test_first_match_wins_without_version() {
        let plugins = vec![plugin("CWL", "v1.0", None, "3.0"), plugin("CWL", "v1.2", None, "3.1")];
        let selected = select_plugin(&plugins, &request("CWL")).unwrap();
        assert_eq!(selected.workflow_engine_version, "3.0");
    }

    #[test]
    fn test_exact_engine_version_skips_earlier_entries() {
        let plugins = vec![plugin("CWL", "v1.0", None, "3.0"), plugin("CWL", "v1.2", None, "3.1")];
        let mut req = request("CWL");
        req.workflow_engine_version = Some("3.1".to_string());

        let selected = select_plugin(&plugins, &req).unwrap();
        assert_eq!(selected.plugin_url, "http://cwl-3.1");
    }

    #[test]
    fn test_unknown_engine_version_is_rejected() {
        let plugins = vec![plugin("CWL", "v1.2", None, "3.0"), plugin("CWL", "v1.2", None, "3.1")];
        let mut req = request("CWL");
        req.workflow_engine_version = Some("9.9".to_string());

        let err = select_plugin(&plugins, &req).unwrap_err();
        assert!(matches!(err, MetisError::NoSuitablePlugin(t) if t == "CWL"));
    }

    #[test]
    fn test_engine_name_must_match_when_declared() {
        let plugins = vec![plugin("CWL", "v1.2", Some("toil"), "6.0")];
        let mut req = request("CWL");
        req.workflow_engine = Some("cwltool".to_string());
        assert!(select_plugin(&plugins, &req).is_err());

        req.workflow_engine = Some("TOIL".to_string());
        assert!(select_plugin(&plugins, &req).is_ok());
    }

    #[test]
    fn test_empty_engine_version_is_ignored() {
        let plugins = vec![plugin("NFL", "DSL2", None, "24.04")];
        let mut req = request("NFL");
        req.workflow_engine_version = Some("  ".to_string());
        assert!(select_plugin(&plugins, &req).is_ok());
    }

    #[test]
    fn test_no_plugin() {
        let err = select_plugin(&[], &request("CWL")).unwrap_err();
        assert!(matches!(err, MetisError::NoSuitablePlugin(t) if t == "CWL"));
    }
}
