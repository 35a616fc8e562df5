//! Service Configuration
//!
//! Settings shared by the API server and the metel agent. Values come
//! from built-in defaults, an optional YAML file, an optional plugins
//! file and finally `METIS_*` environment variables (see [`loader`]).
//!
//! # Example YAML Format
//!
//! ```yaml
//! log:
//!   level: debug
//!   format: json
//! k8s:
//!   namespace: workflows
//!   default_pvc_size: 1Gi
//! metel:
//!   staging:
//!     bucket: results
//! plugins:
//!   - workflow_type: CWL
//!     workflow_type_version: v1.2
//!     workflow_engine: cwltool
//!     workflow_engine_version: "3.1"
//!     plugin_url: http://cwl-plugin:8080
//! ```

pub mod loader;
pub mod plugins;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use loader::{load, load_from};
pub use plugins::{select_plugin, PluginConfig};

/// Root configuration object.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub k8s: K8sConfig,
    pub metel: MetelConfig,
    /// Explicit plugins file; empty means `$HOME/.metis/plugins.yaml`
    pub plugins_file: String,
    pub plugins: Vec<PluginConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// One of debug, info, warn, error
    pub level: String,
    /// Either text or json
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Location of the run database.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "metis.db".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub server: ServerConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix of every WES route
    pub base_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_path: "/ga4gh/wes/v1".to_string(),
        }
    }
}

/// Kubernetes resource naming and scheduling settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct K8sConfig {
    /// Kubeconfig path; empty means in-cluster credentials
    pub config_path: String,
    pub namespace: String,
    pub pvc_access_mode: String,
    pub pvc_storage_class: String,
    pub common_pvc_volume_name: String,
    pub restart_policy: String,
    pub image_pull_policy: String,
    /// Seconds a finished job is kept before garbage collection
    pub job_ttl: i32,
    pub security_context_enabled: bool,
    pub default_pvc_size: String,
    pub pvc_prefix: String,
    pub metel_prefix: String,
    pub we_prefix: String,
    /// Image running the metel agent
    pub image_name: String,
    pub plugin_config_map_name: String,
    pub service_account_name: String,
    pub pvc_mount_path: String,
}

impl Default for K8sConfig {
    fn default() -> Self {
        Self {
            config_path: String::new(),
            namespace: "metis".to_string(),
            pvc_access_mode: String::new(),
            pvc_storage_class: String::new(),
            common_pvc_volume_name: "workflow-pvc".to_string(),
            restart_policy: "Never".to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
            job_ttl: 300,
            security_context_enabled: false,
            default_pvc_size: "100Mi".to_string(),
            pvc_prefix: "pvc".to_string(),
            metel_prefix: "metel".to_string(),
            we_prefix: "workflow-execution".to_string(),
            image_name: "jaeaeich/metis:latest".to_string(),
            plugin_config_map_name: "metis-plugin-configmap".to_string(),
            service_account_name: "metis-service-account".to_string(),
            pvc_mount_path: "/pvc".to_string(),
        }
    }
}

impl K8sConfig {
    /// Name of the PVC holding a run's working directory.
    pub fn pvc_name(&self, run_id: &str) -> String {
        format!("{}-{}", self.pvc_prefix, run_id)
    }

    /// Name of the job running the metel agent for a run.
    pub fn metel_job_name(&self, run_id: &str) -> String {
        format!("{}-{}", self.metel_prefix, run_id)
    }

    /// Name of the job running the workflow engine for a run.
    pub fn we_job_name(&self, run_id: &str) -> String {
        format!("{}-{}", self.we_prefix, run_id)
    }

    /// Access mode for run PVCs, `ReadWriteOnce` unless configured.
    pub fn access_mode(&self) -> &str {
        if self.pvc_access_mode.is_empty() {
            "ReadWriteOnce"
        } else {
            &self.pvc_access_mode
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MetelConfig {
    /// Base URL the agent reports run updates to
    pub api_url: String,
    pub poll_interval_secs: u64,
    pub watch_timeout_secs: u64,
    pub plugin_timeout_secs: u64,
    pub staging: StagingConfig,
}

impl Default for MetelConfig {
    fn default() -> Self {
        Self {
            api_url: "http://metis-api:8080".to_string(),
            poll_interval_secs: 5,
            watch_timeout_secs: 86_400,
            plugin_timeout_secs: 30,
            staging: StagingConfig::default(),
        }
    }
}

/// Remote staging area settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StagingConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub bucket: String,
    pub prefix: String,
    /// Endpoint handed to plugins; may be empty
    pub url: String,
    pub parameters: BTreeMap<String, String>,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            kind: "s3".to_string(),
            bucket: "metis".to_string(),
            prefix: "workflows".to_string(),
            url: String::new(),
            parameters: BTreeMap::new(),
        }
    }
}
