//! Kubernetes Manifests
//!
//! The subset of the core/v1 and batch/v1 object model Metis creates
//! and reads. Field names follow the Kubernetes JSON form (camelCase);
//! unset optional fields are omitted from the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label carried by every object Metis creates.
pub const APP_LABEL: (&str, &str) = ("app", "metis");
pub const RUN_ID_LABEL: &str = "metis/run-id";
pub const COMPONENT_LABEL: &str = "metis/component";

/// Builds the standard label set for an object belonging to a run.
pub fn run_labels(run_id: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.0.to_string(), APP_LABEL.1.to_string()),
        (RUN_ID_LABEL.to_string(), run_id.to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
    ])
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>, namespace: &str) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
}

impl OwnerReference {
    /// Reference making `job` the controlling owner of another object.
    pub fn controlled_by(job: &Job) -> Self {
        Self {
            api_version: job.api_version.clone(),
            kind: job.kind.clone(),
            name: job.metadata.name.clone(),
            uid: job.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
        }
    }
}

/// Binary data values are base64 encoded, as on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary_data: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            metadata,
            data: BTreeMap::new(),
            binary_data: BTreeMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PersistentVolumeClaimSpec,
}

impl PersistentVolumeClaim {
    pub fn new(metadata: ObjectMeta, spec: PersistentVolumeClaimSpec) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "PersistentVolumeClaim".to_string(),
            metadata,
            spec,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistentVolumeClaimSpec {
    pub access_modes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    pub resources: ResourceRequirements,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ResourceRequirements {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: JobSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl Job {
    pub fn new(metadata: ObjectMeta, spec: JobSpec) -> Self {
        Self {
            api_version: "batch/v1".to_string(),
            kind: "Job".to_string(),
            metadata,
            spec,
            status: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status.as_ref().and_then(|s| s.succeeded).unwrap_or(0) > 0
    }

    pub fn failed(&self) -> bool {
        self.status.as_ref().and_then(|s| s.failed).unwrap_or(0) > 0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct JobSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
    pub template: PodTemplateSpec,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct JobStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PodTemplateSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,
    pub spec: PodSpec,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PodSpec {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    pub containers: Vec<Container>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PodSecurityContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<i64>,
}

impl PodSecurityContext {
    /// Non-root context applied when `k8s.security_context_enabled` is set.
    pub fn restricted() -> Self {
        Self {
            run_as_non_root: Some(true),
            run_as_user: Some(1000),
            run_as_group: Some(1000),
            fs_group: Some(1000),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

impl VolumeMount {
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapVolumeSource>,
}

impl Volume {
    pub fn from_pvc(name: impl Into<String>, claim_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persistent_volume_claim: Some(PvcVolumeSource {
                claim_name: claim_name.into(),
            }),
            config_map: None,
        }
    }

    pub fn from_config_map(name: impl Into<String>, config_map: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persistent_volume_claim: None,
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.into(),
                optional: None,
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcVolumeSource {
    pub claim_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigMapVolumeSource {
    pub name: String,
    /// Lets the pod start when the config map does not exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

impl Pod {
    /// Statuses of the pod's main containers.
    pub fn container_statuses(&self) -> &[ContainerStatus] {
        self.status
            .as_ref()
            .map(|s| s.container_statuses.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PodStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ContainerState>,
}

impl ContainerStatus {
    pub fn waiting(&self) -> Option<&ContainerStateWaiting> {
        self.state.as_ref().and_then(|s| s.waiting.as_ref())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ContainerState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting: Option<ContainerStateWaiting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ContainerStateWaiting {
    pub reason: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PodList {
    pub items: Vec<Pod>,
}

/// Error body returned by the API server.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Status {
    pub message: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_run_labels() {
        let labels = run_labels("r1", "metel");
        assert_eq!(labels["app"], "metis");
        assert_eq!(labels["metis/run-id"], "r1");
        assert_eq!(labels["metis/component"], "metel");
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let job = Job::new(
            ObjectMeta::named("metel-r1", "metis"),
            JobSpec {
                ttl_seconds_after_finished: Some(300),
                backoff_limit: Some(0),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: PodSpec {
                        containers: vec![Container {
                            name: "metel-r1".to_string(),
                            image: "jaeaeich/metis:latest".to_string(),
                            volume_mounts: vec![VolumeMount::new("workflow-pvc", "/pvc")],
                            ..Default::default()
                        }],
                        volumes: vec![Volume::from_pvc("workflow-pvc", "pvc-r1")],
                        restart_policy: Some("Never".to_string()),
                        ..Default::default()
                    },
                },
            },
        );

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value,
            json!({
                "apiVersion": "batch/v1",
                "kind": "Job",
                "metadata": {"name": "metel-r1", "namespace": "metis"},
                "spec": {
                    "ttlSecondsAfterFinished": 300,
                    "backoffLimit": 0,
                    "template": {
                        "spec": {
                            "containers": [{
                                "name": "metel-r1",
                                "image": "jaeaeich/metis:latest",
                                "volumeMounts": [{"name": "workflow-pvc", "mountPath": "/pvc"}]
                            }],
                            "volumes": [{
                                "name": "workflow-pvc",
                                "persistentVolumeClaim": {"claimName": "pvc-r1"}
                            }],
                            "restartPolicy": "Never"
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_job_status_from_server() {
        let job: Job = serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "we-r1", "uid": "abc-123", "resourceVersion": "42"},
            "spec": {"template": {"spec": {"containers": []}}},
            "status": {"failed": 1}
        }))
        .unwrap();

        assert!(job.failed());
        assert!(!job.succeeded());

        let owner = OwnerReference::controlled_by(&job);
        assert_eq!(owner.uid, "abc-123");
        assert_eq!(owner.kind, "Job");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_waiting_container() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "we-r1-abcde"},
            "status": {
                "phase": "Pending",
                "containerStatuses": [{
                    "name": "main",
                    "state": {"waiting": {"reason": "ImagePullBackOff", "message": "not found"}}
                }]
            }
        }))
        .unwrap();

        let waiting = pod.container_statuses()[0].waiting().unwrap();
        assert_eq!(waiting.reason, "ImagePullBackOff");
        assert!(Pod::default().container_statuses().is_empty());
    }
}
