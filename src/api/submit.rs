//! Run Submission
//!
//! `POST /runs` turns a multipart WES request into cluster resources:
//! one config map per attachment, the run PVC and the metel job that
//! drives the rest of the run. The run is recorded as QUEUED before any
//! of them is created.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Multipart, State};
use axum::Json;
use base64::Engine as _;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::cluster::resources::{
    run_labels, ConfigMapVolumeSource, PersistentVolumeClaimSpec, PodSecurityContext,
    ResourceRequirements,
};
use crate::cluster::{
    ConfigMap, Container, EnvVar, Job, JobSpec, ObjectMeta, OwnedKind, OwnerReference,
    PersistentVolumeClaim, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use crate::config::{Config, K8sConfig};
use crate::error::{MetisError, Result};
use crate::metel::params::build_metel_args;
use crate::wes::{validate_run_request, RunId, RunRequest};

use super::{ApiError, AppState};

/// Multipart field carrying workflow files.
pub const ATTACHMENT_FIELD: &str = "workflow_attachment";

/// Where the plugin config map is mounted in the metel pod.
const PLUGIN_MOUNT_DIR: &str = "/etc/metis";

/// A file uploaded with the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Parsed multipart body.
#[derive(Debug, Default)]
pub struct Submission {
    pub request: RunRequest,
    pub attachments: Vec<Attachment>,
}

/// Config map keys allow only these characters.
fn is_config_map_key(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Reduces an uploaded file name to a safe base name.
///
/// Names that climb out of their directory are rejected.
pub fn sanitize_attachment_name(raw: &str) -> Result<String> {
    let components: Vec<&str> = raw.split(['/', '\\']).collect();
    if components.iter().any(|c| *c == "..") {
        return Err(MetisError::InvalidFilePath(raw.to_string()));
    }

    let base = components.last().copied().unwrap_or_default().trim();
    if base.is_empty() || base == "." {
        return Err(MetisError::InvalidInput(format!(
            "attachment name '{}' has no file name",
            raw
        )));
    }
    if !is_config_map_key(base) {
        return Err(MetisError::InvalidInput(format!(
            "attachment name '{}' may only contain letters, digits, '-', '_' and '.'",
            raw
        )));
    }
    Ok(base.to_string())
}

fn decode_field<T: DeserializeOwned>(fields: &HashMap<String, String>, name: &str) -> Option<T> {
    let raw = fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring field {}: invalid JSON: {}", name, e);
            None
        }
    }
}

/// Builds a run request from the text fields of the form.
pub fn run_request_from_fields(fields: &HashMap<String, String>) -> RunRequest {
    let text = |name: &str| fields.get(name).cloned().unwrap_or_default();
    let optional = |name: &str| fields.get(name).filter(|v| !v.is_empty()).cloned();

    RunRequest {
        workflow_params: decode_field(fields, "workflow_params"),
        workflow_type: text("workflow_type"),
        workflow_type_version: text("workflow_type_version"),
        tags: decode_field(fields, "tags"),
        workflow_engine: optional("workflow_engine"),
        workflow_engine_version: optional("workflow_engine_version"),
        workflow_engine_parameters: decode_field(fields, "workflow_engine_parameters"),
        workflow_url: text("workflow_url"),
    }
}

/// Reads the multipart body of `POST /runs`.
pub async fn read_submission(mut multipart: Multipart) -> Result<Submission> {
    let mut fields = HashMap::new();
    let mut attachments = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| MetisError::InvalidInput(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| MetisError::InvalidInput(format!("failed to read field {}: {}", name, e)))?;

        if name == ATTACHMENT_FIELD {
            let raw = file_name.unwrap_or_default();
            attachments.push(Attachment {
                file_name: sanitize_attachment_name(&raw)?,
                data: data.to_vec(),
            });
        } else {
            fields.insert(name, String::from_utf8_lossy(&data).into_owned());
        }
    }

    Ok(Submission {
        request: run_request_from_fields(&fields),
        attachments,
    })
}

/// Config map holding one attachment.
pub fn attachment_config_map(
    k8s: &K8sConfig,
    run_id: &str,
    index: usize,
    attachment: &Attachment,
) -> ConfigMap {
    let mut labels = run_labels(run_id, "attachment");
    labels.insert("metis/attachment".to_string(), attachment.file_name.clone());

    let mut config_map = ConfigMap::new(
        ObjectMeta::named(format!("attachment-{}-{}", run_id, index), &k8s.namespace)
            .with_labels(labels),
    );
    config_map.binary_data.insert(
        attachment.file_name.clone(),
        base64::engine::general_purpose::STANDARD.encode(&attachment.data),
    );
    config_map
}

/// PVC holding the run's working directory.
pub fn run_pvc(k8s: &K8sConfig, run_id: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim::new(
        ObjectMeta::named(k8s.pvc_name(run_id), &k8s.namespace)
            .with_labels(run_labels(run_id, &k8s.pvc_prefix)),
        PersistentVolumeClaimSpec {
            access_modes: vec![k8s.access_mode().to_string()],
            storage_class_name: Some(k8s.pvc_storage_class.clone()).filter(|s| !s.is_empty()),
            resources: ResourceRequirements {
                requests: BTreeMap::from([("storage".to_string(), k8s.default_pvc_size.clone())]),
            },
        },
    )
}

/// Settings the metel agent needs that it cannot learn on its own.
fn metel_env(config: &Config) -> Vec<EnvVar> {
    let env = |name: &str, value: &str| EnvVar {
        name: name.to_string(),
        value: value.to_string(),
    };

    let staging = &config.metel.staging;
    let mut vars = vec![
        env("METIS_PLUGINS_FILE", &format!("{}/plugins.yaml", PLUGIN_MOUNT_DIR)),
        env("METIS_LOG_LEVEL", &config.log.level),
        env("METIS_LOG_FORMAT", &config.log.format),
        env("METIS_K8S_NAMESPACE", &config.k8s.namespace),
        env("METIS_K8S_PVC_MOUNT_PATH", &config.k8s.pvc_mount_path),
        env("METIS_METEL_API_URL", &config.metel.api_url),
        env("METIS_METEL_STAGING_TYPE", &staging.kind),
        env("METIS_METEL_STAGING_BUCKET", &staging.bucket),
        env("METIS_METEL_STAGING_PREFIX", &staging.prefix),
        env("METIS_METEL_STAGING_URL", &staging.url),
    ];
    vars.extend(
        staging
            .parameters
            .iter()
            .map(|(key, value)| env(&format!("METIS_METEL_STAGING_PARAMETERS_{}", key), value)),
    );
    vars
}

/// Init container copying attachments from their config maps into the PVC.
fn copy_attachments_container(k8s: &K8sConfig, attachment_maps: &[String]) -> Option<Container> {
    if attachment_maps.is_empty() {
        return None;
    }

    let mut volume_mounts = vec![VolumeMount::new(&k8s.common_pvc_volume_name, &k8s.pvc_mount_path)];
    let mut commands = Vec::with_capacity(attachment_maps.len());
    for (i, name) in attachment_maps.iter().enumerate() {
        let source = format!("/attachments-src/{}", name);
        volume_mounts.push(VolumeMount {
            read_only: Some(true),
            ..VolumeMount::new(format!("attachment-vol-{}", i), &source)
        });
        commands.push(format!("cp -L {}/* {}/", source, k8s.pvc_mount_path));
    }

    Some(Container {
        name: "copy-attachments".to_string(),
        image: "busybox".to_string(),
        command: vec!["sh".to_string(), "-c".to_string(), commands.join(" && ")],
        volume_mounts,
        ..Default::default()
    })
}

/// Job running the metel agent for a run.
pub fn metel_job(config: &Config, run_id: &str, request: &RunRequest, attachment_maps: &[String]) -> Job {
    let k8s = &config.k8s;
    let name = k8s.metel_job_name(run_id);

    let mut volumes = vec![
        Volume::from_pvc(&k8s.common_pvc_volume_name, k8s.pvc_name(run_id)),
        Volume {
            name: "plugin-config".to_string(),
            persistent_volume_claim: None,
            config_map: Some(ConfigMapVolumeSource {
                name: k8s.plugin_config_map_name.clone(),
                optional: Some(true),
            }),
        },
    ];
    volumes.extend(
        attachment_maps
            .iter()
            .enumerate()
            .map(|(i, cm)| Volume::from_config_map(format!("attachment-vol-{}", i), cm)),
    );

    let container = Container {
        name: name.clone(),
        image: k8s.image_name.clone(),
        args: build_metel_args(run_id, request),
        env: metel_env(config),
        volume_mounts: vec![
            VolumeMount::new(&k8s.common_pvc_volume_name, &k8s.pvc_mount_path),
            VolumeMount {
                read_only: Some(true),
                ..VolumeMount::new("plugin-config", PLUGIN_MOUNT_DIR)
            },
        ],
        image_pull_policy: Some(k8s.image_pull_policy.clone()),
        ..Default::default()
    };

    Job::new(
        ObjectMeta::named(name, &k8s.namespace).with_labels(run_labels(run_id, &k8s.metel_prefix)),
        JobSpec {
            ttl_seconds_after_finished: Some(k8s.job_ttl),
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: run_labels(run_id, &k8s.metel_prefix),
                    ..Default::default()
                }),
                spec: PodSpec {
                    init_containers: copy_attachments_container(k8s, attachment_maps)
                        .into_iter()
                        .collect(),
                    containers: vec![container],
                    volumes,
                    restart_policy: Some(k8s.restart_policy.clone()),
                    service_account_name: Some(k8s.service_account_name.clone()),
                    security_context: k8s
                        .security_context_enabled
                        .then(PodSecurityContext::restricted),
                },
            },
        },
    )
}

/// Hands the PVC and attachment config maps to the metel job.
///
/// Failures only cost garbage collection, so they are logged.
async fn adopt_resources(state: &AppState, job: &Job, pvc_name: &str, attachment_maps: &[String]) {
    let owner = OwnerReference::controlled_by(job);
    let targets = std::iter::once((OwnedKind::PersistentVolumeClaim, pvc_name))
        .chain(attachment_maps.iter().map(|cm| (OwnedKind::ConfigMap, cm.as_str())));

    for (kind, name) in targets {
        if let Err(e) = state.cluster.set_owner_reference(kind, name, &owner).await {
            error!(
                "Failed to set owner {} on {} {}: {}",
                owner.name,
                kind.resource(),
                name,
                e
            );
        }
    }
}

/// Creates the cluster resources of a run, recording each object in
/// `created` so a failure can remove them again.
async fn create_resources(
    state: &AppState,
    run_id: &str,
    submission: &Submission,
    created: &mut Vec<(OwnedKind, String)>,
) -> Result<()> {
    let config = &state.config;

    let mut attachment_maps = Vec::with_capacity(submission.attachments.len());
    for (i, attachment) in submission.attachments.iter().enumerate() {
        let config_map = attachment_config_map(&config.k8s, run_id, i, attachment);
        let config_map = state.cluster.create_config_map(&config_map).await?;
        created.push((OwnedKind::ConfigMap, config_map.metadata.name.clone()));
        attachment_maps.push(config_map.metadata.name);
    }
    if !attachment_maps.is_empty() {
        debug!("Run {} attachments stored in {:?}", run_id, attachment_maps);
    }

    let pvc = state.cluster.create_pvc(&run_pvc(&config.k8s, run_id)).await?;
    created.push((OwnedKind::PersistentVolumeClaim, pvc.metadata.name.clone()));

    let job = metel_job(config, run_id, &submission.request, &attachment_maps);
    let job = state.cluster.create_job(&job).await?;
    debug!(
        "Created job {} ({})",
        job.metadata.name,
        job.metadata.uid.as_deref().unwrap_or("no uid")
    );

    adopt_resources(state, &job, &pvc.metadata.name, &attachment_maps).await;
    Ok(())
}

/// Deletes objects left behind by a failed submission.
async fn remove_resources(state: &AppState, run_id: &str, created: &[(OwnedKind, String)]) {
    for (kind, name) in created.iter().rev() {
        if let Err(e) = state.cluster.delete_owned(*kind, name).await {
            error!(
                "Failed to remove {} {} of run {}: {}",
                kind.resource(),
                name,
                run_id,
                e
            );
        }
    }
}

/// Records a new run as QUEUED, then creates its cluster resources.
///
/// The run exists before the metel job so that its first report finds
/// it. When resource creation fails the run becomes SYSTEM_ERROR and
/// whatever was already created is deleted.
pub async fn submit_run(state: &AppState, submission: Submission) -> Result<String> {
    validate_run_request(&submission.request, &state.config.plugins)?;

    let run_id = Uuid::new_v4().to_string();
    info!("Starting workflow run {}", run_id);
    state.store.insert_run(&run_id, &submission.request)?;

    let mut created = Vec::new();
    if let Err(e) = create_resources(state, &run_id, &submission, &mut created).await {
        error!("Failed to start run {}: {}", run_id, e);
        remove_resources(state, &run_id, &created).await;
        let message = format!("failed to create cluster resources: {}", e);
        if let Err(store_err) = state.store.record_error(&run_id, &message, Vec::new()) {
            error!("Failed to record failure of run {}: {}", run_id, store_err);
        }
        return Err(e);
    }

    info!("Workflow run {} queued", run_id);
    Ok(run_id)
}

/// `POST /runs`
pub async fn run_workflow(
    State(state): State<AppState>,
    multipart: Multipart,
) -> std::result::Result<Json<RunId>, ApiError> {
    let submission = read_submission(multipart).await?;
    let run_id = submit_run(&state, submission).await?;
    Ok(Json(RunId { run_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::MemoryCluster;
    use crate::config::PluginConfig;
    use crate::store::{RunStore, SqliteRunStore};
    use crate::wes::State as RunState;
    use std::sync::Arc;

    fn config() -> Config {
        Config {
            plugins: vec![PluginConfig {
                workflow_type: "CWL".to_string(),
                workflow_type_version: "v1.2".to_string(),
                workflow_engine: None,
                workflow_engine_version: "3.1".to_string(),
                plugin_url: "http://cwl:8080".to_string(),
            }],
            ..Default::default()
        }
    }

    fn request() -> RunRequest {
        RunRequest {
            workflow_url: "file:///pvc/main.cwl".to_string(),
            workflow_type: "CWL".to_string(),
            workflow_type_version: "v1.2".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_attachment_name() {
        assert_eq!(sanitize_attachment_name("main.cwl").unwrap(), "main.cwl");
        assert_eq!(sanitize_attachment_name("dir/sub/inputs.json").unwrap(), "inputs.json");
        assert_eq!(sanitize_attachment_name("C:\\wf\\main.wdl").unwrap(), "main.wdl");

        assert!(matches!(
            sanitize_attachment_name("../../etc/passwd"),
            Err(MetisError::InvalidFilePath(_))
        ));
        assert!(matches!(sanitize_attachment_name("dir/"), Err(MetisError::InvalidInput(_))));
        assert!(matches!(sanitize_attachment_name("my file.cwl"), Err(MetisError::InvalidInput(_))));
    }

    #[test]
    fn test_fields_with_bad_json_are_ignored() {
        let fields = HashMap::from([
            ("workflow_url".to_string(), "https://example.com/wf.cwl".to_string()),
            ("workflow_type".to_string(), "CWL".to_string()),
            ("workflow_type_version".to_string(), "v1.2".to_string()),
            ("workflow_engine".to_string(), String::new()),
            ("workflow_params".to_string(), "{\"x\": 1}".to_string()),
            ("tags".to_string(), "not json".to_string()),
        ]);

        let request = run_request_from_fields(&fields);
        assert_eq!(request.workflow_url, "https://example.com/wf.cwl");
        assert!(request.workflow_engine.is_none());
        assert_eq!(request.workflow_params.unwrap()["x"], 1);
        assert!(request.tags.is_none());
    }

    #[test]
    fn test_attachment_config_map() {
        let k8s = K8sConfig::default();
        let attachment = Attachment {
            file_name: "main.cwl".to_string(),
            data: b"cwlVersion: v1.2".to_vec(),
        };

        let cm = attachment_config_map(&k8s, "r1", 0, &attachment);
        assert_eq!(cm.metadata.name, "attachment-r1-0");
        assert_eq!(cm.metadata.labels["metis/component"], "attachment");
        assert_eq!(cm.binary_data["main.cwl"], "Y3dsVmVyc2lvbjogdjEuMg==");
    }

    #[test]
    fn test_run_pvc() {
        let mut k8s = K8sConfig::default();
        let pvc = run_pvc(&k8s, "r1");
        assert_eq!(pvc.metadata.name, "pvc-r1");
        assert_eq!(pvc.spec.access_modes, vec!["ReadWriteOnce"]);
        assert_eq!(pvc.spec.resources.requests["storage"], "100Mi");
        assert!(pvc.spec.storage_class_name.is_none());

        k8s.pvc_storage_class = "fast".to_string();
        assert_eq!(run_pvc(&k8s, "r1").spec.storage_class_name.as_deref(), Some("fast"));
    }

    #[test]
    fn test_metel_job_layout() {
        let mut config = config();
        config.k8s.security_context_enabled = true;
        let maps = vec!["attachment-r1-0".to_string(), "attachment-r1-1".to_string()];

        let job = metel_job(&config, "r1", &request(), &maps);
        assert_eq!(job.metadata.name, "metel-r1");
        assert_eq!(job.spec.backoff_limit, Some(0));
        assert_eq!(job.spec.ttl_seconds_after_finished, Some(300));

        let pod = &job.spec.template.spec;
        assert_eq!(pod.volumes.len(), 4);
        assert_eq!(pod.service_account_name.as_deref(), Some("metis-service-account"));
        assert!(pod.security_context.is_some());

        let init = &pod.init_containers[0];
        assert_eq!(
            init.command[2],
            "cp -L /attachments-src/attachment-r1-0/* /pvc/ && cp -L /attachments-src/attachment-r1-1/* /pvc/"
        );

        let main = &pod.containers[0];
        assert_eq!(&main.args[..3], ["/metis", "metel", "--run-id=r1"]);
        assert!(main
            .env
            .iter()
            .any(|e| e.name == "METIS_PLUGINS_FILE" && e.value == "/etc/metis/plugins.yaml"));
    }

    #[test]
    fn test_metel_job_without_attachments() {
        let job = metel_job(&config(), "r1", &request(), &[]);
        assert!(job.spec.template.spec.init_containers.is_empty());
        assert!(job.spec.template.spec.security_context.is_none());
    }

    #[tokio::test]
    async fn test_submit_run_creates_resources() {
        let cluster = Arc::new(MemoryCluster::new());
        let store = Arc::new(SqliteRunStore::in_memory().unwrap());
        let state = AppState::new(config(), store.clone(), cluster.clone());

        let submission = Submission {
            request: request(),
            attachments: vec![Attachment {
                file_name: "main.cwl".to_string(),
                data: b"class: Workflow".to_vec(),
            }],
        };
        let run_id = submit_run(&state, submission).await.unwrap();

        let doc = store.get_run(&run_id).unwrap().unwrap();
        assert_eq!(doc.state(), RunState::Queued);

        let job = cluster.job(&format!("metel-{}", run_id)).unwrap();
        let pvc = cluster.pvc(&format!("pvc-{}", run_id)).unwrap();
        assert_eq!(pvc.metadata.owner_references[0].uid, job.metadata.uid.unwrap());

        let cm = cluster.config_map(&format!("attachment-{}-0", run_id)).unwrap();
        assert_eq!(cm.metadata.owner_references[0].name, format!("metel-{}", run_id));
    }

    #[tokio::test]
    async fn test_failed_job_creation_removes_resources() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.fail_job_creation();
        let store = Arc::new(SqliteRunStore::in_memory().unwrap());
        let state = AppState::new(config(), store.clone(), cluster.clone());

        let submission = Submission {
            request: request(),
            attachments: vec![
                Attachment {
                    file_name: "main.cwl".to_string(),
                    data: b"class: Workflow".to_vec(),
                },
                Attachment {
                    file_name: "inputs.json".to_string(),
                    data: b"{}".to_vec(),
                },
            ],
        };
        let err = submit_run(&state, submission).await.unwrap_err();
        assert!(matches!(err, MetisError::Kubernetes { status: 403, .. }));

        assert!(cluster.config_map_names().is_empty());
        assert!(cluster.pvc_names().is_empty());

        let runs = store.list_runs(10, None).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].state(), RunState::SystemError);
        let log = runs[0].run_log.run_log.clone().unwrap();
        assert!(log.stderr.unwrap().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_submit_invalid_request_creates_nothing() {
        let cluster = Arc::new(MemoryCluster::new());
        let store = Arc::new(SqliteRunStore::in_memory().unwrap());
        let state = AppState::new(config(), store.clone(), cluster.clone());

        let mut bad = request();
        bad.workflow_type = "WDL".to_string();
        let err = submit_run(&state, Submission { request: bad, attachments: vec![] })
            .await
            .unwrap_err();

        assert!(matches!(err, MetisError::InvalidInput(_)));
        assert!(cluster.config_map_names().is_empty());
        assert!(store.list_runs(10, None).unwrap().is_empty());
    }
}
