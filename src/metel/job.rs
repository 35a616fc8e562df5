//! Workflow-Execution Job
//!
//! Builds and launches the job that runs the workflow engine in the
//! image chosen by the plugin. Files the plugin wants mounted travel in
//! two config maps: one for absolute paths ("root") and one for paths
//! inside the run's PVC ("project").

use std::collections::BTreeMap;

use log::{error, info};

use crate::cluster::resources::run_labels;
use crate::cluster::{
    ClusterClient, ConfigMap, Container, EnvVar, Job, JobSpec, ObjectMeta, OwnedKind,
    OwnerReference, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use crate::config::K8sConfig;
use crate::error::{MetisError, Result};

use super::plugin::ExecutionSpec;

const ROOT_VOLUME: &str = "root-files";
const PROJECT_VOLUME: &str = "project-files";

/// Which of the two file groups a config map holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountGroup {
    Root,
    Project,
}

impl MountGroup {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Project => "project",
        }
    }

    fn volume(&self) -> &'static str {
        match self {
            Self::Root => ROOT_VOLUME,
            Self::Project => PROJECT_VOLUME,
        }
    }

    fn mount_path(&self, k8s: &K8sConfig, path: &str) -> String {
        match self {
            Self::Root => format!("/{}", path.trim_start_matches('/')),
            Self::Project => format!(
                "{}/{}",
                k8s.pvc_mount_path.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
        }
    }
}

/// Config map key for a mounted file path (`a/b.txt` becomes `a__b.txt`).
pub fn file_key(path: &str) -> String {
    path.trim_matches('/').replace('/', "__")
}

/// A config map ready to create plus the mounts that expose its files.
#[derive(Debug, Clone, PartialEq)]
pub struct MountedFiles {
    pub config_map: ConfigMap,
    pub mounts: Vec<VolumeMount>,
}

/// Packs one file group into a config map. Empty groups produce nothing.
///
/// Two paths that map to the same key (`a/b.txt` and `a__b.txt`) would
/// overwrite each other in the config map, so they are rejected.
pub fn mounted_files(
    k8s: &K8sConfig,
    run_id: &str,
    group: MountGroup,
    files: &BTreeMap<String, String>,
) -> Result<Option<MountedFiles>> {
    if files.is_empty() {
        return Ok(None);
    }

    let name = format!("{}-{}", k8s.we_job_name(run_id), group.suffix());
    let mut config_map = ConfigMap::new(
        ObjectMeta::named(name, &k8s.namespace).with_labels(run_labels(run_id, &k8s.we_prefix)),
    );
    let mut mounts = Vec::with_capacity(files.len());

    for (path, content) in files {
        let key = file_key(path);
        if config_map.data.insert(key.clone(), content.clone()).is_some() {
            return Err(MetisError::InvalidInput(format!(
                "{} mount file {} collides with another file on key {}",
                group.suffix(),
                path,
                key
            )));
        }
        mounts.push(VolumeMount {
            sub_path: Some(key),
            read_only: Some(true),
            ..VolumeMount::new(group.volume(), group.mount_path(k8s, path))
        });
    }

    Ok(Some(MountedFiles { config_map, mounts }))
}

/// The workflow-execution job for a run.
pub fn build_job(
    k8s: &K8sConfig,
    run_id: &str,
    spec: &ExecutionSpec,
    root: Option<&MountedFiles>,
    project: Option<&MountedFiles>,
) -> Job {
    let name = k8s.we_job_name(run_id);

    let mut volumes = vec![Volume::from_pvc(&k8s.common_pvc_volume_name, k8s.pvc_name(run_id))];
    let mut volume_mounts = vec![VolumeMount::new(&k8s.common_pvc_volume_name, &k8s.pvc_mount_path)];
    for (group, files) in [(MountGroup::Root, root), (MountGroup::Project, project)] {
        if let Some(files) = files {
            volumes.push(Volume::from_config_map(
                group.volume(),
                &files.config_map.metadata.name,
            ));
            volume_mounts.extend(files.mounts.iter().cloned());
        }
    }

    let container = Container {
        name: name.clone(),
        image: spec.image.clone(),
        command: spec.command.clone(),
        working_dir: Some(k8s.pvc_mount_path.clone()),
        env: spec
            .environment
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
        volume_mounts,
        image_pull_policy: Some(k8s.image_pull_policy.clone()),
        ..Default::default()
    };

    Job::new(
        ObjectMeta::named(name, &k8s.namespace).with_labels(run_labels(run_id, &k8s.we_prefix)),
        JobSpec {
            ttl_seconds_after_finished: Some(k8s.job_ttl),
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: run_labels(run_id, &k8s.we_prefix),
                    ..Default::default()
                }),
                spec: PodSpec {
                    containers: vec![container],
                    volumes,
                    restart_policy: Some(k8s.restart_policy.clone()),
                    service_account_name: Some(k8s.service_account_name.clone()),
                    ..Default::default()
                },
            },
        },
    )
}

/// Creates the config maps and the job, then hands the maps to the job.
pub async fn launch_job(
    cluster: &dyn ClusterClient,
    k8s: &K8sConfig,
    run_id: &str,
    spec: &ExecutionSpec,
) -> Result<Job> {
    let root = mounted_files(k8s, run_id, MountGroup::Root, &spec.root_mount_files)?;
    let project = mounted_files(k8s, run_id, MountGroup::Project, &spec.project_mount_files)?;

    for files in root.iter().chain(project.iter()) {
        cluster.create_config_map(&files.config_map).await?;
    }

    let job = build_job(k8s, run_id, spec, root.as_ref(), project.as_ref());
    let job = cluster.create_job(&job).await?;
    info!("Launched workflow-execution job {}", job.metadata.name);

    let owner = OwnerReference::controlled_by(&job);
    for files in root.iter().chain(project.iter()) {
        let name = &files.config_map.metadata.name;
        if let Err(e) = cluster
            .set_owner_reference(OwnedKind::ConfigMap, name, &owner)
            .await
        {
            error!("Failed to set owner {} on config map {}: {}", owner.name, name, e);
        }
    }

    Ok(job)
}
