//! In-memory cluster used by tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{MetisError, Result};

use super::resources::{ConfigMap, Job, JobStatus, OwnerReference, PersistentVolumeClaim, Pod};
use super::{ClusterClient, OwnedKind};

#[derive(Default)]
struct Objects {
    pvcs: BTreeMap<String, PersistentVolumeClaim>,
    config_maps: BTreeMap<String, ConfigMap>,
    jobs: BTreeMap<String, Job>,
    deleted_jobs: Vec<String>,
    pods: Vec<(String, Pod)>,
    logs: BTreeMap<String, String>,
    next_uid: u32,
    fail_jobs: bool,
}

/// Records every object created and serves canned pods and logs.
#[derive(Default)]
pub struct MemoryCluster {
    objects: Mutex<Objects>,
}

fn not_found(kind: &str, name: &str) -> MetisError {
    MetisError::Kubernetes {
        status: 404,
        message: format!("{} \"{}\" not found", kind, name),
    }
}

fn conflict(kind: &str, name: &str) -> MetisError {
    MetisError::Kubernetes {
        status: 409,
        message: format!("{} \"{}\" already exists", kind, name),
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pvc(&self, name: &str) -> Option<PersistentVolumeClaim> {
        self.objects.lock().unwrap().pvcs.get(name).cloned()
    }

    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.objects.lock().unwrap().config_maps.get(name).cloned()
    }

    pub fn config_map_names(&self) -> Vec<String> {
        self.objects.lock().unwrap().config_maps.keys().cloned().collect()
    }

    pub fn job(&self, name: &str) -> Option<Job> {
        self.objects.lock().unwrap().jobs.get(name).cloned()
    }

    pub fn pvc_names(&self) -> Vec<String> {
        self.objects.lock().unwrap().pvcs.keys().cloned().collect()
    }

    /// Makes every later `create_job` fail.
    pub fn fail_job_creation(&self) {
        self.objects.lock().unwrap().fail_jobs = true;
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.objects.lock().unwrap().deleted_jobs.clone()
    }

    /// Adds a job directly, as if created by someone else.
    pub fn insert_job(&self, job: Job) {
        let mut objects = self.objects.lock().unwrap();
        objects.jobs.insert(job.metadata.name.clone(), job);
    }

    pub fn set_job_status(&self, name: &str, status: JobStatus) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(job) = objects.jobs.get_mut(name) {
            job.status = Some(status);
        }
    }

    /// Registers a pod returned for `label_selector`, with its log.
    pub fn add_pod(&self, label_selector: &str, pod: Pod, log: &str) {
        let mut objects = self.objects.lock().unwrap();
        objects.logs.insert(pod.metadata.name.clone(), log.to_string());
        objects.pods.push((label_selector.to_string(), pod));
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let mut objects = self.objects.lock().unwrap();
        if objects.pvcs.contains_key(&pvc.metadata.name) {
            return Err(conflict("persistentvolumeclaims", &pvc.metadata.name));
        }
        objects.pvcs.insert(pvc.metadata.name.clone(), pvc.clone());
        Ok(pvc.clone())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let mut objects = self.objects.lock().unwrap();
        if objects.config_maps.contains_key(&config_map.metadata.name) {
            return Err(conflict("configmaps", &config_map.metadata.name));
        }
        objects
            .config_maps
            .insert(config_map.metadata.name.clone(), config_map.clone());
        Ok(config_map.clone())
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let mut objects = self.objects.lock().unwrap();
        if objects.fail_jobs {
            return Err(MetisError::Kubernetes {
                status: 403,
                message: format!("jobs.batch \"{}\" is forbidden", job.metadata.name),
            });
        }
        if objects.jobs.contains_key(&job.metadata.name) {
            return Err(conflict("jobs.batch", &job.metadata.name));
        }
        objects.next_uid += 1;
        let mut created = job.clone();
        created.metadata.uid = Some(format!("uid-{}", objects.next_uid));
        objects.jobs.insert(job.metadata.name.clone(), created.clone());
        Ok(created)
    }

    async fn get_job(&self, name: &str) -> Result<Job> {
        self.job(name).ok_or_else(|| not_found("jobs.batch", name))
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        objects.jobs.remove(name);
        objects.deleted_jobs.push(name.to_string());
        Ok(())
    }

    async fn delete_owned(&self, kind: OwnedKind, name: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        match kind {
            OwnedKind::PersistentVolumeClaim => {
                objects.pvcs.remove(name);
            }
            OwnedKind::ConfigMap => {
                objects.config_maps.remove(name);
            }
        }
        Ok(())
    }

    async fn set_owner_reference(
        &self,
        kind: OwnedKind,
        name: &str,
        owner: &OwnerReference,
    ) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let metadata = match kind {
            OwnedKind::PersistentVolumeClaim => objects.pvcs.get_mut(name).map(|o| &mut o.metadata),
            OwnedKind::ConfigMap => objects.config_maps.get_mut(name).map(|o| &mut o.metadata),
        };
        let metadata = metadata.ok_or_else(|| not_found(kind.resource(), name))?;
        metadata.owner_references = vec![owner.clone()];
        Ok(())
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .pods
            .iter()
            .filter(|(selector, _)| selector == label_selector)
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn pod_logs(&self, pod_name: &str) -> Result<String> {
        let objects = self.objects.lock().unwrap();
        objects
            .logs
            .get(pod_name)
            .cloned()
            .ok_or_else(|| not_found("pods", pod_name))
    }
}
