//! Cluster Module
//!
//! Kubernetes execution units for workflow runs: the per-run PVC, the
//! metel and workflow-execution jobs, and the config maps feeding them.
//!
//! # Structure
//!
//! - [`resources`]: Typed manifests
//! - [`kube`]: REST client for the Kubernetes API server

pub mod kube;
pub mod resources;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::error::Result;

pub use kube::KubeClient;
pub use resources::{
    ConfigMap, Container, EnvVar, Job, JobSpec, ObjectMeta, OwnerReference,
    PersistentVolumeClaim, Pod, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};

/// Kinds of objects that can be handed to a job owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedKind {
    PersistentVolumeClaim,
    ConfigMap,
}

impl OwnedKind {
    /// Collection name in the core/v1 API.
    pub fn resource(&self) -> &'static str {
        match self {
            Self::PersistentVolumeClaim => "persistentvolumeclaims",
            Self::ConfigMap => "configmaps",
        }
    }
}

/// Operations Metis performs against the cluster, scoped to one namespace.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    async fn create_job(&self, job: &Job) -> Result<Job>;

    async fn get_job(&self, name: &str) -> Result<Job>;

    /// Deletes a job and its pods. A job that no longer exists is not an error.
    async fn delete_job(&self, name: &str) -> Result<()>;

    /// Deletes a PVC or config map. One that no longer exists is not an error.
    async fn delete_owned(&self, kind: OwnedKind, name: &str) -> Result<()>;

    /// Makes `owner` the controller of the named PVC or config map.
    async fn set_owner_reference(
        &self,
        kind: OwnedKind,
        name: &str,
        owner: &OwnerReference,
    ) -> Result<()>;

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>>;

    async fn pod_logs(&self, pod_name: &str) -> Result<String>;
}
