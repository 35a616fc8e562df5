//! Kubernetes REST Client
//!
//! Talks to the API server over HTTPS with a bearer token. Credentials
//! come from the pod's service account when `k8s.config_path` is empty,
//! otherwise from the current context of a kubeconfig file.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine as _;
use log::{debug, info, warn};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::config::K8sConfig;
use crate::error::{MetisError, Result};

use super::resources::{ConfigMap, Job, OwnerReference, PersistentVolumeClaim, Pod, PodList, Status};
use super::{ClusterClient, OwnedKind};

/// Service account mount inside every pod.
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Connection settings for the API server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KubeSettings {
    pub server: String,
    pub token: Option<String>,
    /// PEM encoded cluster CA
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
}

impl KubeSettings {
    /// Settings from the service account mounted into the pod.
    pub fn in_cluster() -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            MetisError::Config("KUBERNETES_SERVICE_HOST is not set; not running in a cluster".to_string())
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let dir = Path::new(SERVICE_ACCOUNT_DIR);

        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };

        Ok(Self {
            server: format!("https://{}:{}", host, port),
            token: Some(fs::read_to_string(dir.join("token"))?.trim().to_string()),
            ca_pem: Some(fs::read(dir.join("ca.crt"))?),
            insecure_skip_tls_verify: false,
        })
    }

    /// Settings from the current context of a kubeconfig file.
    pub fn from_kubeconfig(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse_kubeconfig(&content, base_dir)
    }

    fn parse_kubeconfig(content: &str, base_dir: &Path) -> Result<Self> {
        let kubeconfig: Kubeconfig = serde_yaml::from_str(content)?;

        let context_name = kubeconfig.current_context.as_str();
        let context = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| {
                MetisError::Config(format!("kubeconfig context '{}' not found", context_name))
            })?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                MetisError::Config(format!("kubeconfig cluster '{}' not found", context.cluster))
            })?;

        let ca_pem = match (&cluster.certificate_authority_data, &cluster.certificate_authority) {
            (Some(data), _) => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|e| MetisError::Config(format!("invalid CA data: {}", e)))?,
            ),
            (None, Some(file)) => Some(fs::read(base_dir.join(file))?),
            (None, None) => None,
        };

        let user = kubeconfig
            .users
            .iter()
            .find(|u| u.name == context.user)
            .map(|u| &u.user);
        let token = match user {
            Some(KubeUser { token: Some(token), .. }) => Some(token.clone()),
            Some(KubeUser { token_file: Some(file), .. }) => {
                Some(fs::read_to_string(base_dir.join(file))?.trim().to_string())
            }
            _ => {
                warn!("kubeconfig user '{}' has no bearer token", context.user);
                None
            }
        };

        Ok(Self {
            server: cluster.server.clone(),
            token,
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        })
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", default)]
struct Kubeconfig {
    current_context: String,
    contexts: Vec<NamedContext>,
    clusters: Vec<NamedCluster>,
    users: Vec<NamedUser>,
}

#[derive(Deserialize, Debug)]
struct NamedContext {
    name: String,
    context: KubeContext,
}

#[derive(Deserialize, Debug)]
struct KubeContext {
    cluster: String,
    #[serde(default)]
    user: String,
}

#[derive(Deserialize, Debug)]
struct NamedCluster {
    name: String,
    cluster: KubeCluster,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
struct KubeCluster {
    server: String,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    certificate_authority: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Deserialize, Debug)]
struct NamedUser {
    name: String,
    user: KubeUser,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct KubeUser {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<String>,
}

/// Namespaced client for the Kubernetes API.
pub struct KubeClient {
    http: reqwest::Client,
    server: String,
    namespace: String,
    token: Option<String>,
}

impl KubeClient {
    pub fn new(settings: KubeSettings, namespace: &str) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = &settings.ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        if settings.insecure_skip_tls_verify {
            warn!("TLS verification of the Kubernetes API server is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            http: builder.build()?,
            server: settings.server.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            token: settings.token,
        })
    }

    /// Builds a client from the service configuration.
    pub fn from_config(config: &K8sConfig) -> Result<Self> {
        let settings = if config.config_path.is_empty() {
            info!("Using in-cluster Kubernetes configuration");
            KubeSettings::in_cluster()?
        } else {
            info!("Using kubeconfig from {}", config.config_path);
            KubeSettings::from_kubeconfig(Path::new(&config.config_path))?
        };
        Self::new(settings, &config.namespace)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn core_path(&self, resource: &str) -> String {
        format!("/api/v1/namespaces/{}/{}", self.namespace, resource)
    }

    fn jobs_path(&self) -> String {
        format!("/apis/batch/v1/namespaces/{}/jobs", self.namespace)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.server, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(api_error(status.as_u16(), &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        Ok(self.send(request).await?.json::<T>().await?)
    }
}

/// Turns an error answer into a [`MetisError::Kubernetes`].
fn api_error(status: u16, body: &str) -> MetisError {
    let message = serde_json::from_str::<Status>(body)
        .ok()
        .map(|s| s.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    MetisError::Kubernetes { status, message }
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        debug!("Creating PVC {}", pvc.metadata.name);
        let path = self.core_path("persistentvolumeclaims");
        self.send_json(self.request(Method::POST, &path).json(pvc)).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        debug!("Creating config map {}", config_map.metadata.name);
        let path = self.core_path("configmaps");
        self.send_json(self.request(Method::POST, &path).json(config_map)).await
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        debug!("Creating job {}", job.metadata.name);
        let path = self.jobs_path();
        self.send_json(self.request(Method::POST, &path).json(job)).await
    }

    async fn get_job(&self, name: &str) -> Result<Job> {
        let path = format!("{}/{}", self.jobs_path(), name);
        self.send_json(self.request(Method::GET, &path)).await
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        let path = format!("{}/{}", self.jobs_path(), name);
        let request = self
            .request(Method::DELETE, &path)
            .query(&[("propagationPolicy", "Background")]);

        match self.send(request).await {
            Ok(_) => {
                info!("Deleted job {}", name);
                Ok(())
            }
            Err(e) if e.is_kube_not_found() => {
                debug!("Job {} already gone", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_owned(&self, kind: OwnedKind, name: &str) -> Result<()> {
        let path = format!("{}/{}", self.core_path(kind.resource()), name);
        match self.send(self.request(Method::DELETE, &path)).await {
            Ok(_) => {
                info!("Deleted {} {}", kind.resource(), name);
                Ok(())
            }
            Err(e) if e.is_kube_not_found() => {
                debug!("{} {} already gone", kind.resource(), name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn set_owner_reference(
        &self,
        kind: OwnedKind,
        name: &str,
        owner: &OwnerReference,
    ) -> Result<()> {
        let path = format!("{}/{}", self.core_path(kind.resource()), name);
        let patch = json!({ "metadata": { "ownerReferences": [owner] } });
        let request = self
            .request(Method::PATCH, &path)
            .header(reqwest::header::CONTENT_TYPE, "application/merge-patch+json")
            .body(patch.to_string());

        self.send(request).await?;
        debug!("Set owner {} on {} {}", owner.name, kind.resource(), name);
        Ok(())
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>> {
        let path = self.core_path("pods");
        let request = self
            .request(Method::GET, &path)
            .query(&[("labelSelector", label_selector)]);
        let list: PodList = self.send_json(request).await?;
        Ok(list.items)
    }

    async fn pod_logs(&self, pod_name: &str) -> Result<String> {
        let path = format!("{}/{}/log", self.core_path("pods"), pod_name);
        Ok(self.send(self.request(Method::GET, &path)).await?.text().await?)
    }
}
