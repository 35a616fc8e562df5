//! Job Watch
//!
//! Polls the workflow-execution job until it finishes, then collects
//! the logs of its pods and classifies the outcome.

use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::{sleep, Instant};

use crate::cluster::{ClusterClient, Job};
use crate::config::MetelConfig;
use crate::error::{MetisError, Result};

use super::plugin::ParseState;

/// How a finished job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    /// The workflow command exited with an error
    FailedCommand,
    /// Kubernetes could not run the container (image pull, scheduling, ...)
    FailedSystem,
}

impl JobOutcome {
    pub fn parse_state(&self) -> ParseState {
        match self {
            Self::Succeeded => ParseState::Success,
            Self::FailedCommand | Self::FailedSystem => ParseState::Failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub status: JobOutcome,
    pub logs: String,
    pub message: String,
}

/// Timing of the watch loop.
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub get_attempts: u32,
    pub retry_delay: Duration,
}

impl WatchSettings {
    pub fn from_config(config: &MetelConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(config.watch_timeout_secs),
            ..Self::default()
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(86_400),
            get_attempts: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

fn job_selector(job_name: &str) -> String {
    format!("job-name={}", job_name)
}

/// Fetches the job, retrying while it may not be visible yet.
async fn get_job_with_retry(
    cluster: &dyn ClusterClient,
    name: &str,
    settings: &WatchSettings,
) -> Result<Job> {
    let mut attempt = 1;
    loop {
        match cluster.get_job(name).await {
            Ok(job) => return Ok(job),
            Err(e) if attempt < settings.get_attempts => {
                debug!("Job {} not readable yet (attempt {}): {}", name, attempt, e);
                attempt += 1;
                sleep(settings.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Concatenates the logs of every pod of a job.
///
/// Read failures are written into the text instead of failing the call.
pub async fn collect_logs(cluster: &dyn ClusterClient, job_name: &str) -> Result<String> {
    let pods = cluster.list_pods(&job_selector(job_name)).await?;
    if pods.is_empty() {
        warn!("No pods found for job {}", job_name);
        return Ok(String::new());
    }

    let mut logs = String::new();
    for pod in &pods {
        logs.push_str(&format!("--- Job Logs (pod: {}) ---\n", pod.metadata.name));
        match cluster.pod_logs(&pod.metadata.name).await {
            Ok(text) => logs.push_str(&text),
            Err(e) => logs.push_str(&format!("failed to get pod logs: {}\n", e)),
        }
        logs.push_str("--------------------------\n");
    }
    Ok(logs)
}

async fn logs_or_empty(cluster: &dyn ClusterClient, job_name: &str) -> String {
    collect_logs(cluster, job_name).await.unwrap_or_else(|e| {
        error!("Failed to get logs for job {}: {}", job_name, e);
        String::new()
    })
}

/// Tells a system failure from a command failure.
async fn analyze_failure(cluster: &dyn ClusterClient, job_name: &str) -> JobResult {
    let logs = logs_or_empty(cluster, job_name).await;

    let pods = match cluster.list_pods(&job_selector(job_name)).await {
        Ok(pods) => pods,
        Err(e) => {
            warn!("Failed to list pods of job {}: {}", job_name, e);
            Vec::new()
        }
    };
    let waiting = pods.first().and_then(|pod| {
        pod.container_statuses()
            .iter()
            .find_map(|status| status.waiting().map(|w| (status.name.clone(), w.clone())))
    });

    match waiting {
        Some((container, state)) => JobResult {
            status: JobOutcome::FailedSystem,
            logs,
            message: format!(
                "Container {} is in a waiting state: {} - {}",
                container, state.reason, state.message
            ),
        },
        None => JobResult {
            status: JobOutcome::FailedCommand,
            logs,
            message: "Job failed due to command execution error.".to_string(),
        },
    }
}

/// Result for a finished job, `None` while it is still running.
async fn finished(cluster: &dyn ClusterClient, job: &Job) -> Option<JobResult> {
    let name = &job.metadata.name;
    if job.succeeded() {
        return Some(JobResult {
            status: JobOutcome::Succeeded,
            logs: logs_or_empty(cluster, name).await,
            message: String::new(),
        });
    }
    if job.failed() {
        return Some(analyze_failure(cluster, name).await);
    }
    None
}

/// Waits for the named job to finish.
pub async fn watch_job(
    cluster: &dyn ClusterClient,
    job_name: &str,
    settings: &WatchSettings,
) -> Result<JobResult> {
    let job = get_job_with_retry(cluster, job_name, settings).await?;
    if let Some(result) = finished(cluster, &job).await {
        return Ok(result);
    }

    info!("Watching job {}", job_name);
    let deadline = Instant::now() + settings.timeout;
    while Instant::now() + settings.poll_interval < deadline {
        sleep(settings.poll_interval).await;
        match cluster.get_job(job_name).await {
            Ok(job) => {
                if let Some(result) = finished(cluster, &job).await {
                    return Ok(result);
                }
            }
            Err(e) => warn!("Failed to poll job {}: {}", job_name, e),
        }
    }

    warn!("Watch of job {} timed out, checking status directly", job_name);
    let job = cluster.get_job(job_name).await?;
    finished(cluster, &job)
        .await
        .ok_or_else(|| MetisError::JobNotFinished(job_name.to_string()))
}
