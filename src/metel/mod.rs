//! Metel Agent
//!
//! One metel job runs per WES run. It prepares the workflow, launches
//! the workflow-execution job chosen by the plugin, waits for it and
//! reports everything back to the API server:
//!
//! - [`download`]: Fetching the workflow into the run's PVC
//! - [`plugin`]: Talking to the workflow engine plugin
//! - [`job`]: Building and launching the workflow-execution job
//! - [`watch`]: Waiting for the job and classifying its outcome
//! - [`staging`]: Uploading outputs after a successful run
//! - [`report`]: State updates sent to the API server
//! - [`timeline`]: Phase timings recorded as system logs

pub mod download;
pub mod job;
pub mod params;
pub mod plugin;
pub mod report;
pub mod staging;
pub mod timeline;
pub mod watch;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::api::RunUpdate;
use crate::cluster::{ClusterClient, KubeClient};
use crate::config::{select_plugin, Config, PluginConfig};
use crate::error::{MetisError, Result};
use crate::store::Completion;
use crate::wes::{self, RunRequest, State};

use self::download::downloader_for;
use self::params::MetelArgs;
use self::plugin::{
    ExecutionSpecRequest, HttpPlugin, ParseExecutionRequest, PluginClient, StagingInfo,
};
use self::report::{HttpReporter, RunReporter};
use self::staging::{provider_for, stage_outputs, StagingProvider};
use self::timeline::{Phase, PhaseTimeline};
use self::watch::{watch_job, JobOutcome, WatchSettings};

/// Runs one workflow from download to completion report.
pub struct Metel {
    config: Config,
    cluster: Arc<dyn ClusterClient>,
    reporter: Arc<dyn RunReporter>,
    staging: Arc<dyn StagingProvider>,
    watch: WatchSettings,
}

/// Runs `work` as one timeline phase, marking it completed or failed.
async fn timed<T, F>(timeline: &mut PhaseTimeline, phase: Phase, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeline.start(phase);
    let result = work.await;
    match &result {
        Ok(_) => timeline.complete(phase),
        Err(e) => {
            error!("Phase {} failed: {}", phase, e);
            timeline.fail(phase);
        }
    }
    result
}

fn final_state(outcome: JobOutcome) -> State {
    match outcome {
        JobOutcome::Succeeded => State::Complete,
        JobOutcome::FailedCommand => State::ExecutorError,
        JobOutcome::FailedSystem => State::SystemError,
    }
}

impl Metel {
    pub fn new(
        config: Config,
        cluster: Arc<dyn ClusterClient>,
        reporter: Arc<dyn RunReporter>,
        staging: Arc<dyn StagingProvider>,
    ) -> Self {
        let watch = WatchSettings::from_config(&config.metel);
        Self {
            config,
            cluster,
            reporter,
            staging,
            watch,
        }
    }

    /// Overrides the polling settings taken from the configuration.
    pub fn set_watch_settings(&mut self, settings: WatchSettings) {
        self.watch = settings;
    }

    fn staging_info(&self, run_id: &str) -> StagingInfo {
        let staging = &self.config.metel.staging;
        StagingInfo {
            staging_url: self.staging.url(run_id),
            endpoint_url: staging.url.clone(),
            parameters: staging.parameters.clone(),
        }
    }

    /// Executes a run and reports its final state.
    ///
    /// `connect` opens the client of the selected plugin.
    ///
    /// 1. Reports INITIALIZING
    /// 2. Downloads the workflow into the PVC
    /// 3. Asks the plugin for an execution spec and launches the job
    /// 4. Reports RUNNING and waits for the job
    /// 5. Stages outputs if the job succeeded
    /// 6. Has the plugin parse the job logs and reports the completion
    ///
    /// A failure anywhere before the completion is reported as a
    /// SYSTEM_ERROR carrying the phase timings, then returned.
    pub async fn run<C>(&self, run_id: &str, request: &RunRequest, connect: C) -> Result<State>
    where
        C: Fn(&PluginConfig) -> Result<Arc<dyn PluginClient>>,
    {
        self.reporter
            .report(
                run_id,
                RunUpdate::State {
                    state: State::Initializing,
                    start_time: None,
                },
            )
            .await?;

        let mut timeline = PhaseTimeline::new();
        match self.execute(run_id, request, &connect, &mut timeline).await {
            Ok(completion) => {
                let state = completion.state;
                self.reporter
                    .report(run_id, RunUpdate::Completion(completion))
                    .await?;
                info!("Run {} finished as {}", run_id, state);
                Ok(state)
            }
            Err(e) => {
                report_failure(self.reporter.as_ref(), run_id, &e, timeline.system_logs()).await;
                Err(e)
            }
        }
    }

    async fn execute<C>(
        &self,
        run_id: &str,
        request: &RunRequest,
        connect: &C,
        timeline: &mut PhaseTimeline,
    ) -> Result<Completion>
    where
        C: Fn(&PluginConfig) -> Result<Arc<dyn PluginClient>>,
    {
        let k8s = &self.config.k8s;
        let mount = Path::new(&k8s.pvc_mount_path);

        let plugin_config = select_plugin(&self.config.plugins, request)?;
        info!(
            "Run {} uses plugin {} for {} {}",
            run_id, plugin_config.plugin_url, request.workflow_type, request.workflow_type_version
        );
        let plugin = connect(plugin_config)?;
        let staging_info = self.staging_info(run_id);

        let primary = timed(timeline, Phase::Download, async {
            downloader_for(&request.workflow_url)?
                .download(&request.workflow_url, mount, &request.workflow_type)
                .await
        })
        .await?;
        let primary = primary.to_string_lossy();

        let spec = timed(
            timeline,
            Phase::Spec,
            plugin.execution_spec(&ExecutionSpecRequest {
                wes_request: request,
                staging_info: &staging_info,
                primary_descriptor: &primary,
            }),
        )
        .await?;

        timed(
            timeline,
            Phase::Launch,
            job::launch_job(self.cluster.as_ref(), k8s, run_id, &spec),
        )
        .await?;

        self.reporter
            .report(
                run_id,
                RunUpdate::State {
                    state: State::Running,
                    start_time: Some(wes::timestamp()),
                },
            )
            .await?;

        let job_name = k8s.we_job_name(run_id);
        let result = timed(
            timeline,
            Phase::Watch,
            watch_job(self.cluster.as_ref(), &job_name, &self.watch),
        )
        .await;
        let result = match result {
            Err(e @ MetisError::JobNotFinished(_)) => {
                warn!("Job {} did not finish in time, deleting it", job_name);
                if let Err(delete_err) = self.cluster.delete_job(&job_name).await {
                    error!("Failed to delete job {}: {}", job_name, delete_err);
                }
                return Err(e);
            }
            result => result?,
        };

        if result.status == JobOutcome::Succeeded && !spec.outputs_to_stage.is_empty() {
            let staged = timed(
                timeline,
                Phase::Stage,
                stage_outputs(
                    self.staging.as_ref(),
                    mount,
                    &self.config.metel.staging.prefix,
                    run_id,
                    &spec.outputs_to_stage,
                ),
            )
            .await;
            match staged {
                Ok(count) => info!("Staged {} files of run {}", count, run_id),
                Err(e) => warn!("Outputs of run {} were not staged: {}", run_id, e),
            }
        }

        let parsed = timed(
            timeline,
            Phase::Parse,
            plugin.parse_execution(&ParseExecutionRequest {
                job_logs: &result.logs,
                staging_info: &staging_info,
                state: result.status.parse_state(),
            }),
        )
        .await?;

        let mut run_log = parsed.run_log.unwrap_or_default();
        let mut system_logs = run_log.system_logs.take().unwrap_or_default();
        if !result.message.is_empty() {
            system_logs.push(result.message.clone());
        }
        system_logs.extend(timeline.system_logs());
        run_log.system_logs = Some(system_logs);
        if run_log.end_time.is_none() {
            run_log.end_time = Some(wes::timestamp());
        }

        Ok(Completion {
            state: final_state(result.status),
            run_log: Some(run_log),
            task_logs: parsed.task_logs,
            outputs: parsed.outputs,
        })
    }
}

async fn report_failure(
    reporter: &dyn RunReporter,
    run_id: &str,
    failure: &MetisError,
    system_logs: Vec<String>,
) {
    error!("Run {} failed: {}", run_id, failure);
    let update = RunUpdate::Failure {
        message: failure.to_string(),
        system_logs,
    };
    if let Err(e) = reporter.report(run_id, update).await {
        error!("Failed to report failure of run {}: {}", run_id, e);
    }
}

/// Entry point of `metis metel`: wires the real cluster, reporter,
/// staging provider and HTTP plugins, then runs the workflow.
pub async fn run_metel(config: Config, args: MetelArgs) -> Result<State> {
    let run_id = args.run_id.trim().to_string();
    if run_id.is_empty() {
        return Err(MetisError::InvalidInput("--run-id must not be empty".to_string()));
    }
    let request = args.into_run_request();
    let reporter: Arc<dyn RunReporter> = Arc::new(HttpReporter::new(&config.metel.api_url)?);

    let wired = KubeClient::from_config(&config.k8s).and_then(|cluster| {
        let staging = provider_for(&config.metel.staging)?;
        Ok((cluster, staging))
    });
    let (cluster, staging) = match wired {
        Ok(wired) => wired,
        Err(e) => {
            report_failure(reporter.as_ref(), &run_id, &e, Vec::new()).await;
            return Err(e);
        }
    };

    let timeout = Duration::from_secs(config.metel.plugin_timeout_secs);
    let metel = Metel::new(config, Arc::new(cluster), reporter, Arc::from(staging));
    metel
        .run(&run_id, &request, |plugin| {
            Ok(Arc::new(HttpPlugin::new(plugin, timeout)?) as Arc<dyn PluginClient>)
        })
        .await
}
