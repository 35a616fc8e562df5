//! Run progress reporting from metel back to the API server.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::api::RunUpdate;
use crate::error::{MetisError, Result};

/// Receives progress of one run.
#[async_trait]
pub trait RunReporter: Send + Sync {
    async fn report(&self, run_id: &str, update: RunUpdate) -> Result<()>;
}

/// Sends updates to `PATCH {api_url}/internal/runs/{run_id}`.
pub struct HttpReporter {
    http: reqwest::Client,
    api_url: String,
}

impl HttpReporter {
    pub fn new(api_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RunReporter for HttpReporter {
    async fn report(&self, run_id: &str, update: RunUpdate) -> Result<()> {
        let url = format!("{}/internal/runs/{}", self.api_url, run_id);
        debug!("Reporting {:?} to {}", update, url);

        let response = self.http.patch(&url).json(&update).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(MetisError::Report(format!(
            "{} answered {}: {}",
            url,
            status,
            body.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{router, AppState};
    use crate::cluster::fake::MemoryCluster;
    use crate::config::Config;
    use crate::store::{RunStore, SqliteRunStore};
    use crate::wes::{RunRequest, State};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reports_reach_the_store() {
        let store = Arc::new(SqliteRunStore::in_memory().unwrap());
        store.insert_run("r1", &RunRequest::default()).unwrap();
        let app = router(AppState::new(
            Config::default(),
            store.clone(),
            Arc::new(MemoryCluster::new()),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let reporter = HttpReporter::new(&format!("http://{}/", addr)).unwrap();
        reporter
            .report(
                "r1",
                RunUpdate::State {
                    state: State::Initializing,
                    start_time: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.get_run("r1").unwrap().unwrap().state(), State::Initializing);

        let err = reporter
            .report(
                "r1",
                RunUpdate::State {
                    state: State::Queued,
                    start_time: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("409"));
    }
}
