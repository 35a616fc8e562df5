//! `http://` and `https://` workflows: a single descriptor file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info};
use url::Url;

use crate::error::{MetisError, Result};

use super::{safe_join, Downloader};

/// Name used when the URL path has no usable last segment.
const FALLBACK_NAME: &str = "workflow";

pub struct HttpDownloader {
    http: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

/// File name of a download: the last non-empty path segment.
pub fn file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .filter(|s| *s != "." && *s != "..")
        .unwrap_or(FALLBACK_NAME)
        .to_string()
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        _descriptor_type: &str,
    ) -> Result<PathBuf> {
        let parsed =
            Url::parse(url).map_err(|e| MetisError::InvalidInput(format!("{}: {}", url, e)))?;
        let target = safe_join(destination, &file_name(&parsed))?;

        debug!("Fetching {}", url);
        let bytes = self
            .http
            .get(parsed)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        tokio::fs::create_dir_all(destination).await?;
        tokio::fs::write(&target, &bytes).await?;
        info!("Downloaded {} ({} bytes) to {}", url, bytes.len(), target.display());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    async fn serve() -> String {
        let router = Router::new()
            .route("/wf/main.cwl", get(|| async { "cwlVersion: v1.2\n" }))
            .route(
                "/missing.cwl",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "no") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_file_name() {
        let name = |u: &str| file_name(&Url::parse(u).unwrap());
        assert_eq!(name("https://example.com/a/b/main.wdl"), "main.wdl");
        assert_eq!(name("https://example.com/a/b/"), "b");
        assert_eq!(name("https://example.com"), "workflow");
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let base = serve().await;
        let dir = TempDir::new().unwrap();

        let path = HttpDownloader::new()
            .download(&format!("{}/wf/main.cwl", base), dir.path(), "CWL")
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("main.cwl"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "cwlVersion: v1.2\n");
    }

    #[tokio::test]
    async fn test_error_status() {
        let base = serve().await;
        let dir = TempDir::new().unwrap();

        let err = HttpDownloader::new()
            .download(&format!("{}/missing.cwl", base), dir.path(), "CWL")
            .await
            .unwrap_err();
        assert!(matches!(err, MetisError::Http(_)));
        assert!(!dir.path().join("missing.cwl").exists());
    }
}
