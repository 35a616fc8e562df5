//! `trs://` workflows from a GA4GH Tool Registry Service.
//!
//! `trs://{host}[/{path}]/{tool_id}/{version}` downloads every file of
//! the tool version:
//!
//! 1. `GET https://{host}/{path}/tools/{id}/versions/{v}/{type}/files`
//! 2. `GET .../{type}/descriptor/{relative_path}` for each file, which
//!    carries either the content inline or a URL to fetch it from
//!
//! The `PRIMARY_DESCRIPTOR` entry is the returned path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{MetisError, Result};

use super::{safe_join, Downloader};

const PRIMARY_DESCRIPTOR: &str = "PRIMARY_DESCRIPTOR";

/// Parts of a `trs://` URL.
#[derive(Debug, Clone, PartialEq)]
pub struct TrsLocation {
    /// Host plus optional base path, without scheme
    pub server: String,
    pub tool_id: String,
    pub version: String,
}

impl TrsLocation {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("trs://")
            .ok_or_else(|| MetisError::Trs(format!("not a TRS URL: {}", url)))?;
        let parts: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
        if parts.len() < 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(MetisError::Trs(format!(
                "expected trs://host/tool_id/version, got {}",
                url
            )));
        }

        let n = parts.len();
        Ok(Self {
            server: parts[..n - 2].join("/"),
            tool_id: parts[n - 2].to_string(),
            version: parts[n - 1].to_string(),
        })
    }

    fn version_url(&self, scheme: &str, descriptor_type: &str) -> String {
        format!(
            "{}://{}/tools/{}/versions/{}/{}",
            scheme, self.server, self.tool_id, self.version, descriptor_type
        )
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ToolFile {
    pub path: String,
    pub file_type: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct FileWrapper {
    pub content: Option<String>,
    pub url: Option<String>,
}

pub struct TrsDownloader {
    http: reqwest::Client,
    scheme: String,
}

impl TrsDownloader {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            scheme: "https".to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("TRS request {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MetisError::Trs(format!("{}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MetisError::Trs(format!("{} answered {}", url, status)));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| MetisError::Trs(format!("unreadable answer from {}: {}", url, e)))
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MetisError::Trs(format!("{}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MetisError::Trs(format!("{} answered {}", url, status)));
        }
        Ok(response.text().await?)
    }

    async fn download_file(&self, base: &str, file: &ToolFile, destination: &Path) -> Result<()> {
        let target = safe_join(destination, &file.path)?;
        let wrapper: FileWrapper = self
            .get_json(&format!("{}/descriptor/{}", base, file.path.trim_start_matches('/')))
            .await?;

        let content = match (wrapper.content, wrapper.url) {
            (Some(content), _) if !content.is_empty() => content,
            (_, Some(url)) if !url.is_empty() => self.fetch_text(&url).await?,
            _ => {
                return Err(MetisError::Trs(format!(
                    "descriptor {} has neither content nor url",
                    file.path
                )))
            }
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        debug!("Wrote {}", target.display());
        Ok(())
    }
}

impl Default for TrsDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Downloader for TrsDownloader {
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        descriptor_type: &str,
    ) -> Result<PathBuf> {
        let location = TrsLocation::parse(url)?;
        let base = location.version_url(&self.scheme, descriptor_type);

        let files: Vec<ToolFile> = self.get_json(&format!("{}/files", base)).await?;
        if files.is_empty() {
            return Err(MetisError::Trs(format!("no files listed for {}", url)));
        }

        let mut primary = None;
        for file in &files {
            if file.path.is_empty() {
                warn!("Skipping TRS file without path ({})", file.file_type);
                continue;
            }
            self.download_file(&base, file, destination).await?;
            if file.file_type == PRIMARY_DESCRIPTOR {
                primary = Some(file.path.clone());
            }
        }

        let primary = primary
            .ok_or_else(|| MetisError::Trs(format!("no primary descriptor listed for {}", url)))?;
        info!("Downloaded {} files of {}", files.len(), url);
        safe_join(destination, &primary)
    }
}
