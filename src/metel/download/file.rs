//! `file://` workflows.
//!
//! The file was uploaded as a `workflow_attachment` and already sits in
//! the PVC, so nothing is fetched. `file://main.cwl` and
//! `file:///pvc/main.cwl` (with `/pvc` as the mount) name the same file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;

use crate::error::{MetisError, Result};

use super::{safe_join, Downloader};

pub struct FileDownloader;

/// Resolves a `file://` URL against the PVC mount.
pub fn resolve(url: &str, destination: &Path) -> Result<PathBuf> {
    let raw = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);

    let relative = match Path::new(raw).strip_prefix(destination) {
        Ok(inside) => inside.to_string_lossy().into_owned(),
        Err(_) => raw.to_string(),
    };
    safe_join(destination, &relative)
}

#[async_trait]
impl Downloader for FileDownloader {
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        _descriptor_type: &str,
    ) -> Result<PathBuf> {
        let path = resolve(url, destination)?;
        match tokio::fs::metadata(&path).await {
            Ok(_) => {
                debug!("Using attached workflow {}", path.display());
                Ok(path)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MetisError::FileNotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
