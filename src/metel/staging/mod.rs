//! Output Staging
//!
//! After a successful run the outputs named by the plugin are copied
//! from the PVC to a remote staging area. Only S3-compatible object
//! stores are supported today.

pub mod s3;

use std::path::Path;

use async_trait::async_trait;
use log::{info, warn};

use crate::config::StagingConfig;
use crate::error::{MetisError, Result};

use super::download::safe_join;

pub use s3::S3Provider;

/// A remote area receiving run outputs.
#[async_trait]
pub trait StagingProvider: Send + Sync {
    /// Location of a run's staging area, e.g. `s3://bucket/prefix/run`.
    fn url(&self, run_id: &str) -> String;

    /// Uploads one file to `remote_key`.
    async fn upload_file(&self, local: &Path, remote_key: &str) -> Result<()>;

    /// Uploads every file below `local`, keeping relative paths under `remote_key`.
    async fn upload_dir(&self, local: &Path, remote_key: &str) -> Result<usize> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(local).follow_links(true) {
            let entry = entry.map_err(|e| MetisError::Staging(e.to_string()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        for file in &files {
            let relative = file
                .strip_prefix(local)
                .map_err(|e| MetisError::Staging(e.to_string()))?;
            let key = join_key(&[remote_key, &relative.to_string_lossy()]);
            self.upload_file(file, &key).await?;
        }
        Ok(files.len())
    }
}

/// Builds the provider selected by `metel.staging.type`.
pub fn provider_for(config: &StagingConfig) -> Result<Box<dyn StagingProvider>> {
    match config.kind.trim().to_ascii_lowercase().as_str() {
        "s3" => Ok(Box::new(S3Provider::new(config)?)),
        other => Err(MetisError::UnsupportedStagingProvider(other.to_string())),
    }
}

/// Joins object key parts with `/`, dropping empty segments.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split(['/', '\\']))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Uploads each output path (relative to `mount`) to `{prefix}/{run_id}/{path}`.
///
/// Outputs that do not exist are skipped. Returns the number of files uploaded.
pub async fn stage_outputs(
    provider: &dyn StagingProvider,
    mount: &Path,
    prefix: &str,
    run_id: &str,
    outputs: &[String],
) -> Result<usize> {
    let mut uploaded = 0;
    for output in outputs {
        let local = safe_join(mount, output)?;
        let remote = join_key(&[prefix, run_id, output]);

        let metadata = match tokio::fs::metadata(&local).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Output {} not found, skipping", local.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            uploaded += provider.upload_dir(&local, &remote).await?;
        } else {
            provider.upload_file(&local, &remote).await?;
            uploaded += 1;
        }
        info!("Staged {} to {}", local.display(), remote);
    }
    Ok(uploaded)
}
