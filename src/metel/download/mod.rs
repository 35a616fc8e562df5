//! Workflow Download
//!
//! Fetches the workflow named by `workflow_url` into the run's PVC and
//! returns the path of the primary descriptor.
//!
//! | Scheme          | Source                                   |
//! |-----------------|------------------------------------------|
//! | `http`, `https` | Single file, named after the URL path    |
//! | `file`          | Attachment already copied into the PVC   |
//! | `trs`           | Every file of a GA4GH TRS tool version   |

pub mod file;
pub mod http;
pub mod trs;

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{MetisError, Result};

pub use file::FileDownloader;
pub use http::HttpDownloader;
pub use trs::TrsDownloader;

/// Places a workflow in `destination`.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Returns the path of the primary descriptor.
    ///
    /// `descriptor_type` is the workflow type (e.g. "CWL"), used by
    /// sources that serve several descriptor flavours.
    async fn download(&self, url: &str, destination: &Path, descriptor_type: &str)
        -> Result<PathBuf>;
}

/// Picks the downloader for a URL by its scheme.
pub fn downloader_for(raw_url: &str) -> Result<Box<dyn Downloader>> {
    let scheme = raw_url
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| MetisError::UnsupportedProtocol(raw_url.to_string()))?;

    match scheme.as_str() {
        "http" | "https" => Ok(Box::new(HttpDownloader::new())),
        "file" => Ok(Box::new(FileDownloader)),
        "trs" => Ok(Box::new(TrsDownloader::new())),
        other => Err(MetisError::UnsupportedProtocol(other.to_string())),
    }
}

/// Joins a relative path onto `base`, refusing anything that escapes it.
///
/// The check is lexical; `..` components may not climb above `base`.
pub fn safe_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let mut joined = base.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(MetisError::InvalidFilePath(
                        base.join(relative).display().to_string(),
                    ));
                }
                joined.pop();
                depth -= 1;
            }
        }
    }

    Ok(joined)
}
