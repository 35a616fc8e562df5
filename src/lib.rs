//! Metis - Kubernetes-native Workflow Execution Service
//!
//! A GA4GH WES 1.1.0 server that runs each workflow as Kubernetes jobs.
//! Workflow engines plug in as HTTP services; outputs are staged to
//! object storage.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`wes`]: WES data model, run states and request validation
//! - [`config`]: YAML and environment configuration, plugin registry
//! - [`store`]: Run persistence
//! - [`cluster`]: Kubernetes manifests and API client
//! - [`api`]: The WES HTTP server
//! - [`metel`]: The per-run agent driving a workflow to completion
//! - [`docs`]: Documentation site configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use metis::cluster::KubeClient;
//! use metis::store::SqliteRunStore;
//!
//! #[tokio::main]
//! async fn main() -> metis::Result<()> {
//!     let config = metis::config::load(None)?;
//!     let store = Arc::new(SqliteRunStore::open(&config.store.path)?);
//!     let cluster = Arc::new(KubeClient::from_config(&config.k8s)?);
//!     metis::api::serve(config, store, cluster).await
//! }
//! ```

pub mod api;
pub mod cluster;
pub mod config;
pub mod docs;
pub mod error;
pub mod logger;
pub mod metel;
pub mod store;
pub mod wes;

// Re-export commonly used types
pub use config::Config;
pub use docs::DocsSiteConfig;
pub use error::{MetisError, Result};
pub use wes::{RunRequest, State};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Metis";
