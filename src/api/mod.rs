//! WES API Server
//!
//! HTTP front end of Metis. Exposes the GA4GH WES 1.1.0 routes under
//! `api.server.base_path`, a health probe, and the internal callback the
//! metel agent uses to report run progress.
//!
//! # Structure
//!
//! - [`server`]: Router assembly and the listening loop
//! - [`handlers`]: Read-side WES endpoints and cancellation
//! - [`submit`]: `POST /runs`
//! - [`internal`]: Run updates sent by metel

pub mod error;
pub mod handlers;
pub mod internal;
pub mod server;
pub mod submit;

use std::sync::Arc;

use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::store::RunStore;

pub use error::ApiError;
pub use internal::RunUpdate;
pub use server::{router, serve};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RunStore>,
    pub cluster: Arc<dyn ClusterClient>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RunStore>, cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            cluster,
        }
    }
}
