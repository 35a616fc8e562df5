//! GA4GH WES Module
//!
//! Wire types of the Workflow Execution Service 1.1.0 API, the run
//! state machine and request validation.
//!
//! # Structure
//!
//! - [`model`]: Request and response bodies
//! - [`state`]: Run states and allowed transitions
//! - [`validator`]: Submission checks

pub mod model;
pub mod state;
pub mod validator;

pub use model::{
    ErrorResponse, Log, RunId, RunListResponse, RunLog, RunRequest, RunStatus, RunSummary,
    ServiceInfo, TaskListResponse, TaskLog,
};
pub use state::State;
pub use validator::validate_run_request;

/// WES specification version implemented by this service.
pub const WES_VERSION: &str = "1.1.0";

/// Current UTC time in the RFC 3339 form used by run logs.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
