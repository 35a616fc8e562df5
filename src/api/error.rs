use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};

use crate::error::MetisError;
use crate::wes::ErrorResponse;

/// Error returned by a handler, rendered as a WES `ErrorResponse`.
#[derive(Debug)]
pub struct ApiError(pub MetisError);

impl From<MetisError> for ApiError {
    fn from(err: MetisError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            MetisError::NotFound(_) => StatusCode::NOT_FOUND,
            MetisError::InvalidInput(_)
            | MetisError::InvalidPageToken(_)
            | MetisError::NoSuitablePlugin(_)
            | MetisError::InvalidFilePath(_)
            | MetisError::UnsupportedProtocol(_)
            | MetisError::Json(_) => StatusCode::BAD_REQUEST,
            MetisError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = ErrorResponse {
            msg: self.0.to_string(),
            status_code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
