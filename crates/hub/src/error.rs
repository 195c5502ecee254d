use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::ErrorBody;
use crate::chart::ThinError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("no data in the requested window")]
    NoData,

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NoData => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ApiError::InvalidInput(msg.into())
    }
}

impl From<ThinError> for ApiError {
    fn from(e: ThinError) -> Self {
        match e {
            ThinError::InvalidSampling(_) => ApiError::InvalidInput(e.to_string()),
            ThinError::NoData => ApiError::NoData,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::InvalidInput(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::Storage(e) => {
                tracing::error!(error = %format!("{e:#}"), "storage failure");
                "storage failure".to_string()
            }
            other => {
                tracing::debug!(%status, error = %other, "request rejected");
                other.to_string()
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
