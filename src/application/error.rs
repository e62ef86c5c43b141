use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::storage::StorageError, cache::CoordinatorError, infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Coordinator(CoordinatorError::Storage(_)) | AppError::Storage(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Coordinator(
                CoordinatorError::NotRendering { .. } | CoordinatorError::StaleClaim { .. },
            ) => StatusCode::CONFLICT,
            AppError::Coordinator(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Infra(InfraError::Upstream { .. }) => StatusCode::BAD_GATEWAY,
            AppError::Infra(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Coordinator(CoordinatorError::Storage(_)) | AppError::Storage(_) => {
                "Snapshot storage temporarily unavailable"
            }
            AppError::Coordinator(
                CoordinatorError::NotRendering { .. } | CoordinatorError::StaleClaim { .. },
            ) => "Render is no longer pending",
            AppError::Coordinator(_) | AppError::Validation(_) => "Request could not be processed",
            AppError::Infra(InfraError::Upstream { .. }) => "Upstream service failed",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::StorageRoot { .. }) => "Storage directory unusable",
            AppError::Infra(InfraError::Bind { .. }) => "Listener could not be bound",
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_maps_to_bad_request() {
        let error = AppError::from(CoordinatorError::MissingUrl);
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.messages[0], "missing required field `url`");
    }

    #[test]
    fn storage_failure_maps_to_service_unavailable() {
        let error = AppError::from(CoordinatorError::Storage(StorageError::Unavailable(
            "disk detached".to_string(),
        )));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn superseded_completion_maps_to_conflict() {
        let error = AppError::from(CoordinatorError::StaleClaim {
            key: "en:example.com/".to_string(),
            claim: 1,
            current: 2,
        });
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert_eq!(error.presentation_message(), "Render is no longer pending");
    }

    #[test]
    fn render_service_failure_maps_to_bad_gateway() {
        let error = AppError::from(InfraError::upstream("status", "connection refused"));
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(error.presentation_message(), "Upstream service failed");
    }

    #[test]
    fn report_collects_error_chain() {
        let inner = std::io::Error::other("permission denied");
        let error = StorageError::io("cache:default:example.com/", inner);
        let report =
            ErrorReport::from_error("test", StatusCode::INTERNAL_SERVER_ERROR, &error);
        assert_eq!(report.messages.len(), 2);
        assert_eq!(report.messages[1], "permission denied");
    }
}
