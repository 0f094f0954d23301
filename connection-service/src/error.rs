//! Connection-service error type, wrapping the shared taxonomy (§4.12) with
//! leaf variants this service alone produces.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use pgai_common::{render, ApiError, ErrorKind, ReportableError};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ConnError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("connection {0} already exists for this owner")]
    AlreadyExists(String),
    #[error("connection limit exceeded")]
    LimitExceeded,
    #[error("capacity exhausted")]
    CapacityExhausted,
    #[error("the pool manager is shutting down")]
    Shutdown,
}

impl ConnError {
    pub fn api(&self) -> ApiError {
        match self {
            ConnError::Api(e) => e.clone(),
            ConnError::AlreadyExists(name) => {
                ApiError::new(ErrorKind::Conflict(format!("connection '{}' already exists", name)))
            }
            ConnError::LimitExceeded => {
                ApiError::new(ErrorKind::Validation("connection limit exceeded".to_string()))
            }
            ConnError::CapacityExhausted => ApiError::new(ErrorKind::PoolExhausted),
            ConnError::Shutdown => ApiError::new(ErrorKind::ServiceUnavailable),
        }
    }
}

impl From<ErrorKind> for ConnError {
    fn from(kind: ErrorKind) -> Self {
        ConnError::Api(ApiError::new(kind))
    }
}

impl ReportableError for ConnError {
    fn error_backtrace(&self) -> String {
        self.api().backtrace_string()
    }

    fn is_sentry_event(&self) -> bool {
        self.api().is_internal()
    }

    fn metric_label(&self) -> Option<String> {
        Some(self.api().kind.code().to_string())
    }
}

impl ResponseError for ConnError {
    fn status_code(&self) -> StatusCode {
        self.api().kind.status()
    }

    fn error_response(&self) -> HttpResponse {
        render(&self.api(), &uuid::Uuid::new_v4().to_string(), false)
    }
}
