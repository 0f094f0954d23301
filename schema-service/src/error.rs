//! Schema-service error type, wrapping the shared taxonomy (§4.12) with leaf
//! variants this service alone produces.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use pgai_common::{render, ApiError, ErrorKind, ReportableError};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SchemaError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("a discovery for this connection is already in flight")]
    Coalesced,
    #[error("connection {0} is not being monitored")]
    NotMonitored(uuid::Uuid),
}

impl SchemaError {
    pub fn api(&self) -> ApiError {
        match self {
            SchemaError::Api(e) => e.clone(),
            SchemaError::Coalesced => ApiError::new(ErrorKind::Conflict(
                "a discovery for this connection is already running".to_string(),
            )),
            SchemaError::NotMonitored(id) => {
                ApiError::new(ErrorKind::NotFound(format!("change-detection job {}", id)))
            }
        }
    }
}

impl From<ErrorKind> for SchemaError {
    fn from(kind: ErrorKind) -> Self {
        SchemaError::Api(ApiError::new(kind))
    }
}

impl ReportableError for SchemaError {
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

impl ResponseError for SchemaError {
    fn status_code(&self) -> StatusCode {
        self.api().kind.status()
    }

    fn error_response(&self) -> HttpResponse {
        render(&self.api(), &uuid::Uuid::new_v4().to_string(), false)
    }
}
