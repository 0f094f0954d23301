//! Gateway-local error type. Wraps the shared [`pgai_common::ApiError`] taxonomy
//! plus a couple of leaf variants specific to routing, following
//! `syncserver::error::ApiError`'s pattern of a thin per-service wrapper
//! around shared primitives.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use pgai_common::{render, ApiError, ErrorKind, ReportableError};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("service {0} is not registered")]
    ServiceNotRegistered(String),
}

impl GatewayError {
    pub fn api(&self) -> ApiError {
        match self {
            GatewayError::Api(e) => e.clone(),
            GatewayError::ServiceNotRegistered(name) => ApiError::new(ErrorKind::BadGateway(
                format!("no upstream registered for service '{}'", name),
            )),
        }
    }
}

impl From<ErrorKind> for GatewayError {
    fn from(kind: ErrorKind) -> Self {
        GatewayError::Api(ApiError::new(kind))
    }
}

impl ReportableError for GatewayError {
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

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        self.api().kind.status()
    }

    fn error_response(&self) -> HttpResponse {
        let api = self.api();
        render(&api, &uuid::Uuid::new_v4().to_string(), false)
    }
}
