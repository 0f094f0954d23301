//! The cross-cutting error taxonomy (spec §4.12) and the response envelope
//! every service serializes at its HTTP boundary, modeled on
//! `syncserver::error::ApiError`.
use std::fmt;

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use backtrace::Backtrace;
use chrono::Utc;
use serde::{Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Closed error-kind enumeration shared by the gateway, connection, and
/// schema services. Each service's own error type wraps whichever kinds it
/// can produce (plus service-specific leaf errors) and converts into this
/// kind for rendering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("{0}")]
    Validation(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("authentication required")]
    Authentication,
    #[error("not authorized")]
    Authorization,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("rate limit exceeded")]
    RateLimit,
    #[error("internal error")]
    Internal,
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("gateway timeout")]
    GatewayTimeout,
    #[error("circuit open for {0}")]
    CircuitOpen(String),
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("connection test failed: {0}")]
    ConnectionTestFailed(String),
    #[error("schema discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("crypto error")]
    CryptoError,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
            ErrorKind::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ErrorKind::Conflict(_) => StatusCode::CONFLICT,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal
            | ErrorKind::CryptoError
            | ErrorKind::ConnectionTestFailed(_)
            | ErrorKind::DiscoveryFailed(_)
            | ErrorKind::PoolExhausted => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ErrorKind::ServiceUnavailable | ErrorKind::CircuitOpen(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// The stable machine-readable code carried in the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation(_) => "VALIDATION_ERROR",
            ErrorKind::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Authorization => "AUTHORIZATION_ERROR",
            ErrorKind::NotFound(_) => "NOT_FOUND",
            ErrorKind::Conflict(_) => "CONFLICT",
            ErrorKind::RateLimit => "RATE_LIMIT_EXCEEDED",
            ErrorKind::Internal => "INTERNAL_ERROR",
            ErrorKind::BadGateway(_) => "BAD_GATEWAY",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::GatewayTimeout => "GATEWAY_TIMEOUT",
            ErrorKind::CircuitOpen(_) => "CIRCUIT_OPEN",
            ErrorKind::PoolExhausted => "POOL_EXHAUSTED",
            ErrorKind::ConnectionTestFailed(_) => "CONNECTION_TEST_FAILED",
            ErrorKind::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            ErrorKind::CryptoError => "CRYPTO_ERROR",
        }
    }

    /// Whether this kind is operator-visible as-is, or must be masked to a
    /// generic message outside development (§7).
    pub fn is_operational(&self) -> bool {
        !matches!(
            self,
            ErrorKind::Internal | ErrorKind::CryptoError | ErrorKind::BadGateway(_)
        )
    }
}

/// Top-level error type returned by handlers. Carries a backtrace (for
/// internal errors logged at `error`) and optional structured detail that is
/// only ever emitted when the kind is operational.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub details: Option<serde_json::Value>,
    backtrace: std::sync::Arc<Backtrace>,
}

impl ApiError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            details: None,
            backtrace: std::sync::Arc::new(Backtrace::new_unresolved()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn backtrace_string(&self) -> String {
        format!("{:#?}", self.backtrace)
    }

    /// Whether this error should be reported upstream (sentry, error logs).
    pub fn is_internal(&self) -> bool {
        self.kind.status().is_server_error()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for ApiError {}

impl From<ErrorKind> for ApiError {
    fn from(kind: ErrorKind) -> Self {
        ApiError::new(kind)
    }
}

/// The response envelope every service returns: `{success, data?, error?,
/// meta}` (spec §4.12, §6).
#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub meta: Meta,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct Meta {
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,
    pub version: &'static str,
}

impl Meta {
    pub fn new(request_id: impl Into<String>) -> Self {
        Meta {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T, request_id: impl Into<String>) -> Self {
        Envelope {
            success: true,
            data: Some(data),
            error: None,
            meta: Meta::new(request_id),
        }
    }
}

impl Envelope<()> {
    /// Renders an `ApiError` into the envelope. `development` controls
    /// whether internal-error messages are passed through verbatim or
    /// replaced with a generic message (§7).
    pub fn err(error: &ApiError, request_id: impl Into<String>, development: bool) -> Self {
        let message = if error.kind.is_operational() || development {
            error.kind.to_string()
        } else {
            "unexpected error".to_string()
        };
        let details = if error.kind.is_operational() {
            error.details.clone()
        } else {
            None
        };
        Envelope {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: error.kind.code().to_string(),
                message,
                details,
            }),
            meta: Meta::new(request_id),
        }
    }
}

/// Pulled out of `actix_web::ResponseError` so each service's own error type
/// (which wraps `ApiError` plus service-local variants) can delegate here
/// after converting to an `ApiError`.
pub fn render(error: &ApiError, request_id: &str, development: bool) -> HttpResponse {
    if error.is_internal() {
        error!("internal error: {} ({})", error, error.backtrace_string());
    } else {
        warn!("operational error: {}", error);
    }
    let envelope = Envelope::err(error, request_id.to_string(), development);
    HttpResponse::build(error.kind.status()).json(envelope)
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.kind.status()
    }

    fn error_response(&self) -> HttpResponse {
        render(self, &Uuid::new_v4().to_string(), false)
    }
}

/// Helper for types that need to attach a serializable `details` payload
/// without hand-rolling `serde_json::json!` at every call site.
pub fn detail<K: Serialize>(key: &str, value: K) -> serde_json::Value {
    serde_json::json!({ key: value })
}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ErrorBody {
            code: self.kind.code().to_string(),
            message: self.kind.to_string(),
            details: self.details.clone(),
        }
        .serialize(serializer)
    }
}
