//! Shared primitives used by all three `pgai` binaries: the error taxonomy
//! and envelope (§4.12), the logging bootstrap, statsd metrics, and a
//! handful of request-scoped helpers, modeled on `syncserver-common`.
#[macro_use]
extern crate slog_scope;

pub mod error;
pub mod logging;
pub mod metrics;

use hkdf::Hkdf;
use sha2::Sha256;

pub use error::{detail, render, ApiError, Envelope, ErrorBody, ErrorKind, Meta};
pub use metrics::{metrics_from_opts, MetricError, Metrics};

/// Header every service stamps on inbound requests and echoes on responses
/// (§4.7, §6 "Headers injected downstream").
pub static X_REQUEST_ID: &str = "x-request-id";
pub static X_FORWARDED_BY: &str = "x-forwarded-by";
pub static X_GATEWAY_VERSION: &str = "x-gateway-version";
pub static X_USER_ID: &str = "x-user-id";
pub static X_USER_EMAIL: &str = "x-user-email";
pub static X_USER_ROLE: &str = "x-user-role";
pub static X_TEAM_ID: &str = "x-team-id";
pub static X_USER_PERMISSIONS: &str = "x-user-permissions";

/// [HKDF](https://tools.ietf.org/html/rfc5869) expansion to 32 bytes, used by
/// `pgai-vault` and `pgai-settings` to derive fixed-size key material from an
/// operator-supplied passphrase instead of requiring raw key bytes on disk.
pub fn hkdf_expand_32(info: &[u8], salt: Option<&[u8]>, key: &[u8]) -> Result<[u8; 32], String> {
    let mut result = [0u8; 32];
    let hkdf = Hkdf::<Sha256>::new(salt, key);
    hkdf.expand(info, &mut result)
        .map_err(|e| format!("HKDF error: {:?}", e))?;
    Ok(result)
}

/// Implemented by each service's top-level error type so common middleware
/// (request logging, sentry reporting) can treat them uniformly without
/// depending on the concrete type.
pub trait ReportableError: std::fmt::Debug {
    fn error_backtrace(&self) -> String;
    fn is_sentry_event(&self) -> bool;
    fn metric_label(&self) -> Option<String>;
}

impl ReportableError for ApiError {
    fn error_backtrace(&self) -> String {
        self.backtrace_string()
    }

    fn is_sentry_event(&self) -> bool {
        self.is_internal()
    }

    fn metric_label(&self) -> Option<String> {
        self.is_internal().then(|| self.kind.code().to_string())
    }
}

/// Generates a fresh request id; used by the admission layer when an inbound
/// request carries no `x-request-id` of its own (§4.7).
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
