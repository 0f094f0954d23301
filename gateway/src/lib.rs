//! The API Gateway: admission layer + upstream router (spec §4.6, §4.7, §6).
#[macro_use]
extern crate slog_scope;

pub mod admission;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod health;
pub mod router;
pub mod server;

use std::sync::Arc;

use pgai_breaker::BreakerRegistry;
use pgai_common::Metrics;
use pgai_settings::Settings;

use crate::auth::{JwtVerifier, TokenVerifier};
use crate::router::Router;

/// Process-scoped, owned application state constructed once at startup and
/// shared across handlers (§9 "Singletons and module-level global state" ->
/// "process-scoped owned components... passed explicitly to handlers").
pub struct AppState {
    pub settings: Arc<Settings>,
    pub router: Router,
    pub verifier: Arc<dyn TokenVerifier>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, metrics: Metrics) -> Self {
        let breakers = BreakerRegistry::new(
            pgai_breaker::BreakerParams {
                failure_threshold: settings.breaker.failure_threshold,
                reset_timeout: std::time::Duration::from_secs(settings.breaker.reset_timeout_secs),
            },
            metrics.clone(),
        );
        let router = Router::new(settings.services.clone(), breakers);
        let verifier: Arc<dyn TokenVerifier> =
            Arc::new(JwtVerifier::new(&settings.jwt.secret, &settings.jwt.issuer));
        AppState {
            settings,
            router,
            verifier,
            metrics,
        }
    }
}
