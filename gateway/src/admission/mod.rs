//! Admission Layer (spec §4.7): the ordered chain of checks every inbound
//! request passes through before routing. Modeled as one `actix-web`
//! middleware (the checks are synchronous and cheap, so a single `Service`
//! wrapper is simpler and just as correct as a chain of one-check-each
//! wrappers, while preserving the teacher's layering style from
//! `syncserver`'s `build_app!` macro).
pub mod limiter;
pub mod suspicious;
pub mod timeout;

use std::cell::RefCell;
use std::rc::Rc;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, Method},
    Error as ActixError, HttpMessage,
};
use futures::future::LocalBoxFuture;
use pgai_common::{ApiError, ErrorKind, X_REQUEST_ID};

pub use limiter::RateLimiter;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum LimiterKey {
    /// keyed by `user_id` if authenticated, else the caller's IP (`api`).
    UserOrIp,
    /// always keyed by IP, regardless of auth state (`auth`).
    Ip,
}

#[derive(Clone)]
pub struct AdmissionConfig {
    pub allowed_methods: Vec<Method>,
    pub max_body_bytes: usize,
    pub allowed_content_types: Vec<String>,
    pub limiter: RateLimiter,
    pub limiter_key: LimiterKey,
    /// `true` for the `auth` profile: successful responses are refunded
    /// (§4.7 "skips successful requests from the counter").
    pub refund_on_success: bool,
}

impl AdmissionConfig {
    pub fn default_methods() -> Vec<Method> {
        vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
            Method::HEAD,
        ]
    }
}

#[derive(Clone)]
pub struct Admission {
    pub config: AdmissionConfig,
}

impl<S, B> Transform<S, ServiceRequest> for Admission
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Transform = AdmissionMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AdmissionMiddleware {
            service: Rc::new(RefCell::new(service)),
            config: self.config.clone(),
        }))
    }
}

pub struct AdmissionMiddleware<S> {
    service: Rc<RefCell<S>>,
    config: AdmissionConfig,
}

fn client_ip(req: &ServiceRequest) -> String {
    req.connection_info().realip_remote_addr().map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string())
}

impl<S, B> Service<ServiceRequest> for AdmissionMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        // request-id stamp: echo the inbound header or generate a fresh one.
        let request_id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(pgai_common::new_request_id);
        req.extensions_mut().insert(RequestId(request_id.clone()));

        // method allow-list
        if !self.config.allowed_methods.contains(req.method()) {
            return Box::pin(async move {
                Err(ActixError::from(ApiError::new(ErrorKind::MethodNotAllowed(
                    format!("method {} not allowed", req.method()),
                ))))
            });
        }

        // request-size limit, checked against Content-Length without
        // reading the body (§8 "A request with body > max size returns 413
        // without reading the body").
        if let Some(len) = content_length(&req) {
            if len > self.config.max_body_bytes {
                return Box::pin(async move {
                    Err(ActixError::from(ApiError::new(ErrorKind::PayloadTooLarge)))
                });
            }
        }

        // content-type allow-list for body-bearing methods
        let body_bearing = matches!(
            *req.method(),
            Method::POST | Method::PUT | Method::PATCH
        );
        if body_bearing && content_length(&req).unwrap_or(0) > 0 {
            let content_type = req
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let allowed = self
                .config
                .allowed_content_types
                .iter()
                .any(|ct| content_type.starts_with(ct.as_str()));
            if !allowed {
                return Box::pin(async move {
                    Err(ActixError::from(ApiError::new(ErrorKind::UnsupportedMediaType(
                        content_type.to_string(),
                    ))))
                });
            }
        }

        // suspicious-pattern detector: logs only, never blocks
        let ua = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let hits = suspicious::detect(req.uri().to_string().as_str(), ua);
        if !hits.is_empty() {
            warn!(
                "suspicious request pattern {:?} path={} request_id={}",
                hits,
                req.path(),
                request_id
            );
        }

        // rate limiting
        let key = match self.config.limiter_key {
            LimiterKey::Ip => client_ip(&req),
            LimiterKey::UserOrIp => req
                .extensions()
                .get::<crate::auth::AuthContext>()
                .map(|ctx| ctx.user_id.clone())
                .unwrap_or_else(|| client_ip(&req)),
        };
        if !self.config.limiter.try_consume(&key) {
            return Box::pin(async move {
                Err(ActixError::from(ApiError::new(ErrorKind::RateLimit)))
            });
        }

        let service = self.service.clone();
        let limiter = self.config.limiter.clone();
        let refund_on_success = self.config.refund_on_success;
        Box::pin(async move {
            let mut res = service.call(req).await?;
            if refund_on_success && res.status().is_success() {
                limiter.refund(&key);
            }
            res.headers_mut().insert(
                header::HeaderName::from_static("x-request-id"),
                header::HeaderValue::from_str(&request_id).unwrap(),
            );
            res.headers_mut()
                .insert(header::X_CONTENT_TYPE_OPTIONS, header::HeaderValue::from_static("nosniff"));
            res.headers_mut().insert(
                header::HeaderName::from_static("x-frame-options"),
                header::HeaderValue::from_static("DENY"),
            );
            Ok(res)
        })
    }
}

fn content_length(req: &ServiceRequest) -> Option<usize> {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
}

/// Request-scoped id, inserted into extensions by [`Admission`] and read by
/// downstream handlers/the router for logging and header propagation.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
