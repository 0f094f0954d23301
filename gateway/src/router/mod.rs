//! Upstream Router (spec §4.6): prefix-to-service mapping, header
//! injection, JSON body rewrite, per-service circuit breaking, error
//! translation, and streamed response forwarding.
use std::collections::HashMap;
use std::time::Duration;

use actix_web::{http::Method, web, HttpRequest, HttpResponse};
use pgai_breaker::BreakerRegistry;
use pgai_common::{
    ErrorKind, X_FORWARDED_BY, X_GATEWAY_VERSION, X_REQUEST_ID, X_TEAM_ID, X_USER_EMAIL,
    X_USER_ID, X_USER_PERMISSIONS, X_USER_ROLE,
};
use pgai_settings::ServiceConfig;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::error::GatewayError;

/// Path-prefix to logical-service name mapping (§4.6). A service with no
/// configured URL is silently unmounted rather than erroring.
pub fn prefix_for(path: &str) -> Option<&'static str> {
    let segments: Vec<&str> = path.trim_start_matches('/').splitn(2, '/').collect();
    let first = *segments.first()?;
    match first {
        "auth" => Some("user"),
        "users" => Some("user"),
        "connections" => Some("connection"),
        "schemas" => Some("schema"),
        "views" => Some("view"),
        "versions" => Some("versioning"),
        "docs" => Some("documentation"),
        _ => None,
    }
}

pub struct Router {
    pub services: HashMap<String, ServiceConfig>,
    pub breakers: BreakerRegistry,
    pub client: reqwest::Client,
    pub gateway_version: &'static str,
}

impl Router {
    pub fn new(services: HashMap<String, ServiceConfig>, breakers: BreakerRegistry) -> Self {
        Router {
            services,
            breakers,
            client: reqwest::Client::builder()
                .build()
                .expect("failed to build reqwest client"),
            gateway_version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Proxies `req` + `body` to the service registered for `service_name`,
    /// per the six numbered steps of §4.6.
    pub async fn forward(
        &self,
        service_name: &str,
        req: &HttpRequest,
        request_id: &str,
        auth: Option<&AuthContext>,
        body: web::Bytes,
    ) -> Result<HttpResponse, GatewayError> {
        // 1. look up ServiceConfig
        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| GatewayError::ServiceNotRegistered(service_name.to_string()))?;
        if service.base_url.is_empty() {
            return Err(GatewayError::ServiceNotRegistered(service_name.to_string()));
        }

        let breaker = self.breakers.get(service_name);
        breaker.try_admit().map_err(|kind| GatewayError::Api(kind.into()))?;

        let url = format!("{}{}", service.base_url.trim_end_matches('/'), req.uri());
        let method = reqwest_method(req.method());

        // 3. rewrite body only for JSON + non-empty + POST/PUT/PATCH
        let forwarded_body = rewrite_body_if_json(req.method(), &body);

        let mut builder = self
            .client
            .request(method, &url)
            .timeout(Duration::from_secs(service.timeout_secs));

        // 2. inject headers
        builder = builder
            .header(X_REQUEST_ID, request_id)
            .header(X_FORWARDED_BY, "pgai-gateway")
            .header(X_GATEWAY_VERSION, self.gateway_version);
        if let Some(ctx) = auth {
            builder = builder
                .header(X_USER_ID, &ctx.user_id)
                .header(X_USER_EMAIL, &ctx.email)
                .header(X_USER_ROLE, format!("{:?}", ctx.role).to_lowercase());
            if let Some(team) = &ctx.team {
                builder = builder.header(X_TEAM_ID, team);
            }
            if !ctx.permissions.is_empty() {
                builder = builder.header(X_USER_PERMISSIONS, ctx.permissions_header());
            }
        }
        for (name, value) in req.headers() {
            if is_hop_by_hop(name.as_str()) || name.as_str().eq_ignore_ascii_case("host") {
                continue;
            }
            if let Ok(v) = value.to_str() {
                builder = builder.header(name.as_str(), v);
            }
        }

        let content_len = forwarded_body.len();
        if content_len > 0 || matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
            builder = builder
                .header("content-length", content_len.to_string())
                .body(forwarded_body);
        }

        // 4. send through the breaker
        let result = builder.send().await;

        match result {
            Ok(resp) => {
                breaker.on_success();
                Ok(translate_response(resp).await)
            }
            Err(e) => {
                breaker.on_failure();
                Err(translate_error(e, service_name))
            }
        }
    }
}

fn reqwest_method(method: &Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}

/// Rewrites the body only when it is JSON with non-empty parsed content and
/// the method is `POST|PUT|PATCH`; recomputes length implicitly via
/// `Vec::len()` at the call site (§4.6 step 3).
fn rewrite_body_if_json(method: &Method, body: &web::Bytes) -> Vec<u8> {
    if !matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        return body.to_vec();
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) => body.to_vec(),
        Ok(value) => serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec()),
        Err(_) => body.to_vec(),
    }
}

/// 6. streams the response back, preserving status, headers minus
/// hop-by-hop, and body.
async fn translate_response(resp: reqwest::Response) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(resp.status().as_u16())
        .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    for (name, value) in resp.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(v) = value.to_str() {
            builder.insert_header((name.as_str(), v));
        }
    }
    let body = resp.bytes().await.unwrap_or_default();
    builder.body(body)
}

/// 5. translates transport errors: network-refused -> 503; reset/timeout ->
/// 504; unexpected exceptions -> 502.
fn translate_error(e: reqwest::Error, service_name: &str) -> GatewayError {
    let kind = if e.is_timeout() {
        ErrorKind::GatewayTimeout
    } else if e.is_connect() {
        ErrorKind::ServiceUnavailable
    } else {
        ErrorKind::BadGateway(format!("{} proxy error", service_name))
    };
    GatewayError::Api(pgai_common::ApiError::new(kind))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn maps_known_prefixes() {
        assert_eq!(prefix_for("/auth/login"), Some("user"));
        assert_eq!(prefix_for("/users/me"), Some("user"));
        assert_eq!(prefix_for("/connections/123"), Some("connection"));
        assert_eq!(prefix_for("/schemas/discover"), Some("schema"));
    }

    #[test]
    fn unknown_prefix_is_none() {
        assert_eq!(prefix_for("/nope"), None);
    }
}
