//! HTTP entry points mounted by `server::configure` (spec §6). Each wraps
//! [`crate::router::Router::forward`] with the service name implied by its
//! mount point; `/admin/*` and `/public/*` additionally resolve a nested
//! service name from the remainder of the path.
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};

use crate::admission::RequestId;
use crate::auth::{self, AuthContext, Role};
use crate::error::GatewayError;
use crate::AppState;

fn request_id_of(req: &HttpRequest) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(pgai_common::new_request_id)
}

fn auth_of(req: &HttpRequest) -> Option<AuthContext> {
    req.extensions().get::<AuthContext>().cloned()
}

async fn forward(
    state: &web::Data<AppState>,
    service: &str,
    req: &HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    let request_id = request_id_of(req);
    let ctx = auth_of(req);
    state
        .router
        .forward(service, req, &request_id, ctx.as_ref(), body)
        .await
}

pub async fn auth_proxy(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    forward(&state, "user", &req, body).await
}

pub async fn users_proxy(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    forward(&state, "user", &req, body).await
}

pub async fn connections_proxy(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    forward(&state, "connection", &req, body).await
}

pub async fn schemas_proxy(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    forward(&state, "schema", &req, body).await
}

/// Resolves the downstream service implied by the segment *after* a mount
/// prefix (used by `/admin/*` and `/public/*`, which don't map 1:1 to a
/// single upstream the way `/connections/*` does).
fn nested_service(req: &HttpRequest, after: &str) -> String {
    let path = req.path();
    let idx = path.find(after).map(|i| i + after.len()).unwrap_or(0);
    let remainder = &path[idx.min(path.len())..];
    crate::router::prefix_for(remainder)
        .unwrap_or("user")
        .to_string()
}

pub async fn admin_proxy(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    let ctx = auth_of(&req).ok_or(pgai_common::ErrorKind::Authentication)?;
    if ctx.role < Role::Admin {
        return Err(pgai_common::ErrorKind::Authorization.into());
    }
    let service = nested_service(&req, "/admin");
    forward(&state, &service, &req, body).await
}

pub async fn public_proxy(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    let service = nested_service(&req, "/public");
    forward(&state, &service, &req, body).await
}

pub use auth::{authorize, require_ownership};
