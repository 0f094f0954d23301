//! HTTP surface (spec §6 "Schema service external surface"): discovery,
//! search, cache inspection/invalidation, change-detection lifecycle,
//! history/review, analytics, and the WebSocket subscription upgrade.
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use pgai_common::{new_request_id, ErrorKind};
use pgai_connection_service::models::ConnectionConfig;
use uuid::Uuid;

use crate::error::SchemaError;
use crate::fanout::SchemaSession;
use crate::models::{ChangeKind, DiscoverRequest};
use crate::AppState;

fn owner_of(req: &HttpRequest) -> Result<String, SchemaError> {
    req.headers()
        .get(pgai_common::X_USER_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| SchemaError::from(ErrorKind::Authentication))
}

fn team_of(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(pgai_common::X_TEAM_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn request_id_of(req: &HttpRequest) -> String {
    req.headers()
        .get(pgai_common::X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(new_request_id)
}

/// Resolves the connection's config and plaintext password via the
/// connection-service registry and vault (§4.8: discovery always reads the
/// currently-configured target, never a caller-supplied one).
async fn resolve_connection(
    state: &AppState,
    connection_id: Uuid,
    owner: &str,
    team: Option<&str>,
) -> Result<(ConnectionConfig, String), SchemaError> {
    let cfg = state
        .registry
        .get(connection_id, owner, team)
        .await
        .map_err(|_| SchemaError::from(ErrorKind::NotFound(format!("connection {}", connection_id))))?;
    let password = state
        .vault
        .open(&cfg.secret_blob)
        .map_err(|_| SchemaError::from(ErrorKind::CryptoError))?;
    let password = String::from_utf8(password).map_err(|_| SchemaError::from(ErrorKind::CryptoError))?;
    Ok((cfg, password))
}

pub async fn discover(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<DiscoverRequest>,
) -> Result<HttpResponse, SchemaError> {
    let owner = owner_of(&req)?;
    let team = team_of(&req);
    let body = body.into_inner();

    if !body.force_refresh {
        if let Some(cached) = state.cache.get(body.connection_id) {
            return Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(cached, request_id_of(&req))));
        }
    }

    let (cfg, password) = resolve_connection(&state, body.connection_id, &owner, team.as_deref()).await?;
    let schema = state
        .discoverer
        .discover(&cfg, &password, body.include_functions, body.include_types)
        .await?;
    state.cache.set(&schema);
    state.fanout.publish_discovered(cfg.id, &schema.version_hash).await;

    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(schema, request_id_of(&req))))
}

#[derive(serde::Deserialize)]
pub struct SearchRequest {
    pub connection_id: Uuid,
    pub query: String,
}

pub async fn search(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<SearchRequest>,
) -> Result<HttpResponse, SchemaError> {
    let schema = state
        .cache
        .get(body.connection_id)
        .ok_or_else(|| SchemaError::from(ErrorKind::NotFound(format!("cached schema {}", body.connection_id))))?;

    let needle = body.query.to_lowercase();
    let matches: Vec<_> = schema
        .objects
        .iter()
        .filter(|obj| obj.identifier().to_lowercase().contains(&needle) || obj.columns.iter().any(|c| c.name.to_lowercase().contains(&needle)))
        .collect();

    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(matches, request_id_of(&req))))
}

pub async fn get_schema(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, SchemaError> {
    let schema = state
        .cache
        .get(id.into_inner())
        .ok_or_else(|| SchemaError::from(ErrorKind::NotFound("cached schema".to_string())))?;
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(schema, request_id_of(&req))))
}

pub async fn invalidate_cache(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, SchemaError> {
    let id = id.into_inner();
    let removed = state.cache.invalidate(id);
    if removed {
        state.fanout.publish_cache_invalidated(id).await;
    }
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(
        serde_json::json!({ "invalidated": removed }),
        request_id_of(&req),
    )))
}

#[derive(serde::Deserialize)]
pub struct MonitorRequest {
    pub connection_id: Uuid,
}

pub async fn changes_start(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<MonitorRequest>,
) -> Result<HttpResponse, SchemaError> {
    let owner = owner_of(&req)?;
    let team = team_of(&req);
    let (cfg, password) = resolve_connection(&state, body.connection_id, &owner, team.as_deref()).await?;
    state.change_detector.start(cfg, password);
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(
        serde_json::json!({ "monitoring": true }),
        request_id_of(&req),
    )))
}

pub async fn changes_stop(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<MonitorRequest>,
) -> Result<HttpResponse, SchemaError> {
    let stopped = state.change_detector.stop(body.connection_id);
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(
        serde_json::json!({ "stopped": stopped }),
        request_id_of(&req),
    )))
}

pub async fn changes_trigger(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, SchemaError> {
    let changes = state
        .change_detector
        .trigger(id.into_inner(), &state.discoverer, &state.cache, &state.fanout)
        .await?;
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(changes, request_id_of(&req))))
}

pub async fn changes_status(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().json(pgai_common::Envelope::ok(state.change_detector.status(), request_id_of(&req)))
}

pub async fn history(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> HttpResponse {
    HttpResponse::Ok().json(pgai_common::Envelope::ok(
        state.change_detector.history(id.into_inner()),
        request_id_of(&req),
    ))
}

pub async fn get_change(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, SchemaError> {
    let (connection_id, change_id) = path.into_inner();
    let change = state
        .change_detector
        .change(connection_id, change_id)
        .ok_or_else(|| SchemaError::from(ErrorKind::NotFound("schema change".to_string())))?;
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(change, request_id_of(&req))))
}

pub async fn review_change(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, SchemaError> {
    let (connection_id, change_id) = path.into_inner();
    let reviewed = state.change_detector.mark_reviewed(connection_id, change_id);
    if !reviewed {
        return Err(SchemaError::from(ErrorKind::NotFound("schema change".to_string())));
    }
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(
        serde_json::json!({ "reviewed": true }),
        request_id_of(&req),
    )))
}

pub async fn analytics(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> HttpResponse {
    let history = state.change_detector.history(id.into_inner());
    let breaking = history.iter().filter(|c| c.impact == crate::models::ChangeImpact::Breaking).count();
    let additions = history.iter().filter(|c| c.kind == ChangeKind::Addition).count();
    let removals = history.iter().filter(|c| c.kind == ChangeKind::Removal).count();
    let modifications = history.iter().filter(|c| c.kind == ChangeKind::Modification).count();
    HttpResponse::Ok().json(pgai_common::Envelope::ok(
        serde_json::json!({
            "total": history.len(),
            "breaking": breaking,
            "additions": additions,
            "removals": removals,
            "modifications": modifications,
        }),
        request_id_of(&req),
    ))
}

pub async fn subscribe(
    state: web::Data<AppState>,
    req: HttpRequest,
    stream: web::Payload,
) -> Result<HttpResponse, actix_web::Error> {
    ws::start(SchemaSession::new(state.fanout.clone()), &req, stream)
}
