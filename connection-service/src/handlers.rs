//! HTTP surface (spec §6 "Connection service external surface"): `/connections`
//! CRUD, `/testing/connections{,/:id,/batch,/ssh-tunnel}`,
//! `/testing/results/:id`, `/monitoring/{pools,connections/:id/stats,
//! health-checks}`. This service sits behind the gateway, which has already
//! authenticated the caller and forwards identity via `x-user-id`/
//! `x-team-id` headers (§4.6) rather than re-verifying a bearer token.
use actix_web::{web, HttpRequest, HttpResponse};
use pgai_common::{new_request_id, ErrorKind};
use uuid::Uuid;

use crate::error::ConnError;
use crate::models::{AuditAction, AuditRecord, ConnectionFilter, ConnectionInput, ConnectionPatch};
use crate::AppState;

fn owner_of(req: &HttpRequest) -> Result<String, ConnError> {
    req.headers()
        .get(pgai_common::X_USER_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ConnError::from(ErrorKind::Authentication))
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

pub async fn create_connection(
    state: web::Data<AppState>,
    req: HttpRequest,
    input: web::Json<ConnectionInput>,
) -> Result<HttpResponse, ConnError> {
    let owner = owner_of(&req)?;
    let input = input.into_inner();
    let sealed = state
        .vault
        .seal(input.password.as_bytes())
        .map_err(|_| ConnError::from(ErrorKind::CryptoError))?;

    let cfg = state.registry.create(&owner, input, sealed).await?;
    state
        .registry
        .audit(AuditRecord {
            id: Uuid::new_v4(),
            connection_id: cfg.id,
            action: AuditAction::Created,
            user_id: owner,
            ip: req.peer_addr().map(|a| a.ip().to_string()),
            user_agent: req
                .headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            payload: serde_json::json!({ "name": cfg.name }),
            at: chrono::Utc::now(),
        })
        .await?;

    Ok(HttpResponse::Created().json(pgai_common::Envelope::ok(cfg, request_id_of(&req))))
}

pub async fn list_connections(
    state: web::Data<AppState>,
    req: HttpRequest,
    filter: web::Query<ConnectionFilter>,
) -> Result<HttpResponse, ConnError> {
    let owner = owner_of(&req)?;
    let configs = state.registry.list(&owner, filter.into_inner()).await?;
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(configs, request_id_of(&req))))
}

pub async fn get_connection(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ConnError> {
    let owner = owner_of(&req)?;
    let team = team_of(&req);
    let cfg = state.registry.get(id.into_inner(), &owner, team.as_deref()).await?;
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(cfg, request_id_of(&req))))
}

pub async fn update_connection(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
    patch: web::Json<ConnectionPatch>,
) -> Result<HttpResponse, ConnError> {
    let owner = owner_of(&req)?;
    let id = id.into_inner();
    let patch = patch.into_inner();
    let sealed = if let Some(password) = &patch.password {
        Some(
            state
                .vault
                .seal(password.as_bytes())
                .map_err(|_| ConnError::from(ErrorKind::CryptoError))?,
        )
    } else {
        None
    };

    let (cfg, invalidate) = state.registry.update(id, &owner, patch, sealed).await?;
    if invalidate {
        state.pool_manager.invalidate(id);
    }
    state
        .registry
        .audit(AuditRecord {
            id: Uuid::new_v4(),
            connection_id: cfg.id,
            action: AuditAction::Updated,
            user_id: owner,
            ip: req.peer_addr().map(|a| a.ip().to_string()),
            user_agent: None,
            payload: serde_json::json!({ "invalidated_pool": invalidate }),
            at: chrono::Utc::now(),
        })
        .await?;

    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(cfg, request_id_of(&req))))
}

pub async fn delete_connection(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ConnError> {
    let owner = owner_of(&req)?;
    let id = id.into_inner();
    let cfg = state.registry.delete(id, &owner).await?;
    state.pool_manager.invalidate(id);
    state
        .registry
        .audit(AuditRecord {
            id: Uuid::new_v4(),
            connection_id: cfg.id,
            action: AuditAction::Deleted,
            user_id: owner,
            ip: req.peer_addr().map(|a| a.ip().to_string()),
            user_agent: None,
            payload: serde_json::json!({}),
            at: chrono::Utc::now(),
        })
        .await?;
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok((), request_id_of(&req))))
}

/// Ad-hoc probe of a connection the caller has not (yet) persisted: the
/// request body carries the full config plus plaintext password.
pub async fn test_adhoc(
    state: web::Data<AppState>,
    req: HttpRequest,
    input: web::Json<ConnectionInput>,
) -> Result<HttpResponse, ConnError> {
    let owner = owner_of(&req)?;
    let input = input.into_inner();
    let password = input.password.clone();
    let sealed = state
        .vault
        .seal(password.as_bytes())
        .map_err(|_| ConnError::from(ErrorKind::CryptoError))?;
    let cfg = crate::models::ConnectionConfig {
        id: Uuid::new_v4(),
        owner_user: owner,
        team: input.team.clone(),
        name: input.name.clone(),
        description: input.description.clone(),
        dialect: input.dialect,
        host: input.host.clone(),
        port: input.port,
        database: input.database.clone(),
        username: input.username.clone(),
        secret_blob: sealed,
        tls_enabled: input.tls_enabled,
        tls_material: input.tls_material.clone(),
        options: input.options.clone(),
        min: input.min.unwrap_or(1),
        max: input.max.unwrap_or(10),
        idle_timeout: std::time::Duration::from_secs(input.idle_timeout_secs.unwrap_or(600)),
        acquire_timeout: std::time::Duration::from_secs(input.acquire_timeout_secs.unwrap_or(30)),
        status: crate::models::ConnectionStatus::Testing,
        last_tested_at: None,
        last_used_at: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    let result = state.tester.test(&cfg, &password).await;
    state.results.record(cfg.id, result.clone());
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(result, request_id_of(&req))))
}

pub async fn test_by_id(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ConnError> {
    let owner = owner_of(&req)?;
    let team = team_of(&req);
    let id = id.into_inner();
    let cfg = state.registry.get(id, &owner, team.as_deref()).await?;
    let password = state
        .vault
        .open(&cfg.secret_blob)
        .map_err(|_| ConnError::from(ErrorKind::CryptoError))?;
    let password = String::from_utf8(password).map_err(|_| ConnError::from(ErrorKind::CryptoError))?;

    let result = state.tester.test(&cfg, &password).await;
    state.results.record(cfg.id, result.clone());
    state
        .registry
        .audit(AuditRecord {
            id: Uuid::new_v4(),
            connection_id: cfg.id,
            action: AuditAction::Tested,
            user_id: owner,
            ip: req.peer_addr().map(|a| a.ip().to_string()),
            user_agent: None,
            payload: serde_json::json!({ "success": result.success, "elapsed_ms": result.elapsed_ms }),
            at: chrono::Utc::now(),
        })
        .await?;
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(result, request_id_of(&req))))
}

#[derive(serde::Deserialize)]
pub struct BatchRequest {
    pub connection_ids: Vec<Uuid>,
}

pub async fn test_batch(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<BatchRequest>,
) -> Result<HttpResponse, ConnError> {
    let owner = owner_of(&req)?;
    let team = team_of(&req);
    let mut items = Vec::new();
    for id in &body.connection_ids {
        let cfg = state.registry.get(*id, &owner, team.as_deref()).await?;
        let password = state
            .vault
            .open(&cfg.secret_blob)
            .map_err(|_| ConnError::from(ErrorKind::CryptoError))
            .and_then(|bytes| String::from_utf8(bytes).map_err(|_| ConnError::from(ErrorKind::CryptoError)))?;
        items.push((cfg, password));
    }

    let results = state.tester.batch(items).await;
    for (id, result) in &results {
        state.results.record(*id, result.clone());
        let _ = state
            .registry
            .audit(AuditRecord {
                id: Uuid::new_v4(),
                connection_id: *id,
                action: AuditAction::Tested,
                user_id: owner.clone(),
                ip: req.peer_addr().map(|a| a.ip().to_string()),
                user_agent: None,
                payload: serde_json::json!({ "success": result.success, "elapsed_ms": result.elapsed_ms }),
                at: chrono::Utc::now(),
            })
            .await;
    }

    let body: Vec<_> = results
        .into_iter()
        .map(|(id, result)| serde_json::json!({ "connection_id": id, "result": result }))
        .collect();
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(body, request_id_of(&req))))
}

#[derive(serde::Deserialize)]
pub struct SshTunnelRequest {
    pub connection_id: Uuid,
}

pub async fn test_via_ssh_tunnel(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<SshTunnelRequest>,
) -> Result<HttpResponse, ConnError> {
    let owner = owner_of(&req)?;
    let team = team_of(&req);
    let cfg = state.registry.get(body.connection_id, &owner, team.as_deref()).await?;
    let password = state
        .vault
        .open(&cfg.secret_blob)
        .map_err(|_| ConnError::from(ErrorKind::CryptoError))?;
    let password = String::from_utf8(password).map_err(|_| ConnError::from(ErrorKind::CryptoError))?;

    let tunnel = crate::tester::DisabledTunnel;
    let result = state.tester.test_via_tunnel(&cfg, &password, &tunnel).await;
    state.results.record(cfg.id, result.clone());
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(result, request_id_of(&req))))
}

pub async fn test_result(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ConnError> {
    let result = state
        .results
        .get(id.into_inner())
        .ok_or_else(|| ConnError::from(ErrorKind::NotFound("test result".to_string())))?;
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(result, request_id_of(&req))))
}

pub async fn monitoring_pools(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().json(pgai_common::Envelope::ok(state.pool_manager.stats(), request_id_of(&req)))
}

pub async fn monitoring_connection_stats(
    state: web::Data<AppState>,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ConnError> {
    let stats = state
        .pool_manager
        .stats_for(id.into_inner())
        .ok_or_else(|| ConnError::from(ErrorKind::NotFound("pool".to_string())))?;
    Ok(HttpResponse::Ok().json(pgai_common::Envelope::ok(stats, request_id_of(&req))))
}

pub async fn monitoring_health_checks(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().json(pgai_common::Envelope::ok(state.results.recent(), request_id_of(&req)))
}
