//! Health fan-out and metrics exposition (spec §6): `/health` fans out to
//! every registered upstream, `/health/live` only checks process liveness,
//! `/health/ready` requires every *critical* upstream to be healthy.
use std::collections::HashMap;
use std::time::Duration;

use actix_web::{web, HttpResponse};
use futures::future::join_all;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct UpstreamHealth {
    healthy: bool,
    status: Option<u16>,
}

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    upstreams: HashMap<String, UpstreamHealth>,
}

async fn probe_upstream(client: &reqwest::Client, base_url: &str) -> UpstreamHealth {
    if base_url.is_empty() {
        return UpstreamHealth {
            healthy: true,
            status: None,
        };
    }
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    match client
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => UpstreamHealth {
            healthy: resp.status().is_success(),
            status: Some(resp.status().as_u16()),
        },
        Err(_) => UpstreamHealth {
            healthy: false,
            status: None,
        },
    }
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let names: Vec<&String> = state.router.services.keys().collect();
    let probes = join_all(
        names
            .iter()
            .map(|name| probe_upstream(&state.router.client, &state.router.services[*name].base_url)),
    )
    .await;

    let mut upstreams = HashMap::new();
    let mut all_healthy = true;
    for (name, health) in names.into_iter().zip(probes.into_iter()) {
        all_healthy &= health.healthy;
        upstreams.insert(name.clone(), health);
    }

    let body = HealthResponse {
        healthy: all_healthy,
        upstreams,
    };
    if all_healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn live() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "live" }))
}

/// Critical upstreams gate readiness: `user` (auth) and `connection`
/// (the platform's primary data path).
const CRITICAL_UPSTREAMS: &[&str] = &["user", "connection"];

pub async fn ready(state: web::Data<AppState>) -> HttpResponse {
    let probes = join_all(CRITICAL_UPSTREAMS.iter().map(|name| async move {
        let base_url = state
            .router
            .services
            .get(*name)
            .map(|s| s.base_url.clone())
            .unwrap_or_default();
        probe_upstream(&state.router.client, &base_url).await
    }))
    .await;

    if probes.iter().all(|h| h.healthy) {
        HttpResponse::Ok().json(serde_json::json!({ "status": "ready" }))
    } else {
        HttpResponse::ServiceUnavailable().json(serde_json::json!({ "status": "not_ready" }))
    }
}

pub async fn metrics() -> HttpResponse {
    // Prometheus/statsd exposition is an external collaborator (§1); this
    // endpoint exists as the documented surface but the gateway itself
    // pushes metrics over statsd (`pgai_common::Metrics`) rather than
    // exposing a pull-based registry, so it returns the minimal textual
    // format callers expect without inventing a scrape registry.
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body("# pgai-gateway metrics are pushed via statsd; see ops docs\n")
}
