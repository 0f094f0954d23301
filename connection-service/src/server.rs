//! Assembles the `actix-web` app for `pgai-connections` (§6 "Connection
//! service external surface"). This service trusts the gateway's identity
//! headers rather than re-running JWT verification itself.
use std::sync::Arc;

use actix_web::{dev, web, App, HttpServer};

use crate::{handlers, AppState};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)));

    cfg.service(
        web::scope("/connections")
            .route("", web::post().to(handlers::create_connection))
            .route("", web::get().to(handlers::list_connections))
            .route("/{id}", web::get().to(handlers::get_connection))
            .route("/{id}", web::patch().to(handlers::update_connection))
            .route("/{id}", web::delete().to(handlers::delete_connection)),
    );

    cfg.service(
        web::scope("/testing")
            .route("/connections", web::post().to(handlers::test_adhoc))
            .route("/connections/batch", web::post().to(handlers::test_batch))
            .route("/connections/ssh-tunnel", web::post().to(handlers::test_via_ssh_tunnel))
            .route("/connections/{id}", web::post().to(handlers::test_by_id))
            .route("/results/{id}", web::get().to(handlers::test_result)),
    );

    cfg.service(
        web::scope("/monitoring")
            .route("/pools", web::get().to(handlers::monitoring_pools))
            .route("/connections/{id}/stats", web::get().to(handlers::monitoring_connection_stats))
            .route("/health-checks", web::get().to(handlers::monitoring_health_checks)),
    );
}

async fn health() -> actix_web::HttpResponse {
    actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub async fn run(state: Arc<AppState>) -> Result<dev::Server, Box<dyn std::error::Error>> {
    let settings = state.settings.clone();
    let data = web::Data::from(state);

    let pool_manager = data.pool_manager.clone();
    let eviction_tick = std::time::Duration::from_secs(settings.pool.eviction_tick_secs);
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(eviction_tick);
        loop {
            interval.tick().await;
            let evicted = pool_manager.evict_idle();
            if evicted > 0 {
                debug!("evicted {} idle pools", evicted);
            }
        }
    });

    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind((settings.host.as_str(), settings.port))?
        .run();

    Ok(server)
}
