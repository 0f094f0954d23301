//! Assembles the `actix-web` app for `pgai-schema` (§6 "Schema service
//! external surface"), plus the background change-detection tick loop.
use std::sync::Arc;

use actix_web::{dev, web, App, HttpServer};

use crate::{handlers, AppState};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)));

    cfg.service(
        web::scope("/schemas")
            .route("/discover", web::post().to(handlers::discover))
            .route("/search", web::post().to(handlers::search))
            .route("/connections/{id}", web::get().to(handlers::get_schema))
            .route("/cache/{id}", web::delete().to(handlers::invalidate_cache)),
    );

    cfg.service(
        web::scope("/changes")
            .route("/start", web::post().to(handlers::changes_start))
            .route("/stop", web::post().to(handlers::changes_stop))
            .route("/trigger/{id}", web::post().to(handlers::changes_trigger))
            .route("/status", web::get().to(handlers::changes_status))
            .route("/{id}", web::get().to(handlers::get_change))
            .route("/{connectionId}/{changeId}/review", web::post().to(handlers::review_change)),
    );

    cfg.service(web::resource("/history/{id}").route(web::get().to(handlers::history)));
    cfg.service(web::resource("/analytics/changes/{id}").route(web::get().to(handlers::analytics)));
    cfg.service(web::resource("/ws/schemas").route(web::get().to(handlers::subscribe)));
}

async fn health() -> actix_web::HttpResponse {
    actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub async fn run(state: Arc<AppState>) -> Result<dev::Server, Box<dyn std::error::Error>> {
    let settings = state.settings.clone();
    let data = web::Data::from(state);

    let change_detector = data.change_detector.clone();
    let discoverer = data.discoverer.clone();
    let cache = data.cache.clone();
    let fanout = data.fanout.clone();
    let tick_interval = crate::changes::tick_interval(settings.change_detection.refresh_interval_secs);
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            change_detector
                .tick(discoverer.clone(), cache.clone(), fanout.clone())
                .await;
        }
    });

    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind((settings.host.as_str(), settings.port))?
        .run();

    Ok(server)
}
