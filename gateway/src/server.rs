//! Assembles the `actix-web` app: CORS, the admission layer per route
//! group, route guards, and the upstream-proxying handlers. Mirrors the
//! layering of the teacher's `syncserver::build_app!` macro, generalized
//! into a function since this gateway doesn't need the teacher's
//! compile-time feature-gated variants.
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{dev, web, App, HttpServer};

use crate::admission::{limiter::RateLimiter, Admission, AdmissionConfig, LimiterKey};
use crate::auth::{Authenticate, OptionalAuthenticate};
use crate::{handlers, health, AppState};

fn build_cors(origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allow_any_header()
        .max_age(3600);
    if origins.iter().any(|o| o == "*") {
        cors = cors.allow_any_origin();
    } else {
        for origin in origins {
            cors = cors.allowed_origin(origin);
        }
    }
    cors
}

fn admission(state: &AppState, profile: &pgai_settings::LimiterProfile, key: LimiterKey, refund: bool) -> Admission {
    Admission {
        config: AdmissionConfig {
            allowed_methods: AdmissionConfig::default_methods(),
            max_body_bytes: state.settings.max_body_bytes,
            allowed_content_types: vec!["application/json".to_string()],
            limiter: RateLimiter::new(*profile),
            limiter_key: key,
            refund_on_success: refund,
        },
    }
}

pub fn configure(state: web::Data<AppState>) -> impl Fn(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        let settings = state.settings.clone();

        cfg.service(web::resource("/health").route(web::get().to(health::health)))
            .service(web::resource("/health/live").route(web::get().to(health::live)))
            .service(web::resource("/health/ready").route(web::get().to(health::ready)))
            .service(web::resource("/metrics").route(web::get().to(health::metrics)));

        cfg.service(
            web::scope("/api/v1/auth")
                .wrap(admission(&state, &settings.rate_limit.auth, LimiterKey::Ip, true))
                .default_service(web::to(handlers::auth_proxy)),
        );

        // `.wrap()` runs in LIFO order — the last-registered middleware is
        // the first to see the request. `Admission`'s `UserOrIp` limiter key
        // needs the `AuthContext` extension `Authenticate` inserts, so
        // `Authenticate` must be registered *after* `Admission` here to run
        // *before* it.
        cfg.service(
            web::scope("/api/v1/users")
                .wrap(admission(&state, &settings.rate_limit.api, LimiterKey::UserOrIp, false))
                .wrap(Authenticate {
                    verifier: state.verifier.clone(),
                })
                .default_service(web::to(handlers::users_proxy)),
        );

        cfg.service(
            web::scope("/api/v1/connections")
                .wrap(admission(&state, &settings.rate_limit.api, LimiterKey::UserOrIp, false))
                .wrap(Authenticate {
                    verifier: state.verifier.clone(),
                })
                .default_service(web::to(handlers::connections_proxy)),
        );

        cfg.service(
            web::scope("/api/v1/schemas")
                .wrap(admission(&state, &settings.rate_limit.api, LimiterKey::UserOrIp, false))
                .wrap(Authenticate {
                    verifier: state.verifier.clone(),
                })
                .default_service(web::to(handlers::schemas_proxy)),
        );

        cfg.service(
            web::scope("/api/v1/admin")
                .wrap(admission(&state, &settings.rate_limit.api, LimiterKey::UserOrIp, false))
                .wrap(Authenticate {
                    verifier: state.verifier.clone(),
                })
                .default_service(web::to(handlers::admin_proxy)),
        );

        cfg.service(
            web::scope("/api/v1/public")
                .wrap(admission(&state, &settings.rate_limit.public, LimiterKey::Ip, false))
                .wrap(OptionalAuthenticate {
                    verifier: state.verifier.clone(),
                })
                .default_service(web::to(handlers::public_proxy)),
        );
    }
}

pub async fn run(state: Arc<AppState>) -> Result<dev::Server, Box<dyn std::error::Error>> {
    let settings = state.settings.clone();
    let data = web::Data::from(state);

    let server = HttpServer::new(move || {
        let data = data.clone();
        App::new()
            .app_data(data.clone())
            .wrap(build_cors(&data.settings.cors_allowed_origins))
            .wrap(crate::admission::timeout::RequestTimeout {
                duration: std::time::Duration::from_secs(data.settings.request_timeout_secs),
            })
            .configure(configure(data))
    })
    .bind((settings.host.as_str(), settings.port))?
    .run();

    Ok(server)
}
