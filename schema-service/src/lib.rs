//! Schema service: catalog discovery, caching, change detection, and
//! subscription fan-out for user-configured target databases (spec
//! §4.8-§4.11, §6). Reuses `pgai_connection_service`'s registry and vault to
//! resolve the same connection metadata the Connection service manages,
//! rather than re-deriving or re-fetching it over the network.
#[macro_use]
extern crate slog_scope;

pub mod cache;
pub mod changes;
pub mod discover;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod models;
pub mod server;

use std::sync::Arc;

use pgai_common::Metrics;
use pgai_connection_service::registry::ConnectionRegistry;
use pgai_settings::Settings;
use pgai_vault::Vault;

use crate::cache::Cache;
use crate::changes::ChangeDetector;
use crate::discover::Discoverer;
use crate::fanout::Fanout;

pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub vault: Arc<Vault>,
    pub cache: Arc<Cache>,
    pub discoverer: Arc<Discoverer>,
    pub change_detector: Arc<ChangeDetector>,
    pub fanout: Arc<Fanout>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, metrics: Metrics) -> Self {
        let vault = Arc::new(
            Vault::from_passphrase(&settings.vault.master_key).expect("vault master key derivation"),
        );
        let registry = pgai_connection_service::registry::registry_from_settings(&settings);
        let cache = Arc::new(Cache::new(settings.cache.ttl_secs, settings.cache.max_entries, metrics.clone()));
        let discoverer = Arc::new(Discoverer::new(settings.discovery.max_concurrent, metrics.clone()));
        let change_detector = Arc::new(ChangeDetector::new(
            settings.change_detection.max_consecutive_errors,
            settings.change_detection.tick_batch_size,
            metrics.clone(),
        ));
        let fanout = Arc::new(Fanout::new());

        AppState {
            settings,
            registry,
            vault,
            cache,
            discoverer,
            change_detector,
            fanout,
            metrics,
        }
    }
}
