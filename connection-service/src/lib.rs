//! Connection service: registry, pool manager, and tester for user-configured
//! target databases (spec §4.2, §4.3, §4.4, §6).
#[macro_use]
extern crate slog_scope;

pub mod error;
pub mod handlers;
pub mod models;
pub mod pool;
pub mod registry;
pub mod server;
pub mod tester;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pgai_common::Metrics;
use pgai_settings::Settings;
use pgai_vault::Vault;
use uuid::Uuid;

use crate::models::TestResult;
use crate::pool::PoolManager;
use crate::registry::ConnectionRegistry;
use crate::tester::Tester;

/// Bounded in-memory store of the most recent `TestResult` per connection,
/// backing `/testing/results/:id` and `/monitoring/health-checks`. Not the
/// audit log — that persists through `ConnectionRegistry::audit` instead.
#[derive(Default)]
pub struct TestResultStore {
    recent: Mutex<HashMap<Uuid, TestResult>>,
}

impl TestResultStore {
    pub fn record(&self, connection_id: Uuid, result: TestResult) {
        self.recent.lock().insert(connection_id, result);
    }

    pub fn get(&self, connection_id: Uuid) -> Option<TestResult> {
        self.recent.lock().get(&connection_id).cloned()
    }

    pub fn recent(&self) -> Vec<(Uuid, TestResult)> {
        self.recent
            .lock()
            .iter()
            .map(|(id, result)| (*id, result.clone()))
            .collect()
    }
}

pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub pool_manager: Arc<PoolManager>,
    pub tester: Arc<Tester>,
    pub vault: Arc<Vault>,
    pub results: Arc<TestResultStore>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, metrics: Metrics) -> Self {
        let vault = Arc::new(
            Vault::from_passphrase(&settings.vault.master_key).expect("vault master key derivation"),
        );
        let registry = registry::registry_from_settings(&settings);
        let pool_manager = PoolManager::new(
            settings.pool.global_max as u32,
            settings.pool.per_user_max as u32,
            std::time::Duration::from_secs(settings.pool.idle_timeout_secs),
            metrics.clone(),
        );
        let tester = Arc::new(Tester::new(
            std::time::Duration::from_secs(settings.tester.test_timeout_secs),
            settings.tester.max_batch,
            metrics.clone(),
        ));

        AppState {
            settings,
            registry,
            pool_manager,
            tester,
            vault,
            results: Arc::new(TestResultStore::default()),
            metrics,
        }
    }
}
