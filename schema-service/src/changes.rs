//! Change Detector (spec §4.10): periodically re-discovers monitored
//! connections, diffs against the last known schema, and classifies the
//! result into `SchemaChange` records.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use pgai_common::Metrics;
use pgai_connection_service::models::ConnectionConfig;
use uuid::Uuid;

use crate::cache::Cache;
use crate::discover::Discoverer;
use crate::error::SchemaError;
use crate::fanout::Fanout;
use crate::models::{ChangeDetectionJob, ChangeImpact, ChangeKind, SchemaChange, SchemaObject};

/// A connection under change detection, with the password needed to
/// re-discover it — supplied once on `start`, held only in memory.
struct Monitored {
    cfg: ConnectionConfig,
    password: String,
}

pub struct ChangeDetector {
    jobs: RwLock<HashMap<Uuid, ChangeDetectionJob>>,
    monitored: RwLock<HashMap<Uuid, Monitored>>,
    history: Mutex<HashMap<Uuid, Vec<SchemaChange>>>,
    max_consecutive_errors: u32,
    tick_batch_size: usize,
    metrics: Metrics,
}

impl ChangeDetector {
    pub fn new(max_consecutive_errors: u32, tick_batch_size: usize, metrics: Metrics) -> Self {
        ChangeDetector {
            jobs: RwLock::new(HashMap::new()),
            monitored: RwLock::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            max_consecutive_errors,
            tick_batch_size: tick_batch_size.max(1),
            metrics,
        }
    }

    pub fn start(&self, cfg: ConnectionConfig, password: String) {
        let id = cfg.id;
        self.monitored.write().insert(id, Monitored { cfg, password });
        self.jobs.write().entry(id).or_insert_with(|| ChangeDetectionJob::new(id));
    }

    pub fn stop(&self, connection_id: Uuid) -> bool {
        self.monitored.write().remove(&connection_id);
        self.jobs.write().remove(&connection_id).is_some()
    }

    pub fn status(&self) -> Vec<ChangeDetectionJob> {
        self.jobs.read().values().cloned().collect()
    }

    pub fn job(&self, connection_id: Uuid) -> Option<ChangeDetectionJob> {
        self.jobs.read().get(&connection_id).cloned()
    }

    pub fn history(&self, connection_id: Uuid) -> Vec<SchemaChange> {
        self.history.lock().get(&connection_id).cloned().unwrap_or_default()
    }

    pub fn change(&self, connection_id: Uuid, change_id: Uuid) -> Option<SchemaChange> {
        self.history
            .lock()
            .get(&connection_id)?
            .iter()
            .find(|c| c.id == change_id)
            .cloned()
    }

    pub fn mark_reviewed(&self, connection_id: Uuid, change_id: Uuid) -> bool {
        if let Some(changes) = self.history.lock().get_mut(&connection_id) {
            if let Some(change) = changes.iter_mut().find(|c| c.id == change_id) {
                change.reviewed = true;
                return true;
            }
        }
        false
    }

    /// Forces an out-of-cycle check for one connection (§6 manual trigger
    /// surface), independent of the periodic tick loop.
    pub async fn trigger(
        &self,
        connection_id: Uuid,
        discoverer: &Discoverer,
        cache: &Cache,
        fanout: &Fanout,
    ) -> Result<Vec<SchemaChange>, SchemaError> {
        let monitored = self
            .monitored
            .read()
            .get(&connection_id)
            .map(|m| (m.cfg.clone(), m.password.clone()));
        let (cfg, password) = monitored.ok_or(SchemaError::NotMonitored(connection_id))?;
        self.check_one(&cfg, &password, discoverer, cache, fanout).await
    }

    /// Runs one tick across all monitored connections with bounded
    /// parallelism (§4.10 `tick_batch_size`), ejecting jobs whose error
    /// streak reaches `MaxConsecutiveErrors`.
    pub async fn tick(self: &Arc<Self>, discoverer: Arc<Discoverer>, cache: Arc<Cache>, fanout: Arc<Fanout>) {
        let targets: Vec<(ConnectionConfig, String)> = self
            .monitored
            .read()
            .values()
            .map(|m| (m.cfg.clone(), m.password.clone()))
            .collect();

        let batch_size = self.tick_batch_size;
        stream::iter(targets)
            .map(|(cfg, password)| {
                let detector = Arc::clone(self);
                let discoverer = Arc::clone(&discoverer);
                let cache = Arc::clone(&cache);
                let fanout = Arc::clone(&fanout);
                async move {
                    let id = cfg.id;
                    let result = detector.check_one(&cfg, &password, &discoverer, &cache, &fanout).await;
                    if result.is_err() {
                        detector.record_error(id);
                    }
                }
            })
            .buffer_unordered(batch_size)
            .collect::<Vec<_>>()
            .await;
    }

    fn record_error(&self, connection_id: Uuid) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(&connection_id) {
            job.consecutive_errors += 1;
            if job.consecutive_errors >= self.max_consecutive_errors {
                self.metrics.incr("change_detection.job_ejected");
                jobs.remove(&connection_id);
                drop(jobs);
                self.monitored.write().remove(&connection_id);
            }
        }
    }

    async fn check_one(
        &self,
        cfg: &ConnectionConfig,
        password: &str,
        discoverer: &Discoverer,
        cache: &Cache,
        fanout: &Fanout,
    ) -> Result<Vec<SchemaChange>, SchemaError> {
        let schema = discoverer.discover(cfg, password, true, true).await?;

        let previous_hash = self.jobs.read().get(&cfg.id).and_then(|j| j.last_hash.clone());
        let mut changes = Vec::new();

        if let Some(previous_hash) = previous_hash {
            if previous_hash != schema.version_hash {
                if let Some(previous) = cache.get(cfg.id) {
                    changes = diff_schemas(cfg.id, &previous, &schema);
                    for change in &changes {
                        fanout.publish_change(change).await;
                    }
                }
            }
        }

        cache.set(&schema);
        fanout.publish_discovered(cfg.id, &schema.version_hash).await;

        if !changes.is_empty() {
            self.history.lock().entry(cfg.id).or_default().extend(changes.clone());
        }

        let mut jobs = self.jobs.write();
        let job = jobs.entry(cfg.id).or_insert_with(|| ChangeDetectionJob::new(cfg.id));
        job.last_checked = Some(Utc::now());
        job.last_hash = Some(schema.version_hash.clone());
        job.checks += 1;
        job.consecutive_errors = 0;

        Ok(changes)
    }
}

/// Diffs two schemas keyed by `"schema.name"`; additions/modifications are
/// classified `potentially_breaking`, removals always `breaking` (§4.10
/// resolved Open Question on default impact).
fn diff_schemas(connection_id: Uuid, old: &crate::models::DatabaseSchema, new: &crate::models::DatabaseSchema) -> Vec<SchemaChange> {
    let old_index = old.index_by_identifier();
    let new_index = new.index_by_identifier();
    let now = Utc::now();
    let mut changes = Vec::new();

    for (identifier, new_obj) in &new_index {
        match old_index.get(identifier) {
            None => changes.push(build_change(connection_id, ChangeKind::Addition, new_obj, None, Some(new_obj), now)),
            Some(old_obj) => {
                if !structurally_equal(old_obj, new_obj) {
                    changes.push(build_change(
                        connection_id,
                        ChangeKind::Modification,
                        new_obj,
                        Some(old_obj),
                        Some(new_obj),
                        now,
                    ));
                }
            }
        }
    }

    for (identifier, old_obj) in &old_index {
        if !new_index.contains_key(identifier) {
            changes.push(build_change(connection_id, ChangeKind::Removal, old_obj, Some(old_obj), None, now));
        }
    }

    changes
}

fn structurally_equal(a: &SchemaObject, b: &SchemaObject) -> bool {
    let mut a_columns = a.columns.clone();
    let mut b_columns = b.columns.clone();
    a_columns.sort_by_key(|c| c.ordinal);
    b_columns.sort_by_key(|c| c.ordinal);
    a.kind == b.kind
        && serde_json::to_string(&a_columns).ok() == serde_json::to_string(&b_columns).ok()
        && a.constraints == b.constraints
        && a.indexes == b.indexes
}

fn build_change(
    connection_id: Uuid,
    kind: ChangeKind,
    target: &SchemaObject,
    old: Option<&SchemaObject>,
    new: Option<&SchemaObject>,
    detected_at: chrono::DateTime<Utc>,
) -> SchemaChange {
    let impact = match kind {
        ChangeKind::Removal => ChangeImpact::Breaking,
        ChangeKind::Addition | ChangeKind::Modification => ChangeImpact::PotentiallyBreaking,
    };
    SchemaChange {
        id: Uuid::new_v4(),
        connection_id,
        kind,
        target_kind: target.kind,
        identifier: target.identifier(),
        old: old.and_then(|o| serde_json::to_value(o).ok()),
        new: new.and_then(|n| serde_json::to_value(n).ok()),
        impact,
        detected_at,
        reviewed: false,
    }
}

/// Default tick cadence when no explicit interval is provided by settings.
pub fn tick_interval(refresh_interval_secs: u64) -> Duration {
    Duration::from_secs(refresh_interval_secs.max(1))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{Column, ObjectCounts, ObjectKind};

    fn column(name: &str, ordinal: i32) -> Column {
        Column {
            name: name.to_string(),
            data_type: "text".to_string(),
            nullable: true,
            default: None,
            primary: false,
            foreign: false,
            unique: false,
            ordinal,
            max_length: None,
            precision: None,
            scale: None,
        }
    }

    fn schema(objects: Vec<SchemaObject>) -> crate::models::DatabaseSchema {
        crate::models::DatabaseSchema {
            connection_id: Uuid::nil(),
            objects,
            relationships: Vec::new(),
            discovered_at: Utc::now(),
            version_hash: "x".to_string(),
            duration_ms: 0,
            counts: ObjectCounts::default(),
        }
    }

    fn object(name: &str, columns: Vec<Column>) -> SchemaObject {
        SchemaObject {
            kind: ObjectKind::Table,
            schema: "public".to_string(),
            name: name.to_string(),
            columns,
            constraints: serde_json::json!({}),
            indexes: serde_json::json!({}),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn addition_detected_as_potentially_breaking() {
        let old = schema(vec![]);
        let new = schema(vec![object("users", vec![column("id", 0)])]);
        let changes = diff_schemas(Uuid::nil(), &old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Addition);
        assert_eq!(changes[0].impact, ChangeImpact::PotentiallyBreaking);
    }

    #[test]
    fn removal_detected_as_breaking() {
        let old = schema(vec![object("users", vec![column("id", 0)])]);
        let new = schema(vec![]);
        let changes = diff_schemas(Uuid::nil(), &old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Removal);
        assert_eq!(changes[0].impact, ChangeImpact::Breaking);
    }

    #[test]
    fn unchanged_objects_produce_no_changes() {
        let old = schema(vec![object("users", vec![column("id", 0)])]);
        let new = schema(vec![object("users", vec![column("id", 0)])]);
        assert!(diff_schemas(Uuid::nil(), &old, &new).is_empty());
    }

    #[test]
    fn column_modification_detected() {
        let old = schema(vec![object("users", vec![column("id", 0)])]);
        let new = schema(vec![object("users", vec![column("id", 0), column("email", 1)])]);
        let changes = diff_schemas(Uuid::nil(), &old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modification);
    }
}
