//! Schema Cache (spec §4.9): TTL-bounded, capacity-bounded store of
//! discovered schemas, serialized with `zstd` to keep the resident set
//! small under `MaxEntries`.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use pgai_common::Metrics;
use uuid::Uuid;

use crate::models::{CacheEntry, CacheStats, DatabaseSchema};

const ZSTD_LEVEL: i32 = 3;

struct Entry {
    bytes: Vec<u8>,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    hits: u64,
    last_hit_at: DateTime<Utc>,
}

pub struct Cache {
    entries: RwLock<HashMap<Uuid, Entry>>,
    ttl: ChronoDuration,
    max_entries: usize,
    metrics: Metrics,
}

impl Cache {
    pub fn new(ttl_secs: u64, max_entries: usize, metrics: Metrics) -> Self {
        Cache {
            entries: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::seconds(ttl_secs as i64),
            max_entries,
            metrics,
        }
    }

    /// Returns a decompressed, deserialized schema if a live entry exists,
    /// bumping the hit counter in the same pass (§4.9 "hit accounting").
    pub fn get(&self, connection_id: Uuid) -> Option<Arc<DatabaseSchema>> {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&connection_id)?;
        if entry.expires_at <= now {
            entries.remove(&connection_id);
            self.metrics.incr("cache.expired");
            return None;
        }
        entry.hits += 1;
        entry.last_hit_at = now;
        let schema = deserialize(&entry.bytes)?;
        self.metrics.incr("cache.hit");
        Some(Arc::new(schema))
    }

    pub fn set(&self, schema: &DatabaseSchema) {
        let bytes = match serialize(schema) {
            Some(b) => b,
            None => return,
        };
        let now = Utc::now();
        let mut entries = self.entries.write();
        entries.insert(
            schema.connection_id,
            Entry {
                bytes,
                inserted_at: now,
                expires_at: now + self.ttl,
                hits: 0,
                last_hit_at: now,
            },
        );
        if entries.len() > self.max_entries {
            evict_lru(&mut entries, self.max_entries);
            self.metrics.incr("cache.evicted");
        }
    }

    pub fn invalidate(&self, connection_id: Uuid) -> bool {
        self.entries.write().remove(&connection_id).is_some()
    }

    pub fn entry_meta(&self, connection_id: Uuid) -> Option<CacheEntry> {
        let entries = self.entries.read();
        let entry = entries.get(&connection_id)?;
        Some(CacheEntry {
            connection_id,
            schema_bytes: Vec::new(),
            inserted_at: entry.inserted_at,
            expires_at: entry.expires_at,
            hits: entry.hits,
            last_hit_at: entry.last_hit_at,
        })
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let total_entries = entries.len();
        let approximate_bytes: usize = entries.values().map(|e| e.bytes.len()).sum();
        let total_hits: u64 = entries.values().map(|e| e.hits).sum();
        let hit_rate = if total_entries == 0 {
            0.0
        } else {
            total_hits as f64 / total_entries as f64
        };
        CacheStats {
            total_entries,
            approximate_bytes,
            hit_rate,
            oldest_inserted_at: entries.values().map(|e| e.inserted_at).min(),
            newest_inserted_at: entries.values().map(|e| e.inserted_at).max(),
        }
    }
}

/// Evicts the coldest ~20% of entries by `last_hit_at` when capacity is
/// exceeded (§4.9 "approximate LRU eviction").
fn evict_lru(entries: &mut HashMap<Uuid, Entry>, max_entries: usize) {
    let overflow = entries.len().saturating_sub(max_entries);
    let to_evict = overflow.max(entries.len().div_ceil(5)).min(entries.len());
    if to_evict == 0 {
        return;
    }
    let mut by_recency: Vec<(Uuid, DateTime<Utc>)> =
        entries.iter().map(|(id, e)| (*id, e.last_hit_at)).collect();
    by_recency.sort_by_key(|(_, last_hit)| *last_hit);
    for (id, _) in by_recency.into_iter().take(to_evict) {
        entries.remove(&id);
    }
}

fn serialize(schema: &DatabaseSchema) -> Option<Vec<u8>> {
    let json = serde_json::to_vec(schema).ok()?;
    zstd::encode_all(json.as_slice(), ZSTD_LEVEL).ok()
}

fn deserialize(bytes: &[u8]) -> Option<DatabaseSchema> {
    let json = zstd::decode_all(bytes).ok()?;
    serde_json::from_slice(&json).ok()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::ObjectCounts;

    fn schema(id: Uuid) -> DatabaseSchema {
        DatabaseSchema {
            connection_id: id,
            objects: Vec::new(),
            relationships: Vec::new(),
            discovered_at: Utc::now(),
            version_hash: "abc".to_string(),
            duration_ms: 1,
            counts: ObjectCounts::default(),
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = Cache::new(300, 10, Metrics::noop());
        let id = Uuid::new_v4();
        cache.set(&schema(id));
        let got = cache.get(id).expect("entry present");
        assert_eq!(got.connection_id, id);
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = Cache::new(0, 10, Metrics::noop());
        let id = Uuid::new_v4();
        cache.set(&schema(id));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(cache.get(id).is_none());
    }

    #[test]
    fn capacity_overflow_evicts_coldest_entries() {
        let cache = Cache::new(300, 5, Metrics::noop());
        let ids: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            cache.set(&schema(*id));
        }
        assert!(cache.stats().total_entries <= 5);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = Cache::new(300, 10, Metrics::noop());
        let id = Uuid::new_v4();
        cache.set(&schema(id));
        assert!(cache.invalidate(id));
        assert!(cache.get(id).is_none());
    }
}
