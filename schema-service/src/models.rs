//! Data model for the Schema service (spec §3: `DatabaseSchema`, `CacheEntry`,
//! `SchemaChange`, `ChangeDetectionJob`, `Subscription`).
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    View,
    Function,
    #[serde(rename = "type")]
    Type,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary: bool,
    pub foreign: bool,
    pub unique: bool,
    pub ordinal: i32,
    pub max_length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaObject {
    pub kind: ObjectKind,
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    /// Constraint definitions as opaque structural JSON — the exact shape is
    /// dialect-specific; only used for modification diffing, never compared
    /// field-by-field outside that (§3 `version_hash` invariant).
    pub constraints: serde_json::Value,
    pub indexes: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl SchemaObject {
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Relationship {
    pub from_identifier: String,
    pub from_column: String,
    pub to_identifier: String,
    pub to_column: String,
    pub constraint_name: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ObjectCounts {
    pub tables: usize,
    pub views: usize,
    pub functions: usize,
    pub types: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub connection_id: Uuid,
    pub objects: Vec<SchemaObject>,
    pub relationships: Vec<Relationship>,
    pub discovered_at: DateTime<Utc>,
    pub version_hash: String,
    pub duration_ms: u64,
    pub counts: ObjectCounts,
}

impl DatabaseSchema {
    /// Builds a map keyed by `"schema.name"`, as the Change Detector's diff
    /// step requires (§4.10).
    pub fn index_by_identifier(&self) -> std::collections::HashMap<String, &SchemaObject> {
        self.objects.iter().map(|o| (o.identifier(), o)).collect()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DiscoverRequest {
    pub connection_id: Uuid,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default)]
    pub include_system: bool,
    #[serde(default)]
    pub include_functions: bool,
    #[serde(default)]
    pub include_types: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheEntry {
    pub connection_id: Uuid,
    #[serde(skip)]
    pub schema_bytes: Vec<u8>,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hits: u64,
    pub last_hit_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub approximate_bytes: usize,
    pub hit_rate: f64,
    pub oldest_inserted_at: Option<DateTime<Utc>>,
    pub newest_inserted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Addition,
    Modification,
    Removal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeImpact {
    Breaking,
    PotentiallyBreaking,
    NonBreaking,
}

#[derive(Clone, Debug, Serialize)]
pub struct SchemaChange {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub kind: ChangeKind,
    pub target_kind: ObjectKind,
    pub identifier: String,
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
    pub impact: ChangeImpact,
    pub detected_at: DateTime<Utc>,
    pub reviewed: bool,
}

#[derive(Clone, Debug)]
pub struct ChangeDetectionJob {
    pub connection_id: Uuid,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_hash: Option<String>,
    pub checks: u64,
    pub consecutive_errors: u32,
}

impl ChangeDetectionJob {
    pub fn new(connection_id: Uuid) -> Self {
        ChangeDetectionJob {
            connection_id,
            last_checked: None,
            last_hash: None,
            checks: 0,
            consecutive_errors: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Subscription {
    pub session: Uuid,
    pub connection_id: Uuid,
    pub subscribed_at: DateTime<Utc>,
}
