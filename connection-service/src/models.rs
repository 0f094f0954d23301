//! Data model for the Connection service (spec §3: `ConnectionConfig`,
//! `TestResult`) plus the audit record persisted alongside every registry
//! mutation and test (§4.2).
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Mysql,
    Sqlite,
    Mongo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Active,
    Inactive,
    Testing,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: Uuid,
    pub owner_user: String,
    pub team: Option<String>,
    pub name: String,
    pub description: Option<String>,

    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Always ciphertext at rest, produced by `pgai_vault::Vault::seal`
    /// (§4.1, §3 invariant).
    pub secret_blob: Vec<u8>,
    pub tls_enabled: bool,
    pub tls_material: Option<String>,
    pub options: serde_json::Value,

    pub min: u32,
    pub max: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,

    pub status: ConnectionStatus,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionConfig {
    /// `0 ≤ min < max ≤ 100`; timeouts in `[1s, 5min]` (§3 invariants).
    pub fn validate(&self) -> Result<(), String> {
        if self.min >= self.max {
            return Err("pool min must be < max".to_string());
        }
        if self.max > 100 {
            return Err("pool max must be <= 100".to_string());
        }
        let bounds = Duration::from_secs(1)..=Duration::from_secs(300);
        if !bounds.contains(&self.idle_timeout) {
            return Err("idle_timeout must be within [1s, 5min]".to_string());
        }
        if !bounds.contains(&self.acquire_timeout) {
            return Err("acquire_timeout must be within [1s, 5min]".to_string());
        }
        Ok(())
    }
}

/// A create/update request; distinct from `ConnectionConfig` so identity and
/// lifecycle fields can't be set by the caller.
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionInput {
    pub team: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub tls_enabled: bool,
    pub tls_material: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub idle_timeout_secs: Option<u64>,
    pub acquire_timeout_secs: Option<u64>,
}

/// A sparse patch; only present fields are applied (§4.2 `update`).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls_enabled: Option<bool>,
    pub tls_material: Option<String>,
    pub options: Option<serde_json::Value>,
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub idle_timeout_secs: Option<u64>,
    pub acquire_timeout_secs: Option<u64>,
    pub status: Option<ConnectionStatus>,
}

impl ConnectionPatch {
    /// Whether applying this patch changes the dial target or credentials,
    /// which invalidates the owning pool (§4.2 `update`, §3 invariants).
    pub fn changes_target_or_credentials(&self) -> bool {
        self.host.is_some()
            || self.port.is_some()
            || self.database.is_some()
            || self.username.is_some()
            || self.password.is_some()
            || self.tls_enabled.is_some()
            || self.tls_material.is_some()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConnectionFilter {
    pub team: Option<String>,
    pub dialect: Option<Dialect>,
    pub status: Option<ConnectionStatus>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestErrorCode {
    ConnectionRefused,
    HostNotFound,
    Timeout,
    AuthFailed,
    DatabaseMissing,
    PermissionDenied,
    TlsError,
    Unsupported,
    Unknown,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub version: String,
    pub size_bytes: Option<u64>,
    pub visible_schemas: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TestResult {
    pub success: bool,
    pub elapsed_ms: u64,
    pub dialect_version: Option<String>,
    pub server_info: Option<ServerInfo>,
    pub error_code: Option<TestErrorCode>,
    pub error_message: Option<String>,
    pub tested_at: DateTime<Utc>,
}

impl TestResult {
    pub fn failure(code: TestErrorCode, message: impl Into<String>, elapsed: Duration) -> Self {
        TestResult {
            success: false,
            elapsed_ms: elapsed.as_millis() as u64,
            dialect_version: None,
            server_info: None,
            error_code: Some(code),
            error_message: Some(message.into()),
            tested_at: Utc::now(),
        }
    }

    pub fn success(info: ServerInfo, elapsed: Duration) -> Self {
        TestResult {
            success: true,
            elapsed_ms: elapsed.as_millis() as u64,
            dialect_version: Some(info.version.clone()),
            server_info: Some(info),
            error_code: None,
            error_message: None,
            tested_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Tested,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub action: AuditAction,
    pub user_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}
