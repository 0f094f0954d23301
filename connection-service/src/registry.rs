//! Connection Registry (spec §4.2): CRUD + list over `ConnectionConfig`,
//! backed by a `ConnectionRegistry` trait so the service can swap in an
//! in-memory implementation for unit tests (§6 "the schema service may
//! substitute an in-memory backend for unit tests", generalized here to the
//! connection service's own registry), mirroring
//! `syncstorage_db_common::{DbPool, Db}`.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use pgai_common::ErrorKind;
use uuid::Uuid;

use crate::error::ConnError;
use crate::models::{
    AuditAction, AuditRecord, ConnectionConfig, ConnectionFilter, ConnectionInput,
    ConnectionPatch, ConnectionStatus,
};

pub type ConnResult<T> = Result<T, ConnError>;

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn create(
        &self,
        owner: &str,
        input: ConnectionInput,
        sealed_secret: Vec<u8>,
    ) -> ConnResult<ConnectionConfig>;

    async fn get(&self, id: Uuid, owner: &str, team: Option<&str>) -> ConnResult<ConnectionConfig>;

    async fn update(
        &self,
        id: Uuid,
        owner: &str,
        patch: ConnectionPatch,
        sealed_secret: Option<Vec<u8>>,
    ) -> ConnResult<(ConnectionConfig, bool)>;

    async fn delete(&self, id: Uuid, owner: &str) -> ConnResult<ConnectionConfig>;

    async fn list(&self, owner: &str, filter: ConnectionFilter) -> ConnResult<Vec<ConnectionConfig>>;

    async fn audit(&self, record: AuditRecord) -> ConnResult<()>;
}

/// In-memory implementation, used by unit tests and as the default when no
/// `database_url` is configured.
#[derive(Default)]
pub struct InMemoryRegistry {
    configs: RwLock<HashMap<Uuid, ConnectionConfig>>,
    audits: RwLock<Vec<AuditRecord>>,
    max_per_user: usize,
}

impl InMemoryRegistry {
    pub fn new(max_per_user: usize) -> Self {
        InMemoryRegistry {
            configs: RwLock::new(HashMap::new()),
            audits: RwLock::new(Vec::new()),
            max_per_user,
        }
    }

    fn name_taken(&self, owner: &str, name: &str, exclude: Option<Uuid>) -> bool {
        let lowered = name.to_lowercase();
        self.configs.read().values().any(|c| {
            Some(c.id) != exclude && c.owner_user == owner && c.name.to_lowercase() == lowered
        })
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryRegistry {
    async fn create(
        &self,
        owner: &str,
        input: ConnectionInput,
        sealed_secret: Vec<u8>,
    ) -> ConnResult<ConnectionConfig> {
        if self.name_taken(owner, &input.name, None) {
            return Err(ConnError::AlreadyExists(input.name));
        }
        let count = self
            .configs
            .read()
            .values()
            .filter(|c| c.owner_user == owner)
            .count();
        if count >= self.max_per_user {
            return Err(ConnError::LimitExceeded);
        }

        let now = Utc::now();
        let cfg = ConnectionConfig {
            id: Uuid::new_v4(),
            owner_user: owner.to_string(),
            team: input.team,
            name: input.name,
            description: input.description,
            dialect: input.dialect,
            host: input.host,
            port: input.port,
            database: input.database,
            username: input.username,
            secret_blob: sealed_secret,
            tls_enabled: input.tls_enabled,
            tls_material: input.tls_material,
            options: input.options,
            min: input.min.unwrap_or(1),
            max: input.max.unwrap_or(10),
            idle_timeout: std::time::Duration::from_secs(input.idle_timeout_secs.unwrap_or(600)),
            acquire_timeout: std::time::Duration::from_secs(
                input.acquire_timeout_secs.unwrap_or(30),
            ),
            status: ConnectionStatus::Inactive,
            last_tested_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        cfg.validate().map_err(|e| ConnError::from(ErrorKind::Validation(e)))?;
        self.configs.write().insert(cfg.id, cfg.clone());
        Ok(cfg)
    }

    async fn get(&self, id: Uuid, owner: &str, team: Option<&str>) -> ConnResult<ConnectionConfig> {
        let configs = self.configs.read();
        let cfg = configs
            .get(&id)
            .ok_or_else(|| ConnError::from(ErrorKind::NotFound("connection".to_string())))?;
        let accessible = cfg.owner_user == owner || (team.is_some() && cfg.team.as_deref() == team);
        if !accessible {
            return Err(ConnError::from(ErrorKind::NotFound("connection".to_string())));
        }
        Ok(cfg.clone())
    }

    async fn update(
        &self,
        id: Uuid,
        owner: &str,
        patch: ConnectionPatch,
        sealed_secret: Option<Vec<u8>>,
    ) -> ConnResult<(ConnectionConfig, bool)> {
        let invalidate = patch.changes_target_or_credentials();
        let mut configs = self.configs.write();
        let cfg = configs
            .get_mut(&id)
            .filter(|c| c.owner_user == owner)
            .ok_or_else(|| ConnError::from(ErrorKind::NotFound("connection".to_string())))?;

        if let Some(name) = &patch.name {
            if name.to_lowercase() != cfg.name.to_lowercase()
                && self.name_taken(owner, name, Some(id))
            {
                return Err(ConnError::AlreadyExists(name.clone()));
            }
            cfg.name = name.clone();
        }
        if let Some(v) = patch.description {
            cfg.description = Some(v);
        }
        if let Some(v) = patch.host {
            cfg.host = v;
        }
        if let Some(v) = patch.port {
            cfg.port = v;
        }
        if let Some(v) = patch.database {
            cfg.database = v;
        }
        if let Some(v) = patch.username {
            cfg.username = v;
        }
        if let Some(v) = sealed_secret {
            cfg.secret_blob = v;
        }
        if let Some(v) = patch.tls_enabled {
            cfg.tls_enabled = v;
        }
        if let Some(v) = patch.tls_material {
            cfg.tls_material = Some(v);
        }
        if let Some(v) = patch.options {
            cfg.options = v;
        }
        if let Some(v) = patch.min {
            cfg.min = v;
        }
        if let Some(v) = patch.max {
            cfg.max = v;
        }
        if let Some(v) = patch.idle_timeout_secs {
            cfg.idle_timeout = std::time::Duration::from_secs(v);
        }
        if let Some(v) = patch.acquire_timeout_secs {
            cfg.acquire_timeout = std::time::Duration::from_secs(v);
        }
        if let Some(v) = patch.status {
            cfg.status = v;
        }
        cfg.updated_at = Utc::now();
        cfg.validate().map_err(|e| ConnError::from(ErrorKind::Validation(e)))?;
        Ok((cfg.clone(), invalidate))
    }

    async fn delete(&self, id: Uuid, owner: &str) -> ConnResult<ConnectionConfig> {
        let mut configs = self.configs.write();
        let cfg = configs
            .get(&id)
            .filter(|c| c.owner_user == owner)
            .cloned()
            .ok_or_else(|| ConnError::from(ErrorKind::NotFound("connection".to_string())))?;
        configs.remove(&id);
        Ok(cfg)
    }

    async fn list(&self, owner: &str, filter: ConnectionFilter) -> ConnResult<Vec<ConnectionConfig>> {
        let configs = self.configs.read();
        let mut results: Vec<ConnectionConfig> = configs
            .values()
            .filter(|c| c.owner_user == owner)
            .filter(|c| filter.team.is_none() || c.team == filter.team)
            .filter(|c| filter.dialect.is_none() || Some(c.dialect) == filter.dialect)
            .filter(|c| filter.status.is_none() || Some(c.status) == filter.status)
            .filter(|c| {
                filter.search.as_ref().map_or(true, |needle| {
                    let needle = needle.to_lowercase();
                    c.name.to_lowercase().contains(&needle)
                        || c.description
                            .as_deref()
                            .map(|d| d.to_lowercase().contains(&needle))
                            .unwrap_or(false)
                })
            })
            .cloned()
            .collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(100).max(0) as usize;
        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    async fn audit(&self, record: AuditRecord) -> ConnResult<()> {
        self.audits.write().push(record);
        Ok(())
    }
}

/// The in-memory registry is the only `ConnectionRegistry` implementation in
/// this workspace: it is trivially testable without a live metadata store,
/// matching the trait's explicit test-substitution purpose (§6).
pub type DefaultRegistry = InMemoryRegistry;

pub fn registry_from_settings(settings: &pgai_settings::Settings) -> Arc<dyn ConnectionRegistry> {
    Arc::new(InMemoryRegistry::new(settings.registry.max_connections_per_user))
}

#[cfg(test)]
mod test {
    use super::*;

    fn input(name: &str) -> ConnectionInput {
        ConnectionInput {
            team: None,
            name: name.to_string(),
            description: None,
            dialect: crate::models::Dialect::Postgres,
            host: "localhost".to_string(),
            port: 5432,
            database: "app".to_string(),
            username: "app".to_string(),
            password: "secret".to_string(),
            tls_enabled: false,
            tls_material: None,
            options: serde_json::json!({}),
            min: Some(1),
            max: Some(5),
            idle_timeout_secs: Some(60),
            acquire_timeout_secs: Some(5),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name_case_insensitively() {
        let registry = InMemoryRegistry::new(10);
        registry.create("u1", input("Primary"), vec![]).await.unwrap();
        let err = registry.create("u1", input("primary"), vec![]).await.unwrap_err();
        assert!(matches!(err, ConnError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_enforces_per_user_cap() {
        let registry = InMemoryRegistry::new(1);
        registry.create("u1", input("a"), vec![]).await.unwrap();
        let err = registry.create("u1", input("b"), vec![]).await.unwrap_err();
        assert!(matches!(err, ConnError::LimitExceeded));
    }

    #[tokio::test]
    async fn get_denies_other_owners() {
        let registry = InMemoryRegistry::new(10);
        let cfg = registry.create("u1", input("a"), vec![]).await.unwrap();
        let err = registry.get(cfg.id, "u2", None).await.unwrap_err();
        assert!(matches!(err, ConnError::Api(_)));
    }

    #[tokio::test]
    async fn get_allows_team_members() {
        let registry = InMemoryRegistry::new(10);
        let mut i = input("a");
        i.team = Some("team-x".to_string());
        let cfg = registry.create("u1", i, vec![]).await.unwrap();
        assert!(registry.get(cfg.id, "u2", Some("team-x")).await.is_ok());
    }

    #[tokio::test]
    async fn update_flags_credential_changes_for_pool_invalidation() {
        let registry = InMemoryRegistry::new(10);
        let cfg = registry.create("u1", input("a"), vec![]).await.unwrap();
        let patch = ConnectionPatch {
            host: Some("otherhost".to_string()),
            ..Default::default()
        };
        let (_, invalidate) = registry.update(cfg.id, "u1", patch, None).await.unwrap();
        assert!(invalidate);

        let patch2 = ConnectionPatch {
            description: Some("just a note".to_string()),
            ..Default::default()
        };
        let (_, invalidate2) = registry.update(cfg.id, "u1", patch2, None).await.unwrap();
        assert!(!invalidate2);
    }

    #[tokio::test]
    async fn delete_removes_and_is_idempotent_error_on_retry() {
        let registry = InMemoryRegistry::new(10);
        let cfg = registry.create("u1", input("a"), vec![]).await.unwrap();
        registry.delete(cfg.id, "u1").await.unwrap();
        assert!(registry.delete(cfg.id, "u1").await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_search_and_never_crosses_owners() {
        let registry = InMemoryRegistry::new(10);
        registry.create("u1", input("prod-reporting"), vec![]).await.unwrap();
        registry.create("u1", input("dev-box"), vec![]).await.unwrap();
        registry.create("u2", input("prod-reporting"), vec![]).await.unwrap();

        let results = registry
            .list(
                "u1",
                ConnectionFilter {
                    search: Some("prod".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].owner_user, "u1");
    }
}
