//! Schema Discoverer (spec §4.8): parallel catalog-query fan-out assembling
//! a `DatabaseSchema`, with a `MaxConcurrentDiscoveries` semaphore and
//! request coalescing for duplicate in-flight discoveries of the same
//! connection (§9 "the spec adopts [coalescing] as an invariant").
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use parking_lot::Mutex;
use pgai_common::{ErrorKind, Metrics};
use pgai_connection_service::models::{ConnectionConfig, Dialect};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

use crate::error::SchemaError;
use crate::models::{Column, DatabaseSchema, ObjectCounts, ObjectKind, Relationship, SchemaObject};

type DiscoverOutcome = Result<Arc<DatabaseSchema>, String>;

/// Tracks discoveries currently in flight per connection so duplicate
/// requests subscribe to the same result instead of re-running catalog
/// queries (§4.8 "request coalescing contract").
#[derive(Default)]
struct InFlight {
    senders: HashMap<Uuid, broadcast::Sender<DiscoverOutcome>>,
}

pub struct Discoverer {
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<InFlight>,
    metrics: Metrics,
}

impl Discoverer {
    pub fn new(max_concurrent: usize, metrics: Metrics) -> Self {
        Discoverer {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Mutex::new(InFlight::default()),
            metrics,
        }
    }

    /// Runs (or joins an in-flight) discovery for `cfg`, returning an
    /// `Arc<DatabaseSchema>` so coalesced callers share the allocation.
    pub async fn discover(
        &self,
        cfg: &ConnectionConfig,
        password: &str,
        include_functions: bool,
        include_types: bool,
    ) -> Result<Arc<DatabaseSchema>, SchemaError> {
        let mut subscriber = {
            let mut in_flight = self.in_flight.lock();
            if let Some(sender) = in_flight.senders.get(&cfg.id) {
                Some(sender.subscribe())
            } else {
                let (tx, _rx) = broadcast::channel(1);
                in_flight.senders.insert(cfg.id, tx);
                None
            }
        };

        if let Some(rx) = subscriber.as_mut() {
            self.metrics.incr("discovery.coalesced");
            return rx
                .recv()
                .await
                .map_err(|_| SchemaError::from(ErrorKind::DiscoveryFailed("coalesced discovery dropped".to_string())))?
                .map_err(|e| SchemaError::from(ErrorKind::DiscoveryFailed(e)));
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SchemaError::from(ErrorKind::Internal))?;

        let start = Instant::now();
        let result = run_discovery(cfg, password, include_functions, include_types, start).await;

        let outcome: DiscoverOutcome = result.clone().map_err(|e| e.to_string());
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(sender) = in_flight.senders.remove(&cfg.id) {
                let _ = sender.send(outcome);
            }
        }

        result.map_err(|e| SchemaError::from(ErrorKind::DiscoveryFailed(e)))
    }
}

async fn run_discovery(
    cfg: &ConnectionConfig,
    password: &str,
    include_functions: bool,
    include_types: bool,
    start: Instant,
) -> Result<Arc<DatabaseSchema>, String> {
    let (objects, relationships) = match cfg.dialect {
        Dialect::Postgres => discover_postgres(cfg, password, include_functions, include_types).await?,
        Dialect::Mysql => discover_mysql(cfg, password).await?,
        Dialect::Sqlite => discover_sqlite(cfg).await?,
        Dialect::Mongo => discover_mongo(cfg, password).await?,
    };

    let counts = count_objects(&objects);
    let version_hash = compute_version_hash(&objects, &relationships);

    Ok(Arc::new(DatabaseSchema {
        connection_id: cfg.id,
        objects,
        relationships,
        discovered_at: chrono::Utc::now(),
        version_hash,
        duration_ms: start.elapsed().as_millis() as u64,
        counts,
    }))
}

fn count_objects(objects: &[SchemaObject]) -> ObjectCounts {
    let mut counts = ObjectCounts::default();
    for obj in objects {
        match obj.kind {
            ObjectKind::Table => counts.tables += 1,
            ObjectKind::View => counts.views += 1,
            ObjectKind::Function => counts.functions += 1,
            ObjectKind::Type => counts.types += 1,
        }
    }
    counts
}

/// Computes `version_hash` over a canonically-ordered structural projection
/// — schemas sorted by `(schema, name)`, columns by `ordinal` — so hash
/// equality is independent of catalog-query return order (§9, §3).
fn compute_version_hash(objects: &[SchemaObject], relationships: &[Relationship]) -> String {
    let mut ordered: Vec<&SchemaObject> = objects.iter().collect();
    ordered.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));

    let mut hasher = Sha256::new();
    for obj in ordered {
        hasher.update(obj.identifier().as_bytes());
        hasher.update([obj.kind as u8]);
        let mut columns = obj.columns.clone();
        columns.sort_by_key(|c| c.ordinal);
        for col in &columns {
            hasher.update(col.name.as_bytes());
            hasher.update(col.data_type.as_bytes());
            hasher.update([col.nullable as u8, col.primary as u8, col.foreign as u8, col.unique as u8]);
        }
        hasher.update(obj.constraints.to_string().as_bytes());
        hasher.update(obj.indexes.to_string().as_bytes());
    }

    let mut rels: Vec<&Relationship> = relationships.iter().collect();
    rels.sort_by(|a, b| {
        (&a.from_identifier, &a.from_column, &a.to_identifier, &a.to_column)
            .cmp(&(&b.from_identifier, &b.from_column, &b.to_identifier, &b.to_column))
    });
    for rel in rels {
        hasher.update(rel.from_identifier.as_bytes());
        hasher.update(rel.from_column.as_bytes());
        hasher.update(rel.to_identifier.as_bytes());
        hasher.update(rel.to_column.as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// System schemas are filtered at the query level (§4.8).
const PG_SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema"];

async fn discover_postgres(
    cfg: &ConnectionConfig,
    password: &str,
    include_functions: bool,
    include_types: bool,
) -> Result<(Vec<SchemaObject>, Vec<Relationship>), String> {
    use sqlx::postgres::PgConnectOptions;
    use sqlx::ConnectOptions;

    let opts = PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .database(&cfg.database)
        .username(&cfg.username)
        .password(password);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await
        .map_err(|e| e.to_string())?;

    let table_rows = sqlx::query(
        "select table_schema, table_name, table_type \
         from information_schema.tables \
         where table_schema not in ('pg_catalog', 'information_schema') \
         and table_schema not like 'pg_%'",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| e.to_string())?;

    // second parallel wave: one future per table, keyed by (schema, name),
    // fetching columns/constraints/indexes concurrently over the pool.
    let table_futures = table_rows.iter().map(|row| {
        let schema: String = row.try_get("table_schema").unwrap_or_default();
        let name: String = row.try_get("table_name").unwrap_or_default();
        let table_type: String = row.try_get("table_type").unwrap_or_default();
        let pool = pool.clone();
        async move {
            let kind = if table_type == "VIEW" { ObjectKind::View } else { ObjectKind::Table };
            let columns = fetch_postgres_columns(&pool, &schema, &name).await?;
            let constraints = fetch_postgres_constraints(&pool, &schema, &name).await?;
            let indexes = fetch_postgres_indexes(&pool, &schema, &name).await?;
            Ok::<SchemaObject, String>(SchemaObject {
                kind,
                schema,
                name,
                columns,
                constraints,
                indexes,
                metadata: serde_json::json!({}),
            })
        }
    });
    let mut objects = try_join_all(table_futures).await?;

    if include_functions {
        let function_rows = sqlx::query(
            "select routine_schema, routine_name \
             from information_schema.routines \
             where routine_schema not in ('pg_catalog', 'information_schema')",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| e.to_string())?;
        for row in function_rows {
            let schema: String = row.try_get("routine_schema").unwrap_or_default();
            let name: String = row.try_get("routine_name").unwrap_or_default();
            objects.push(SchemaObject {
                kind: ObjectKind::Function,
                schema,
                name,
                columns: Vec::new(),
                constraints: serde_json::json!({}),
                indexes: serde_json::json!({}),
                metadata: serde_json::json!({}),
            });
        }
    }

    if include_types {
        let type_rows = sqlx::query(
            "select n.nspname as schema_name, t.typname as type_name \
             from pg_type t join pg_namespace n on t.typnamespace = n.oid \
             where n.nspname not in ('pg_catalog', 'information_schema') and t.typtype = 'c'",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| e.to_string())?;
        for row in type_rows {
            let schema: String = row.try_get("schema_name").unwrap_or_default();
            let name: String = row.try_get("type_name").unwrap_or_default();
            objects.push(SchemaObject {
                kind: ObjectKind::Type,
                schema,
                name,
                columns: Vec::new(),
                constraints: serde_json::json!({}),
                indexes: serde_json::json!({}),
                metadata: serde_json::json!({}),
            });
        }
    }

    let fk_rows = sqlx::query(
        "select tc.table_schema, tc.table_name, kcu.column_name, \
                ccu.table_schema as foreign_schema, ccu.table_name as foreign_table, \
                ccu.column_name as foreign_column, tc.constraint_name \
         from information_schema.table_constraints tc \
         join information_schema.key_column_usage kcu on tc.constraint_name = kcu.constraint_name \
         join information_schema.constraint_column_usage ccu on tc.constraint_name = ccu.constraint_name \
         where tc.constraint_type = 'FOREIGN KEY'",
    )
    .fetch_all(&pool)
    .await
    .unwrap_or_default();

    let relationships = fk_rows
        .into_iter()
        .map(|row| Relationship {
            from_identifier: format!(
                "{}.{}",
                row.try_get::<String, _>("table_schema").unwrap_or_default(),
                row.try_get::<String, _>("table_name").unwrap_or_default()
            ),
            from_column: row.try_get("column_name").unwrap_or_default(),
            to_identifier: format!(
                "{}.{}",
                row.try_get::<String, _>("foreign_schema").unwrap_or_default(),
                row.try_get::<String, _>("foreign_table").unwrap_or_default()
            ),
            to_column: row.try_get("foreign_column").unwrap_or_default(),
            constraint_name: row.try_get("constraint_name").unwrap_or_default(),
        })
        .collect();

    Ok((objects, relationships))
}

async fn fetch_postgres_columns(
    pool: &sqlx::PgPool,
    schema: &str,
    table: &str,
) -> Result<Vec<Column>, String> {
    let rows = sqlx::query(
        "select column_name, data_type, is_nullable, column_default, ordinal_position, \
                character_maximum_length, numeric_precision, numeric_scale \
         from information_schema.columns \
         where table_schema = $1 and table_name = $2 \
         order by ordinal_position",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| e.to_string())?;

    let pk_rows = sqlx::query(
        "select kcu.column_name \
         from information_schema.table_constraints tc \
         join information_schema.key_column_usage kcu on tc.constraint_name = kcu.constraint_name \
         where tc.constraint_type = 'PRIMARY KEY' and tc.table_schema = $1 and tc.table_name = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .unwrap_or_default();
    let primary_keys: Vec<String> = pk_rows
        .into_iter()
        .filter_map(|r| r.try_get::<String, _>(0).ok())
        .collect();

    Ok(rows
        .into_iter()
        .map(|row| {
            let name: String = row.try_get("column_name").unwrap_or_default();
            Column {
                primary: primary_keys.contains(&name),
                name,
                data_type: row.try_get("data_type").unwrap_or_default(),
                nullable: row.try_get::<String, _>("is_nullable").map(|v| v == "YES").unwrap_or(true),
                default: row.try_get("column_default").ok(),
                foreign: false,
                unique: false,
                ordinal: row.try_get::<i32, _>("ordinal_position").unwrap_or_default(),
                max_length: row.try_get("character_maximum_length").ok(),
                precision: row.try_get("numeric_precision").ok(),
                scale: row.try_get("numeric_scale").ok(),
            }
        })
        .collect())
}

/// One entry per `(constraint_name, constraint_type)` (§4.8 step 3).
async fn fetch_postgres_constraints(
    pool: &sqlx::PgPool,
    schema: &str,
    table: &str,
) -> Result<serde_json::Value, String> {
    let rows = sqlx::query(
        "select constraint_name, constraint_type \
         from information_schema.table_constraints \
         where table_schema = $1 and table_name = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| e.to_string())?;

    Ok(serde_json::Value::Array(
        rows.into_iter()
            .map(|row| {
                serde_json::json!({
                    "name": row.try_get::<String, _>("constraint_name").unwrap_or_default(),
                    "type": row.try_get::<String, _>("constraint_type").unwrap_or_default(),
                })
            })
            .collect(),
    ))
}

/// One entry per index definition as reported by `pg_indexes`.
async fn fetch_postgres_indexes(
    pool: &sqlx::PgPool,
    schema: &str,
    table: &str,
) -> Result<serde_json::Value, String> {
    let rows = sqlx::query(
        "select indexname, indexdef from pg_indexes where schemaname = $1 and tablename = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| e.to_string())?;

    Ok(serde_json::Value::Array(
        rows.into_iter()
            .map(|row| {
                serde_json::json!({
                    "name": row.try_get::<String, _>("indexname").unwrap_or_default(),
                    "definition": row.try_get::<String, _>("indexdef").unwrap_or_default(),
                })
            })
            .collect(),
    ))
}

async fn discover_mysql(cfg: &ConnectionConfig, password: &str) -> Result<(Vec<SchemaObject>, Vec<Relationship>), String> {
    use sqlx::mysql::MySqlConnectOptions;
    use sqlx::ConnectOptions;

    let opts = MySqlConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .database(&cfg.database)
        .username(&cfg.username)
        .password(password);

    let pool = sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await
        .map_err(|e| e.to_string())?;

    let table_rows = sqlx::query(
        "select table_name, table_type from information_schema.tables where table_schema = ?",
    )
    .bind(&cfg.database)
    .fetch_all(&pool)
    .await
    .map_err(|e| e.to_string())?;

    // second parallel wave: one future per table, keyed by (schema, name).
    let table_futures = table_rows.iter().map(|row| {
        let name: String = row.try_get("table_name").unwrap_or_default();
        let table_type: String = row.try_get("table_type").unwrap_or_default();
        let database = cfg.database.clone();
        let pool = pool.clone();
        async move {
            let kind = if table_type == "VIEW" { ObjectKind::View } else { ObjectKind::Table };

            let column_rows = sqlx::query(
                "select column_name, data_type, is_nullable, column_default, ordinal_position, \
                        character_maximum_length, numeric_precision, numeric_scale, column_key \
                 from information_schema.columns where table_schema = ? and table_name = ? \
                 order by ordinal_position",
            )
            .bind(&database)
            .bind(&name)
            .fetch_all(&pool)
            .await
            .map_err(|e| e.to_string())?;

            let columns = column_rows
                .into_iter()
                .map(|row| Column {
                    name: row.try_get("column_name").unwrap_or_default(),
                    data_type: row.try_get("data_type").unwrap_or_default(),
                    nullable: row.try_get::<String, _>("is_nullable").map(|v| v == "YES").unwrap_or(true),
                    default: row.try_get("column_default").ok(),
                    primary: row.try_get::<String, _>("column_key").map(|v| v == "PRI").unwrap_or(false),
                    foreign: row.try_get::<String, _>("column_key").map(|v| v == "MUL").unwrap_or(false),
                    unique: row.try_get::<String, _>("column_key").map(|v| v == "UNI").unwrap_or(false),
                    ordinal: row.try_get::<i32, _>("ordinal_position").unwrap_or_default(),
                    max_length: row.try_get("character_maximum_length").ok(),
                    precision: row.try_get("numeric_precision").ok(),
                    scale: row.try_get("numeric_scale").ok(),
                })
                .collect();

            let constraint_rows = sqlx::query(
                "select constraint_name, constraint_type \
                 from information_schema.table_constraints \
                 where table_schema = ? and table_name = ?",
            )
            .bind(&database)
            .bind(&name)
            .fetch_all(&pool)
            .await
            .map_err(|e| e.to_string())?;
            let constraints = serde_json::Value::Array(
                constraint_rows
                    .into_iter()
                    .map(|row| {
                        serde_json::json!({
                            "name": row.try_get::<String, _>("constraint_name").unwrap_or_default(),
                            "type": row.try_get::<String, _>("constraint_type").unwrap_or_default(),
                        })
                    })
                    .collect(),
            );

            let index_rows = sqlx::query(
                "select index_name, column_name, non_unique \
                 from information_schema.statistics \
                 where table_schema = ? and table_name = ?",
            )
            .bind(&database)
            .bind(&name)
            .fetch_all(&pool)
            .await
            .map_err(|e| e.to_string())?;
            let indexes = serde_json::Value::Array(
                index_rows
                    .into_iter()
                    .map(|row| {
                        serde_json::json!({
                            "name": row.try_get::<String, _>("index_name").unwrap_or_default(),
                            "column": row.try_get::<String, _>("column_name").unwrap_or_default(),
                            "unique": row.try_get::<i64, _>("non_unique").map(|v| v == 0).unwrap_or(false),
                        })
                    })
                    .collect(),
            );

            Ok::<SchemaObject, String>(SchemaObject {
                kind,
                schema: database,
                name,
                columns,
                constraints,
                indexes,
                metadata: serde_json::json!({}),
            })
        }
    });
    let objects = try_join_all(table_futures).await?;

    let fk_rows = sqlx::query(
        "select table_name, column_name, referenced_table_name, referenced_column_name, constraint_name \
         from information_schema.key_column_usage \
         where table_schema = ? and referenced_table_name is not null",
    )
    .bind(&cfg.database)
    .fetch_all(&pool)
    .await
    .unwrap_or_default();

    let relationships = fk_rows
        .into_iter()
        .map(|row| Relationship {
            from_identifier: format!("{}.{}", cfg.database, row.try_get::<String, _>("table_name").unwrap_or_default()),
            from_column: row.try_get("column_name").unwrap_or_default(),
            to_identifier: format!(
                "{}.{}",
                cfg.database,
                row.try_get::<String, _>("referenced_table_name").unwrap_or_default()
            ),
            to_column: row.try_get("referenced_column_name").unwrap_or_default(),
            constraint_name: row.try_get("constraint_name").unwrap_or_default(),
        })
        .collect();

    Ok((objects, relationships))
}

async fn discover_sqlite(cfg: &ConnectionConfig) -> Result<(Vec<SchemaObject>, Vec<Relationship>), String> {
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::ConnectOptions;
    use std::str::FromStr;

    let opts = SqliteConnectOptions::from_str(&cfg.database).map_err(|e| e.to_string())?;
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await
        .map_err(|e| e.to_string())?;

    let table_rows = sqlx::query("select name, type from sqlite_master where type in ('table', 'view')")
        .fetch_all(&pool)
        .await
        .map_err(|e| e.to_string())?;

    // second parallel wave: one future per table, keyed by (schema, name) —
    // sqlite's "schema" is always `main` outside attached databases.
    let table_futures = table_rows.iter().map(|row| {
        let name: String = row.try_get("name").unwrap_or_default();
        let object_type: String = row.try_get("type").unwrap_or_default();
        let pool = pool.clone();
        async move {
            let kind = if object_type == "view" { ObjectKind::View } else { ObjectKind::Table };

            let pragma_sql = format!("pragma table_info({})", name);
            let column_rows = sqlx::query(&pragma_sql).fetch_all(&pool).await.unwrap_or_default();
            let columns = column_rows
                .into_iter()
                .map(|row| Column {
                    name: row.try_get("name").unwrap_or_default(),
                    data_type: row.try_get("type").unwrap_or_default(),
                    nullable: row.try_get::<i64, _>("notnull").map(|v| v == 0).unwrap_or(true),
                    default: row.try_get("dflt_value").ok(),
                    primary: row.try_get::<i64, _>("pk").map(|v| v > 0).unwrap_or(false),
                    foreign: false,
                    unique: false,
                    ordinal: row.try_get::<i64, _>("cid").unwrap_or_default() as i32,
                    max_length: None,
                    precision: None,
                    scale: None,
                })
                .collect();

            let index_list_sql = format!("pragma index_list({})", name);
            let index_rows = sqlx::query(&index_list_sql).fetch_all(&pool).await.unwrap_or_default();
            let indexes = serde_json::Value::Array(
                index_rows
                    .into_iter()
                    .map(|row| {
                        serde_json::json!({
                            "name": row.try_get::<String, _>("name").unwrap_or_default(),
                            "unique": row.try_get::<i64, _>("unique").map(|v| v != 0).unwrap_or(false),
                            "origin": row.try_get::<String, _>("origin").unwrap_or_default(),
                        })
                    })
                    .collect(),
            );

            let fk_list_sql = format!("pragma foreign_key_list({})", name);
            let fk_rows = sqlx::query(&fk_list_sql).fetch_all(&pool).await.unwrap_or_default();
            let constraints = serde_json::Value::Array(
                fk_rows
                    .into_iter()
                    .map(|row| {
                        serde_json::json!({
                            "type": "FOREIGN KEY",
                            "table": row.try_get::<String, _>("table").unwrap_or_default(),
                            "from": row.try_get::<String, _>("from").unwrap_or_default(),
                            "to": row.try_get::<String, _>("to").unwrap_or_default(),
                        })
                    })
                    .collect(),
            );

            Ok::<SchemaObject, String>(SchemaObject {
                kind,
                schema: "main".to_string(),
                name,
                columns,
                constraints,
                indexes,
                metadata: serde_json::json!({}),
            })
        }
    });
    let objects = try_join_all(table_futures).await?;

    Ok((objects, Vec::new()))
}

async fn discover_mongo(cfg: &ConnectionConfig, password: &str) -> Result<(Vec<SchemaObject>, Vec<Relationship>), String> {
    use mongodb::options::{ClientOptions, Credential, ServerAddress};
    use mongodb::Client;

    let credential = Credential::builder()
        .username(cfg.username.clone())
        .password(password.to_string())
        .build();
    let options = ClientOptions::builder()
        .hosts(vec![ServerAddress::Tcp {
            host: cfg.host.clone(),
            port: Some(cfg.port),
        }])
        .credential(credential)
        .build();

    let client = Client::with_options(options).map_err(|e| e.to_string())?;
    let db = client.database(&cfg.database);
    let collection_names = db.list_collection_names(None).await.map_err(|e| e.to_string())?;

    let sampled: Vec<_> = try_join_all(collection_names.iter().map(|name| sample_mongo_collection(&db, name))).await?;

    let objects = collection_names
        .into_iter()
        .zip(sampled)
        .map(|(name, columns)| SchemaObject {
            kind: ObjectKind::Table,
            schema: cfg.database.clone(),
            name,
            columns,
            constraints: serde_json::json!({}),
            indexes: serde_json::json!({}),
            metadata: serde_json::json!({ "inferred": true }),
        })
        .collect();

    Ok((objects, Vec::new()))
}

/// Mongo has no fixed schema; columns are inferred from one sampled document's
/// top-level keys, consistent with `ServerInfo.visible_schemas` elsewhere
/// treating Mongo collections as schema-less in the relational sense.
async fn sample_mongo_collection(db: &mongodb::Database, name: &str) -> Result<Vec<Column>, String> {
    let collection = db.collection::<mongodb::bson::Document>(name);
    let sample = collection.find_one(None, None).await.map_err(|e| e.to_string())?;
    Ok(sample
        .map(|doc| {
            doc.keys()
                .enumerate()
                .map(|(i, key)| Column {
                    name: key.clone(),
                    data_type: "mixed".to_string(),
                    nullable: true,
                    default: None,
                    primary: key == "_id",
                    foreign: false,
                    unique: key == "_id",
                    ordinal: i as i32,
                    max_length: None,
                    precision: None,
                    scale: None,
                })
                .collect()
        })
        .unwrap_or_default())
}

#[cfg(test)]
mod test {
    use super::*;

    fn object(schema: &str, name: &str, ordinal: i32) -> SchemaObject {
        SchemaObject {
            kind: ObjectKind::Table,
            schema: schema.to_string(),
            name: name.to_string(),
            columns: vec![Column {
                name: "id".to_string(),
                data_type: "uuid".to_string(),
                nullable: false,
                default: None,
                primary: true,
                foreign: false,
                unique: true,
                ordinal,
                max_length: None,
                precision: None,
                scale: None,
            }],
            constraints: serde_json::json!({}),
            indexes: serde_json::json!({}),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn version_hash_is_independent_of_input_order() {
        let a = vec![object("public", "users", 1), object("public", "teams", 1)];
        let b = vec![object("public", "teams", 1), object("public", "users", 1)];
        assert_eq!(compute_version_hash(&a, &[]), compute_version_hash(&b, &[]));
    }

    #[test]
    fn version_hash_changes_with_structure() {
        let a = vec![object("public", "users", 1)];
        let mut changed = object("public", "users", 1);
        changed.columns[0].nullable = true;
        let b = vec![changed];
        assert_ne!(compute_version_hash(&a, &[]), compute_version_hash(&b, &[]));
    }
}
