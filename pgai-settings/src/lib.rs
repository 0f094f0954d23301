//! Environment-driven configuration for all three `pgai` binaries (spec §6
//! "Configuration"), following `syncserver_settings::Settings`: one merged
//! `Settings` struct, loaded from an optional config file plus
//! `PGAI_*`-prefixed environment variables with `__` as the nested-key
//! separator.
#[macro_use]
extern crate slog_scope;

use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

static PREFIX: &str = "pgai";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub human_logs: bool,

    pub statsd_host: Option<String>,
    pub statsd_port: u16,

    /// Deadline every inbound request carries; all downstream I/O inherits
    /// it (§5 "Cancellation/timeouts").
    pub request_timeout_secs: u64,
    /// Admission-layer hard shutdown drain deadline (§5 "Graceful shutdown").
    pub shutdown_timeout_secs: u64,

    pub max_body_bytes: usize,
    pub cors_allowed_origins: Vec<String>,

    pub jwt: JwtSettings,
    pub vault: VaultSettings,
    pub breaker: BreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub pool: PoolSettings,
    pub tester: TesterSettings,
    pub cache: CacheSettings,
    pub discovery: DiscoverySettings,
    pub change_detection: ChangeDetectionSettings,
    pub registry: RegistrySettings,

    /// Downstream service base URLs + per-service timeouts (§4.6).
    pub services: HashMap<String, ServiceConfig>,

    /// `connection_service_database_url` etc. — the registry/audit store,
    /// distinct from the user-configured *target* databases the pool
    /// manager dials.
    pub database_url: String,
    pub database_pool_max_size: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            base_url: String::new(),
            timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
}

impl Default for JwtSettings {
    fn default() -> Self {
        JwtSettings {
            secret: "change-me-in-production".to_string(),
            issuer: "pgai-platform".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Passphrase the AEAD key is derived from via
    /// `pgai_common::hkdf_expand_32` (§4.1).
    pub master_key: String,
}

impl Default for VaultSettings {
    fn default() -> Self {
        VaultSettings {
            master_key: "change-me-in-production".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerSettings {
            failure_threshold: 5,
            reset_timeout_secs: 30,
        }
    }
}

/// One bucket's parameters; `RateLimitSettings` nests three of these for the
/// `auth`/`api`/`public` profiles (§4.7).
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct LimiterProfile {
    pub window_secs: u64,
    pub max_requests: u32,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub auth: LimiterProfile,
    pub api: LimiterProfile,
    pub public: LimiterProfile,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        RateLimitSettings {
            auth: LimiterProfile {
                window_secs: 60,
                max_requests: 10,
            },
            api: LimiterProfile {
                window_secs: 60,
                max_requests: 120,
            },
            public: LimiterProfile {
                window_secs: 60,
                max_requests: 300,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub global_max: usize,
    pub per_user_max: usize,
    pub idle_timeout_secs: u64,
    pub eviction_tick_secs: u64,
    pub default_min: u32,
    pub default_max: u32,
    pub default_acquire_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            global_max: 200,
            per_user_max: 10,
            idle_timeout_secs: 600,
            eviction_tick_secs: 60,
            default_min: 1,
            default_max: 10,
            default_acquire_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct TesterSettings {
    pub test_timeout_secs: u64,
    pub max_batch: usize,
    pub ssh_tunnel_enabled: bool,
}

impl Default for TesterSettings {
    fn default() -> Self {
        TesterSettings {
            test_timeout_secs: 10,
            max_batch: 10,
            ssh_tunnel_enabled: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            ttl_secs: 300,
            max_entries: 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub max_concurrent: usize,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        DiscoverySettings { max_concurrent: 5 }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct ChangeDetectionSettings {
    pub refresh_interval_secs: u64,
    pub max_consecutive_errors: u32,
    pub tick_batch_size: usize,
}

impl Default for ChangeDetectionSettings {
    fn default() -> Self {
        ChangeDetectionSettings {
            refresh_interval_secs: 30,
            max_consecutive_errors: 5,
            tick_batch_size: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub max_connections_per_user: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            max_connections_per_user: 10,
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        let mut services = HashMap::new();
        services.insert(
            "user".to_string(),
            ServiceConfig {
                base_url: "http://127.0.0.1:8081".to_string(),
                timeout_secs: 10,
            },
        );
        services.insert(
            "connection".to_string(),
            ServiceConfig {
                base_url: "http://127.0.0.1:8082".to_string(),
                timeout_secs: 10,
            },
        );
        services.insert(
            "schema".to_string(),
            ServiceConfig {
                base_url: "http://127.0.0.1:8083".to_string(),
                timeout_secs: 30,
            },
        );

        Settings {
            host: "127.0.0.1".to_string(),
            port: 8080,
            human_logs: false,
            statsd_host: None,
            statsd_port: 8125,
            request_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024,
            cors_allowed_origins: vec!["*".to_string()],
            jwt: JwtSettings::default(),
            vault: VaultSettings::default(),
            breaker: BreakerSettings::default(),
            rate_limit: RateLimitSettings::default(),
            pool: PoolSettings::default(),
            tester: TesterSettings::default(),
            cache: CacheSettings::default(),
            discovery: DiscoverySettings::default(),
            change_detection: ChangeDetectionSettings::default(),
            registry: RegistrySettings::default(),
            services,
            database_url: "postgres://postgres@127.0.0.1/pgai".to_string(),
            database_pool_max_size: 10,
        }
    }
}

impl Settings {
    /// Loads the settings from an optional config file, then layers
    /// environment overrides (`PGAI_FOO__BAR="gorp"` -> `foo.bar = "gorp"`),
    /// exactly as `syncserver_settings::Settings::with_env_and_config_file`
    /// does.
    pub fn with_env_and_config_file(filename: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(config_filename) = filename {
            builder = builder.add_source(File::with_name(config_filename));
        }
        builder = builder.add_source(
            Environment::with_prefix(&PREFIX.to_uppercase())
                .separator("__")
                .try_parsing(true),
        );

        match builder.build().and_then(|c| c.try_deserialize::<Self>()) {
            Ok(settings) => Ok(settings),
            Err(ConfigError::NotFound(key)) => {
                error!("configuration error: value undefined: {}", key);
                println!(
                    "Please set in config file or use environment variable, e.g. `{}_{}`.",
                    PREFIX.to_uppercase(),
                    key.to_uppercase()
                );
                Err(ConfigError::NotFound(key))
            }
            Err(e) => {
                error!("configuration error: {:?}", e);
                Err(e)
            }
        }
    }

    #[cfg(debug_assertions)]
    pub fn test_settings() -> Self {
        let mut settings = Self::default();
        settings.port = 0;
        settings.database_pool_max_size = 1;
        settings
    }

    pub fn banner(&self, service_name: &str) -> String {
        format!("{} listening on http://{}:{}", service_name, self.host, self.port)
    }
}

#[cfg(test)]
mod test {
    use std::env;

    use super::*;

    #[test]
    fn environment_variable_prefix() {
        env::set_var("PGAI_POOL__GLOBAL_MAX", "7");
        let settings = Settings::with_env_and_config_file(None).unwrap();
        assert_eq!(settings.pool.global_max, 7);
        env::remove_var("PGAI_POOL__GLOBAL_MAX");

        env::set_var("NOTPGAI_POOL__GLOBAL_MAX", "9");
        let settings = Settings::with_env_and_config_file(None).unwrap();
        assert_eq!(settings.pool.global_max, 200);
        env::remove_var("NOTPGAI_POOL__GLOBAL_MAX");
    }

    #[test]
    fn defaults_carry_three_upstream_services() {
        let settings = Settings::default();
        assert!(settings.services.contains_key("user"));
        assert!(settings.services.contains_key("connection"));
        assert!(settings.services.contains_key("schema"));
    }
}
