use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const DEFAULT_AUDIENCE: &str = "catalog-api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// OAuth client ids accepted as the `aud` of Google ID tokens.
    pub client_ids: Vec<String>,
    pub jwks_url: String,
    pub clock_skew_seconds: u64,
}

// Auth service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct AuthServiceConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub google: GoogleConfig,
    pub allowed_audiences: Vec<String>,
    pub default_audience: String,
    pub admin_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthServiceConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<String>,
    postgres: Option<PostgresOverride>,
    google_client_ids: Option<Vec<String>>,
    google_jwks_url: Option<String>,
    clock_skew_seconds: Option<u64>,
    allowed_audiences: Option<Vec<String>>,
    default_audience: Option<String>,
    admin_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PostgresOverride {
    url: Option<String>,
    max_connections: Option<u32>,
    connect_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("parse {name}")),
        Err(_) => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl AuthServiceConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = env_or("CATALOG_AUTH_METRICS_BIND", "0.0.0.0:8080")
            .parse()
            .with_context(|| "parse CATALOG_AUTH_METRICS_BIND")?;
        let bind_addr = env_or("CATALOG_AUTH_BIND", "0.0.0.0:8443")
            .parse()
            .with_context(|| "parse CATALOG_AUTH_BIND")?;
        let storage = env_or("CATALOG_AUTH_STORAGE", "memory")
            .parse()
            .with_context(|| "parse CATALOG_AUTH_STORAGE")?;
        let postgres = match std::env::var("CATALOG_AUTH_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse("CATALOG_AUTH_POSTGRES_MAX_CONNECTIONS", 10)?,
                connect_timeout_ms: env_parse("CATALOG_AUTH_POSTGRES_CONNECT_TIMEOUT_MS", 5_000)?,
                acquire_timeout_ms: env_parse("CATALOG_AUTH_POSTGRES_ACQUIRE_TIMEOUT_MS", 5_000)?,
            }),
            Err(_) => None,
        };
        let google = GoogleConfig {
            client_ids: split_list(&env_or("CATALOG_AUTH_GOOGLE_CLIENT_IDS", "")),
            jwks_url: env_or("CATALOG_AUTH_GOOGLE_JWKS_URL", DEFAULT_GOOGLE_JWKS_URL),
            clock_skew_seconds: env_parse("CATALOG_AUTH_CLOCK_SKEW_SECONDS", 60)?,
        };
        let mut allowed_audiences =
            split_list(&env_or("CATALOG_AUTH_ALLOWED_AUDIENCES", DEFAULT_AUDIENCE));
        if allowed_audiences.is_empty() {
            allowed_audiences.push(DEFAULT_AUDIENCE.to_string());
        }
        let default_audience = std::env::var("CATALOG_AUTH_DEFAULT_AUDIENCE")
            .unwrap_or_else(|_| allowed_audiences[0].clone());
        let admin_token = std::env::var("CATALOG_AUTH_ADMIN_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());
        let config = Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            google,
            allowed_audiences,
            default_audience,
            admin_token,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("CATALOG_AUTH_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read CATALOG_AUTH_CONFIG: {path}"))?;
            let override_cfg: AuthServiceConfigOverride = serde_yaml::from_str(&contents)
                .with_context(|| "parse auth service config yaml")?;
            config.apply_override(override_cfg)?;
            config.validate()?;
        }
        Ok(config)
    }

    fn apply_override(&mut self, override_cfg: AuthServiceConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value.parse().with_context(|| "parse storage")?;
        }
        if let Some(pg) = override_cfg.postgres {
            let base = self.postgres.take();
            let url = pg
                .url
                .or_else(|| base.as_ref().map(|cfg| cfg.url.clone()))
                .context("postgres.url missing")?;
            self.postgres = Some(PostgresConfig {
                url,
                max_connections: pg
                    .max_connections
                    .or(base.as_ref().map(|cfg| cfg.max_connections))
                    .unwrap_or(10),
                connect_timeout_ms: pg
                    .connect_timeout_ms
                    .or(base.as_ref().map(|cfg| cfg.connect_timeout_ms))
                    .unwrap_or(5_000),
                acquire_timeout_ms: pg
                    .acquire_timeout_ms
                    .or(base.as_ref().map(|cfg| cfg.acquire_timeout_ms))
                    .unwrap_or(5_000),
            });
        }
        if let Some(value) = override_cfg.google_client_ids {
            self.google.client_ids = value;
        }
        if let Some(value) = override_cfg.google_jwks_url {
            self.google.jwks_url = value;
        }
        if let Some(value) = override_cfg.clock_skew_seconds {
            self.google.clock_skew_seconds = value;
        }
        if let Some(value) = override_cfg.allowed_audiences {
            self.allowed_audiences = value;
        }
        if let Some(value) = override_cfg.default_audience {
            self.default_audience = value;
        }
        if let Some(value) = override_cfg.admin_token {
            self.admin_token = Some(value).filter(|token| !token.is_empty());
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.allowed_audiences.is_empty() {
            bail!("allowed_audiences must not be empty");
        }
        if !self.allowed_audiences.contains(&self.default_audience) {
            bail!(
                "default audience {} is not in allowed_audiences",
                self.default_audience
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "CATALOG_AUTH_BIND",
        "CATALOG_AUTH_METRICS_BIND",
        "CATALOG_AUTH_STORAGE",
        "CATALOG_AUTH_POSTGRES_URL",
        "CATALOG_AUTH_GOOGLE_CLIENT_IDS",
        "CATALOG_AUTH_ALLOWED_AUDIENCES",
        "CATALOG_AUTH_DEFAULT_AUDIENCE",
        "CATALOG_AUTH_ADMIN_TOKEN",
        "CATALOG_AUTH_CONFIG",
    ];

    fn clear_env() {
        for name in VARS {
            // SAFETY: tests touching the environment are serialized.
            unsafe { std::env::remove_var(name) };
        }
    }

    fn set_env(name: &str, value: &str) {
        // SAFETY: tests touching the environment are serialized.
        unsafe { std::env::set_var(name, value) };
    }

    #[test]
    #[serial]
    fn defaults_apply_without_env() {
        clear_env();
        let config = AuthServiceConfig::from_env().expect("config");
        assert_eq!(config.bind_addr.port(), 8443);
        assert_eq!(config.metrics_bind.port(), 8080);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.postgres.is_none());
        assert_eq!(config.allowed_audiences, vec!["catalog-api".to_string()]);
        assert_eq!(config.default_audience, "catalog-api");
        assert_eq!(config.google.jwks_url, DEFAULT_GOOGLE_JWKS_URL);
        assert!(config.admin_token.is_none());
    }

    #[test]
    #[serial]
    fn env_lists_are_split_and_trimmed() {
        clear_env();
        set_env("CATALOG_AUTH_GOOGLE_CLIENT_IDS", "web.apps, ios.apps ,");
        set_env("CATALOG_AUTH_ALLOWED_AUDIENCES", "catalog-web,catalog-admin");
        set_env("CATALOG_AUTH_STORAGE", "postgres");
        set_env("CATALOG_AUTH_POSTGRES_URL", "postgres://localhost/catalog");
        let config = AuthServiceConfig::from_env().expect("config");
        clear_env();
        assert_eq!(config.google.client_ids, vec!["web.apps", "ios.apps"]);
        assert_eq!(config.default_audience, "catalog-web");
        assert_eq!(config.storage, StorageBackend::Postgres);
        let pg = config.postgres.expect("postgres");
        assert_eq!(pg.max_connections, 10);
    }

    #[test]
    #[serial]
    fn default_audience_must_be_allowed() {
        clear_env();
        set_env("CATALOG_AUTH_DEFAULT_AUDIENCE", "elsewhere");
        let err = AuthServiceConfig::from_env().expect_err("invalid");
        clear_env();
        assert!(err.to_string().contains("default audience"));
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() {
        clear_env();
        let path = std::env::temp_dir().join(format!(
            "catalog-auth-config-{}.yaml",
            uuid::Uuid::new_v4()
        ));
        fs::write(
            &path,
            "bind_addr: 127.0.0.1:9000\nadmin_token: ops-secret\nallowed_audiences: [a, b]\ndefault_audience: b\npostgres:\n  url: postgres://db/auth\n  max_connections: 3\n",
        )
        .expect("write yaml");
        set_env("CATALOG_AUTH_CONFIG", path.to_str().expect("path"));
        let config = AuthServiceConfig::from_env_or_yaml().expect("config");
        clear_env();
        let _ = fs::remove_file(&path);
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.admin_token.as_deref(), Some("ops-secret"));
        assert_eq!(config.default_audience, "b");
        let pg = config.postgres.expect("postgres");
        assert_eq!(pg.url, "postgres://db/auth");
        assert_eq!(pg.max_connections, 3);
        assert_eq!(pg.acquire_timeout_ms, 5_000);
    }

    #[test]
    fn storage_backend_parses_names() {
        assert_eq!("Memory".parse::<StorageBackend>().expect("memory"), StorageBackend::Memory);
        assert_eq!(
            "postgres".parse::<StorageBackend>().expect("postgres"),
            StorageBackend::Postgres
        );
        assert!("redis".parse::<StorageBackend>().is_err());
    }
}
