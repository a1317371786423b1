use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use axum::http::HeaderValue;
use kuma_core::db::DatabaseLocation;
use thiserror::Error;

const DEFAULT_CORS_ORIGINS: &str = "tauri://localhost,http://localhost:3000";
const MIN_JWT_SECRET_LEN: usize = 32;
const DEFAULT_SYNC_MAX_BODY_BYTES: &str = "67108864";
const MIN_SYNC_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database: DatabaseLocation,
    pub auth_service_url: String,
    pub auth_jwks_url: String,
    pub auth_jwt_secret: Option<String>,
    pub auth_jwt_issuer: Option<String>,
    pub auth_jwt_audience: Option<String>,
    pub jwks_cache_ttl: Duration,
    pub auth_clock_skew: Duration,
    pub cors_allowed_origins: Vec<String>,
    /// Upper bound on a `/sync` request body. Batches are never paged, so
    /// this has to cover a client's whole unsynced backlog.
    pub sync_max_body_bytes: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database)
            .field("auth_service_url", &self.auth_service_url)
            .field("auth_jwks_url", &self.auth_jwks_url)
            .field(
                "auth_jwt_secret",
                &self.auth_jwt_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("auth_jwt_issuer", &self.auth_jwt_issuer)
            .field("auth_jwt_audience", &self.auth_jwt_audience)
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("sync_max_body_bytes", &self.sync_max_body_bytes)
            .finish()
    }
}

impl AppConfig {
    /// Read the environment, letting `overrides` (e.g. CLI flags) win per variable.
    pub fn from_env_with_overrides(
        overrides: &HashMap<&'static str, String>,
    ) -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| {
            overrides
                .get(name)
                .or_else(|| values.get(name))
                .cloned()
        })
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "KUMA_API_BIND_ADDR", "127.0.0.1:8080");

        let database_url = value_or_default(&lookup, "DATABASE_URL", "kuma.db");
        let database_auth_token = optional_trimmed(&lookup, "DATABASE_AUTH_TOKEN");
        let database = DatabaseLocation::parse(&database_url, database_auth_token.as_deref())
            .map_err(|error| ConfigError::Invalid(format!("DATABASE_URL: {error}")))?;

        let auth_service_url = required_trimmed(&lookup, "AUTH_SERVICE_URL")?;
        if !is_http_url(&auth_service_url) {
            return Err(ConfigError::Invalid(
                "AUTH_SERVICE_URL must start with http:// or https://".to_string(),
            ));
        }
        let auth_service_url = trim_trailing(&auth_service_url).to_string();

        let default_jwks = format!("{auth_service_url}/api/auth/jwks");
        let auth_jwks_url = value_or_default(&lookup, "AUTH_JWKS_URL", &default_jwks);
        if !is_http_url(&auth_jwks_url) {
            return Err(ConfigError::Invalid(
                "AUTH_JWKS_URL must start with http:// or https://".to_string(),
            ));
        }

        let auth_jwt_secret = optional_trimmed(&lookup, "AUTH_JWT_SECRET");
        if auth_jwt_secret
            .as_ref()
            .is_some_and(|secret| secret.len() < MIN_JWT_SECRET_LEN)
        {
            return Err(ConfigError::Invalid(format!(
                "AUTH_JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }
        let auth_jwt_issuer = optional_trimmed(&lookup, "AUTH_JWT_ISSUER");
        let auth_jwt_audience = optional_trimmed(&lookup, "AUTH_JWT_AUDIENCE");

        let jwks_cache_ttl_secs = value_or_default(&lookup, "AUTH_JWKS_CACHE_TTL_SECS", "300")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid("AUTH_JWKS_CACHE_TTL_SECS must be an integer >= 30".to_string())
            })?;
        if jwks_cache_ttl_secs < 30 {
            return Err(ConfigError::Invalid(
                "AUTH_JWKS_CACHE_TTL_SECS must be >= 30".to_string(),
            ));
        }

        let auth_clock_skew_secs = value_or_default(&lookup, "AUTH_CLOCK_SKEW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]".to_string(),
                )
            })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        let cors_allowed_origins = parse_origins(&value_or_default(
            &lookup,
            "CORS_ALLOWED_ORIGINS",
            DEFAULT_CORS_ORIGINS,
        ))?;

        let sync_max_body_bytes = value_or_default(
            &lookup,
            "SYNC_MAX_BODY_BYTES",
            DEFAULT_SYNC_MAX_BODY_BYTES,
        )
        .parse::<usize>()
        .map_err(|_| {
            ConfigError::Invalid("SYNC_MAX_BODY_BYTES must be a byte count".to_string())
        })?;
        if sync_max_body_bytes < MIN_SYNC_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "SYNC_MAX_BODY_BYTES must be at least {MIN_SYNC_MAX_BODY_BYTES}"
            )));
        }

        Ok(Self {
            bind_addr,
            database,
            auth_service_url,
            auth_jwks_url,
            auth_jwt_secret,
            auth_jwt_issuer,
            auth_jwt_audience,
            jwks_cache_ttl: Duration::from_secs(jwks_cache_ttl_secs),
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            cors_allowed_origins,
            sync_max_body_bytes,
        })
    }
}

fn parse_origins(raw: &str) -> Result<Vec<String>, ConfigError> {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect();

    if origins.is_empty() {
        return Err(ConfigError::Invalid(
            "CORS_ALLOWED_ORIGINS must list at least one origin".to_string(),
        ));
    }
    if origins.iter().any(|origin| origin == "*") {
        // Wildcards cannot be combined with credentialed requests.
        return Err(ConfigError::Invalid(
            "CORS_ALLOWED_ORIGINS must list explicit origins, not `*`".to_string(),
        ));
    }
    if let Some(bad) = origins
        .iter()
        .find(|origin| HeaderValue::from_str(origin).is_err())
    {
        return Err(ConfigError::Invalid(format!(
            "CORS_ALLOWED_ORIGINS contains an invalid origin: {bad:?}"
        )));
    }

    Ok(origins)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn trim_trailing(value: &str) -> &str {
    value.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    fn minimal() -> HashMap<&'static str, &'static str> {
        let mut map = HashMap::new();
        map.insert("AUTH_SERVICE_URL", "http://localhost:3001/");
        map
    }

    #[test]
    fn config_requires_auth_service_url() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("AUTH_SERVICE_URL"));
    }

    #[test]
    fn config_defaults() {
        let config = config_from(&minimal()).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database, DatabaseLocation::Local("kuma.db".to_string()));
        assert_eq!(config.auth_service_url, "http://localhost:3001");
        assert_eq!(config.auth_jwks_url, "http://localhost:3001/api/auth/jwks");
        assert_eq!(config.auth_jwt_secret, None);
        assert_eq!(config.jwks_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.auth_clock_skew, Duration::from_secs(60));
        assert_eq!(
            config.cors_allowed_origins,
            vec!["tauri://localhost", "http://localhost:3000"]
        );
        assert_eq!(config.sync_max_body_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn config_reads_sync_body_limit() {
        let mut map = minimal();
        map.insert("SYNC_MAX_BODY_BYTES", "8388608");
        assert_eq!(config_from(&map).unwrap().sync_max_body_bytes, 8 * 1024 * 1024);

        map.insert("SYNC_MAX_BODY_BYTES", "4096");
        assert!(config_from(&map).is_err());

        map.insert("SYNC_MAX_BODY_BYTES", "lots");
        assert!(config_from(&map).is_err());
    }

    #[test]
    fn config_rejects_remote_database_without_token() {
        let mut map = minimal();
        map.insert("DATABASE_URL", "libsql://kuma.turso.io");
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        map.insert("DATABASE_AUTH_TOKEN", "token");
        assert!(config_from(&map).is_ok());
    }

    #[test]
    fn config_rejects_short_jwt_secret_and_wildcard_origins() {
        let mut map = minimal();
        map.insert("AUTH_JWT_SECRET", "too-short");
        assert!(config_from(&map).is_err());

        let mut map = minimal();
        map.insert("CORS_ALLOWED_ORIGINS", "*");
        assert!(config_from(&map).is_err());
    }

    #[test]
    fn config_parses_origin_list() {
        let mut map = minimal();
        map.insert(
            "CORS_ALLOWED_ORIGINS",
            " https://app.kuma.dev , tauri://localhost,, ",
        );
        let config = config_from(&map).unwrap();
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://app.kuma.dev", "tauri://localhost"]
        );
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let mut map = minimal();
        map.insert("AUTH_JWT_SECRET", "sensitive-shared-secret-0123456789abcdef");
        map.insert("DATABASE_URL", "libsql://kuma.turso.io");
        map.insert("DATABASE_AUTH_TOKEN", "sensitive-db-token");

        let config = config_from(&map).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-shared-secret"));
        assert!(!debug_output.contains("sensitive-db-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
