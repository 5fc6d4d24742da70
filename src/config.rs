use std::{path::PathBuf, str::FromStr};

use anyhow::Context;
use serde::Deserialize;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Other,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            _ => Environment::Other,
        }
    }
}

/// How multi-row group writes are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupWriteMode {
    /// One storage transaction per group write; all-or-nothing.
    Atomic,
    /// Row-by-row loop; the first failure aborts and earlier rows stay committed.
    BestEffort,
}

impl FromStr for GroupWriteMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(GroupWriteMode::Atomic),
            "best_effort" | "best-effort" => Ok(GroupWriteMode::BestEffort),
            other => anyhow::bail!("unknown GROUP_WRITE_MODE: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub env: Environment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub allowed_origins: String,
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub hashing: HashConfig,
    pub group_write_mode: GroupWriteMode,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let env = Environment::parse(&env_or("ENV", "development"));

        let secret = match std::env::var("JWT_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ if env == Environment::Development => {
                tracing::warn!("JWT_SECRET not set; using the insecure development secret");
                DEV_JWT_SECRET.to_string()
            }
            _ => anyhow::bail!("JWT_SECRET must be set outside development"),
        };

        let defaults = HashConfig::default();

        Ok(Self {
            server: ServerConfig {
                host: env_or("APP_HOST", "0.0.0.0"),
                port: parse_env("PORT", 8080)?,
                env,
            },
            database: DatabaseConfig {
                path: PathBuf::from(env_or("DB_PATH", "./data/quotebook.db")),
                max_connections: parse_env("DB_MAX_CONNECTIONS", 5)?,
            },
            jwt: JwtConfig {
                secret,
                issuer: env_or("JWT_ISSUER", "quotebook"),
                audience: env_or("JWT_AUDIENCE", "quotebook-users"),
                ttl_hours: parse_env("JWT_EXPIRATION_HOURS", 24)?,
            },
            security: SecurityConfig {
                rate_limit_requests: parse_env("RATE_LIMIT_REQUESTS", 100)?,
                rate_limit_window_secs: parse_env("RATE_LIMIT_DURATION", 60)?,
                allowed_origins: env_or("ALLOWED_ORIGINS", "http://localhost:3000"),
            },
            hashing: HashConfig {
                memory_kib: parse_env("HASH_MEMORY_KIB", defaults.memory_kib)?,
                iterations: parse_env("HASH_ITERATIONS", defaults.iterations)?,
                parallelism: parse_env("HASH_PARALLELISM", defaults.parallelism)?,
            },
            group_write_mode: parse_env("GROUP_WRITE_MODE", GroupWriteMode::Atomic)?,
        })
    }

    pub fn is_development(&self) -> bool {
        self.server.env == Environment::Development
    }

    pub fn is_production(&self) -> bool {
        self.server.env == Environment::Production
    }

    /// Cheap settings for unit tests: in-memory store, minimal hashing cost.
    #[cfg(test)]
    pub fn fake() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                env: Environment::Development,
            },
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 1,
            },
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_hours: 1,
            },
            security: SecurityConfig {
                rate_limit_requests: 100,
                rate_limit_window_secs: 60,
                allowed_origins: "*".into(),
            },
            hashing: HashConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            group_write_mode: GroupWriteMode::Atomic,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: {raw}")),
        _ => Ok(default),
    }
}
