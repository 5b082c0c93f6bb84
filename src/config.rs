//! Configuration management for Folio Server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while reading configuration from the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub delivery: DeliveryConfig,
    pub render: RenderConfig,
    pub prefetch: PrefetchConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Host clients reach us on (NAT / reverse proxy)
    pub public_host: String,
    /// Full base URL override, wins over `public_host`
    pub public_base_url: Option<String>,
}

impl ServerConfig {
    /// Base URL used when generating absolute links for clients
    pub fn public_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.public_host, self.port),
        }
    }
}

/// Document handle pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub capacity: usize,
    pub idle_ttl: Duration,
}

/// Page render cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub memory_entries: usize,
    pub disk_dir: PathBuf,
    pub disk_ttl: Duration,
}

/// Delivery strategy thresholds (bytes)
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub inline_max_bytes: u64,
    pub streaming_max_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub workers: usize,
    pub timeout: Duration,
    pub default_width: u32,
    pub default_dpr: f32,
}

#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Pages on each side of the current page
    pub range: usize,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    /// Directory that path registration is confined to
    pub storage_root: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
}

/// Worker pool size: half the cores, never fewer than two
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cores / 2).max(2)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8787,
                public_host: "localhost".to_string(),
                public_base_url: None,
            },
            pool: PoolConfig {
                capacity: 10,
                idle_ttl: Duration::from_secs(300),
            },
            cache: CacheConfig {
                memory_entries: 128,
                disk_dir: env::temp_dir().join("folio-cache"),
                disk_ttl: Duration::from_secs(3600),
            },
            delivery: DeliveryConfig {
                inline_max_bytes: 1536 * 1024,
                streaming_max_bytes: 20 * 1024 * 1024,
            },
            render: RenderConfig {
                workers: default_worker_count(),
                timeout: Duration::from_secs(10),
                default_width: 1200,
                default_dpr: 1.0,
            },
            prefetch: PrefetchConfig {
                range: 2,
                sweep_interval: Duration::from_secs(60),
            },
            storage: StorageConfig {
                upload_dir: env::temp_dir().join("folio-uploads"),
                storage_root: env::temp_dir().join("folio-storage"),
                max_upload_bytes: 1536 * 1024 * 1024,
            },
            session: SessionConfig {
                ttl: Duration::from_secs(1800),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
                public_host: env::var("PUBLIC_HOST").unwrap_or(defaults.server.public_host),
                public_base_url: env::var("PUBLIC_BASE_URL").ok(),
            },
            pool: PoolConfig {
                capacity: parse_var("POOL_CAPACITY", defaults.pool.capacity)?.max(1),
                idle_ttl: secs_var("POOL_IDLE_TTL_SECS", defaults.pool.idle_ttl)?,
            },
            cache: CacheConfig {
                memory_entries: parse_var("MEMORY_CACHE_ENTRIES", defaults.cache.memory_entries)?
                    .max(1),
                disk_dir: env::var("DISK_CACHE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.cache.disk_dir),
                disk_ttl: secs_var("DISK_CACHE_TTL_SECS", defaults.cache.disk_ttl)?,
            },
            delivery: DeliveryConfig {
                inline_max_bytes: parse_var("INLINE_MAX_BYTES", defaults.delivery.inline_max_bytes)?,
                streaming_max_bytes: parse_var(
                    "STREAMING_MAX_BYTES",
                    defaults.delivery.streaming_max_bytes,
                )?,
            },
            render: RenderConfig {
                workers: parse_var("RENDER_WORKERS", defaults.render.workers)?.max(1),
                timeout: secs_var("RENDER_TIMEOUT_SECS", defaults.render.timeout)?,
                default_width: parse_var("DEFAULT_WIDTH", defaults.render.default_width)?,
                default_dpr: parse_var("DEFAULT_DPR", defaults.render.default_dpr)?,
            },
            prefetch: PrefetchConfig {
                range: parse_var("PREFETCH_RANGE", defaults.prefetch.range)?,
                sweep_interval: secs_var("SWEEP_INTERVAL_SECS", defaults.prefetch.sweep_interval)?,
            },
            storage: StorageConfig {
                upload_dir: env::var("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.upload_dir),
                storage_root: env::var("STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.storage_root),
                max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.storage.max_upload_bytes)?,
            },
            session: SessionConfig {
                ttl: secs_var("SESSION_TTL_SECS", defaults.session.ttl)?,
            },
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(default),
    }
}

fn secs_var(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pool.capacity, 10);
        assert_eq!(config.pool.idle_ttl, Duration::from_secs(300));
        assert_eq!(config.cache.memory_entries, 128);
        assert_eq!(config.cache.disk_ttl, Duration::from_secs(3600));
        assert_eq!(config.render.timeout, Duration::from_secs(10));
        assert!(config.render.workers >= 2);
    }

    #[test]
    fn test_public_url() {
        let mut server = Config::default().server;
        assert_eq!(server.public_url(), "http://localhost:8787");

        server.public_base_url = Some("https://docs.example.com/".to_string());
        assert_eq!(server.public_url(), "https://docs.example.com");
    }
}
