//! Configuration management.
//!
//! [`LingshuConfig`] gathers every tunable of the crate. Values come from,
//! in increasing precedence: built-in defaults, a TOML file, and `LINGSHU_*`
//! environment variables.
//!
//! ```toml
//! [graph]
//! backend = "neo4j"
//! uri = "http://neo4j:7474"
//! username = "neo4j"
//! password = "secret"
//!
//! [pool]
//! pool_size = 10
//! timeout_ms = 30000
//!
//! [cache]
//! backend = "memory"
//! namespace = "tcm"
//! default_ttl_secs = 3600
//! ```

use crate::services::GraphClientConfig;
use crate::storage::{GraphConfig, PoolConfig, RetryPolicy};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for lingshu.
#[derive(Debug, Clone, Default)]
pub struct LingshuConfig {
    /// Which graph backend to connect to.
    pub graph_backend: GraphBackendKind,
    /// Neo4j connection settings.
    pub graph: GraphConfig,
    /// Connection pool sizing.
    pub pool: PoolConfig,
    /// Retry policy for graph calls.
    pub retry: RetryPolicy,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Query limits.
    pub client: GraphClientConfig,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
}

/// Available graph backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphBackendKind {
    /// Neo4j over the HTTP transactional endpoint.
    #[default]
    Neo4j,
    /// In-process graph, for tests and local runs.
    Memory,
}

impl GraphBackendKind {
    /// Parses a backend name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "neo4j" => Some(Self::Neo4j),
            "memory" | "in-memory" | "in_memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Available cache backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackendKind {
    /// In-process cache evicting the oldest entry.
    #[default]
    Memory,
    /// Redis (requires the `redis` feature).
    Redis,
    /// In-process L1 in front of Redis L2 (requires the `redis` feature).
    Tiered,
    /// No caching.
    Disabled,
}

impl CacheBackendKind {
    /// Parses a backend name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Some(Self::Memory),
            "redis" => Some(Self::Redis),
            "tiered" | "multi-level" | "multi_level" => Some(Self::Tiered),
            "none" | "disabled" | "off" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Backend to use.
    pub backend: CacheBackendKind,
    /// Key namespace; `None` stores keys unprefixed.
    pub namespace: Option<String>,
    /// Capacity of the memory backend, or of L1 when tiered.
    pub max_size: usize,
    /// TTL applied when a write gives none.
    pub default_ttl: Option<Duration>,
    /// Longest an L1 entry lives in the tiered backend.
    pub l1_ttl: Duration,
    /// Redis connection URL. May embed credentials.
    pub redis_url: Option<SecretString>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            namespace: Some("lingshu".to_string()),
            max_size: 1000,
            default_ttl: Some(Duration::from_secs(3600)),
            l1_ttl: crate::storage::cache::DEFAULT_L1_TTL,
            redis_url: None,
        }
    }
}

/// Observability settings as read from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// Logging settings.
    pub logging: Option<LoggingSettings>,
    /// Metrics settings.
    pub metrics: Option<MetricsSettings>,
    /// Whether to bind a Prometheus scrape listener.
    pub metrics_expose: Option<bool>,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// `EnvFilter` directive, e.g. `lingshu=debug`.
    pub filter: Option<String>,
    /// Log file path.
    pub file: Option<PathBuf>,
}

/// Metrics settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Whether to install the Prometheus recorder.
    pub enabled: Option<bool>,
    /// Scrape listener port.
    pub port: Option<u16>,
}

// ============================================================================
// Config File
// ============================================================================

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Graph section.
    pub graph: Option<ConfigFileGraph>,
    /// Pool section.
    pub pool: Option<ConfigFilePool>,
    /// Retry section.
    pub retry: Option<ConfigFileRetry>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
    /// Query limits section.
    pub client: Option<ConfigFileClient>,
    /// Observability section.
    pub observability: Option<ObservabilitySettings>,
}

/// Graph section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileGraph {
    /// `neo4j` or `memory`.
    pub backend: Option<String>,
    /// HTTP base URI.
    pub uri: Option<String>,
    /// Database name.
    pub database: Option<String>,
    /// Basic-auth user.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Per-request timeout in milliseconds.
    pub query_timeout_ms: Option<u64>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

/// Pool section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePool {
    /// Idle connections kept.
    pub pool_size: Option<usize>,
    /// Extra connections under load.
    pub max_overflow: Option<usize>,
    /// Acquire timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Recycle age in seconds; 0 disables.
    pub recycle_secs: Option<u64>,
}

/// Retry section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRetry {
    /// Total attempts.
    pub max_attempts: Option<u32>,
    /// First delay in milliseconds.
    pub base_delay_ms: Option<u64>,
    /// Delay cap in milliseconds.
    pub max_delay_ms: Option<u64>,
}

/// Cache section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// `memory`, `redis`, `tiered` or `disabled`.
    pub backend: Option<String>,
    /// Key namespace; empty disables prefixing.
    pub namespace: Option<String>,
    /// Memory backend capacity.
    pub max_size: Option<usize>,
    /// Default TTL in seconds; 0 disables expiry.
    pub default_ttl_secs: Option<u64>,
    /// L1 entry lifetime in seconds for the tiered backend.
    pub l1_ttl_secs: Option<u64>,
    /// Redis URL.
    pub redis_url: Option<String>,
}

/// Query limits section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileClient {
    /// Search row limit.
    pub search_limit: Option<usize>,
    /// Related-entities row limit.
    pub related_limit: Option<usize>,
    /// Subgraph path limit.
    pub subgraph_path_limit: Option<usize>,
    /// Default shortest-path hop bound.
    pub default_max_depth: Option<u32>,
    /// Node cap for subgraph queries.
    pub subgraph_max_nodes: Option<usize>,
    /// TTL for cached reads in seconds.
    pub cache_ttl_secs: Option<u64>,
}

impl LingshuConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds configuration from defaults and environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or names an
    /// unknown backend.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        Self::parse_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn parse_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location, then applies
    /// environment overrides.
    ///
    /// Checks the following paths in order:
    /// 1. `LINGSHU_CONFIG`, if set
    /// 2. Platform-specific config dir (`~/.config/lingshu/config.toml` on Linux)
    ///
    /// Falls back to defaults when no file is found or the file is invalid.
    #[must_use]
    pub fn load_default() -> Self {
        let base = Self::default_path()
            .filter(|path| path.exists())
            .and_then(|path| match Self::load_from_file(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid config file");
                    None
                },
            })
            .unwrap_or_default();
        base.with_env_overrides()
    }

    fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("LINGSHU_CONFIG")
            && !path.trim().is_empty()
        {
            return Some(PathBuf::from(path));
        }
        directories::ProjectDirs::from("", "", "lingshu")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Applies `LINGSHU_*` environment variable overrides to every section.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("LINGSHU_GRAPH_BACKEND")
            && let Some(kind) = GraphBackendKind::parse(&v)
        {
            self.graph_backend = kind;
        }
        self.graph = self.graph.with_env_overrides();
        self.pool = self.pool.with_env_overrides();
        self.retry = self.retry.with_env_overrides();
        self.client = self.client.with_env_overrides();

        if let Ok(v) = std::env::var("LINGSHU_CACHE_BACKEND")
            && let Some(kind) = CacheBackendKind::parse(&v)
        {
            self.cache.backend = kind;
        }
        if let Ok(v) = std::env::var("LINGSHU_CACHE_NAMESPACE") {
            self.cache.namespace = Some(v).filter(|ns| !ns.is_empty());
        }
        if let Ok(v) = std::env::var("LINGSHU_CACHE_MAX_SIZE")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.cache.max_size = parsed.max(1);
        }
        if let Ok(v) = std::env::var("LINGSHU_CACHE_DEFAULT_TTL_SECS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.cache.default_ttl = (parsed > 0).then(|| Duration::from_secs(parsed));
        }
        if let Ok(v) = std::env::var("LINGSHU_CACHE_L1_TTL_SECS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.cache.l1_ttl = Duration::from_secs(parsed.max(1));
        }
        if let Ok(v) = std::env::var("LINGSHU_REDIS_URL") {
            self.cache.redis_url = Some(SecretString::from(v));
        }
        self
    }

    /// Converts a `ConfigFile` to `LingshuConfig`.
    fn from_config_file(file: ConfigFile) -> crate::Result<Self> {
        let mut config = Self::default();

        if let Some(graph) = file.graph {
            if let Some(backend) = graph.backend {
                config.graph_backend = GraphBackendKind::parse(&backend).ok_or_else(|| {
                    crate::Error::InvalidInput(format!("unknown graph backend '{backend}'"))
                })?;
            }
            if let Some(uri) = graph.uri {
                config.graph.uri = uri;
            }
            if let Some(database) = graph.database {
                config.graph.database = database;
            }
            if graph.username.is_some() {
                config.graph.username = graph.username;
            }
            if let Some(password) = graph.password {
                config.graph.password = Some(SecretString::from(password));
            }
            if let Some(ms) = graph.query_timeout_ms {
                config.graph.query_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = graph.connect_timeout_ms {
                config.graph.connect_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(pool) = file.pool {
            if let Some(v) = pool.pool_size {
                config.pool.pool_size = v.max(1);
            }
            if let Some(v) = pool.max_overflow {
                config.pool.max_overflow = v;
            }
            if let Some(ms) = pool.timeout_ms {
                config.pool.timeout = Duration::from_millis(ms);
            }
            if let Some(secs) = pool.recycle_secs {
                config.pool.recycle = (secs > 0).then(|| Duration::from_secs(secs));
            }
        }

        if let Some(retry) = file.retry {
            if let Some(v) = retry.max_attempts {
                config.retry.max_attempts = v.max(1);
            }
            if let Some(ms) = retry.base_delay_ms {
                config.retry.base_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = retry.max_delay_ms {
                config.retry.max_delay = Duration::from_millis(ms);
            }
        }

        if let Some(cache) = file.cache {
            if let Some(backend) = cache.backend {
                config.cache.backend = CacheBackendKind::parse(&backend).ok_or_else(|| {
                    crate::Error::InvalidInput(format!("unknown cache backend '{backend}'"))
                })?;
            }
            if let Some(namespace) = cache.namespace {
                config.cache.namespace = Some(namespace).filter(|ns| !ns.is_empty());
            }
            if let Some(v) = cache.max_size {
                config.cache.max_size = v.max(1);
            }
            if let Some(secs) = cache.default_ttl_secs {
                config.cache.default_ttl = (secs > 0).then(|| Duration::from_secs(secs));
            }
            if let Some(secs) = cache.l1_ttl_secs {
                config.cache.l1_ttl = Duration::from_secs(secs.max(1));
            }
            if let Some(url) = cache.redis_url {
                config.cache.redis_url = Some(SecretString::from(url));
            }
        }

        if let Some(client) = file.client {
            if let Some(v) = client.search_limit {
                config.client.search_limit = v;
            }
            if let Some(v) = client.related_limit {
                config.client.related_limit = v;
            }
            if let Some(v) = client.subgraph_path_limit {
                config.client.subgraph_path_limit = v;
            }
            if let Some(v) = client.default_max_depth {
                config.client.default_max_depth = v;
            }
            if let Some(v) = client.subgraph_max_nodes {
                config.client.subgraph_max_nodes = v.max(1);
            }
            if let Some(secs) = client.cache_ttl_secs {
                config.client.cache_ttl = Some(Duration::from_secs(secs));
            }
        }

        if let Some(observability) = file.observability {
            config.observability = observability;
        }

        Ok(config)
    }

    /// Sets the graph backend.
    #[must_use]
    pub const fn with_graph_backend(mut self, kind: GraphBackendKind) -> Self {
        self.graph_backend = kind;
        self
    }

    /// Sets the cache backend.
    #[must_use]
    pub const fn with_cache_backend(mut self, kind: CacheBackendKind) -> Self {
        self.cache.backend = kind;
        self
    }
}
