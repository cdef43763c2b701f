//! Configuration management for larder using the prefer crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::aggregate::{AggregatorConfig, DedupThresholds};
use crate::blocklist::{
    BlockPolicy, BlockRegistry, BlockStore, InMemoryBlockStore, JsonFileBlockStore,
    SqliteBlockStore,
};
use crate::fetch::USER_AGENT;
use crate::rate_limit::RateLimitConfig;
use crate::sources::JsonApiSourceConfig;

/// Default blocklist filename for the JSON backend.
const BLOCKLIST_JSON_FILENAME: &str = "blocklist.json";

/// Default blocklist filename for the SQLite backend.
const BLOCKLIST_DB_FILENAME: &str = "blocklist.db";

/// Rate limiter section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Requests per second for domains without an override.
    pub default_rate: f64,
    pub default_burst: u32,
    pub human_jitter: bool,
    pub max_backoff_ms: u64,
    pub idle_eviction_secs: u64,
    pub sweep_interval_secs: u64,
    pub fast_response_ms: u64,
    pub slow_response_ms: u64,
    /// Per-domain base rates (requests per second).
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub domains: HashMap<String, f64>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            default_rate: defaults.default_rate,
            default_burst: defaults.default_burst,
            human_jitter: defaults.human_jitter,
            max_backoff_ms: defaults.max_backoff.as_millis() as u64,
            idle_eviction_secs: defaults.idle_eviction.as_secs(),
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
            fast_response_ms: defaults.fast_response.as_millis() as u64,
            slow_response_ms: defaults.slow_response.as_millis() as u64,
            domains: HashMap::new(),
        }
    }
}

impl RateLimitSection {
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            default_rate: self.default_rate,
            default_burst: self.default_burst,
            human_jitter: self.human_jitter,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            idle_eviction: Duration::from_secs(self.idle_eviction_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            fast_response: Duration::from_millis(self.fast_response_ms),
            slow_response: Duration::from_millis(self.slow_response_ms),
            domain_rates: self.domains.clone(),
        }
    }
}

/// Where block records are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStoreKind {
    /// Lost on exit; useful for one-off runs and tests.
    Memory,
    /// Single JSON document, safe for one process at a time.
    Json,
    /// SQLite database, safe across processes.
    #[default]
    Sqlite,
}

impl std::str::FromStr for BlockStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "json" | "file" => Ok(Self::Json),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(format!("unknown block store: {}", other)),
        }
    }
}

/// Block registry section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocklistSection {
    pub block_threshold: u32,
    pub permanent_threshold: u32,
    pub cooldown_secs: u64,
    pub store: BlockStoreKind,
    /// Store location; defaults to a file in the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for BlocklistSection {
    fn default() -> Self {
        let policy = BlockPolicy::default();
        Self {
            block_threshold: policy.block_threshold,
            permanent_threshold: policy.permanent_threshold,
            cooldown_secs: policy.cooldown.num_seconds().max(0) as u64,
            store: BlockStoreKind::default(),
            path: None,
        }
    }
}

impl BlocklistSection {
    pub fn to_policy(&self) -> BlockPolicy {
        BlockPolicy {
            block_threshold: self.block_threshold,
            permanent_threshold: self.permanent_threshold.max(self.block_threshold),
            cooldown: chrono::Duration::seconds(self.cooldown_secs as i64),
            ..BlockPolicy::default()
        }
    }
}

/// Aggregator section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSection {
    pub source_timeout_secs: u64,
    pub complete_threshold: u8,
    pub coverage_threshold: u8,
    pub title_duplicate_threshold: f64,
    pub ingredient_duplicate_threshold: f64,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        let defaults = AggregatorConfig::default();
        Self {
            source_timeout_secs: defaults.source_timeout.as_secs(),
            complete_threshold: defaults.complete_threshold,
            coverage_threshold: defaults.coverage_threshold,
            title_duplicate_threshold: defaults.dedup.title,
            ingredient_duplicate_threshold: defaults.dedup.ingredients,
        }
    }
}

impl AggregatorSection {
    pub fn to_aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            source_timeout: Duration::from_secs(self.source_timeout_secs),
            complete_threshold: self.complete_threshold.min(100),
            coverage_threshold: self.coverage_threshold.min(100),
            dedup: DedupThresholds {
                title: self.title_duplicate_threshold,
                ingredients: self.ingredient_duplicate_threshold,
            },
        }
    }
}

/// HTTP client section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Custom user agent, or "browser" for a rotating browser string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: 30,
        }
    }
}

impl HttpSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// User agent string that will be sent when no override is configured.
    pub fn effective_user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(USER_AGENT)
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub blocklist: BlocklistSection,
    #[serde(default)]
    pub aggregator: AggregatorSection,
    #[serde(default)]
    pub http: HttpSection,
    /// JSON search APIs queried in priority order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<JsonApiSourceConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers larder config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("larder").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                        Self::default_with_env()
                    }
                },
                None => Self::default_with_env(),
            },
            // No config file found, use defaults with env overrides
            Err(_) => Self::default_with_env(),
        }
    }

    /// Create a default config with environment variable overrides applied.
    pub fn default_with_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;

        config.source_path = Some(path.to_path_buf());
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse config text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, String> {
        match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Apply `LARDER_*` environment variables on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        if let Some(dir) = get("LARDER_DATA_DIR") {
            tracing::debug!("Using LARDER_DATA_DIR from environment: {}", dir);
            self.data_dir = Some(dir);
        }
        if let Some(store) = get("LARDER_BLOCK_STORE") {
            match store.parse() {
                Ok(kind) => self.blocklist.store = kind,
                Err(e) => tracing::warn!("Ignoring LARDER_BLOCK_STORE: {}", e),
            }
        }
        if let Some(agent) = get("LARDER_USER_AGENT") {
            self.http.user_agent = Some(agent);
        }
        if let Some(rate) = get("LARDER_DEFAULT_RATE") {
            match rate.parse::<f64>() {
                Ok(rate) if rate > 0.0 => self.rate_limit.default_rate = rate,
                _ => tracing::warn!("Ignoring LARDER_DEFAULT_RATE: {:?}", rate),
            }
        }
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory if available, otherwise None.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    fn effective_base_dir(&self) -> PathBuf {
        self.base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Directory for persistent state.
    /// Falls back gracefully: data dir -> home dir -> current dir.
    pub fn data_dir_path(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => self.resolve_path(dir, &self.effective_base_dir()),
            None => dirs::data_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("larder"),
        }
    }

    /// Location of the block store file, if the backend has one.
    pub fn blocklist_path(&self) -> Option<PathBuf> {
        let default_name = match self.blocklist.store {
            BlockStoreKind::Memory => return None,
            BlockStoreKind::Json => BLOCKLIST_JSON_FILENAME,
            BlockStoreKind::Sqlite => BLOCKLIST_DB_FILENAME,
        };
        Some(match &self.blocklist.path {
            Some(path) => self.resolve_path(path, &self.effective_base_dir()),
            None => self.data_dir_path().join(default_name),
        })
    }

    pub fn block_store(&self) -> Arc<dyn BlockStore> {
        match (self.blocklist.store, self.blocklist_path()) {
            (BlockStoreKind::Json, Some(path)) => Arc::new(JsonFileBlockStore::new(path)),
            (BlockStoreKind::Sqlite, Some(path)) => Arc::new(SqliteBlockStore::new(path)),
            _ => Arc::new(InMemoryBlockStore::new()),
        }
    }

    pub fn block_registry(&self) -> BlockRegistry {
        BlockRegistry::with_policy(self.block_store(), self.blocklist.to_policy())
    }

    /// Rate limiter settings, including each source's configured rate.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        let mut config = self.rate_limit.to_rate_limit_config();
        for source in &self.sources {
            if let (Some(rate), Some(domain)) = (
                source.rate,
                crate::utils::extract_domain(&source.search_url),
            ) {
                config.domain_rates.entry(domain).or_insert(rate);
            }
        }
        config
    }

    /// Compute SHA-256 hash of the serialized config.
    pub fn hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}
