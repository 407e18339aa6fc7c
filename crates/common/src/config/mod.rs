//! Configuration management for KGForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{env}.toml)
//! - Default values

use crate::errors::{AppError, Result};
use crate::retry::RetryPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Graph store (Postgres) configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis result cache configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Query reformulation LLM configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retrieval engine knobs
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres URL; unset means the in-memory store is used
    pub url: Option<String>,

    /// JSON graph snapshot loaded into the in-memory store
    pub snapshot_path: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Name of the ANN index over chunk embeddings
    #[serde(default = "default_vector_index")]
    pub vector_index: String,

    /// Name of the full-text index over chunk text
    #[serde(default = "default_keyword_index")]
    pub keyword_index: String,

    /// Retry policy for graph store round trips
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; caching is disabled when unset
    pub url: Option<String>,

    /// Key prefix for namespacing
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use; must match the model used at ingestion
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Retry policy for embedding calls
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature for reformulation
    #[serde(default)]
    pub temperature: f32,

    /// Retry policy for chat calls
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Score fusion strategy for the vector and keyword channels
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Each channel divided by its best score, chunk keeps its maximum
    MaxNormalized,
    /// Weighted reciprocal rank fusion, rescaled so the best chunk is 1.0
    ReciprocalRank,
}

/// Retrieval engine configuration
///
/// Built once at startup and shared by reference with the engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Number of fused chunk candidates kept
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Per-channel over-fetch before fusion
    #[serde(default = "default_over_fetch")]
    pub over_fetch_multiplier: usize,

    /// Entities retained per document after occurrence ranking
    #[serde(default = "default_max_entities")]
    pub max_entities_per_document: usize,

    /// Below this similarity an embedded entity is not expanded
    #[serde(default = "default_sim_low")]
    pub sim_low: f32,

    /// Above this similarity an entity gets the deep expansion
    #[serde(default = "default_sim_high")]
    pub sim_high: f32,

    /// Raw path cap for the moderate band
    #[serde(default = "default_mid_cap")]
    pub mid_band_path_cap: usize,

    /// Raw path cap for the deep band
    #[serde(default = "default_high_cap")]
    pub high_band_path_cap: usize,

    /// Hop limit for the moderate band
    #[serde(default = "default_mid_depth")]
    pub mid_band_depth: usize,

    /// Hop limit for the deep band
    #[serde(default = "default_high_depth")]
    pub high_band_depth: usize,

    /// Upper bound on documents expanded concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Entity traversals in flight per document. Store calls in flight are
    /// bounded by `max_concurrency * max_entity_concurrency`.
    #[serde(default = "default_max_entity_concurrency")]
    pub max_entity_concurrency: usize,

    /// How vector and keyword scores are combined
    #[serde(default = "default_fusion")]
    pub fusion: FusionStrategy,

    /// RRF weight of the vector channel
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// RRF weight of the keyword channel
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    /// Drop fused chunks scoring below this
    #[serde(default)]
    pub min_chunk_score: Option<f32>,

    /// Edge types never traversed during expansion
    #[serde(default = "default_excluded_relationships")]
    pub excluded_relationship_types: Vec<String>,

    /// Node labels never entered during expansion
    #[serde(default = "default_excluded_labels")]
    pub excluded_node_labels: Vec<String>,

    /// TTL for cached retrieval results
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (debug, info, kgforge_search=debug, ...)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_vector_index() -> String { "chunks_embedding_idx".to_string() }
fn default_keyword_index() -> String { "chunks_content_fts_idx".to_string() }
fn default_redis_prefix() -> String { "kgforge:retrieval".to_string() }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "all-MiniLM-L6-v2".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 30 }
fn default_top_k() -> usize { 5 }
fn default_over_fetch() -> usize { 2 }
fn default_max_entities() -> usize { 40 }
fn default_sim_low() -> f32 { 0.3 }
fn default_sim_high() -> f32 { 0.9 }
fn default_mid_cap() -> usize { 20 }
fn default_high_cap() -> usize { 40 }
fn default_mid_depth() -> usize { 1 }
fn default_high_depth() -> usize { 2 }
fn default_max_concurrency() -> usize { 8 }
fn default_max_entity_concurrency() -> usize { 4 }
fn default_fusion() -> FusionStrategy { FusionStrategy::MaxNormalized }
fn default_vector_weight() -> f32 { 0.6 }
fn default_keyword_weight() -> f32 { 0.4 }
fn default_excluded_relationships() -> Vec<String> {
    vec!["HAS_ENTITY".to_string(), "PART_OF".to_string()]
}
fn default_excluded_labels() -> Vec<String> {
    vec!["Chunk".to_string(), "Document".to_string(), "Community".to_string()]
}
fn default_cache_ttl() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // e.g., APP__RETRIEVAL__TOP_K=8
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("retrieval.excluded_relationship_types")
                    .with_list_parse_key("retrieval.excluded_node_labels")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("retrieval.excluded_relationship_types")
                    .with_list_parse_key("retrieval.excluded_node_labels")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl RetrievalConfig {
    /// Reject knob combinations the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(AppError::configuration("retrieval.top_k must be at least 1"));
        }
        if self.over_fetch_multiplier == 0 {
            return Err(AppError::configuration(
                "retrieval.over_fetch_multiplier must be at least 1",
            ));
        }
        for (name, value) in [("sim_low", self.sim_low), ("sim_high", self.sim_high)] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(AppError::configuration(format!(
                    "retrieval.{} must lie in [-1, 1], got {}",
                    name, value
                )));
            }
        }
        if self.sim_low > self.sim_high {
            return Err(AppError::configuration(format!(
                "retrieval.sim_low ({}) exceeds retrieval.sim_high ({})",
                self.sim_low, self.sim_high
            )));
        }
        if self.max_concurrency == 0 {
            return Err(AppError::configuration("retrieval.max_concurrency must be at least 1"));
        }
        if self.max_entity_concurrency == 0 {
            return Err(AppError::configuration(
                "retrieval.max_entity_concurrency must be at least 1",
            ));
        }
        Ok(())
    }

    /// Candidates requested from each channel before fusion
    pub fn channel_limit(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.over_fetch_multiplier)
    }

    /// Stable digest input for cache keys.
    ///
    /// Covers every knob that changes returned bundles; concurrency and TTL
    /// are left out. Exclusion lists are order-insensitive.
    pub fn fingerprint(&self) -> String {
        format!(
            "k{}x{}e{}s{}-{}c{}-{}d{}-{}f{:?}w{}-{}m{:?}r[{}]l[{}]",
            self.top_k,
            self.over_fetch_multiplier,
            self.max_entities_per_document,
            self.sim_low,
            self.sim_high,
            self.mid_band_path_cap,
            self.high_band_path_cap,
            self.mid_band_depth,
            self.high_band_depth,
            self.fusion,
            self.vector_weight,
            self.keyword_weight,
            self.min_chunk_score,
            sorted_joined(&self.excluded_relationship_types),
            sorted_joined(&self.excluded_node_labels),
        )
    }
}

fn sorted_joined(values: &[String]) -> String {
    let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
    values.sort_unstable();
    values.dedup();
    values.join(",")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            snapshot_path: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            vector_index: default_vector_index(),
            keyword_index: default_keyword_index(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_redis_prefix(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            temperature: 0.0,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            over_fetch_multiplier: default_over_fetch(),
            max_entities_per_document: default_max_entities(),
            sim_low: default_sim_low(),
            sim_high: default_sim_high(),
            mid_band_path_cap: default_mid_cap(),
            high_band_path_cap: default_high_cap(),
            mid_band_depth: default_mid_depth(),
            high_band_depth: default_high_depth(),
            max_concurrency: default_max_concurrency(),
            max_entity_concurrency: default_max_entity_concurrency(),
            fusion: default_fusion(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            min_chunk_score: None,
            excluded_relationship_types: default_excluded_relationships(),
            excluded_node_labels: default_excluded_labels(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
        }
    }
}
