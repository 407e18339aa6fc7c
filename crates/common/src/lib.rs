//! KGForge Common Library
//!
//! Shared code for the retrieval service including:
//! - Knowledge graph model and store backends
//! - Embedding client abstraction
//! - Query reformulation client
//! - Error types and handling
//! - Configuration management
//! - Result caching, retry and metrics

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod graph;
pub mod llm;
pub mod metrics;
pub mod retry;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use graph::GraphStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
