use crate::error::SemsearchError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// semsearch application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding one sub-directory per collection
    pub data_dir: PathBuf,

    /// Collection name
    pub collection: String,

    /// Ollama API base URL
    pub ollama_base_url: String,

    /// Embedding model name
    pub embedding_model: String,

    /// Fixed embedding dimension (None = taken from the first vector)
    pub embedding_dimension: Option<usize>,

    /// Per-request embedding timeout in seconds
    pub embed_timeout_secs: u64,

    /// Maximum embedding attempts per text (first call included)
    pub embed_max_attempts: u32,

    /// Initial retry backoff in milliseconds
    pub embed_base_delay_ms: u64,

    /// Retry backoff cap in milliseconds
    pub embed_max_delay_ms: u64,

    /// Maximum concurrent embedding calls
    pub embed_max_concurrency: usize,

    /// Records processed concurrently during ingestion
    pub ingest_batch_size: usize,

    /// numCandidates = max(limit * factor, floor)
    pub candidate_factor: usize,

    /// Lower bound for the default numCandidates
    pub candidate_floor: usize,

    /// numCandidates multiplier when a filter is present
    pub filter_overfetch: usize,

    /// Log directory
    pub log_dir: PathBuf,

    /// Log level
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            collection: "default".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: None,
            embed_timeout_secs: 30,
            embed_max_attempts: 3,
            embed_base_delay_ms: 500,
            embed_max_delay_ms: 8_000,
            embed_max_concurrency: 4,
            ingest_batch_size: 5,
            candidate_factor: 10,
            candidate_floor: 100,
            filter_overfetch: 4,
            log_dir: PathBuf::from("./data/log"),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self, SemsearchError> {
        // Load .env file (ignore if not exists)
        let _ = dotenv::dotenv();

        let defaults = Self::default();
        let config = Self {
            data_dir: Self::get_env_path("DATA_DIR").unwrap_or(defaults.data_dir),
            collection: std::env::var("COLLECTION").unwrap_or(defaults.collection),
            ollama_base_url: std::env::var("OLLAMA_BASE_URL")
                .unwrap_or(defaults.ollama_base_url),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_dimension: Self::get_env_parsed("EMBEDDING_DIMENSION")?,
            embed_timeout_secs: Self::get_env_parsed("EMBED_TIMEOUT_SECS")?
                .unwrap_or(defaults.embed_timeout_secs),
            embed_max_attempts: Self::get_env_parsed("EMBED_MAX_ATTEMPTS")?
                .unwrap_or(defaults.embed_max_attempts),
            embed_base_delay_ms: Self::get_env_parsed("EMBED_BASE_DELAY_MS")?
                .unwrap_or(defaults.embed_base_delay_ms),
            embed_max_delay_ms: Self::get_env_parsed("EMBED_MAX_DELAY_MS")?
                .unwrap_or(defaults.embed_max_delay_ms),
            embed_max_concurrency: Self::get_env_parsed("EMBED_MAX_CONCURRENCY")?
                .unwrap_or(defaults.embed_max_concurrency),
            ingest_batch_size: Self::get_env_parsed("INGEST_BATCH_SIZE")?
                .unwrap_or(defaults.ingest_batch_size),
            candidate_factor: Self::get_env_parsed("CANDIDATE_FACTOR")?
                .unwrap_or(defaults.candidate_factor),
            candidate_floor: Self::get_env_parsed("CANDIDATE_FLOOR")?
                .unwrap_or(defaults.candidate_floor),
            filter_overfetch: Self::get_env_parsed("FILTER_OVERFETCH")?
                .unwrap_or(defaults.filter_overfetch),
            log_dir: Self::get_env_path("LOG_DIR").unwrap_or(defaults.log_dir),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        // Ensure required directories exist
        config.ensure_directories()?;

        Ok(config)
    }

    /// Get PathBuf from environment variable
    fn get_env_path(key: &str) -> Option<PathBuf> {
        std::env::var(key).ok().map(PathBuf::from)
    }

    /// Parse an optional numeric environment variable
    fn get_env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, SemsearchError> {
        match std::env::var(key) {
            Ok(raw) if raw.trim().is_empty() => Ok(None),
            Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
                SemsearchError::config(format!("{} has an invalid value: '{}'", key, raw))
            }),
            Err(_) => Ok(None),
        }
    }

    /// Ensure required directories exist, create if not
    pub fn ensure_directories(&self) -> Result<(), SemsearchError> {
        for dir in [&self.data_dir, &self.log_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    SemsearchError::config(format!(
                        "Failed to create directory {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Directory of the configured collection
    pub fn collection_dir(&self) -> PathBuf {
        self.data_dir.join(&self.collection)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), SemsearchError> {
        if self.collection.trim().is_empty() {
            return Err(SemsearchError::config("Collection name cannot be empty"));
        }
        if self
            .collection
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(SemsearchError::config(
                "Collection name may only contain ASCII letters, digits, '-' and '_'",
            ));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(SemsearchError::config("Embedding model name cannot be empty"));
        }

        // Validate Ollama URL
        if !self.ollama_base_url.starts_with("http://")
            && !self.ollama_base_url.starts_with("https://")
        {
            return Err(SemsearchError::config(
                "Ollama base URL must start with http:// or https://",
            ));
        }

        if self.embedding_dimension == Some(0) {
            return Err(SemsearchError::config("Embedding dimension cannot be 0"));
        }

        let positive = [
            ("EMBED_TIMEOUT_SECS", self.embed_timeout_secs as usize),
            ("EMBED_MAX_ATTEMPTS", self.embed_max_attempts as usize),
            ("EMBED_MAX_CONCURRENCY", self.embed_max_concurrency),
            ("INGEST_BATCH_SIZE", self.ingest_batch_size),
            ("CANDIDATE_FACTOR", self.candidate_factor),
            ("CANDIDATE_FLOOR", self.candidate_floor),
            ("FILTER_OVERFETCH", self.filter_overfetch),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(SemsearchError::config(format!("{} must be greater than 0", key)));
            }
        }

        if self.embed_max_delay_ms < self.embed_base_delay_ms {
            return Err(SemsearchError::config(
                "EMBED_MAX_DELAY_MS must not be smaller than EMBED_BASE_DELAY_MS",
            ));
        }

        Ok(())
    }
}
