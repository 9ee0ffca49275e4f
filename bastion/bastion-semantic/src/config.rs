//! Configuration for retrieval, generation and answer gating.

use crate::error::{Result, SemanticError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const ENV_LOG_LEVEL: &str = "BASTION_LOG_LEVEL";
pub const ENV_GENERATION_ENDPOINT: &str = "BASTION_GENERATION_ENDPOINT";
pub const ENV_GENERATION_MODEL: &str = "BASTION_GENERATION_MODEL";
pub const ENV_GENERATION_API_KEY: &str = "BASTION_GENERATION_API_KEY";
pub const ENV_GENERATION_TIMEOUT_SECONDS: &str = "BASTION_GENERATION_TIMEOUT_SECONDS";
pub const ENV_EMBEDDING_PROVIDER: &str = "BASTION_EMBEDDING_PROVIDER";
pub const ENV_TOP_K: &str = "BASTION_TOP_K";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BastionConfig {
    pub general: GeneralConfig,
    pub embedding: EmbeddingProviderConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub gate: GateConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingProviderConfig {
    /// Primary provider (openai, ollama, mock)
    pub primary_provider: String,

    /// Fallback providers in order
    pub fallback_providers: Vec<String>,

    pub openai: OpenAIConfig,

    pub ollama: OllamaConfig,

    /// Dimension of the offline hashing provider
    pub mock_dimension: usize,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            primary_provider: "mock".to_string(),
            fallback_providers: Vec::new(),
            openai: OpenAIConfig::default(),
            ollama: OllamaConfig::default(),
            mock_dimension: 384,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAIConfig {
    /// API key (can be set via OPENAI_API_KEY env var)
    pub api_key: Option<String>,

    pub model: String,

    pub endpoint: String,

    /// Dimension override
    pub dimension: Option<usize>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: "text-embedding-3-small".to_string(),
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            dimension: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Ollama server URL
    pub endpoint: String,

    pub model: String,

    pub dimension: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
        }
    }
}

/// Text-generation service configuration.
///
/// Generation is off unless `enabled` is set; setting
/// `BASTION_GENERATION_ENDPOINT` turns it on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub enabled: bool,
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_seconds: 60,
            temperature: 0.1,
            max_tokens: 1024,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Documents requested from each strategy
    pub top_k: usize,

    /// Minimum cosine similarity for dense results
    pub similarity_threshold: f32,

    /// Minimum dot-product score for sparse results
    pub sparse_threshold: f32,

    pub enable_decomposition: bool,

    pub enable_keyword_boost: bool,

    /// Ask the rewriter once when a sub-query finds nothing
    pub enable_corrective_retry: bool,

    /// Allow graph/entity strategies when the query looks complex
    pub enable_advanced: bool,

    /// Queries longer than this many tokens count as complex
    pub advanced_token_threshold: usize,

    /// Routing complexity at or above this counts as complex
    pub advanced_complexity_threshold: f64,

    /// Metadata fields the in-memory store indexes for pushdown
    pub indexed_fields: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            similarity_threshold: 0.1,
            sparse_threshold: 0.01,
            enable_decomposition: true,
            enable_keyword_boost: true,
            enable_corrective_retry: true,
            enable_advanced: true,
            advanced_token_threshold: 15,
            advanced_complexity_threshold: 0.7,
            indexed_fields: vec![
                "department".to_string(),
                "workspaceId".to_string(),
                "source".to_string(),
                "filename".to_string(),
            ],
        }
    }
}

/// Character budgets for prompt context assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub total_budget: usize,
    /// Cap for the overview block, counted inside `total_budget`
    pub global_budget: usize,
    pub per_document_cap: usize,
    pub max_documents: usize,
    pub delimiter: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            total_budget: 12_000,
            global_budget: 2_000,
            per_document_cap: 3_000,
            max_documents: 8,
            delimiter: "\n\n---\n\n".to_string(),
        }
    }
}

/// Answer gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum numbered excerpts in an extractive answer
    pub max_excerpts: usize,
    pub enable_hallucination_check: bool,
    /// Detector risk at or above this is treated as high risk
    pub hallucination_risk_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_excerpts: 5,
            enable_hallucination_check: true,
            hallucination_risk_threshold: 0.7,
        }
    }
}

/// Fallback cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of scopes remembered
    pub fallback_cache_size: u64,

    pub fallback_cache_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fallback_cache_size: 1_000,
            fallback_cache_ttl_seconds: 600,
        }
    }
}

impl BastionConfig {
    /// Load from a TOML file, apply environment overrides and validate.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SemanticError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| SemanticError::Config(format!("Failed to parse config file: {}", e)))?;

        config.merge_env_vars()?;
        config.validate()?;

        info!("Configuration loaded successfully from {}", path.display());
        Ok(config)
    }

    /// Apply `BASTION_*` environment overrides.
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Used by `merge_env_vars`.
    pub fn merge_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        debug!("Merging environment variable overrides");

        if let Some(log_level) = lookup(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", log_level);
            self.general.log_level = log_level;
        }

        if let Some(endpoint) = lookup(ENV_GENERATION_ENDPOINT) {
            debug!("Overriding generation endpoint from environment");
            self.generation.endpoint = endpoint;
            self.generation.enabled = true;
        }

        if let Some(model) = lookup(ENV_GENERATION_MODEL) {
            debug!("Overriding generation model from environment: {}", model);
            self.generation.model = model;
        }

        if let Some(api_key) = lookup(ENV_GENERATION_API_KEY) {
            debug!("Overriding generation API key from environment");
            self.generation.api_key = Some(api_key);
        }

        if let Some(timeout) = lookup(ENV_GENERATION_TIMEOUT_SECONDS) {
            self.generation.timeout_seconds = timeout.parse().map_err(|_| {
                SemanticError::Config(format!(
                    "Invalid {}: {}",
                    ENV_GENERATION_TIMEOUT_SECONDS, timeout
                ))
            })?;
        }

        if let Some(provider) = lookup(ENV_EMBEDDING_PROVIDER) {
            debug!("Overriding embedding provider from environment: {}", provider);
            self.embedding.primary_provider = provider;
        }

        if let Some(top_k) = lookup(ENV_TOP_K) {
            self.retrieval.top_k = top_k
                .parse()
                .map_err(|_| SemanticError::Config(format!("Invalid {}: {}", ENV_TOP_K, top_k)))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(SemanticError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["openai", "ollama", "mock"];
        for provider in std::iter::once(&self.embedding.primary_provider)
            .chain(self.embedding.fallback_providers.iter())
        {
            if !valid_providers.contains(&provider.to_lowercase().as_str()) {
                return Err(SemanticError::Config(format!(
                    "Unknown embedding provider '{}'. Must be one of: {}",
                    provider,
                    valid_providers.join(", ")
                )));
            }
        }

        if self.embedding.mock_dimension == 0 {
            return Err(SemanticError::config("mock_dimension must be greater than 0"));
        }

        if self.generation.timeout_seconds == 0 {
            return Err(SemanticError::config(
                "generation timeout_seconds must be greater than 0",
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(SemanticError::config("top_k must be greater than 0"));
        }

        if !(-1.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err(SemanticError::config(
                "similarity_threshold must be between -1.0 and 1.0",
            ));
        }

        if self.retrieval.sparse_threshold < 0.0 {
            return Err(SemanticError::config("sparse_threshold cannot be negative"));
        }

        if !(0.0..=1.0).contains(&self.retrieval.advanced_complexity_threshold) {
            return Err(SemanticError::config(
                "advanced_complexity_threshold must be between 0.0 and 1.0",
            ));
        }

        let context = &self.context;
        if context.total_budget == 0 || context.per_document_cap == 0 || context.max_documents == 0 {
            return Err(SemanticError::config(
                "context budgets and max_documents must be greater than 0",
            ));
        }

        if context.global_budget > context.total_budget {
            return Err(SemanticError::config(
                "global_budget cannot be greater than total_budget",
            ));
        }

        if self.gate.max_excerpts == 0 {
            return Err(SemanticError::config("max_excerpts must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.gate.hallucination_risk_threshold) {
            return Err(SemanticError::config(
                "hallucination_risk_threshold must be between 0.0 and 1.0",
            ));
        }

        if self.cache.fallback_cache_size == 0 {
            return Err(SemanticError::config(
                "fallback_cache_size must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BastionConfig::default();
        assert_eq!(config.embedding.primary_provider, "mock");
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.context.total_budget, 12_000);
        assert_eq!(config.gate.max_excerpts, 5);
        assert!(!config.generation.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialization() {
        let config = BastionConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let deserialized: BastionConfig = toml::from_str(&toml).unwrap();
        assert_eq!(
            config.embedding.primary_provider,
            deserialized.embedding.primary_provider
        );
        assert_eq!(config.context, deserialized.context);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: BastionConfig = toml::from_str(
            r#"
            [retrieval]
            top_k = 3

            [context]
            total_budget = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.sparse_threshold, 0.01);
        assert_eq!(config.context.total_budget, 500);
        assert_eq!(config.context.per_document_cap, 3_000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_LOG_LEVEL, "debug"),
            (ENV_GENERATION_ENDPOINT, "http://localhost:8080/v1/chat/completions"),
            (ENV_TOP_K, "4"),
            (ENV_EMBEDDING_PROVIDER, "ollama"),
        ]
        .into_iter()
        .collect();

        let mut config = BastionConfig::default();
        config
            .merge_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.general.log_level, "debug");
        assert!(config.generation.enabled);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.embedding.primary_provider, "ollama");
    }

    #[test]
    fn test_env_override_rejects_bad_numbers() {
        let mut config = BastionConfig::default();
        let result = config.merge_env_from(|key| (key == ENV_TOP_K).then(|| "many".to_string()));
        assert!(matches!(result, Err(SemanticError::Config(_))));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = BastionConfig::default();
        config.general.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = BastionConfig::default();
        config.context.global_budget = config.context.total_budget + 1;
        assert!(config.validate().is_err());

        let mut config = BastionConfig::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = BastionConfig::default();
        config.embedding.fallback_providers = vec!["onnx".to_string()];
        assert!(config.validate().is_err());

        let mut config = BastionConfig::default();
        config.gate.hallucination_risk_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [general]
            log_level = "warn"

            [gate]
            max_excerpts = 3
            "#
        )
        .unwrap();

        let config = BastionConfig::load_from_path(file.path()).await.unwrap();
        assert_eq!(config.gate.max_excerpts, 3);
        assert_eq!(config.retrieval.top_k, BastionConfig::default().retrieval.top_k);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = BastionConfig::load_from_path(&dir.path().join("missing.toml")).await;
        assert!(matches!(result, Err(SemanticError::Config(_))));
    }
}
