//! Embedding providers for dense retrieval.

use crate::config::{EmbeddingProviderConfig, OllamaConfig, OpenAIConfig};
use crate::error::{Result, SemanticError};
use crate::types::{normalize, EmbeddingModel, Vector};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use unicode_segmentation::UnicodeSegmentation;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vector>;

    /// Generate embeddings for multiple texts (batched).
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the embedding model information.
    fn model(&self) -> &EmbeddingModel;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize {
        self.model().dimension
    }
}

/// Provider manager that handles fallback chains.
pub struct ProviderManager {
    primary: Box<dyn EmbeddingProvider>,
    fallbacks: Vec<Box<dyn EmbeddingProvider>>,
}

impl ProviderManager {
    pub async fn from_config(config: &EmbeddingProviderConfig) -> Result<Self> {
        let primary = Self::create_provider(&config.primary_provider, config).await?;

        let mut fallbacks = Vec::new();
        for provider_name in &config.fallback_providers {
            match Self::create_provider(provider_name, config).await {
                Ok(provider) => fallbacks.push(provider),
                Err(e) => warn!("Failed to create fallback provider {}: {}", provider_name, e),
            }
        }

        Ok(Self { primary, fallbacks })
    }

    pub fn with_providers(
        primary: Box<dyn EmbeddingProvider>,
        fallbacks: Vec<Box<dyn EmbeddingProvider>>,
    ) -> Self {
        Self { primary, fallbacks }
    }

    async fn create_provider(
        name: &str,
        config: &EmbeddingProviderConfig,
    ) -> Result<Box<dyn EmbeddingProvider>> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        match name.to_lowercase().as_str() {
            "openai" => Ok(Box::new(
                OpenAIProvider::new(config.openai.clone(), timeout).await?,
            )),
            "ollama" => Ok(Box::new(
                OllamaProvider::new(config.ollama.clone(), timeout).await?,
            )),
            "mock" => Ok(Box::new(MockProvider::new(config.mock_dimension))),
            _ => Err(SemanticError::Provider(format!("Unknown provider: {}", name))),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ProviderManager {
    async fn embed(&self, text: &str) -> Result<Vector> {
        match self.primary.embed(text).await {
            Ok(embedding) => return Ok(embedding),
            Err(e) => warn!("Primary provider failed: {}", e),
        }

        for (i, fallback) in self.fallbacks.iter().enumerate() {
            match fallback.embed(text).await {
                Ok(embedding) => {
                    info!("Fallback provider {} succeeded", i);
                    return Ok(embedding);
                }
                Err(e) => warn!("Fallback provider {} failed: {}", i, e),
            }
        }

        Err(SemanticError::Provider("All providers failed".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        match self.primary.embed_batch(texts).await {
            Ok(embeddings) => return Ok(embeddings),
            Err(e) => warn!("Primary provider batch failed: {}", e),
        }

        for (i, fallback) in self.fallbacks.iter().enumerate() {
            match fallback.embed_batch(texts).await {
                Ok(embeddings) => {
                    info!("Fallback provider {} succeeded for batch", i);
                    return Ok(embeddings);
                }
                Err(e) => warn!("Fallback provider {} batch failed: {}", i, e),
            }
        }

        Err(SemanticError::Provider(
            "All providers failed for batch".to_string(),
        ))
    }

    fn model(&self) -> &EmbeddingModel {
        self.primary.model()
    }
}

/// OpenAI embedding provider.
pub struct OpenAIProvider {
    client: Client,
    config: OpenAIConfig,
    model: EmbeddingModel,
}

#[derive(Serialize)]
struct OpenAIRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIProvider {
    pub async fn new(config: OpenAIConfig, timeout: Duration) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            SemanticError::Config("OpenAI API key not configured".to_string())
        })?;

        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key)
            .parse()
            .map_err(|_| SemanticError::Config("OpenAI API key is not a valid header".to_string()))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let dimension = config.dimension.unwrap_or(match config.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        });

        let model = EmbeddingModel::new("openai", &config.model, dimension);

        info!("Initialized OpenAI provider with model: {}", config.model);

        Ok(Self {
            client,
            config,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    async fn embed(&self, text: &str) -> Result<Vector> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| SemanticError::Embedding("OpenAI returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        debug!("Generating {} embeddings with OpenAI", texts.len());

        let request = OpenAIRequest {
            input: texts.to_vec(),
            model: self.config.model.clone(),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(SemanticError::Provider(format!(
                "OpenAI API error: {}",
                error_text
            )));
        }

        let response: OpenAIResponse = response.json().await?;
        let embeddings = response
            .data
            .into_iter()
            .map(|e| e.embedding)
            .collect::<Vec<_>>();

        if embeddings.len() != texts.len() {
            return Err(SemanticError::Provider(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

/// Ollama embedding provider for local models.
pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
    model: EmbeddingModel,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

impl OllamaProvider {
    pub async fn new(config: OllamaConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let model = EmbeddingModel::ollama(&config.model, config.dimension);

        info!("Initialized Ollama provider with model: {}", config.model);

        Ok(Self {
            client,
            config,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vector> {
        debug!("Generating embedding with Ollama");

        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: text.to_string(),
        };

        let url = format!("{}/api/embeddings", self.config.endpoint);
        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(SemanticError::Provider(format!(
                "Ollama API error: {}",
                error_text
            )));
        }

        let response: OllamaResponse = response.json().await?;
        if response.embedding.len() != self.model.dimension {
            return Err(SemanticError::DimensionMismatch {
                expected: self.model.dimension,
                got: response.embedding.len(),
            });
        }
        Ok(response.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        // No batch endpoint; process sequentially
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

/// Deterministic offline provider.
///
/// Hashes lowercase words into signed buckets and normalizes, so texts that
/// share words get positive cosine similarity. Useful for tests and for
/// running without an embedding service; it has no semantic understanding.
pub struct MockProvider {
    model: EmbeddingModel,
    dimension: usize,
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            model: EmbeddingModel::new("mock", "hashed-bag-of-words", dimension),
            dimension,
        }
    }

    fn generate_embedding(&self, text: &str) -> Vector {
        let mut embedding = vec![0.0; self.dimension];
        if self.dimension == 0 {
            return embedding;
        }

        for word in text.unicode_words() {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                    (acc ^ b as u64).wrapping_mul(0x0100_0000_01b3)
                });
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        normalize(&mut embedding);
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vector> {
        Ok(self.generate_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        Ok(texts.iter().map(|t| self.generate_embedding(t)).collect())
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}
