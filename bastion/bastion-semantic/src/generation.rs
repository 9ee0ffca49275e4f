//! Text-generation clients and the timeout-aware call wrapper.

use crate::config::GenerationConfig;
use crate::error::{Result, SemanticError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Response text used when generation exceeded its timeout.
pub const TIMEOUT_PLACEHOLDER: &str =
    "The response took too long to generate. Showing the closest matching records instead.";

/// System prompt instructing the model to answer only from context and cite.
pub const SYSTEM_PROMPT: &str = "You answer questions using only the provided context. \
Cite every fact with the bracketed filename it came from, for example [report.pdf]. \
Never cite the overview block. If the context does not contain the answer, reply exactly: \
No relevant records found.";

/// External text-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String>;
}

/// Outcome of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Ok(String),
    Timeout,
    Failed(String),
}

impl GenerationResult {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// User prompt combining the assembled context and the question.
pub fn build_user_prompt(query: &str, context: &str) -> String {
    if context.trim().is_empty() {
        format!("Context:\n(none)\n\nQuestion: {}", query)
    } else {
        format!("Context:\n{}\n\nQuestion: {}", context, query)
    }
}

/// Call `generator` under `timeout`. A missing generator is a failure.
pub async fn generate_with_timeout(
    generator: Option<&dyn TextGenerator>,
    system: &str,
    user: &str,
    timeout: Duration,
) -> GenerationResult {
    let Some(generator) = generator else {
        return GenerationResult::Failed("no generator configured".to_string());
    };

    match tokio::time::timeout(timeout, generator.generate(system, user)).await {
        Ok(Ok(text)) => GenerationResult::Ok(text),
        Ok(Err(e)) => {
            warn!("Generation failed: {}", e);
            GenerationResult::Failed(e.to_string())
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Generation timed out");
            GenerationResult::Timeout
        }
    }
}

/// OpenAI-compatible chat completions client.
pub struct OpenAIChatGenerator {
    client: Client,
    config: GenerationConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIChatGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            let auth = format!("Bearer {}", api_key).parse().map_err(|_| {
                SemanticError::config("generation API key is not a valid header")
            })?;
            headers.insert(reqwest::header::AUTHORIZATION, auth);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()?;

        info!("Initialized chat generator with model: {}", config.model);

        Ok(Self { client, config })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }
}

#[async_trait]
impl TextGenerator for OpenAIChatGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        debug!(prompt_chars = user.len(), "Requesting chat completion");

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(SemanticError::Generation(format!(
                "Chat API error: {}",
                error_text
            )));
        }

        let response: ChatResponse = response.json().await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SemanticError::generation("chat API returned no content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Slow;

    #[async_trait]
    impl TextGenerator for Slow {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl TextGenerator for Broken {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
            Err(SemanticError::generation("503"))
        }
    }

    #[tokio::test]
    async fn test_generation_outcomes() {
        let timeout = Duration::from_millis(50);

        let ok = generate_with_timeout(Some(&Fixed("hi")), "s", "u", timeout).await;
        assert_eq!(ok, GenerationResult::Ok("hi".to_string()));

        let slow = generate_with_timeout(Some(&Slow), "s", "u", timeout).await;
        assert!(slow.is_timeout());

        let broken = generate_with_timeout(Some(&Broken), "s", "u", timeout).await;
        assert!(matches!(broken, GenerationResult::Failed(reason) if reason.contains("503")));

        let missing = generate_with_timeout(None, "s", "u", timeout).await;
        assert!(matches!(missing, GenerationResult::Failed(_)));
    }

    #[test]
    fn test_user_prompt() {
        assert!(build_user_prompt("q?", "").contains("(none)"));
        let prompt = build_user_prompt("q?", "[a.txt]\nx");
        assert!(prompt.starts_with("Context:\n[a.txt]\nx"));
        assert!(prompt.ends_with("Question: q?"));
    }

    #[test]
    fn test_generator_builds_without_key() {
        let generator = OpenAIChatGenerator::new(GenerationConfig::default()).unwrap();
        assert_eq!(generator.timeout(), Duration::from_secs(60));
    }
}
