//! Language model client abstraction
//!
//! Provides a unified interface for chat completion and text embedding:
//! - OpenAI-compatible HTTP APIs
//! - A deterministic mock for tests and single-node development
//!
//! Upstream failures surface through a retryable-vs-fatal taxonomy:
//! rate limits, timeouts and 5xx responses are `ModelUnavailable`
//! (retryable), auth failures and malformed requests are `ModelRejected`
//! (fatal).

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Trait for language model access
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a chat completion for the prompt
    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: usize) -> Result<String>;

    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the chat model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI-compatible client implementing chat completion and embeddings
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    dimension: usize,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    /// Create a new client
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        chat_model: String,
        embedding_model: String,
        dimension: usize,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            chat_model,
            embedding_model,
            dimension,
            max_retries,
        })
    }

    /// Classify an HTTP-level failure into the retryable/fatal taxonomy
    fn classify_status(status: reqwest::StatusCode, body: &str) -> AppError {
        if status.as_u16() == 429 || status.is_server_error() {
            AppError::ModelUnavailable {
                message: format!("API error {}: {}", status, body),
            }
        } else {
            AppError::ModelRejected {
                message: format!("API error {}: {}", status, body),
            }
        }
    }

    /// Run a request with exponential backoff on retryable errors
    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2_u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        op = op,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Model request failed, retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::ModelUnavailable {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn chat_once(&self, prompt: &str, temperature: f32, max_tokens: usize) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.chat_model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::ModelUnavailable {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let parsed: ChatResponse =
            response.json().await.map_err(|e| AppError::ModelRejected {
                message: format!("Failed to parse completion response: {}", e),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::ModelRejected {
                message: "Empty completion response".to_string(),
            })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            input: vec![text.to_string()],
            model: self.embedding_model.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::ModelUnavailable {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| AppError::ModelRejected {
                message: format!("Failed to parse embedding response: {}", e),
            })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::ModelRejected {
                message: "Empty embedding response".to_string(),
            })
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: usize) -> Result<String> {
        self.with_retry("complete", || self.chat_once(prompt, temperature, max_tokens))
            .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.with_retry("embed", || self.embed_once(text)).await
    }

    fn model_name(&self) -> &str {
        &self.chat_model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic mock model for tests and the `mock` provider.
///
/// Embeddings are hash-derived so repeated calls for the same text yield
/// identical vectors, which keeps cache and ranking tests stable.
pub struct MockLanguageModel {
    dimension: usize,
}

impl MockLanguageModel {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_floats(text: &str, dimension: usize) -> Vec<f32> {
        let mut values = Vec::with_capacity(dimension);
        let mut counter: u32 = 0;
        while values.len() < dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            for byte in hasher.finalize() {
                if values.len() == dimension {
                    break;
                }
                values.push(byte as f32 / 127.5 - 1.0);
            }
            counter += 1;
        }

        // Unit-normalize so cosine similarity behaves like the real thing
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str, _temperature: f32, _max_tokens: usize) -> Result<String> {
        // Classification prompts expect a bare domain name
        if prompt.contains("Respond with exactly one of") {
            return Ok("general".to_string());
        }

        if let Some(q_start) = prompt.find("Question:") {
            let question_part = &prompt[q_start..];
            if let Some(newline) = question_part.find('\n') {
                let question = question_part[9..newline].trim();
                return Ok(format!(
                    "Based on the available sources, here is an answer about {} [1].",
                    question
                ));
            }
        }

        Ok("Based on the available sources, here is the answer [1].".to_string())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::hash_floats(text, self.dimension))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create a language model client based on configuration
pub fn create_language_model(config: &crate::config::ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| AppError::Configuration {
                    message: "model.api_key required for openai provider".to_string(),
                })?;
            Ok(Arc::new(OpenAiClient::new(
                api_key,
                config.api_base.clone(),
                config.chat_model.clone(),
                config.embedding_model.clone(),
                config.dimension,
                config.timeout_secs,
                config.max_retries,
            )?))
        }
        "mock" => Ok(Arc::new(MockLanguageModel::new(config.dimension))),
        other => {
            tracing::warn!(provider = other, "Unknown model provider, using mock");
            Ok(Arc::new(MockLanguageModel::new(config.dimension)))
        }
    }
}
