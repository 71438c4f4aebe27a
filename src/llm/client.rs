//! HTTP surface for the external LLM/embedding service. Deliberately thin:
//! this crate treats the model itself as an external collaborator (§1 of
//! the dispatcher spec) and only needs two primitives, completion and
//! embedding, shaped after the Ollama `/api/generate` and `/api/embeddings`
//! endpoints the configuration defaults (`llm_host`, `embedding_host`)
//! imply.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::DispatchError;

/// Abstracts away the concrete HTTP transport so the router tiers and the
/// LLM agent can be exercised in tests against a canned implementation
/// without a live model server.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, prompt: &str, fast: bool) -> Result<String, DispatchError>;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DispatchError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Concrete HTTP client, one shared `reqwest::Client` reused for both
/// completion and embedding calls (they're usually the same Ollama-style
/// host, just different routes).
pub struct HttpLlmClient {
    http: reqwest::Client,
    llm_host: String,
    llm_model: String,
    llm_fast_model: String,
    llm_temperature: f64,
    embedding_host: String,
    embedding_model: String,
}

impl HttpLlmClient {
    pub fn new(config: &Config) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(config.llm_timeout)
            .build()
            .map_err(|e| DispatchError::Configuration(format!("building llm http client: {e}")))?;
        Ok(Self {
            http,
            llm_host: config.llm_host.clone(),
            llm_model: config.llm_model.clone(),
            llm_fast_model: config.llm_fast_model.clone(),
            llm_temperature: config.llm_temperature,
            embedding_host: config.embedding_host.clone(),
            embedding_model: config.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl LlmBackend for HttpLlmClient {
    async fn complete(&self, prompt: &str, fast: bool) -> Result<String, DispatchError> {
        let model = if fast { &self.llm_fast_model } else { &self.llm_model };
        let url = format!("{}/api/generate", self.llm_host.trim_end_matches('/'));
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.llm_temperature,
            },
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport {
                backend: "llm".to_string(),
                tool: "complete".to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let raw = response.text().await.unwrap_or_default();
            return Err(DispatchError::Backend {
                raw_error: raw,
                status_code: Some(status),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Transport {
                backend: "llm".to_string(),
                tool: "complete".to_string(),
                message: format!("invalid completion response: {e}"),
            })?;
        Ok(parsed.response)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, DispatchError> {
        let url = format!("{}/api/embeddings", self.embedding_host.trim_end_matches('/'));
        let body = EmbedRequest {
            model: &self.embedding_model,
            prompt: text,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport {
                backend: "embedding".to_string(),
                tool: "embed".to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let raw = response.text().await.unwrap_or_default();
            return Err(DispatchError::Backend {
                raw_error: raw,
                status_code: Some(status),
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Transport {
                backend: "embedding".to_string(),
                tool: "embed".to_string(),
                message: format!("invalid embedding response: {e}"),
            })?;
        Ok(parsed.embedding)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned backend for router/agent unit tests: exact-text embedding
    /// lookups plus a queue of scripted completions.
    pub struct FakeLlmBackend {
        pub embeddings: HashMap<String, Vec<f32>>,
        pub completions: Mutex<Vec<String>>,
    }

    impl FakeLlmBackend {
        pub fn new() -> Self {
            Self {
                embeddings: HashMap::new(),
                completions: Mutex::new(Vec::new()),
            }
        }

        pub fn with_embedding(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.embeddings.insert(text.to_string(), vector);
            self
        }

        pub fn with_completion(self, text: &str) -> Self {
            self.completions.lock().unwrap().push(text.to_string());
            self
        }
    }

    #[async_trait]
    impl LlmBackend for FakeLlmBackend {
        async fn complete(&self, _prompt: &str, _fast: bool) -> Result<String, DispatchError> {
            let mut queue = self.completions.lock().unwrap();
            if queue.is_empty() {
                return Ok("[]".to_string());
            }
            Ok(queue.remove(0))
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, DispatchError> {
            Ok(self
                .embeddings
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0, 0.0, 0.0, 1.0]))
        }
    }
}
