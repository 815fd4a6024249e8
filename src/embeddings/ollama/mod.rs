
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::client::Embedder;
use crate::config::EmbeddingConfig;
use crate::{Result, SemsearchError};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Blocking client for an Ollama-compatible embedding server.
///
/// Failures are surfaced as [`SemsearchError::EmbeddingUnavailable`] on the
/// first attempt; retry policy belongs to the caller.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    dimension: usize,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config.ollama_url()?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            dimension: config.embedding_dimension as usize,
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Test connection to the server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models()?;
        if !models.iter().any(|m| m.name == self.model) {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
            return Err(SemsearchError::embedding(
                "health check",
                format!(
                    "model '{}' is not available; available models: {:?}",
                    self.model, available
                ),
            ));
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// List all models the server can serve
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags")?;
        debug!("Fetching available models from {}", url);

        let response_text = self
            .agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| transport_error("list models", &e))?;

        let models: ModelsResponse = serde_json::from_str(&response_text)
            .map_err(|e| SemsearchError::embedding("list models", e))?;

        debug!("Found {} models", models.models.len());
        Ok(models.models)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            SemsearchError::InvalidConfiguration(format!("invalid embedding server URL: {}", e))
        })
    }

    fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("/api/embed")?;
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| SemsearchError::embedding("serialize request", e))?;

        debug!("Requesting {} embeddings from {}", texts.len(), url);

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| transport_error("embed", &e))?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| SemsearchError::embedding("parse embedding response", e))?;

        if response.embeddings.len() != texts.len() {
            return Err(SemsearchError::embedding(
                "embed",
                format!(
                    "mismatch between request and response counts: {} vs {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            ));
        }

        Ok(response.embeddings)
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts)
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn transport_error(operation: &str, error: &ureq::Error) -> SemsearchError {
    let message = match error {
        ureq::Error::StatusCode(status) => format!("server responded with HTTP {}", status),
        other => other.to_string(),
    };
    warn!("Embedding server request failed during {}: {}", operation, message);
    SemsearchError::embedding(operation, message)
}
