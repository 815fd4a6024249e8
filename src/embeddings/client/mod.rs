
use std::sync::Arc;
use tracing::debug;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::embeddings::{HashingEmbedder, OllamaClient};
use crate::{Result, SemsearchError};

/// Capability interface over an embedding model.
///
/// Implementations return one vector per input text, in input order. Errors
/// are reported as [`SemsearchError::EmbeddingUnavailable`]; implementations
/// must not retry on their own.
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this model produces
    fn dimension(&self) -> usize;

    /// Embed a batch of texts
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_many(&[text.to_string()])?
            .pop()
            .ok_or_else(|| SemsearchError::embedding("single text", "model returned no vectors"))
    }
}

/// Batching adapter that checks model output against the configured dimension
#[derive(Clone)]
pub struct EmbeddingClient {
    model: Arc<dyn Embedder>,
    dimension: usize,
    batch_size: usize,
}

impl std::fmt::Debug for EmbeddingClient {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl EmbeddingClient {
    /// Wrap a model, failing if it disagrees with the configured dimension
    #[inline]
    pub fn new(model: Arc<dyn Embedder>, dimension: usize, batch_size: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(SemsearchError::InvalidConfiguration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        if batch_size == 0 {
            return Err(SemsearchError::InvalidConfiguration(
                "embedding batch size must be greater than zero".to_string(),
            ));
        }

        if model.dimension() != dimension {
            return Err(SemsearchError::InvalidConfiguration(format!(
                "embedding model produces {}-dimensional vectors but {} is configured",
                model.dimension(),
                dimension
            )));
        }

        Ok(Self {
            model,
            dimension,
            batch_size,
        })
    }

    /// Build the configured backend and wrap it
    #[inline]
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let dimension = config.embedding_dimension as usize;
        let model: Arc<dyn Embedder> = match config.backend {
            EmbeddingBackend::Ollama => Arc::new(OllamaClient::new(config)?),
            EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(dimension)),
        };
        debug!("Using {:?} embedding backend", config.backend);
        Self::new(model, dimension, config.batch_size as usize)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed texts in batches of `batch_size`, preserving order and length.
    ///
    /// `context` names the document or query the texts belong to and is
    /// attached to any backend failure.
    #[inline]
    pub fn embed_many(&self, texts: &[String], context: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts for {} in batches of {}",
            texts.len(),
            context,
            self.batch_size
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_number, batch) in texts.chunks(self.batch_size).enumerate() {
            let batch_vectors = self
                .model
                .embed_many(batch)
                .map_err(|e| wrap_backend_error(e, context, batch_number))?;

            if batch_vectors.len() != batch.len() {
                return Err(SemsearchError::embedding(
                    context,
                    format!(
                        "model returned {} vectors for {} texts",
                        batch_vectors.len(),
                        batch.len()
                    ),
                ));
            }

            for vector in &batch_vectors {
                self.check_dimension(vector)?;
            }
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }

    /// Embed a single text such as a search query
    #[inline]
    pub fn embed_one(&self, text: &str, context: &str) -> Result<Vec<f32>> {
        let vector = self
            .model
            .embed_one(text)
            .map_err(|e| wrap_backend_error(e, context, 0))?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension {
            return Ok(());
        }

        Err(SemsearchError::InvalidConfiguration(format!(
            "embedding model returned a {}-dimensional vector but {} is configured",
            vector.len(),
            self.dimension
        )))
    }
}

fn wrap_backend_error(error: SemsearchError, context: &str, batch_number: usize) -> SemsearchError {
    match error {
        SemsearchError::EmbeddingUnavailable {
            context: inner,
            message,
        } => SemsearchError::EmbeddingUnavailable {
            context: format!("{} (batch {}, {})", context, batch_number, inner),
            message,
        },
        SemsearchError::InvalidConfiguration(message) => {
            SemsearchError::InvalidConfiguration(message)
        }
        other => SemsearchError::embedding(format!("{} (batch {})", context, batch_number), other),
    }
}
