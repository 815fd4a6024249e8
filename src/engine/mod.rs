// Engine module
// Runs the document and query pipelines over a store, an embedding model and the vector index

#[cfg(test)]
mod tests;

pub mod consistency;

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::{DocumentStore, NewChunk, NewQuery, NewResponse, StoreStats};
use crate::embeddings::{ChunkingConfig, EmbeddingClient, chunk_text};
use crate::index::{IndexConfig, IndexEntry, IndexStats, RebuildReport, VectorIndex};
use crate::ranking::{self, SearchResponse};
use crate::{DocumentId, Result, SemsearchError};

pub use consistency::{ConsistencyReport, ConsistencyValidator, DocumentConsistencyIssue};

/// Combined storage and index statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub total_documents: i64,
    pub total_embeddings: i64,
    pub total_queries: i64,
    pub avg_response_time_ms: Option<f64>,
    pub indexed_vectors: usize,
    pub clusters: usize,
    pub index_trained: bool,
}

impl EngineStats {
    fn new(store: StoreStats, index: &IndexStats) -> Self {
        Self {
            total_documents: store.document_count,
            total_embeddings: store.embedding_count,
            total_queries: store.query_count,
            avg_response_time_ms: store.avg_response_time_ms,
            indexed_vectors: index.entries,
            clusters: index.clusters,
            index_trained: index.trained,
        }
    }
}

/// The search core: owns the vector index and drives the store and model.
///
/// Cloning is cheap; clones share the same index, store and model.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn DocumentStore>,
    embedder: EmbeddingClient,
    index: Arc<VectorIndex>,
    chunking: ChunkingConfig,
    default_top_k: usize,
}

impl std::fmt::Debug for Engine {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("embedder", &self.embedder)
            .field("index", &self.index)
            .field("chunking", &self.chunking)
            .field("default_top_k", &self.default_top_k)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine with an empty index sized for the embedder's dimension
    #[inline]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: EmbeddingClient,
        index_config: IndexConfig,
        chunking: ChunkingConfig,
        default_top_k: usize,
    ) -> Result<Self> {
        chunking.validate()?;
        if default_top_k == 0 {
            return Err(SemsearchError::InvalidConfiguration(
                "default top_k must be at least 1".to_string(),
            ));
        }
        let index = VectorIndex::new(embedder.dimension(), index_config)?;

        Ok(Self {
            store,
            embedder,
            index: Arc::new(index),
            chunking,
            default_top_k,
        })
    }

    /// Create an engine from a validated configuration
    #[inline]
    pub fn from_config(config: &Config, store: Arc<dyn DocumentStore>) -> Result<Self> {
        config.validate()?;
        let embedder = EmbeddingClient::from_config(&config.embedding)?;
        Self::new(
            store,
            embedder,
            config.index,
            config.chunking,
            config.search.default_top_k,
        )
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    #[inline]
    pub fn chunking(&self) -> ChunkingConfig {
        self.chunking
    }

    #[inline]
    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Chunk, embed, store and index a document.
    ///
    /// Embedding happens before anything is written, so an unreachable model
    /// leaves no trace. If storing the chunks or indexing them fails, the
    /// document is removed from storage again.
    #[inline]
    pub async fn process_document(
        &self,
        filename: &str,
        content: &str,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<DocumentId> {
        let chunks = chunk_text(content, chunk_size, overlap)?;
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embed_texts(texts, format!("document {filename}")).await?;

        let document_id = self.store.store_document(filename, content).await?;

        let new_chunks: Vec<NewChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| NewChunk {
                index: chunk.index as i64,
                text: chunk.text,
                vector,
            })
            .collect();

        let chunk_ids = match self.store.store_chunks(document_id, &new_chunks).await {
            Ok(ids) => ids,
            Err(e) => {
                self.roll_back_document(document_id).await;
                return Err(e);
            }
        };

        let entries: Vec<IndexEntry> = chunk_ids
            .iter()
            .zip(new_chunks)
            .map(|(&chunk_id, chunk)| IndexEntry::new(chunk_id, chunk.vector))
            .collect();
        if let Err(e) = self.index.insert(entries) {
            self.roll_back_document(document_id).await;
            return Err(e);
        }

        info!(
            "Processed document {} ({}) into {} chunks",
            document_id,
            filename,
            chunk_ids.len()
        );

        self.rebuild_if_due().await;
        Ok(document_id)
    }

    /// [`Engine::process_document`] with the configured chunk size and overlap
    #[inline]
    pub async fn process_document_default(
        &self,
        filename: &str,
        content: &str,
    ) -> Result<DocumentId> {
        self.process_document(
            filename,
            content,
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        )
        .await
    }

    /// Embed the query, search the index, rank and attribute the hits, and log
    /// the query with its responses.
    #[inline]
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        probe_count: usize,
    ) -> Result<SearchResponse> {
        let started = Instant::now();

        let vector = self.embed_query(query).await?;
        let hits = self.index.search(&vector, top_k, probe_count)?;
        let ranked = ranking::rank(&hits, top_k);
        let results = ranking::attach_sources(self.store.as_ref(), &self.index, &ranked).await?;

        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let query_id = self
            .store
            .log_query(&NewQuery {
                query_text: query.to_string(),
                timestamp: Utc::now(),
                response_time_ms: i64::try_from(response_time_ms).ok(),
            })
            .await?;

        let responses: Vec<NewResponse> = results
            .iter()
            .map(|result| NewResponse {
                chunk_id: result.chunk_id,
                score: result.score,
                text: result.text.clone(),
            })
            .collect();
        self.store.log_responses(query_id, &responses).await?;

        debug!(
            "Query {} returned {} results in {}ms",
            query_id,
            results.len(),
            response_time_ms
        );

        Ok(SearchResponse {
            query: query.to_string(),
            query_id,
            total_results: results.len(),
            results,
            response_time_ms,
        })
    }

    /// [`Engine::search`] with the configured top_k and probe count
    #[inline]
    pub async fn search_default(&self, query: &str) -> Result<SearchResponse> {
        self.search(query, self.default_top_k, self.index.config().probe_count)
            .await
    }

    /// Delete a document with all of its chunks and index entries.
    ///
    /// Index entries are removed first so no search can return them once
    /// storage starts deleting. If storage then fails, the entries are put
    /// back and `CascadeFailed` is returned. Returns the number of index
    /// entries removed.
    #[inline]
    pub async fn delete_document(&self, document_id: DocumentId) -> Result<usize> {
        let chunk_ids = self.store.chunk_ids_for_document(document_id).await?;
        let removed = self.index.remove(&chunk_ids);
        let removed_count = removed.len();

        if removed_count != chunk_ids.len() {
            warn!(
                "Document {} has {} chunks but only {} were indexed",
                document_id,
                chunk_ids.len(),
                removed_count
            );
        }

        match self.store.delete_document(document_id).await {
            Ok(()) => {
                info!(
                    "Deleted document {} and {} index entries",
                    document_id, removed_count
                );
                Ok(removed_count)
            }
            Err(e @ SemsearchError::NotFound(_)) => Err(e),
            Err(e) => {
                error!("Failed to delete document {}: {}", document_id, e);
                match self.index.insert(removed) {
                    Ok(()) => Err(SemsearchError::CascadeFailed {
                        document_id,
                        message: format!("storage delete failed, index entries restored: {e}"),
                    }),
                    Err(restore) => Err(SemsearchError::IndexCorruptionDetected(format!(
                        "document {document_id} could not be deleted ({e}) and its index entries could not be restored ({restore})"
                    ))),
                }
            }
        }
    }

    /// Re-cluster every indexed vector
    #[inline]
    pub async fn rebuild_index(&self) -> Result<RebuildReport> {
        self.rebuild_index_with(CancellationToken::new()).await
    }

    /// Re-cluster every indexed vector, giving up early if `cancel` fires
    #[inline]
    pub async fn rebuild_index_with(&self, cancel: CancellationToken) -> Result<RebuildReport> {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.rebuild(&cancel))
            .await
            .map_err(|e| SemsearchError::Other(anyhow::anyhow!("rebuild task failed: {e}")))?
    }

    /// Load every stored vector into the index and train it
    #[inline]
    pub async fn warm_start(&self) -> Result<usize> {
        let entries = self.store.load_vectors().await?;
        let count = entries.len();
        self.index.insert(entries)?;

        if count > 0 {
            self.rebuild_index().await?;
        }
        info!("Loaded {} vectors from storage", count);
        Ok(count)
    }

    #[inline]
    pub async fn stats(&self) -> Result<EngineStats> {
        let store = self.store.stats().await?;
        Ok(EngineStats::new(store, &self.index.stats()))
    }

    /// Compare storage with the index; see [`ConsistencyValidator`]
    #[inline]
    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        ConsistencyValidator::new(self.store.as_ref(), &self.index)
            .validate_consistency()
            .await
    }

    async fn embed_texts(&self, texts: Vec<String>, context: String) -> Result<Vec<Vec<f32>>> {
        let embedder = self.embedder.clone();
        tokio::task::spawn_blocking(move || embedder.embed_many(&texts, &context))
            .await
            .map_err(|e| SemsearchError::embedding("embedding task", e))?
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = self.embedder.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || {
            embedder.embed_one(&query, &format!("query '{query}'"))
        })
        .await
        .map_err(|e| SemsearchError::embedding("embedding task", e))?
    }

    async fn roll_back_document(&self, document_id: DocumentId) {
        if let Err(e) = self.store.delete_document(document_id).await {
            error!(
                "Failed to roll back document {} after a processing error: {}",
                document_id, e
            );
        }
    }

    async fn rebuild_if_due(&self) {
        if !self.index.needs_rebuild() {
            return;
        }

        debug!("Insert threshold reached, rebuilding index");
        if let Err(e) = self.rebuild_index().await {
            warn!("Automatic index rebuild failed: {}", e);
        }
    }
}
