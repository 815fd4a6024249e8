#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{
    ChunkSource, Document, DocumentStore, DocumentSummary, NewChunk, NewQuery, NewResponse,
    QueryId, QueryLog, StoreStats,
};
use crate::index::IndexEntry;
use crate::{ChunkId, DocumentId, Result, SemsearchError};

#[derive(Debug, Clone)]
struct StoredChunk {
    document_id: DocumentId,
    index: i64,
    text: String,
    vector: Vec<f32>,
}

#[derive(Debug, Clone)]
struct StoredResponse {
    query_id: QueryId,
    score: f32,
}

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<DocumentId, Document>,
    chunks: BTreeMap<ChunkId, StoredChunk>,
    queries: BTreeMap<QueryId, NewQuery>,
    responses: Vec<StoredResponse>,
    next_document_id: DocumentId,
    next_chunk_id: ChunkId,
    next_query_id: QueryId,
}

/// Process-local store with the same semantics as the SQLite backend.
/// Ids are never reused, even after deletion.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    #[inline]
    async fn store_document(&self, filename: &str, content: &str) -> Result<DocumentId> {
        let mut state = self.state.lock();
        state.next_document_id += 1;
        let id = state.next_document_id;
        state.documents.insert(
            id,
            Document {
                id,
                filename: filename.to_string(),
                content: content.to_string(),
                uploaded_at: Utc::now(),
            },
        );
        Ok(id)
    }

    #[inline]
    async fn store_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<Vec<ChunkId>> {
        let mut state = self.state.lock();
        if !state.documents.contains_key(&document_id) {
            return Err(SemsearchError::NotFound(format!("document {document_id}")));
        }

        let taken = state
            .chunks
            .values()
            .any(|c| c.document_id == document_id && chunks.iter().any(|n| n.index == c.index));
        if taken {
            return Err(SemsearchError::Storage(format!(
                "duplicate chunk index for document {document_id}"
            )));
        }

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            state.next_chunk_id += 1;
            let id = state.next_chunk_id;
            state.chunks.insert(
                id,
                StoredChunk {
                    document_id,
                    index: chunk.index,
                    text: chunk.text.clone(),
                    vector: chunk.vector.clone(),
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    #[inline]
    async fn delete_document(&self, document_id: DocumentId) -> Result<()> {
        let mut state = self.state.lock();
        if state.documents.remove(&document_id).is_none() {
            return Err(SemsearchError::NotFound(format!("document {document_id}")));
        }
        state.chunks.retain(|_, chunk| chunk.document_id != document_id);
        Ok(())
    }

    #[inline]
    async fn lookup_chunk_source(&self, chunk_id: ChunkId) -> Result<ChunkSource> {
        let state = self.state.lock();
        let chunk = state
            .chunks
            .get(&chunk_id)
            .ok_or_else(|| SemsearchError::NotFound(format!("chunk {chunk_id}")))?;
        let document = state.documents.get(&chunk.document_id).ok_or_else(|| {
            SemsearchError::NotFound(format!("document {}", chunk.document_id))
        })?;

        Ok(ChunkSource {
            chunk_id,
            document_id: chunk.document_id,
            filename: document.filename.clone(),
            chunk_index: chunk.index,
            text: chunk.text.clone(),
        })
    }

    #[inline]
    async fn log_query(&self, query: &NewQuery) -> Result<QueryId> {
        let mut state = self.state.lock();
        state.next_query_id += 1;
        let id = state.next_query_id;
        state.queries.insert(id, query.clone());
        Ok(id)
    }

    #[inline]
    async fn log_responses(&self, query_id: QueryId, responses: &[NewResponse]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.queries.contains_key(&query_id) {
            return Err(SemsearchError::NotFound(format!("query {query_id}")));
        }
        state
            .responses
            .extend(responses.iter().map(|response| StoredResponse {
                query_id,
                score: response.score,
            }));
        Ok(())
    }

    #[inline]
    async fn stats(&self) -> Result<StoreStats> {
        let state = self.state.lock();
        let timings: Vec<i64> = state
            .queries
            .values()
            .filter_map(|query| query.response_time_ms)
            .collect();
        let avg_response_time_ms = if timings.is_empty() {
            None
        } else {
            Some(timings.iter().sum::<i64>() as f64 / timings.len() as f64)
        };

        Ok(StoreStats {
            document_count: state.documents.len() as i64,
            embedding_count: state.chunks.len() as i64,
            query_count: state.queries.len() as i64,
            avg_response_time_ms,
        })
    }

    #[inline]
    async fn get_document(&self, document_id: DocumentId) -> Result<Document> {
        self.state
            .lock()
            .documents
            .get(&document_id)
            .cloned()
            .ok_or_else(|| SemsearchError::NotFound(format!("document {document_id}")))
    }

    #[inline]
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let state = self.state.lock();
        let mut summaries: Vec<DocumentSummary> = state
            .documents
            .values()
            .map(|document| DocumentSummary {
                id: document.id,
                filename: document.filename.clone(),
                uploaded_at: document.uploaded_at,
                size: document.content.chars().count() as i64,
                chunk_count: state
                    .chunks
                    .values()
                    .filter(|chunk| chunk.document_id == document.id)
                    .count() as i64,
            })
            .collect();
        summaries.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(b.id.cmp(&a.id)));
        Ok(summaries)
    }

    #[inline]
    async fn chunk_ids_for_document(&self, document_id: DocumentId) -> Result<Vec<ChunkId>> {
        let state = self.state.lock();
        if !state.documents.contains_key(&document_id) {
            return Err(SemsearchError::NotFound(format!("document {document_id}")));
        }
        let mut chunks: Vec<(i64, ChunkId)> = state
            .chunks
            .iter()
            .filter(|(_, chunk)| chunk.document_id == document_id)
            .map(|(id, chunk)| (chunk.index, *id))
            .collect();
        chunks.sort_unstable();
        Ok(chunks.into_iter().map(|(_, id)| id).collect())
    }

    #[inline]
    async fn load_vectors(&self) -> Result<Vec<IndexEntry>> {
        Ok(self
            .state
            .lock()
            .chunks
            .iter()
            .map(|(id, chunk)| IndexEntry::new(*id, chunk.vector.clone()))
            .collect())
    }

    #[inline]
    async fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLog>> {
        let state = self.state.lock();
        let mut logs: Vec<QueryLog> = state
            .queries
            .iter()
            .map(|(id, query)| {
                let scores: Vec<f64> = state
                    .responses
                    .iter()
                    .filter(|response| response.query_id == *id)
                    .map(|response| f64::from(response.score))
                    .collect();
                QueryLog {
                    id: *id,
                    query_text: query.query_text.clone(),
                    timestamp: query.timestamp,
                    response_time_ms: query.response_time_ms,
                    response_count: scores.len() as i64,
                    avg_score: if scores.is_empty() {
                        None
                    } else {
                        Some(scores.iter().sum::<f64>() / scores.len() as f64)
                    },
                }
            })
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        logs.truncate(limit);
        Ok(logs)
    }
}
