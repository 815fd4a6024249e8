// Storage for documents, chunks with their vectors, and the query log.
// SQLite is the durable backend; the in-memory store backs tests and dry runs.

pub mod memory;
pub mod models;
pub mod sqlite;

pub use memory::MemoryStore;
pub use models::*;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::index::IndexEntry;
use crate::{ChunkId, DocumentId, Result};

/// Durable storage consumed by the search engine.
///
/// Lookups of missing rows fail with [`crate::SemsearchError::NotFound`].
/// Deleting a document removes its chunks with it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn store_document(&self, filename: &str, content: &str) -> Result<DocumentId>;

    /// Persist a document's chunks, returning their ids in input order
    async fn store_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<Vec<ChunkId>>;

    async fn delete_document(&self, document_id: DocumentId) -> Result<()>;

    async fn lookup_chunk_source(&self, chunk_id: ChunkId) -> Result<ChunkSource>;

    async fn log_query(&self, query: &NewQuery) -> Result<QueryId>;

    async fn log_responses(&self, query_id: QueryId, responses: &[NewResponse]) -> Result<()>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn get_document(&self, document_id: DocumentId) -> Result<Document>;

    /// All documents, most recently uploaded first
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// Chunk ids belonging to a document, in chunk order
    async fn chunk_ids_for_document(&self, document_id: DocumentId) -> Result<Vec<ChunkId>>;

    /// Every stored chunk vector, for warming up the index
    async fn load_vectors(&self) -> Result<Vec<IndexEntry>>;

    /// The most recent queries, newest first
    async fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLog>>;

    /// Reclaim space left behind by deletions
    async fn optimize(&self) -> Result<()> {
        Ok(())
    }
}
