use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use super::{
    ChunkSource, Document, DocumentStore, DocumentSummary, NewChunk, NewQuery, NewResponse,
    QueryId, QueryLog, StoreStats,
};
use crate::index::IndexEntry;
use crate::{ChunkId, DocumentId, Result, SemsearchError};


pub mod queries;

use queries::{ChunkQueries, DocumentQueries, QueryLogQueries, StatsQueries};

pub type DbPool = Pool<Sqlite>;

/// SQLite-backed document store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(|e| SemsearchError::storage("creating database connection pool", e))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Open (creating if needed) `semsearch.db` inside a configuration directory
    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("semsearch.db")).await
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    #[inline]
    async fn store_document(&self, filename: &str, content: &str) -> Result<DocumentId> {
        DocumentQueries::create(&self.pool, filename, content).await
    }

    #[inline]
    async fn store_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<Vec<ChunkId>> {
        if !DocumentQueries::exists(&self.pool, document_id).await? {
            return Err(SemsearchError::NotFound(format!("document {document_id}")));
        }
        ChunkQueries::create_batch(&self.pool, document_id, chunks).await
    }

    #[inline]
    async fn delete_document(&self, document_id: DocumentId) -> Result<()> {
        if DocumentQueries::delete(&self.pool, document_id).await? {
            Ok(())
        } else {
            Err(SemsearchError::NotFound(format!("document {document_id}")))
        }
    }

    #[inline]
    async fn lookup_chunk_source(&self, chunk_id: ChunkId) -> Result<ChunkSource> {
        ChunkQueries::source(&self.pool, chunk_id)
            .await?
            .ok_or_else(|| SemsearchError::NotFound(format!("chunk {chunk_id}")))
    }

    #[inline]
    async fn log_query(&self, query: &NewQuery) -> Result<QueryId> {
        QueryLogQueries::create(&self.pool, query).await
    }

    #[inline]
    async fn log_responses(&self, query_id: QueryId, responses: &[NewResponse]) -> Result<()> {
        QueryLogQueries::add_responses(&self.pool, query_id, responses).await
    }

    #[inline]
    async fn stats(&self) -> Result<StoreStats> {
        StatsQueries::collect(&self.pool).await
    }

    #[inline]
    async fn get_document(&self, document_id: DocumentId) -> Result<Document> {
        DocumentQueries::get_by_id(&self.pool, document_id)
            .await?
            .ok_or_else(|| SemsearchError::NotFound(format!("document {document_id}")))
    }

    #[inline]
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        DocumentQueries::list_all(&self.pool).await
    }

    #[inline]
    async fn chunk_ids_for_document(&self, document_id: DocumentId) -> Result<Vec<ChunkId>> {
        if !DocumentQueries::exists(&self.pool, document_id).await? {
            return Err(SemsearchError::NotFound(format!("document {document_id}")));
        }
        ChunkQueries::ids_for_document(&self.pool, document_id).await
    }

    #[inline]
    async fn load_vectors(&self) -> Result<Vec<IndexEntry>> {
        ChunkQueries::all_vectors(&self.pool).await
    }

    #[inline]
    async fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLog>> {
        QueryLogQueries::recent(&self.pool, limit).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| SemsearchError::storage("vacuuming database", e))?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .map_err(|e| SemsearchError::storage("analyzing database", e))?;

        debug!("Database optimization completed");
        Ok(())
    }
}
