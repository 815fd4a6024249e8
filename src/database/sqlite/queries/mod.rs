
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::database::models::{
    ChunkSource, Document, DocumentSummary, NewChunk, NewQuery, NewResponse, QueryId, QueryLog,
    StoreStats, decode_vector, encode_vector,
};
use crate::index::IndexEntry;
use crate::{ChunkId, DocumentId, Result, SemsearchError};

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, filename: &str, content: &str) -> Result<DocumentId> {
        let id = sqlx::query(
            "INSERT INTO documents (filename, content, uploaded_at) VALUES (?, ?, ?)",
        )
        .bind(filename)
        .bind(content)
        .bind(Utc::now())
        .execute(pool)
        .await
        .map_err(|e| SemsearchError::storage(format!("storing document {filename}"), e))?
        .last_insert_rowid();

        debug!("Stored document {} ({})", id, filename);
        Ok(id)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT id, filename, content, uploaded_at FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| SemsearchError::storage(format!("loading document {id}"), e))?;

        row.map(|row| -> Result<Document> {
            Ok(Document {
                id: row.try_get("id")?,
                filename: row.try_get("filename")?,
                content: row.try_get("content")?,
                uploaded_at: row.try_get("uploaded_at")?,
            })
        })
        .transpose()
    }

    #[inline]
    pub async fn exists(pool: &SqlitePool, id: DocumentId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(|e| SemsearchError::storage(format!("checking document {id}"), e))?;
        Ok(count > 0)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.filename, d.uploaded_at, LENGTH(d.content) AS size,
                   COUNT(c.id) AS chunk_count
            FROM documents d
            LEFT JOIN chunks c ON c.document_id = d.id
            GROUP BY d.id
            ORDER BY d.uploaded_at DESC, d.id DESC
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| SemsearchError::storage("listing documents", e))?;

        rows.iter()
            .map(|row| -> Result<DocumentSummary> {
                Ok(DocumentSummary {
                    id: row.try_get("id")?,
                    filename: row.try_get("filename")?,
                    uploaded_at: row.try_get("uploaded_at")?,
                    size: row.try_get("size")?,
                    chunk_count: row.try_get("chunk_count")?,
                })
            })
            .collect()
    }

    /// Delete a document; its chunks go with it. Returns whether a row existed.
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: DocumentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| SemsearchError::storage(format!("deleting document {id}"), e))?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Insert all chunks of a document in one transaction
    #[inline]
    pub async fn create_batch(
        pool: &SqlitePool,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<Vec<ChunkId>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let context = || format!("storing chunks for document {document_id}");
        let mut transaction = pool
            .begin()
            .await
            .map_err(|e| SemsearchError::storage(context(), e))?;

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id = sqlx::query(
                "INSERT INTO chunks (document_id, chunk_index, chunk_text, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(document_id)
            .bind(chunk.index)
            .bind(&chunk.text)
            .bind(encode_vector(&chunk.vector))
            .execute(&mut *transaction)
            .await
            .map_err(|e| SemsearchError::storage(context(), e))?
            .last_insert_rowid();
            ids.push(id);
        }

        transaction
            .commit()
            .await
            .map_err(|e| SemsearchError::storage(context(), e))?;

        debug!("Stored {} chunks for document {}", ids.len(), document_id);
        Ok(ids)
    }

    #[inline]
    pub async fn source(pool: &SqlitePool, chunk_id: ChunkId) -> Result<Option<ChunkSource>> {
        let row = sqlx::query(
            r#"
            SELECT c.id, c.document_id, d.filename, c.chunk_index, c.chunk_text
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| SemsearchError::storage(format!("looking up chunk {chunk_id}"), e))?;

        row.map(|row| -> Result<ChunkSource> {
            Ok(ChunkSource {
                chunk_id: row.try_get("id")?,
                document_id: row.try_get("document_id")?,
                filename: row.try_get("filename")?,
                chunk_index: row.try_get("chunk_index")?,
                text: row.try_get("chunk_text")?,
            })
        })
        .transpose()
    }

    #[inline]
    pub async fn ids_for_document(
        pool: &SqlitePool,
        document_id: DocumentId,
    ) -> Result<Vec<ChunkId>> {
        sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ? ORDER BY chunk_index")
            .bind(document_id)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                SemsearchError::storage(format!("listing chunks of document {document_id}"), e)
            })
    }

    #[inline]
    pub async fn all_vectors(pool: &SqlitePool) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query("SELECT id, embedding FROM chunks ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(|e| SemsearchError::storage("loading chunk vectors", e))?;

        rows.iter()
            .map(|row| -> Result<IndexEntry> {
                let id: ChunkId = row.try_get("id")?;
                let bytes: Vec<u8> = row.try_get("embedding")?;
                let vector = decode_vector(&bytes).ok_or_else(|| {
                    SemsearchError::IndexCorruptionDetected(format!(
                        "chunk {id} has a malformed stored embedding"
                    ))
                })?;
                Ok(IndexEntry::new(id, vector))
            })
            .collect()
    }
}

pub struct QueryLogQueries;

impl QueryLogQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, query: &NewQuery) -> Result<QueryId> {
        let id = sqlx::query(
            "INSERT INTO queries (query_text, created_at, response_time_ms) VALUES (?, ?, ?)",
        )
        .bind(&query.query_text)
        .bind(query.timestamp)
        .bind(query.response_time_ms)
        .execute(pool)
        .await
        .map_err(|e| SemsearchError::storage(format!("logging query '{}'", query.query_text), e))?
        .last_insert_rowid();

        Ok(id)
    }

    #[inline]
    pub async fn add_responses(
        pool: &SqlitePool,
        query_id: QueryId,
        responses: &[NewResponse],
    ) -> Result<()> {
        let context = || format!("logging responses for query {query_id}");
        let mut transaction = pool
            .begin()
            .await
            .map_err(|e| SemsearchError::storage(context(), e))?;

        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queries WHERE id = ?")
            .bind(query_id)
            .fetch_one(&mut *transaction)
            .await
            .map_err(|e| SemsearchError::storage(context(), e))?;
        if known == 0 {
            return Err(SemsearchError::NotFound(format!("query {query_id}")));
        }

        for response in responses {
            sqlx::query(
                "INSERT INTO responses (query_id, chunk_id, similarity_score, response_text) VALUES (?, ?, ?, ?)",
            )
            .bind(query_id)
            .bind(response.chunk_id)
            .bind(response.score)
            .bind(&response.text)
            .execute(&mut *transaction)
            .await
            .map_err(|e| SemsearchError::storage(context(), e))?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| SemsearchError::storage(context(), e))?;
        Ok(())
    }

    #[inline]
    pub async fn recent(pool: &SqlitePool, limit: usize) -> Result<Vec<QueryLog>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT q.id, q.query_text, q.created_at, q.response_time_ms,
                   COUNT(r.id) AS response_count, AVG(r.similarity_score) AS avg_score
            FROM queries q
            LEFT JOIN responses r ON r.query_id = q.id
            GROUP BY q.id
            ORDER BY q.created_at DESC, q.id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(|e| SemsearchError::storage("loading recent queries", e))?;

        rows.iter().map(query_log_from_row).collect()
    }
}

pub struct StatsQueries;

impl StatsQueries {
    #[inline]
    pub async fn collect(pool: &SqlitePool) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents) AS document_count,
                (SELECT COUNT(*) FROM chunks) AS embedding_count,
                (SELECT COUNT(*) FROM queries) AS query_count,
                (SELECT AVG(response_time_ms) FROM queries) AS avg_response_time_ms
            "#,
        )
        .fetch_one(pool)
        .await
        .map_err(|e| SemsearchError::storage("collecting statistics", e))?;

        Ok(StoreStats {
            document_count: row.try_get("document_count")?,
            embedding_count: row.try_get("embedding_count")?,
            query_count: row.try_get("query_count")?,
            avg_response_time_ms: row.try_get("avg_response_time_ms")?,
        })
    }
}

fn query_log_from_row(row: &SqliteRow) -> Result<QueryLog> {
    let timestamp: DateTime<Utc> = row.try_get("created_at")?;
    Ok(QueryLog {
        id: row.try_get("id")?,
        query_text: row.try_get("query_text")?,
        timestamp,
        response_time_ms: row.try_get("response_time_ms")?,
        response_count: row.try_get("response_count")?,
        avg_score: row.try_get("avg_score")?,
    })
}
