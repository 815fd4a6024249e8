use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChunkId, DocumentId};

pub type QueryId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub content: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Listing row for a stored document, without its full text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    /// Length of the document text in characters
    pub size: i64,
    pub chunk_count: i64,
}

/// A chunk ready to be persisted along with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChunk {
    pub index: i64,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Where a chunk came from, for attributing search results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSource {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuery {
    pub query_text: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewResponse {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub text: String,
}

/// A logged query with a summary of the responses it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLog {
    pub id: QueryId,
    pub query_text: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: Option<i64>,
    pub response_count: i64,
    pub avg_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub document_count: i64,
    pub embedding_count: i64,
    pub query_count: i64,
    pub avg_response_time_ms: Option<f64>,
}

/// Encode a vector as little-endian `f32` bytes
#[inline]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes; `None` if the length is not a multiple of 4
#[inline]
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_bytes() {
        let vector = vec![1.5_f32, -0.25, 0.0, f32::MAX];
        let bytes = encode_vector(&vector);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_vector(&bytes), Some(vector));
        assert_eq!(decode_vector(&[0, 1, 2]), None);
    }
}
