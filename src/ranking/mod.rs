
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error};

use crate::database::DocumentStore;
use crate::database::models::QueryId;
use crate::index::{Neighbor, VectorIndex};
use crate::{ChunkId, DocumentId, Result, SemsearchError};

/// A hit after scoring, before source attribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub chunk_id: ChunkId,
    pub distance: f32,
    pub score: f32,
    /// 1-based position in the result list
    pub rank: usize,
}

/// A ranked hit with the chunk text and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f32,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub query_id: QueryId,
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub response_time_ms: u64,
}

/// Map a distance onto `(0, 1]`; zero distance scores 1 and larger distances
/// score strictly lower
#[inline]
pub fn similarity(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    1.0 / (1.0 + distance.max(0.0))
}

/// Score raw hits and order them best first.
///
/// Ties on score go to the lower chunk id. A chunk appearing more than once
/// keeps only its best score. At most `top_k` hits are returned.
#[inline]
pub fn rank(hits: &[Neighbor], top_k: usize) -> Vec<RankedHit> {
    if top_k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(f32, &Neighbor)> = hits
        .iter()
        .map(|hit| (similarity(hit.distance), hit))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.chunk_id.cmp(&b.1.chunk_id)));

    let mut seen = HashSet::with_capacity(scored.len());
    scored
        .into_iter()
        .filter(|(_, hit)| seen.insert(hit.chunk_id))
        .take(top_k)
        .enumerate()
        .map(|(position, (score, hit))| RankedHit {
            chunk_id: hit.chunk_id,
            distance: hit.distance,
            score,
            rank: position + 1,
        })
        .collect()
}

/// Look up the source of every ranked hit.
///
/// A hit whose chunk has left both storage and the index was deleted while the
/// search ran; it is dropped and the remaining ranks close up. An indexed chunk
/// that storage no longer knows about means the index has drifted from storage,
/// and that is reported as corruption.
#[inline]
pub async fn attach_sources(
    store: &dyn DocumentStore,
    index: &VectorIndex,
    ranked: &[RankedHit],
) -> Result<Vec<SearchResult>> {
    let mut results = Vec::with_capacity(ranked.len());
    for hit in ranked {
        let source = match store.lookup_chunk_source(hit.chunk_id).await {
            Ok(source) => source,
            Err(SemsearchError::NotFound(_)) if !index.contains(hit.chunk_id) => {
                debug!("Chunk {} was deleted during the search", hit.chunk_id);
                continue;
            }
            Err(SemsearchError::NotFound(_)) => {
                error!(
                    "Chunk {} is indexed but missing from storage",
                    hit.chunk_id
                );
                return Err(SemsearchError::IndexCorruptionDetected(format!(
                    "chunk {} is indexed but missing from storage",
                    hit.chunk_id
                )));
            }
            Err(e) => return Err(e),
        };

        results.push(SearchResult {
            chunk_id: hit.chunk_id,
            document_id: source.document_id,
            filename: source.filename,
            chunk_index: source.chunk_index,
            text: source.text,
            score: hit.score,
            rank: results.len() + 1,
        });
    }
    Ok(results)
}
