// Consistency validation between storage and the vector index


use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, info, warn};

use crate::database::DocumentStore;
use crate::index::VectorIndex;
use crate::{ChunkId, DocumentId, Result, SemsearchError};

/// Result of comparing stored chunks with indexed vectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of chunks in storage
    pub stored_chunks: usize,
    /// Number of vectors in the index
    pub indexed_vectors: usize,
    /// Chunk ids stored but not indexed
    pub missing_from_index: Vec<ChunkId>,
    /// Chunk ids indexed with no stored chunk
    pub orphaned_in_index: Vec<ChunkId>,
    /// Documents with at least one unindexed chunk
    pub inconsistent_documents: Vec<DocumentConsistencyIssue>,
    /// Overall consistency status
    pub is_consistent: bool,
}

/// Consistency issue for a specific document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentConsistencyIssue {
    pub document_id: DocumentId,
    pub filename: String,
    pub stored_chunks: usize,
    pub indexed_vectors: usize,
    pub missing_from_index: Vec<ChunkId>,
}

/// Compares storage with the index and repairs differences on request
pub struct ConsistencyValidator<'a> {
    store: &'a dyn DocumentStore,
    index: &'a VectorIndex,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(store: &'a dyn DocumentStore, index: &'a VectorIndex) -> Self {
        Self { store, index }
    }

    /// Check the index's internal bookkeeping, then compare it with storage.
    ///
    /// Broken internal bookkeeping is returned as an
    /// [`SemsearchError::IndexCorruptionDetected`] error; mismatches with
    /// storage are reported in the returned report.
    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        info!("Starting storage and index consistency validation");

        self.index.verify()?;

        let stored = self.stored_chunks_by_document().await?;
        let stored_ids: BTreeSet<ChunkId> = stored
            .values()
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        debug!("Found {} chunks in storage", stored_ids.len());

        let indexed_ids: BTreeSet<ChunkId> = self.index.chunk_ids().into_iter().collect();
        debug!("Found {} vectors in the index", indexed_ids.len());

        let missing_from_index: Vec<ChunkId> =
            stored_ids.difference(&indexed_ids).copied().collect();
        let orphaned_in_index: Vec<ChunkId> =
            indexed_ids.difference(&stored_ids).copied().collect();

        let inconsistent_documents = Self::check_document_consistency(&stored, &indexed_ids);

        let is_consistent = missing_from_index.is_empty()
            && orphaned_in_index.is_empty()
            && inconsistent_documents.is_empty();

        let report = ConsistencyReport {
            stored_chunks: stored_ids.len(),
            indexed_vectors: indexed_ids.len(),
            missing_from_index,
            orphaned_in_index,
            inconsistent_documents,
            is_consistent,
        };

        if report.is_consistent {
            info!("Consistency validation passed");
        } else {
            warn!("Consistency validation found issues");
            Self::log_consistency_issues(&report);
        }

        Ok(report)
    }

    /// Drop index entries whose chunks no longer exist in storage
    #[inline]
    pub fn remove_orphans(&self, chunk_ids: &[ChunkId]) -> usize {
        if chunk_ids.is_empty() {
            return 0;
        }

        let removed = self.index.remove(chunk_ids).len();
        info!("Removed {} orphaned vectors from the index", removed);
        removed
    }

    /// Re-index stored chunks that the index is missing, using their stored vectors
    #[inline]
    pub async fn restore_missing(&self, chunk_ids: &[ChunkId]) -> Result<usize> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let wanted: BTreeSet<ChunkId> = chunk_ids.iter().copied().collect();
        let entries: Vec<_> = self
            .store
            .load_vectors()
            .await?
            .into_iter()
            .filter(|entry| wanted.contains(&entry.chunk_id))
            .collect();

        let restored = entries.len();
        if restored < wanted.len() {
            warn!(
                "{} of {} missing chunks have no stored vector",
                wanted.len() - restored,
                wanted.len()
            );
        }

        self.index.insert(entries).map_err(|e| {
            error!("Failed to restore missing vectors: {}", e);
            e
        })?;

        info!("Restored {} vectors into the index", restored);
        Ok(restored)
    }

    async fn stored_chunks_by_document(
        &self,
    ) -> Result<HashMap<DocumentId, (String, Vec<ChunkId>)>> {
        let documents = self.store.list_documents().await?;
        let mut by_document = HashMap::with_capacity(documents.len());

        for document in documents {
            let ids = match self.store.chunk_ids_for_document(document.id).await {
                Ok(ids) => ids,
                // Deleted since it was listed
                Err(SemsearchError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            by_document.insert(document.id, (document.filename, ids));
        }

        Ok(by_document)
    }

    fn check_document_consistency(
        stored: &HashMap<DocumentId, (String, Vec<ChunkId>)>,
        indexed_ids: &BTreeSet<ChunkId>,
    ) -> Vec<DocumentConsistencyIssue> {
        let mut issues: Vec<DocumentConsistencyIssue> = stored
            .iter()
            .filter_map(|(&document_id, (filename, ids))| {
                let missing_from_index: Vec<ChunkId> = ids
                    .iter()
                    .copied()
                    .filter(|id| !indexed_ids.contains(id))
                    .collect();

                (!missing_from_index.is_empty()).then(|| DocumentConsistencyIssue {
                    document_id,
                    filename: filename.clone(),
                    stored_chunks: ids.len(),
                    indexed_vectors: ids.len() - missing_from_index.len(),
                    missing_from_index,
                })
            })
            .collect();

        issues.sort_by_key(|issue| issue.document_id);
        issues
    }

    fn log_consistency_issues(report: &ConsistencyReport) {
        if !report.missing_from_index.is_empty() {
            warn!(
                "Found {} stored chunks missing from the index",
                report.missing_from_index.len()
            );
        }

        if !report.orphaned_in_index.is_empty() {
            warn!(
                "Found {} orphaned vectors in the index",
                report.orphaned_in_index.len()
            );
        }

        for issue in &report.inconsistent_documents {
            warn!(
                "Document {} ({}) has consistency issues: {} stored chunks, {} indexed vectors",
                issue.document_id, issue.filename, issue.stored_chunks, issue.indexed_vectors
            );
        }
    }
}

impl ConsistencyReport {
    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is consistent: {} chunks in storage, {} vectors in the index",
                self.stored_chunks, self.indexed_vectors
            )
        } else {
            format!(
                "Inconsistencies found: {} missing from the index, {} orphaned in the index, {} documents with issues; rebuild recommended",
                self.missing_from_index.len(),
                self.orphaned_in_index.len(),
                self.inconsistent_documents.len()
            )
        }
    }

    /// Get the total number of consistency issues
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_from_index.len() + self.orphaned_in_index.len()
    }

    /// Turn an inconsistent report into an `IndexCorruptionDetected` error
    #[inline]
    pub fn into_result(self) -> Result<Self> {
        if self.is_consistent {
            Ok(self)
        } else {
            Err(SemsearchError::IndexCorruptionDetected(self.summary()))
        }
    }
}
