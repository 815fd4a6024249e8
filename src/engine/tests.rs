use super::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::database::{ChunkSource, Document, DocumentSummary, MemoryStore, QueryId, QueryLog};
use crate::embeddings::{Embedder, HashingEmbedder};
use crate::{ChunkId, SemsearchError};

/// Maps known texts to fixed vectors; everything else embeds to the origin
struct TableEmbedder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    fn new(dimension: usize, pairs: &[(&str, Vec<f32>)]) -> Self {
        Self {
            dimension,
            table: pairs
                .iter()
                .map(|(text, vector)| ((*text).to_string(), vector.clone()))
                .collect(),
        }
    }
}

impl Embedder for TableEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                self.table
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dimension])
            })
            .collect())
    }
}

struct UnreachableEmbedder;

impl Embedder for UnreachableEmbedder {
    fn dimension(&self) -> usize {
        16
    }

    fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(SemsearchError::embedding("stub", "connection refused"))
    }
}

/// Memory store whose chunk writes and deletes can be made to fail
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_chunks: AtomicBool,
    fail_delete: AtomicBool,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn store_document(&self, filename: &str, content: &str) -> Result<DocumentId> {
        self.inner.store_document(filename, content).await
    }

    async fn store_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<Vec<ChunkId>> {
        if self.fail_chunks.load(Ordering::SeqCst) {
            return Err(SemsearchError::Storage("disk full".to_string()));
        }
        self.inner.store_chunks(document_id, chunks).await
    }

    async fn delete_document(&self, document_id: DocumentId) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(SemsearchError::Storage("database is locked".to_string()));
        }
        self.inner.delete_document(document_id).await
    }

    async fn lookup_chunk_source(&self, chunk_id: ChunkId) -> Result<ChunkSource> {
        self.inner.lookup_chunk_source(chunk_id).await
    }

    async fn log_query(&self, query: &NewQuery) -> Result<QueryId> {
        self.inner.log_query(query).await
    }

    async fn log_responses(&self, query_id: QueryId, responses: &[NewResponse]) -> Result<()> {
        self.inner.log_responses(query_id, responses).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }

    async fn get_document(&self, document_id: DocumentId) -> Result<Document> {
        self.inner.get_document(document_id).await
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.inner.list_documents().await
    }

    async fn chunk_ids_for_document(&self, document_id: DocumentId) -> Result<Vec<ChunkId>> {
        self.inner.chunk_ids_for_document(document_id).await
    }

    async fn load_vectors(&self) -> Result<Vec<IndexEntry>> {
        self.inner.load_vectors().await
    }

    async fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLog>> {
        self.inner.recent_queries(limit).await
    }
}

/// Memory store that can hold its next source lookup until released
#[derive(Default)]
struct PausingStore {
    inner: MemoryStore,
    armed: AtomicBool,
    lookup_started: tokio::sync::Notify,
    resume_lookup: tokio::sync::Notify,
}

#[async_trait]
impl DocumentStore for PausingStore {
    async fn store_document(&self, filename: &str, content: &str) -> Result<DocumentId> {
        self.inner.store_document(filename, content).await
    }

    async fn store_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<Vec<ChunkId>> {
        self.inner.store_chunks(document_id, chunks).await
    }

    async fn delete_document(&self, document_id: DocumentId) -> Result<()> {
        self.inner.delete_document(document_id).await
    }

    async fn lookup_chunk_source(&self, chunk_id: ChunkId) -> Result<ChunkSource> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.lookup_started.notify_one();
            self.resume_lookup.notified().await;
        }
        self.inner.lookup_chunk_source(chunk_id).await
    }

    async fn log_query(&self, query: &NewQuery) -> Result<QueryId> {
        self.inner.log_query(query).await
    }

    async fn log_responses(&self, query_id: QueryId, responses: &[NewResponse]) -> Result<()> {
        self.inner.log_responses(query_id, responses).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }

    async fn get_document(&self, document_id: DocumentId) -> Result<Document> {
        self.inner.get_document(document_id).await
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.inner.list_documents().await
    }

    async fn chunk_ids_for_document(&self, document_id: DocumentId) -> Result<Vec<ChunkId>> {
        self.inner.chunk_ids_for_document(document_id).await
    }

    async fn load_vectors(&self) -> Result<Vec<IndexEntry>> {
        self.inner.load_vectors().await
    }

    async fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLog>> {
        self.inner.recent_queries(limit).await
    }
}

fn shared<S: DocumentStore + 'static>(store: &Arc<S>) -> Arc<dyn DocumentStore> {
    let store: Arc<S> = Arc::clone(store);
    store
}

fn small_index() -> IndexConfig {
    IndexConfig {
        cluster_count: 4,
        probe_count: 4,
        ..IndexConfig::default()
    }
}

fn engine_with(
    store: Arc<dyn DocumentStore>,
    model: Arc<dyn Embedder>,
    index_config: IndexConfig,
) -> Engine {
    let dimension = model.dimension();
    let embedder = EmbeddingClient::new(model, dimension, 8).expect("embedder");
    Engine::new(store, embedder, index_config, ChunkingConfig::default(), 5).expect("engine")
}

fn hashing_engine(store: Arc<dyn DocumentStore>) -> Engine {
    engine_with(store, Arc::new(HashingEmbedder::new(32)), small_index())
}

fn distance_engine() -> Engine {
    let model = TableEmbedder::new(
        2,
        &[
            ("near", vec![0.1, 0.0]),
            ("middle", vec![0.5, 0.0]),
            ("far", vec![0.9, 0.0]),
            ("origin", vec![0.0, 0.0]),
        ],
    );
    engine_with(Arc::new(MemoryStore::new()), Arc::new(model), small_index())
}

#[test]
fn rejects_invalid_settings() {
    let embedder =
        EmbeddingClient::new(Arc::new(HashingEmbedder::new(8)), 8, 4).expect("embedder");

    let zero_top_k = Engine::new(
        Arc::new(MemoryStore::new()),
        embedder.clone(),
        small_index(),
        ChunkingConfig::default(),
        0,
    );
    assert!(matches!(
        zero_top_k,
        Err(SemsearchError::InvalidConfiguration(_))
    ));

    let bad_chunking = Engine::new(
        Arc::new(MemoryStore::new()),
        embedder,
        small_index(),
        ChunkingConfig {
            chunk_size: 4,
            chunk_overlap: 4,
        },
        5,
    );
    assert!(matches!(
        bad_chunking,
        Err(SemsearchError::InvalidConfiguration(_))
    ));
}

#[test]
fn from_config_uses_configured_dimension() {
    let mut config = Config::default();
    config.embedding.backend = crate::config::EmbeddingBackend::Hashing;
    config.embedding.embedding_dimension = 24;

    let engine = Engine::from_config(&config, Arc::new(MemoryStore::new())).expect("engine");
    assert_eq!(engine.index().dimension(), 24);
    assert_eq!(engine.default_top_k(), config.search.default_top_k);
}

#[tokio::test]
async fn search_returns_closest_chunks_in_distance_order() {
    let engine = distance_engine();
    let far = engine.process_document("far.txt", "far", 100, 0).await.expect("far");
    let near = engine.process_document("near.txt", "near", 100, 0).await.expect("near");
    let middle = engine
        .process_document("middle.txt", "middle", 100, 0)
        .await
        .expect("middle");

    let response = engine.search("origin", 2, 4).await.expect("search");

    let documents: Vec<DocumentId> = response.results.iter().map(|r| r.document_id).collect();
    assert_eq!(documents, vec![near, middle]);
    assert!(!documents.contains(&far));
    assert_eq!(response.total_results, 2);
    assert_eq!(response.results[0].rank, 1);
    assert_eq!(response.results[1].rank, 2);
    assert!((response.results[0].score - 1.0 / 1.1).abs() < 1e-5);
    assert!((response.results[1].score - 1.0 / 1.5).abs() < 1e-5);
    assert_eq!(response.results[0].filename, "near.txt");
    assert_eq!(response.results[0].text, "near");
}

#[tokio::test]
async fn chunks_are_stored_with_overlapping_text() {
    let store = Arc::new(MemoryStore::new());
    let engine = hashing_engine(shared(&store));

    let doc = engine
        .process_document("letters.txt", "abcdefghij", 4, 1)
        .await
        .expect("process");

    let ids = store.chunk_ids_for_document(doc).await.expect("chunk ids");
    let mut texts = Vec::new();
    for id in &ids {
        let source = store.lookup_chunk_source(*id).await.expect("source");
        texts.push(source.text);
    }
    assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
    assert_eq!(engine.index().len(), 3);
}

#[tokio::test]
async fn delete_removes_every_index_entry_of_the_document() {
    let store = Arc::new(MemoryStore::new());
    let engine = hashing_engine(shared(&store));

    let keep = engine
        .process_document("keep.txt", "lorem ipsum dolor", 100, 0)
        .await
        .expect("keep");
    let doc = engine
        .process_document("five.txt", "aaaabbbbccccddddeeee", 4, 0)
        .await
        .expect("process");
    assert_eq!(engine.index().len(), 6);

    let removed = engine.delete_document(doc).await.expect("delete");
    assert_eq!(removed, 5);
    assert_eq!(engine.index().len(), 1);

    let report = engine.check_consistency().await.expect("consistency");
    assert!(report.is_consistent);
    assert!(report.orphaned_in_index.is_empty());

    let stats = engine.stats().await.expect("stats");
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.total_embeddings, 1);
    assert_eq!(stats.indexed_vectors, 1);
    assert!(store.get_document(keep).await.is_ok());
}

#[tokio::test]
async fn search_on_empty_index_returns_no_results() {
    let engine = hashing_engine(Arc::new(MemoryStore::new()));

    let response = engine.search("anything at all", 5, 2).await.expect("search");
    assert!(response.results.is_empty());
    assert_eq!(response.total_results, 0);
    assert_eq!(response.query, "anything at all");
}

#[tokio::test]
async fn deleting_unknown_document_is_not_found() {
    let engine = hashing_engine(Arc::new(MemoryStore::new()));
    assert!(matches!(
        engine.delete_document(404).await,
        Err(SemsearchError::NotFound(_))
    ));
}

#[tokio::test]
async fn search_logs_query_and_responses() {
    let store = Arc::new(MemoryStore::new());
    let engine = hashing_engine(shared(&store));
    engine
        .process_document("fruit.txt", "apples and oranges and pears", 12, 2)
        .await
        .expect("process");

    let response = engine.search("apples", 2, 4).await.expect("search");
    assert_eq!(response.results.len(), 2);

    let logs = store.recent_queries(10).await.expect("logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].id, response.query_id);
    assert_eq!(logs[0].query_text, "apples");
    assert_eq!(logs[0].response_count, 2);
    assert!(logs[0].avg_score.is_some());
    assert!(logs[0].response_time_ms.is_some());

    let stats = engine.stats().await.expect("stats");
    assert_eq!(stats.total_queries, 1);
}

#[tokio::test]
async fn unreachable_model_leaves_nothing_behind() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(shared(&store), Arc::new(UnreachableEmbedder), small_index());

    let result = engine.process_document("a.txt", "some text", 100, 0).await;
    assert!(matches!(
        result,
        Err(SemsearchError::EmbeddingUnavailable { .. })
    ));
    assert_eq!(store.stats().await.expect("stats").document_count, 0);
    assert!(engine.index().is_empty());

    assert!(matches!(
        engine.search("query", 3, 1).await,
        Err(SemsearchError::EmbeddingUnavailable { .. })
    ));
    assert_eq!(store.stats().await.expect("stats").query_count, 0);
}

#[tokio::test]
async fn failed_chunk_write_rolls_back_document() {
    let store = Arc::new(FlakyStore::default());
    let engine = hashing_engine(shared(&store));
    store.fail_chunks.store(true, Ordering::SeqCst);

    let result = engine.process_document("a.txt", "some text", 100, 0).await;
    assert!(matches!(result, Err(SemsearchError::Storage(_))));
    assert_eq!(store.stats().await.expect("stats").document_count, 0);
    assert!(engine.index().is_empty());
}

#[tokio::test]
async fn failed_storage_delete_restores_index_entries() {
    let store = Arc::new(FlakyStore::default());
    let engine = hashing_engine(shared(&store));
    let doc = engine
        .process_document("a.txt", "one two three four", 6, 1)
        .await
        .expect("process");
    let indexed = engine.index().len();
    assert!(indexed > 1);

    store.fail_delete.store(true, Ordering::SeqCst);
    let result = engine.delete_document(doc).await;
    assert!(matches!(
        result,
        Err(SemsearchError::CascadeFailed { document_id, .. }) if document_id == doc
    ));
    assert_eq!(engine.index().len(), indexed);
    assert!(
        engine
            .check_consistency()
            .await
            .expect("consistency")
            .is_consistent
    );

    store.fail_delete.store(false, Ordering::SeqCst);
    assert_eq!(engine.delete_document(doc).await.expect("delete"), indexed);
    assert!(engine.index().is_empty());
}

#[tokio::test]
async fn warm_start_loads_and_trains_from_storage() {
    let store = Arc::new(MemoryStore::new());
    let first = hashing_engine(shared(&store));
    first
        .process_document("a.txt", "the quick brown fox jumps over the lazy dog", 10, 2)
        .await
        .expect("process");
    let stored = store.stats().await.expect("stats").embedding_count as usize;

    let second = hashing_engine(shared(&store));
    assert!(second.index().is_empty());

    let loaded = second.warm_start().await.expect("warm start");
    assert_eq!(loaded, stored);
    assert_eq!(second.index().len(), stored);
    assert!(second.index().is_trained());
    assert!(
        second
            .check_consistency()
            .await
            .expect("consistency")
            .is_consistent
    );
}

#[tokio::test]
async fn warm_start_on_empty_store_is_a_no_op() {
    let engine = hashing_engine(Arc::new(MemoryStore::new()));
    assert_eq!(engine.warm_start().await.expect("warm start"), 0);
    assert!(!engine.index().is_trained());
}

#[tokio::test]
async fn rebuild_after_insert_threshold() {
    let config = IndexConfig {
        rebuild_after_inserts: Some(3),
        ..small_index()
    };
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        Arc::new(HashingEmbedder::new(16)),
        config,
    );

    engine
        .process_document("a.txt", "ab", 100, 0)
        .await
        .expect("process");
    assert!(!engine.index().is_trained());

    engine
        .process_document("b.txt", "aaaabbbbcccc", 4, 0)
        .await
        .expect("process");
    assert!(engine.index().is_trained());
    assert_eq!(engine.index().stats().inserts_since_rebuild, 0);
}

#[tokio::test]
async fn cancelled_rebuild_keeps_index_usable() {
    let engine = hashing_engine(Arc::new(MemoryStore::new()));
    engine
        .process_document("a.txt", "alpha beta gamma delta epsilon", 8, 2)
        .await
        .expect("process");

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        engine.rebuild_index_with(cancel).await,
        Err(SemsearchError::Cancelled)
    ));
    assert!(!engine.index().is_trained());

    let report = engine.rebuild_index().await.expect("rebuild");
    assert_eq!(report.entries, engine.index().len());
    assert!(engine.index().is_trained());
    assert!(!engine.search("beta", 3, 4).await.expect("search").results.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_searches_during_ingestion() {
    let engine = hashing_engine(Arc::new(MemoryStore::new()));
    engine
        .process_document("seed.txt", "rust tokio async search index", 10, 2)
        .await
        .expect("seed");

    let mut tasks = Vec::new();
    for i in 0..4 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .process_document(&format!("doc{i}.txt"), &format!("document number {i}"), 8, 1)
                .await
                .map(|_| ())
        }));
    }
    for _ in 0..8 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.search("search index", 3, 4).await.map(|_| ())
        }));
    }

    for task in tasks {
        task.await.expect("join").expect("operation");
    }

    assert_eq!(engine.stats().await.expect("stats").total_documents, 5);
    assert!(
        engine
            .check_consistency()
            .await
            .expect("consistency")
            .is_consistent
    );
}

#[tokio::test]
async fn delete_during_search_drops_the_deleted_hits() {
    let store = Arc::new(PausingStore::default());
    let engine = hashing_engine(shared(&store));
    let removed_doc = engine
        .process_document("removed.txt", "red apples grow on tall trees", 12, 2)
        .await
        .expect("process");
    let kept_doc = engine
        .process_document("kept.txt", "green pears ripen in autumn", 12, 2)
        .await
        .expect("process");

    store.armed.store(true, Ordering::SeqCst);
    let search = engine.search("red apples", 20, 4);
    let delete = async {
        store.lookup_started.notified().await;
        let removed = engine.delete_document(removed_doc).await;
        store.resume_lookup.notify_one();
        removed
    };
    let (response, removed) = tokio::join!(search, delete);

    assert!(removed.expect("delete") > 0);
    let response = response.expect("search after concurrent delete");
    assert!(!response.results.is_empty());
    for (position, result) in response.results.iter().enumerate() {
        assert_eq!(result.document_id, kept_doc);
        assert_eq!(result.rank, position + 1);
    }
    assert_eq!(response.total_results, response.results.len());
}
