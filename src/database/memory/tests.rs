use super::*;

fn chunk(index: i64, text: &str) -> NewChunk {
    NewChunk {
        index,
        text: text.to_string(),
        vector: vec![index as f32, 1.0],
    }
}

#[tokio::test]
async fn documents_and_chunks() {
    let store = MemoryStore::new();
    let doc = store
        .store_document("notes.txt", "hello world")
        .await
        .expect("store document");

    let ids = store
        .store_chunks(doc, &[chunk(0, "hello"), chunk(1, "world")])
        .await
        .expect("store chunks");
    assert_eq!(ids.len(), 2);
    assert!(ids[0] < ids[1]);

    let source = store.lookup_chunk_source(ids[1]).await.expect("lookup");
    assert_eq!(source.document_id, doc);
    assert_eq!(source.filename, "notes.txt");
    assert_eq!(source.chunk_index, 1);
    assert_eq!(source.text, "world");

    assert_eq!(
        store.chunk_ids_for_document(doc).await.expect("chunk ids"),
        ids
    );
    assert_eq!(store.load_vectors().await.expect("vectors").len(), 2);

    let document = store.get_document(doc).await.expect("document");
    assert_eq!(document.content, "hello world");
}

#[tokio::test]
async fn chunks_require_existing_document() {
    let store = MemoryStore::new();
    let result = store.store_chunks(42, &[chunk(0, "orphan")]).await;
    assert!(matches!(result, Err(SemsearchError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_chunk_index_is_rejected() {
    let store = MemoryStore::new();
    let doc = store.store_document("a", "abc").await.expect("store");
    store
        .store_chunks(doc, &[chunk(0, "a")])
        .await
        .expect("first chunk");

    assert!(store.store_chunks(doc, &[chunk(0, "b")]).await.is_err());
    assert_eq!(store.stats().await.expect("stats").embedding_count, 1);
}

#[tokio::test]
async fn delete_cascades_to_chunks() {
    let store = MemoryStore::new();
    let keep = store.store_document("keep", "k").await.expect("store");
    let drop_me = store.store_document("drop", "d").await.expect("store");
    store
        .store_chunks(keep, &[chunk(0, "k")])
        .await
        .expect("chunks");
    let doomed = store
        .store_chunks(drop_me, &[chunk(0, "d0"), chunk(1, "d1")])
        .await
        .expect("chunks");

    store.delete_document(drop_me).await.expect("delete");

    let stats = store.stats().await.expect("stats");
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.embedding_count, 1);
    for id in doomed {
        let err = store
            .lookup_chunk_source(id)
            .await
            .expect_err("chunk is gone");
        assert!(err.is_not_found());
    }

    let again = store.delete_document(drop_me).await;
    assert!(matches!(again, Err(SemsearchError::NotFound(_))));
}

#[tokio::test]
async fn ids_are_not_reused() {
    let store = MemoryStore::new();
    let first = store.store_document("a", "a").await.expect("store");
    store.delete_document(first).await.expect("delete");
    let second = store.store_document("b", "b").await.expect("store");
    assert!(second > first);
}

#[tokio::test]
async fn query_log_and_stats() {
    let store = MemoryStore::new();
    let doc = store.store_document("a", "abc").await.expect("store");
    let ids = store
        .store_chunks(doc, &[chunk(0, "abc")])
        .await
        .expect("chunks");

    let first = store
        .log_query(&NewQuery {
            query_text: "first".to_string(),
            timestamp: Utc::now(),
            response_time_ms: Some(10),
        })
        .await
        .expect("log query");
    store
        .log_responses(
            first,
            &[NewResponse {
                chunk_id: ids[0],
                score: 0.5,
                text: "abc".to_string(),
            }],
        )
        .await
        .expect("log responses");

    let second = store
        .log_query(&NewQuery {
            query_text: "second".to_string(),
            timestamp: Utc::now(),
            response_time_ms: Some(30),
        })
        .await
        .expect("log query");

    let stats = store.stats().await.expect("stats");
    assert_eq!(stats.query_count, 2);
    assert_eq!(stats.avg_response_time_ms, Some(20.0));

    let logs = store.recent_queries(10).await.expect("recent");
    assert_eq!(logs[0].id, second);
    assert_eq!(logs[0].response_count, 0);
    assert_eq!(logs[0].avg_score, None);
    assert_eq!(logs[1].response_count, 1);
    assert_eq!(logs[1].avg_score, Some(0.5));

    assert_eq!(store.recent_queries(1).await.expect("recent").len(), 1);
    assert!(store.log_responses(999, &[]).await.is_err());
}

#[tokio::test]
async fn list_documents_newest_first() {
    let store = MemoryStore::new();
    let older = store.store_document("old.txt", "ab").await.expect("store");
    let newer = store.store_document("new.txt", "héllo").await.expect("store");

    let listed = store.list_documents().await.expect("list");
    assert_eq!(listed[0].id, newer);
    assert_eq!(listed[0].size, 5);
    assert_eq!(listed[1].id, older);
    assert_eq!(listed[1].chunk_count, 0);
}
