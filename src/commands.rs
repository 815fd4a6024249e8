use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::DocumentId;
use crate::config::{Config, EmbeddingBackend};
use crate::embeddings::OllamaClient;
use crate::embeddings::ollama::ModelInfo;
use crate::engine::{ConsistencyValidator, Engine};

/// Read a text file and add it to the index
#[inline]
pub async fn add_document(
    engine: &Engine,
    path: &Path,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());

    let chunking = engine.chunking();
    let chunk_size = chunk_size.unwrap_or(chunking.chunk_size);
    let overlap = overlap.unwrap_or(chunking.chunk_overlap);

    info!("Adding document: {}", filename);
    let document_id = engine
        .process_document(&filename, &content, chunk_size, overlap)
        .await
        .with_context(|| format!("Failed to process {}", filename))?;

    let chunk_count = engine
        .store()
        .chunk_ids_for_document(document_id)
        .await?
        .len();
    println!("Added document: {} (ID: {})", filename, document_id);
    println!("  Characters: {}", content.chars().count());
    println!("  Chunks: {}", chunk_count);

    Ok(())
}

/// Run a query and print the ranked results
#[inline]
pub async fn search(
    engine: &Engine,
    query: &str,
    top_k: Option<usize>,
    probes: Option<usize>,
) -> Result<()> {
    let top_k = top_k.unwrap_or_else(|| engine.default_top_k());
    let probes = probes.unwrap_or(engine.index().config().probe_count);

    let response = engine
        .search(query, top_k, probes)
        .await
        .context("Search failed")?;

    if response.results.is_empty() {
        println!("No results for '{}'.", query);
        if engine.index().is_empty() {
            println!("Use 'semsearch add <file>' to index a document.");
        }
        return Ok(());
    }

    println!(
        "Results for '{}' ({} found in {}ms):",
        response.query, response.total_results, response.response_time_ms
    );
    println!();

    for result in &response.results {
        println!(
            "{}. {} (document {}, chunk {}) score {:.4}",
            result.rank, result.filename, result.document_id, result.chunk_index, result.score
        );
        println!("   {}", preview(&result.text, 160));
        println!();
    }

    Ok(())
}

/// Delete a document along with its chunks and index entries, optionally
/// compacting the database afterwards
#[inline]
pub async fn delete_document(engine: &Engine, document_id: DocumentId, compact: bool) -> Result<()> {
    let document = engine
        .store()
        .get_document(document_id)
        .await
        .with_context(|| format!("Document {} not found", document_id))?;

    let removed = engine
        .delete_document(document_id)
        .await
        .with_context(|| format!("Failed to delete document {}", document_id))?;

    println!(
        "Deleted document: {} (ID: {}), {} index entries removed",
        document.filename, document_id, removed
    );

    if compact {
        engine
            .store()
            .optimize()
            .await
            .context("Failed to compact database")?;
        println!("Compacted database");
    }
    Ok(())
}

/// List stored documents, newest first
#[inline]
pub async fn list_documents(engine: &Engine) -> Result<()> {
    let documents = engine
        .store()
        .list_documents()
        .await
        .context("Failed to list documents")?;

    if documents.is_empty() {
        println!("No documents have been added yet.");
        println!("Use 'semsearch add <file>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();

    for document in &documents {
        println!("{} (ID: {})", document.filename, document.id);
        println!("   Size: {} characters", document.size);
        println!("   Chunks: {}", document.chunk_count);
        println!(
            "   Uploaded: {}",
            document.uploaded_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    Ok(())
}

/// Retrain the index clusters; Ctrl-C abandons the rebuild and keeps the old layout
#[inline]
pub async fn rebuild_index(engine: &Engine) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling rebuild");
                cancel.cancel();
            }
        })
    };

    let result = engine.rebuild_index_with(cancel).await;
    watcher.abort();

    let report = result.context("Index rebuild failed")?;
    println!("Rebuilt index:");
    println!("  Vectors: {}", report.entries);
    println!("  Clusters: {}", report.clusters);
    println!(
        "  Iterations: {}{}",
        report.iterations,
        if report.converged {
            " (converged)"
        } else {
            ""
        }
    );
    println!("  Duration: {}ms", report.duration_ms);

    Ok(())
}

/// Show storage, query log and index statistics
#[inline]
pub async fn show_stats(engine: &Engine) -> Result<()> {
    let stats = engine.stats().await.context("Failed to collect statistics")?;
    let index = engine.index().stats();

    println!("Storage:");
    println!("  Documents: {}", stats.total_documents);
    println!("  Embeddings: {}", stats.total_embeddings);
    println!();
    println!("Queries:");
    println!("  Total: {}", stats.total_queries);
    match stats.avg_response_time_ms {
        Some(avg) => println!("  Average response time: {:.1}ms", avg),
        None => println!("  Average response time: n/a"),
    }
    println!();
    println!("Index:");
    println!("  Vectors: {}", index.entries);
    println!("  Dimension: {}", index.dimension);
    println!(
        "  Trained: {}",
        if index.trained { "yes" } else { "no (exact search)" }
    );
    println!("  Clusters: {}", index.clusters);
    if index.trained {
        println!("  Largest cluster: {}", index.largest_cluster);
        println!("  Empty clusters: {}", index.empty_clusters);
    }
    println!("  Inserts since rebuild: {}", index.inserts_since_rebuild);

    Ok(())
}

/// Show the most recent queries
#[inline]
pub async fn show_query_log(engine: &Engine, limit: usize) -> Result<()> {
    let queries = engine
        .store()
        .recent_queries(limit)
        .await
        .context("Failed to load query log")?;

    if queries.is_empty() {
        println!("No queries have been logged yet.");
        return Ok(());
    }

    println!("Recent queries ({} shown):", queries.len());
    println!();

    for query in &queries {
        println!(
            "[{}] {} (ID: {})",
            query.timestamp.format("%Y-%m-%d %H:%M:%S"),
            query.query_text,
            query.id
        );
        let timing = query
            .response_time_ms
            .map_or_else(|| "n/a".to_string(), |ms| format!("{}ms", ms));
        let score = query
            .avg_score
            .map_or_else(|| "n/a".to_string(), |avg| format!("{:.4}", avg));
        println!(
            "   Results: {}, average score: {}, response time: {}",
            query.response_count, score, timing
        );
    }

    Ok(())
}

/// Compare storage with the index, optionally repairing the differences
#[inline]
pub async fn check_consistency(engine: &Engine, repair: bool) -> Result<()> {
    let validator = ConsistencyValidator::new(engine.store(), engine.index());
    let report = validator
        .validate_consistency()
        .await
        .context("Consistency check failed")?;

    println!("{}", report.summary());
    for issue in &report.inconsistent_documents {
        println!(
            "  {} (ID: {}): {} of {} chunks indexed",
            issue.filename, issue.document_id, issue.indexed_vectors, issue.stored_chunks
        );
    }

    if report.is_consistent || !repair {
        return Ok(());
    }

    let removed = validator.remove_orphans(&report.orphaned_in_index);
    let restored = validator
        .restore_missing(&report.missing_from_index)
        .await
        .context("Failed to restore missing vectors")?;
    println!(
        "Repaired: {} orphaned vectors removed, {} missing vectors restored",
        removed, restored
    );

    Ok(())
}

/// Check that the configured embedding server is reachable and serves the model
#[inline]
pub async fn check_model(config: &Config) -> Result<()> {
    if config.embedding.backend == EmbeddingBackend::Hashing {
        println!("Using the local hashing embedder; no model server required.");
        return Ok(());
    }

    let client = OllamaClient::new(&config.embedding)?;
    let base_url = client.base_url().clone();
    let model = client.model().to_string();

    let models = tokio::task::spawn_blocking(move || -> crate::Result<Vec<ModelInfo>> {
        client.health_check()?;
        client.list_models()
    })
    .await
    .context("Health check task failed")?
    .with_context(|| format!("Embedding server at {} is not usable", base_url))?;

    println!("Embedding server at {} is healthy.", base_url);
    println!("Using model: {}", model);
    println!("Available models:");
    for available in &models {
        println!("  {}", available.name);
    }

    Ok(())
}

/// Print the active configuration
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!("Configuration file: {}", config.config_file_path().display());
    println!("Database: {}", config.database_path().display());
    println!();
    println!(
        "{}",
        toml::to_string_pretty(config).context("Failed to serialize configuration")?
    );
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let truncated: String = flattened.chars().take(max_chars).collect();
    format!("{}...", truncated)
}
