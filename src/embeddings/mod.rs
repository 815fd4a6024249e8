// Embeddings module
// Chunking of document text and adapters over the external embedding model

pub mod chunking;
pub mod client;
pub mod hashing;
pub mod ollama;

pub use chunking::{ChunkingConfig, TextChunk, chunk_text, chunk_with_config};
pub use client::{Embedder, EmbeddingClient};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;
