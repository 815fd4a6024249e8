
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, SemsearchError};

/// Represents a contiguous span of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Zero-based ordinal of this chunk within its document
    pub index: usize,
    /// Character offset (inclusive) where the chunk starts
    pub start: usize,
    /// Character offset (exclusive) where the chunk ends
    pub end: usize,
    /// The chunk text
    pub text: String,
}

impl TextChunk {
    /// Length of the chunk in characters
    #[inline]
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Configuration for content chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum number of characters per chunk
    pub chunk_size: usize,
    /// Number of trailing characters repeated at the start of the next chunk
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(SemsearchError::InvalidConfiguration(
                "chunk size must be greater than zero".to_string(),
            ));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(SemsearchError::InvalidConfiguration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }

        Ok(())
    }

    /// Distance in characters between the starts of two adjacent chunks
    #[inline]
    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Split text into overlapping fixed-size character windows.
///
/// Chunk `i` covers `[i * stride, i * stride + size)` clipped to the text
/// length, and generation stops at the first chunk that reaches the end of
/// the text. Offsets count `char`s, so multi-byte text is never split inside
/// a code point.
#[inline]
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<TextChunk>> {
    let config = ChunkingConfig::new(size, overlap)?;
    Ok(chunk_with_config(text, &config))
}

/// Chunk text with an already validated configuration
#[inline]
pub fn chunk_with_config(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let stride = config.stride();

    let mut chunks = Vec::with_capacity(expected_chunk_count(total, config));
    let mut start = 0;

    while start < total {
        let end = (start + config.chunk_size).min(total);
        chunks.push(TextChunk {
            index: chunks.len(),
            start,
            end,
            text: chars[start..end].iter().collect(),
        });

        if end == total {
            break;
        }
        start += stride;
    }

    debug!(
        "Chunked {} characters into {} chunks (size {}, overlap {})",
        total,
        chunks.len(),
        config.chunk_size,
        config.chunk_overlap
    );

    chunks
}

/// Number of chunks `chunk_with_config` produces for a text of `length` characters
#[inline]
pub fn expected_chunk_count(length: usize, config: &ChunkingConfig) -> usize {
    if length == 0 {
        0
    } else if length <= config.chunk_size {
        1
    } else {
        (length - config.chunk_overlap).div_ceil(config.stride())
    }
}
