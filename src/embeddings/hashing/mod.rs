#[cfg(test)]
mod tests;

use std::hash::Hasher;
use twox_hash::XxHash64;

use super::client::Embedder;
use crate::Result;

/// Deterministic feature-hashing embedder.
///
/// Each lowercase word is hashed into one of `dimension` buckets with a
/// signed weight; the result is L2-normalized. Texts sharing vocabulary land
/// close together, which is enough for tests and offline use.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    seed: u64,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension, seed: 0 }
    }

    #[inline]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        for token in tokens(text) {
            let mut hasher = XxHash64::with_seed(self.seed);
            hasher.write(token.as_bytes());
            let hash = hasher.finish();

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            let weight = 0.5 + ((hash >> 32) as u32 as f32 / u32::MAX as f32) * 0.5;
            vector[bucket] += sign * weight;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in &mut vector {
                *value /= norm;
            }
        }

        vector
    }
}

impl Embedder for HashingEmbedder {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}
