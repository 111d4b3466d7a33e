//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, the deterministic [`HashingEmbedder`], and pure helpers for
//! vector serialization and similarity.
//!
//! Network-backed providers (OpenAI, Ollama) and the local ONNX provider
//! live in the `trailscout` app crate.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for embedding providers.
///
/// `embed` returns one vector per input text, in input order, each of
/// length [`dims`](EmbeddingProvider::dims).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text through `provider`.
pub async fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let mut vectors = provider.embed(&[text.to_string()]).await?;
    vectors
        .pop()
        .ok_or_else(|| anyhow::anyhow!("embedding provider returned no vector"))
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Feature-hashing embedder over lower-cased word unigrams and bigrams.
///
/// Each token is hashed with FNV-1a into one of `dims` buckets, with the
/// sign taken from the top hash bit; the result is L2-normalized. Needs no
/// model download and gives identical vectors across runs and machines,
/// which makes it the default for offline use and tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
    name: String,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMS: usize = 384;

    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            name: format!("fnv1a-hash-{}", dims),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        let tokens = tokenize(text);

        let mut add = |feature: &str| {
            let h = fnv1a(feature.as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        };

        for token in &tokens {
            add(token);
        }
        for pair in tokens.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]));
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut vec {
                *x /= norm;
            }
        }
        vec
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use trailscout_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_hashing_embedder_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_text("Hoh River Trail through old growth rainforest");
        let b = e.embed_text("Hoh River Trail through old growth rainforest");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_embedder_related_text_scores_higher() {
        let e = HashingEmbedder::default();
        let query = e.embed_text("rainforest hike");
        let related = e.embed_text("A lush rainforest hike along the river");
        let unrelated = e.embed_text("Alpine scramble to a rocky summit");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_hashing_embedder_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(8);
        assert!(e.embed_text("  ,,  ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_embed_one_via_trait() {
        let e = HashingEmbedder::new(16);
        let v = embed_one(&e, "lake").await.unwrap();
        assert_eq!(v, e.embed_text("lake"));
    }
}
