//! Embedder trait for text-to-vector conversion.
//!
//! Implementations (OpenAI, Azure OpenAI) live in blitz-infra.

use blitz_types::error::EmbeddingError;

/// Trait for converting text into embedding vectors.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait Embedder: Send + Sync {
    /// Embed one or more texts. Returns one vector per input, in order.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send;

    /// Model or deployment identifier (e.g., "text-embedding-3-small").
    fn model_name(&self) -> &str;

    /// Length of every returned vector.
    fn dimension(&self) -> usize;
}
