//! Embedder seam: text → fixed-size vector.

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Produces fixed-size float vectors from text. Implementations must be
/// `Send + Sync`; the store calls them from async methods.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;

    /// Vector dimension returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;
}

/// OpenAI embeddings client. Default model `text-embedding-3-small` (1536).
pub struct OpenAIEmbedder {
    config: OpenAIConfig,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_config(OpenAIConfig::new(), model)
    }

    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self {
            config,
            model,
            dimensions,
        }
    }

    fn model_dimensions(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let request = CreateEmbeddingRequest {
            input: EmbeddingInput::String(text.to_string()),
            model: self.model.clone(),
            ..Default::default()
        };
        let client = Client::with_config(self.config.clone());
        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| CoreError::Upstream(format!("embedding: {e}")))?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CoreError::Upstream("no embedding returned".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}

/// Deterministic digest-derived vectors. Used as the fallback when the real
/// embedder fails: functional correctness is preserved (same text, same
/// vector) at the cost of semantic recall. Also the test embedder.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Infallible variant for the fallback path.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        (0..self.dimensions)
            .map(|i| (digest[i % digest.len()] as f32 / 255.0) - 0.5)
            .collect()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        Ok(self.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_vectors_are_deterministic_and_sized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.vector_for("hello");
        let b = embedder.vector_for("hello");
        let c = embedder.vector_for("other");
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|v| (-0.5..=0.5).contains(v)));
    }

    #[test]
    fn openai_dimensions_by_model() {
        assert_eq!(OpenAIEmbedder::new("text-embedding-3-small").dimension(), 1536);
        assert_eq!(OpenAIEmbedder::new("text-embedding-3-large").dimension(), 3072);
    }
}
