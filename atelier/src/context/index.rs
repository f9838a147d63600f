//! Vector index seam and the in-memory cosine implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::CoreError;

#[derive(Clone, Debug)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Clone, Debug)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// Payload predicates applied before ranking.
#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
    pub success: Option<bool>,
    pub interaction_type: Option<String>,
}

impl SearchFilter {
    fn matches(&self, payload: &Value) -> bool {
        if let Some(success) = self.success {
            if payload.get("success").and_then(Value::as_bool) != Some(success) {
                return false;
            }
        }
        if let Some(ref kind) = self.interaction_type {
            if payload.get("interaction_type").and_then(Value::as_str) != Some(kind.as_str()) {
                return false;
            }
        }
        true
    }
}

/// External vector search contract: named collections of fixed-dimension
/// points with cosine top-k.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent collection creation.
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), CoreError>;

    async fn upsert(&self, collection: &str, point: VectorPoint) -> Result<(), CoreError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>, CoreError>;

    async fn drop_collection(&self, name: &str) -> Result<(), CoreError>;

    async fn count(&self, collection: &str) -> Result<usize, CoreError>;
}

struct Collection {
    dimension: usize,
    points: DashMap<String, VectorPoint>,
}

/// In-memory cosine index. Not persistent; one collection per agent context.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: DashMap<String, Collection>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), CoreError> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                dimension,
                points: DashMap::new(),
            });
        Ok(())
    }

    async fn upsert(&self, collection: &str, point: VectorPoint) -> Result<(), CoreError> {
        let entry = self
            .collections
            .get(collection)
            .ok_or_else(|| CoreError::NotFound(format!("collection {collection}")))?;
        if point.vector.len() != entry.dimension {
            return Err(CoreError::Validation(format!(
                "vector dimension {} does not match collection dimension {}",
                point.vector.len(),
                entry.dimension
            )));
        }
        entry.points.insert(point.id.clone(), point);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>, CoreError> {
        let Some(entry) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<ScoredPoint> = entry
            .points
            .iter()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: Self::cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn drop_collection(&self, name: &str) -> Result<(), CoreError> {
        self.collections.remove(name);
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, CoreError> {
        Ok(self
            .collections
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0))
    }
}
