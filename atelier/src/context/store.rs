//! Per-(user, agent) context store over the vector index.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::{Embedder, HashEmbedder, ScoredPoint, SearchFilter, VectorIndex, VectorPoint};
use crate::error::CoreError;

/// One retrieved interaction.
#[derive(Clone, Debug)]
pub struct ContextHit {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub interaction_type: String,
    pub task_id: Option<String>,
    pub success: bool,
    pub timestamp: String,
    pub metadata: Value,
}

#[derive(Clone, Debug)]
pub struct ContextStats {
    pub collection_name: String,
    pub total_vectors: usize,
    pub vector_size: usize,
    pub distance: &'static str,
    pub enabled: bool,
}

/// Interaction memory for one agent. `index: None` means vector search is
/// disabled; every method then degrades to a no-op with empty results.
pub struct ContextStore {
    index: Option<Arc<dyn VectorIndex>>,
    embedder: Arc<dyn Embedder>,
    fallback: HashEmbedder,
    collection_name: String,
}

impl ContextStore {
    pub fn new(
        index: Option<Arc<dyn VectorIndex>>,
        embedder: Arc<dyn Embedder>,
        user_id: Uuid,
        agent_name: &str,
    ) -> Self {
        let fallback = HashEmbedder::new(embedder.dimension());
        Self {
            index,
            embedder,
            fallback,
            collection_name: format!("user{user_id}_{agent_name}_context"),
        }
    }

    pub fn enabled(&self) -> bool {
        self.index.is_some()
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Idempotent collection creation. No-op when disabled.
    pub async fn initialize(&self) -> Result<(), CoreError> {
        let Some(index) = &self.index else {
            tracing::debug!(collection = %self.collection_name, "context store disabled");
            return Ok(());
        };
        index
            .ensure_collection(&self.collection_name, self.embedder.dimension())
            .await
    }

    /// Embeds `text`, falling back to the deterministic digest vector when the
    /// embedder fails. Recall suffers, storage keeps working.
    async fn embed_or_fallback(&self, text: &str) -> Vec<f32> {
        match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(
                    collection = %self.collection_name,
                    error = %err,
                    "embedding failed, using digest fallback"
                );
                self.fallback.vector_for(text)
            }
        }
    }

    /// Stores one interaction; returns its point id, or `None` when disabled.
    pub async fn add_interaction(
        &self,
        content: &str,
        interaction_type: &str,
        task_id: Option<&str>,
        success: bool,
        metadata: Option<Value>,
    ) -> Result<Option<String>, CoreError> {
        let Some(index) = &self.index else {
            return Ok(None);
        };
        self.initialize().await?;

        let vector = self.embed_or_fallback(content).await;
        let point_id = Uuid::new_v4().to_string();
        let payload = json!({
            "content": content,
            "interaction_type": interaction_type,
            "task_id": task_id,
            "success": success,
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": metadata.unwrap_or_else(|| json!({})),
        });
        index
            .upsert(
                &self.collection_name,
                VectorPoint {
                    id: point_id.clone(),
                    vector,
                    payload,
                },
            )
            .await?;
        tracing::debug!(
            collection = %self.collection_name,
            point_id = %point_id,
            interaction_type,
            "interaction added"
        );
        Ok(Some(point_id))
    }

    /// Cosine top-k over this agent's interactions. Empty when disabled.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: SearchFilter,
    ) -> Result<Vec<ContextHit>, CoreError> {
        let Some(index) = &self.index else {
            return Ok(Vec::new());
        };
        self.initialize().await?;

        let vector = self.embed_or_fallback(query).await;
        let hits = index
            .search(&self.collection_name, &vector, limit, &filter)
            .await?;
        Ok(hits.into_iter().map(Self::to_hit).collect())
    }

    fn to_hit(point: ScoredPoint) -> ContextHit {
        let payload = &point.payload;
        ContextHit {
            id: point.id,
            score: point.score,
            content: payload
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            interaction_type: payload
                .get("interaction_type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            task_id: payload
                .get("task_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            success: payload
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            timestamp: payload
                .get("timestamp")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            metadata: payload.get("metadata").cloned().unwrap_or_else(|| json!({})),
        }
    }

    /// Drops and recreates the collection.
    pub async fn clear(&self) -> Result<(), CoreError> {
        let Some(index) = &self.index else {
            return Ok(());
        };
        index.drop_collection(&self.collection_name).await?;
        self.initialize().await
    }

    /// Reports how many vectors exceed the configured ceiling. Pruning of the
    /// oldest points is left to the index backend; this surfaces the overflow
    /// so operators can see drift before it hurts recall.
    pub async fn prune_overflow(
        &self,
        max_vectors: usize,
        threshold: f64,
    ) -> Result<usize, CoreError> {
        let Some(index) = &self.index else {
            return Ok(0);
        };
        let total = index.count(&self.collection_name).await?;
        if total <= max_vectors {
            return Ok(0);
        }
        let keep = (max_vectors as f64 * threshold) as usize;
        let overflow = total.saturating_sub(keep);
        tracing::warn!(
            collection = %self.collection_name,
            total_vectors = total,
            max_vectors,
            overflow,
            "context collection over its vector ceiling"
        );
        Ok(overflow)
    }

    pub async fn stats(&self) -> Result<ContextStats, CoreError> {
        let Some(index) = &self.index else {
            return Ok(ContextStats {
                collection_name: self.collection_name.clone(),
                total_vectors: 0,
                vector_size: 0,
                distance: "disabled",
                enabled: false,
            });
        };
        self.initialize().await?;
        Ok(ContextStats {
            collection_name: self.collection_name.clone(),
            total_vectors: index.count(&self.collection_name).await?,
            vector_size: self.embedder.dimension(),
            distance: "cosine",
            enabled: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryVectorIndex;

    fn store_with_index() -> ContextStore {
        ContextStore::new(
            Some(Arc::new(InMemoryVectorIndex::new())),
            Arc::new(HashEmbedder::new(32)),
            Uuid::new_v4(),
            "coder",
        )
    }

    #[tokio::test]
    async fn add_then_search_round_trip() {
        let store = store_with_index();
        let id = store
            .add_interaction("fix the login bug", "chat", Some("t0"), true, None)
            .await
            .unwrap()
            .expect("enabled store returns a point id");

        let hits = store
            .search("fix the login bug", 5, SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].content, "fix the login bug");
        assert_eq!(hits[0].task_id.as_deref(), Some("t0"));
        assert!(hits[0].success);
    }

    #[tokio::test]
    async fn disabled_store_is_total() {
        let store = ContextStore::new(
            None,
            Arc::new(HashEmbedder::new(32)),
            Uuid::new_v4(),
            "coder",
        );
        assert!(!store.enabled());
        assert_eq!(
            store
                .add_interaction("x", "chat", None, true, None)
                .await
                .unwrap(),
            None
        );
        assert!(store
            .search("x", 5, SearchFilter::default())
            .await
            .unwrap()
            .is_empty());
        let stats = store.stats().await.unwrap();
        assert!(!stats.enabled);
        assert_eq!(stats.distance, "disabled");
    }

    #[tokio::test]
    async fn clear_resets_the_collection() {
        let store = store_with_index();
        store
            .add_interaction("one", "chat", None, true, None)
            .await
            .unwrap();
        assert_eq!(store.stats().await.unwrap().total_vectors, 1);
        store.clear().await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_vectors, 0);
    }

    #[tokio::test]
    async fn collection_name_is_deterministic() {
        let user = Uuid::new_v4();
        let store = ContextStore::new(
            None,
            Arc::new(HashEmbedder::new(8)),
            user,
            "coder",
        );
        assert_eq!(
            store.collection_name(),
            format!("user{user}_coder_context")
        );
    }
}
