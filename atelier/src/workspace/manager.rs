//! Worker-space manager: the process-wide map `(user, project) → space`.
//!
//! Reads take the lock-free fast path through the concurrent map; creation
//! single-flights through one mutex with a double-check, so N concurrent
//! `get_or_create` calls construct exactly one space and all observers get
//! the same `Arc`.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::CoreError;
use crate::workspace::{SpaceContext, WorkerSpace, WorkspaceStats};

type SpaceKey = (Uuid, Uuid);

#[derive(Clone, Debug, Serialize)]
pub struct ManagerStats {
    pub active_spaces: usize,
    pub spaces: Vec<WorkspaceStats>,
}

pub struct WorkerSpaceManager {
    spaces: DashMap<SpaceKey, Arc<WorkerSpace>>,
    create_lock: Mutex<()>,
    ctx: SpaceContext,
}

impl WorkerSpaceManager {
    pub fn new(ctx: SpaceContext) -> Self {
        Self {
            spaces: DashMap::new(),
            create_lock: Mutex::new(()),
            ctx,
        }
    }

    pub fn get(&self, user_id: Uuid, project_id: Uuid) -> Option<Arc<WorkerSpace>> {
        self.spaces.get(&(user_id, project_id)).map(|s| s.clone())
    }

    /// Returns the live space for the tuple, constructing and initializing it
    /// exactly once under the creation lock.
    pub async fn get_or_create(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<Arc<WorkerSpace>, CoreError> {
        let key = (user_id, project_id);
        if let Some(space) = self.spaces.get(&key) {
            return Ok(space.clone());
        }

        let _guard = self.create_lock.lock().await;
        if let Some(space) = self.spaces.get(&key) {
            return Ok(space.clone());
        }

        let space = Arc::new(WorkerSpace::new(user_id, project_id, self.ctx.clone()));
        space.initialize().await?;
        self.spaces.insert(key, space.clone());
        tracing::info!(
            user_id = %user_id,
            project_id = %project_id,
            total_spaces = self.spaces.len(),
            "worker space created"
        );
        Ok(space)
    }

    /// Cleans up and removes one space. False when the tuple has no space.
    pub async fn remove(&self, user_id: Uuid, project_id: Uuid) -> bool {
        let _guard = self.create_lock.lock().await;
        match self.spaces.remove(&(user_id, project_id)) {
            Some((_, space)) => {
                space.cleanup().await;
                tracing::info!(
                    user_id = %user_id,
                    project_id = %project_id,
                    remaining = self.spaces.len(),
                    "worker space removed"
                );
                true
            }
            None => {
                tracing::warn!(
                    user_id = %user_id,
                    project_id = %project_id,
                    "worker space not found"
                );
                false
            }
        }
    }

    /// Removes every space the user owns. Called when a user is deleted.
    pub async fn remove_user_spaces(&self, user_id: Uuid) -> usize {
        let _guard = self.create_lock.lock().await;
        let keys: Vec<SpaceKey> = self
            .spaces
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| *entry.key())
            .collect();
        let mut removed = 0;
        for key in keys {
            if let Some((_, space)) = self.spaces.remove(&key) {
                space.cleanup().await;
                removed += 1;
            }
        }
        tracing::info!(user_id = %user_id, removed, "user worker spaces removed");
        removed
    }

    /// Shuts every space down and deregisters everything from the bus.
    /// Called exactly once during process shutdown.
    pub async fn cleanup_all(&self) {
        let _guard = self.create_lock.lock().await;
        let spaces: Vec<Arc<WorkerSpace>> =
            self.spaces.iter().map(|entry| entry.value().clone()).collect();
        for space in spaces {
            space.cleanup().await;
        }
        self.spaces.clear();
        self.ctx.bus.cleanup();
        tracing::info!("all worker spaces cleaned up");
    }

    pub async fn stats(&self) -> ManagerStats {
        let spaces: Vec<Arc<WorkerSpace>> =
            self.spaces.iter().map(|entry| entry.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(spaces.len());
        for space in spaces {
            snapshots.push(space.stats().await);
        }
        ManagerStats {
            active_spaces: snapshots.len(),
            spaces: snapshots,
        }
    }
}
