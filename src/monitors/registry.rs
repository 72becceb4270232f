//! Target registry
//!
//! Holds the active targets of one monitoring session. Loading replaces the
//! whole set; readers take a snapshot and release the lock before doing any
//! work with it.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::TargetConfig;
use crate::storage::{StorageBackend, StorageResult};

#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: RwLock<BTreeMap<i64, TargetConfig>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry contents with the active targets from `store`.
    ///
    /// `ids` restricts loading to that subset; `None` or an empty set loads
    /// every active target. Returns the number of targets loaded.
    pub async fn load(&self, store: &dyn StorageBackend, ids: Option<&HashSet<i64>>) -> StorageResult<usize> {
        let ids = ids.filter(|ids| !ids.is_empty());
        let loaded = store.load_active_targets(ids).await?;

        let mut targets = self.targets.write().await;
        targets.clear();
        for target in loaded {
            debug!("registered target {} ({})", target.name, target.id);
            targets.insert(target.id, target);
        }

        info!("loaded {} active targets", targets.len());
        Ok(targets.len())
    }

    /// Copy of the current targets, ordered by id
    pub async fn snapshot(&self) -> Vec<TargetConfig> {
        self.targets.read().await.values().cloned().collect()
    }

    pub async fn ids(&self) -> Vec<i64> {
        self.targets.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.targets.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.targets.write().await.clear();
    }
}
