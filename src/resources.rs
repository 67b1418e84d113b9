// ============================================================================
// SHARED RESOURCES — network cache and transfer buffers shared by renderers
// ============================================================================

use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::ModelRegistry;
use crate::pool::TransferPool;

/// Long-lived state shared by every [`crate::renderer::Renderer`] in the
/// process. Loaded networks live here so a session change never reloads
/// weights that were already read once.
pub struct Resources {
    registry: ModelRegistry,
    pool: Mutex<TransferPool>,
}

impl Resources {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry, pool: Mutex::new(TransferPool::new()) }
    }

    /// Resources with only the built-in networks registered.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new(ModelRegistry::with_builtin()))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Lock the transfer pool. A poisoned lock is recovered; the pool only
    /// holds scratch bytes.
    pub fn pool(&self) -> MutexGuard<'_, TransferPool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::new(ModelRegistry::with_builtin())
    }
}
