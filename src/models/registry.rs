// ============================================================================
// MODEL REGISTRY — identifier -> loaded network, cached for the process
// ============================================================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::procedural::ProceduralLoader;
use super::{resolve_identifier, Architecture, Generator};
use crate::error::{DragError, Result};
use crate::{log_err, log_info};

/// Builds networks of one architecture family from an identifier.
pub trait NetworkLoader: Send + Sync {
    fn load(&self, identifier: &str) -> Result<Arc<dyn Generator>>;
}

/// Outcome of a load attempt. Failures are remembered so a bad identifier
/// is reported again without re-reading its payload.
#[derive(Clone)]
enum CachedNetwork {
    Loaded(Arc<dyn Generator>),
    Failed(String),
}

/// Process-wide network cache keyed by resolved identifier. Entries are
/// never evicted.
pub struct ModelRegistry {
    loaders: HashMap<Architecture, Box<dyn NetworkLoader>>,
    networks: Mutex<HashMap<String, CachedNetwork>>,
}

impl ModelRegistry {
    /// Empty registry with no loaders.
    pub fn new() -> Self {
        Self { loaders: HashMap::new(), networks: Mutex::new(HashMap::new()) }
    }

    /// Registry with the built-in procedural loader.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(Architecture::Procedural, Box::new(ProceduralLoader));
        reg
    }

    /// Install (or replace) the loader for one architecture family.
    pub fn register(&mut self, arch: Architecture, loader: Box<dyn NetworkLoader>) {
        self.loaders.insert(arch, loader);
    }

    pub fn supports(&self, arch: Architecture) -> bool {
        self.loaders.contains_key(&arch)
    }

    /// Number of cached entries, failed loads included.
    pub fn cached_count(&self) -> usize {
        self.networks.lock().map(|n| n.len()).unwrap_or(0)
    }

    /// Resolve `identifier` to a network, loading it on first use.
    pub fn get_network(&self, identifier: &str) -> Result<Arc<dyn Generator>> {
        let resolved = resolve_identifier(identifier);

        if let Some(entry) = self.lookup(&resolved) {
            return match entry {
                CachedNetwork::Loaded(net) => Ok(net),
                CachedNetwork::Failed(msg) => Err(DragError::ModelLoad(msg)),
            };
        }

        let arch = Architecture::from_identifier(&resolved)?;
        let loader = self.loaders.get(&arch).ok_or_else(|| {
            DragError::ModelLoad(format!(
                "no loader registered for {} networks (\"{}\")",
                arch, resolved
            ))
        })?;

        log_info!("Loading \"{}\"...", resolved);
        let entry = match loader.load(&resolved) {
            Ok(net) => {
                log_info!("Loading \"{}\"... Done ({}px, {} ws)", resolved, net.info().img_resolution, net.info().num_ws);
                CachedNetwork::Loaded(net)
            }
            Err(e) => {
                log_err!("Loading \"{}\"... Failed: {}", resolved, e);
                CachedNetwork::Failed(strip_kind(&e))
            }
        };

        if let Ok(mut networks) = self.networks.lock() {
            networks.insert(resolved, entry.clone());
        }
        match entry {
            CachedNetwork::Loaded(net) => Ok(net),
            CachedNetwork::Failed(msg) => Err(DragError::ModelLoad(msg)),
        }
    }

    fn lookup(&self, resolved: &str) -> Option<CachedNetwork> {
        self.networks.lock().ok()?.get(resolved).cloned()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Message of a load failure without its kind prefix; everything a loader
/// reports is re-raised as a model-load failure.
fn strip_kind(e: &DragError) -> String {
    match e {
        DragError::ModelLoad(m)
        | DragError::ArchitectureInference(m)
        | DragError::Numerical(m)
        | DragError::RuntimeComputation(m)
        | DragError::Serialize(m) => m.clone(),
        DragError::Io(io) => io.to_string(),
    }
}
