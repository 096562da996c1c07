use std::sync::Arc;

use brook_core::{CancelRegistry, ChunkSource, GenerationSettings, MessageStore};

/// Shared handles behind every route. Cloned per request; all members are
/// cheap handles over shared state.
#[derive(Clone)]
pub struct RelayState {
    pub store: Arc<dyn MessageStore>,
    pub source: Arc<dyn ChunkSource>,
    pub registry: CancelRegistry,
    pub settings: GenerationSettings,
}

impl RelayState {
    pub fn new(
        store: Arc<dyn MessageStore>,
        source: Arc<dyn ChunkSource>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            store,
            source,
            registry: CancelRegistry::new(),
            settings,
        }
    }
}
