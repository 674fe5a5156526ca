//! Shared collaborators handed to every transform.

use std::sync::Arc;

use cdm_map::{ConceptCatalog, KeyMapper};
use cdm_model::{CancellationToken, DEFAULT_BATCH_SIZE};
use cdm_store::Store;

/// Everything a transform needs besides its own logic.
#[derive(Clone)]
pub struct TransformContext {
    pub store: Arc<dyn Store>,
    pub keys: Arc<KeyMapper>,
    pub catalog: Arc<ConceptCatalog>,
    pub batch_size: usize,
    pub cancel: CancellationToken,
}

impl TransformContext {
    /// Context with an empty concept catalog and a fresh key mapper over
    /// `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        let keys = Arc::new(KeyMapper::new(Arc::clone(&store)));
        Self {
            store,
            keys,
            catalog: Arc::new(ConceptCatalog::empty()),
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_keys(mut self, keys: Arc<KeyMapper>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<ConceptCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
