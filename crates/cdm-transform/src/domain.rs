//! Domain transform trait and registry.
//!
//! Each normalized table (or pair of tables) is produced by one
//! [`DomainTransform`]. Transforms are registered in a
//! [`TransformRegistry`] and looked up by name, so the pipeline topology
//! can refer to them without knowing their types.

use cdm_model::SourceEntity;

use crate::context::TransformContext;
use crate::domains::{
    CareSiteTransform, EventTransform, ObservationPeriodTransform, ObservationTransform,
    PersonTransform, ProviderTransform, ReclassifyTransform, VisitTransform,
};
use crate::error::Result;
use crate::report::TransformReport;

/// A transform from staged rows into normalized target tables.
///
/// Every run rewrites its targets from scratch, so running a transform
/// twice leaves the same rows as running it once.
pub trait DomainTransform: Send + Sync {
    /// Stage name, e.g. `condition_occurrence`.
    fn name(&self) -> &'static str;

    /// Staged entity the transform reads, if any.
    fn source(&self) -> Option<SourceEntity>;

    /// Tables the transform rewrites.
    fn targets(&self) -> &'static [&'static str];

    fn run(&self, ctx: &TransformContext) -> Result<TransformReport>;
}

/// Registry of transforms indexed by name.
pub struct TransformRegistry {
    transforms: Vec<Box<dyn DomainTransform>>,
}

impl TransformRegistry {
    pub fn empty() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    /// Registers a transform, replacing one with the same name.
    pub fn register(&mut self, transform: Box<dyn DomainTransform>) {
        self.transforms
            .retain(|existing| existing.name() != transform.name());
        self.transforms.push(transform);
    }

    pub fn get(&self, name: &str) -> Option<&dyn DomainTransform> {
        self.transforms
            .iter()
            .find(|transform| transform.name() == name)
            .map(|transform| transform.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(PersonTransform));
        registry.register(Box::new(CareSiteTransform));
        registry.register(Box::new(ProviderTransform));
        registry.register(Box::new(VisitTransform));
        registry.register(Box::new(EventTransform::conditions()));
        registry.register(Box::new(EventTransform::drugs()));
        registry.register(Box::new(EventTransform::procedures()));
        registry.register(Box::new(ObservationTransform));
        registry.register(Box::new(ObservationPeriodTransform));
        registry.register(Box::new(ReclassifyTransform));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_domain() {
        let registry = TransformRegistry::default();
        assert_eq!(
            registry.names(),
            vec![
                "person",
                "care_site",
                "provider",
                "visit_occurrence",
                "condition_occurrence",
                "drug_exposure",
                "procedure_occurrence",
                "observations",
                "observation_period",
                "reclassify",
            ]
        );
        assert_eq!(
            registry.get("observations").unwrap().targets(),
            &["measurement", "observation"]
        );
        assert!(registry.get("dm").is_none());
    }
}
