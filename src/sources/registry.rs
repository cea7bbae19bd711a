//! Registry for managing database adapters.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Source, SourceError};
use crate::config::Config;
use crate::models::DatabaseId;

bitflags::bitflags! {
    /// Capabilities that a source can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        const SEARCH = 1 << 0;
        const FIELD_TAGS = 1 << 1;
        const PUBLICATION_TYPE_FILTER = 1 << 2;
        const MESH_TERMS = 1 << 3;
        const QUERY_TRANSLATION = 1 << 4;
    }
}

/// Registry for all available database adapters
///
/// Each adapter is registered once and owns its own HTTP client and rate
/// limiter, so concurrent searches against different databases never contend.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<DatabaseId, Arc<dyn Source>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every compiled-in adapter enabled by the configuration
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let mut registry = Self::new();

        #[cfg(feature = "source-pubmed")]
        if config.sources.pubmed.enabled {
            registry.register(Arc::new(super::PubMedSource::from_config(config)?));
        }

        #[cfg(feature = "source-pmc")]
        if config.sources.pmc.enabled {
            registry.register(Arc::new(super::PmcSource::from_config(config)?));
        }

        #[cfg(feature = "source-koreamed")]
        if config.sources.koreamed.enabled {
            registry.register(Arc::new(super::KoreaMedSource::from_config(config)?));
        }

        tracing::debug!(
            sources = ?registry.ids().collect::<Vec<_>>(),
            "Source registry initialized"
        );

        Ok(registry)
    }

    /// Register a new source, replacing any adapter for the same database
    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.insert(source.id(), source);
    }

    /// Get a source by database
    pub fn get(&self, id: DatabaseId) -> Option<&Arc<dyn Source>> {
        self.sources.get(&id)
    }

    /// Get a source by database, returning an error if not registered
    pub fn get_required(&self, id: DatabaseId) -> Result<&Arc<dyn Source>, SourceError> {
        self.get(id).ok_or_else(|| {
            SourceError::InvalidRequest(format!("Source '{}' is not enabled", id.id()))
        })
    }

    /// Get all registered sources in database order
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.values()
    }

    /// Get all registered database ids
    pub fn ids(&self) -> impl Iterator<Item = DatabaseId> + '_ {
        self.sources.keys().copied()
    }

    /// Get sources that support a specific capability
    pub fn with_capability(&self, capability: SourceCapabilities) -> Vec<&Arc<dyn Source>> {
        self.all()
            .filter(|s| s.capabilities().contains(capability))
            .collect()
    }

    /// Check if a source exists
    pub fn has(&self, id: DatabaseId) -> bool {
        self.sources.contains_key(&id)
    }

    /// Get the number of registered sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockSource;

    #[test]
    fn test_registry_from_default_config() {
        let registry = SourceRegistry::from_config(&Config::default()).unwrap();

        let expected = [
            (cfg!(feature = "source-pubmed"), DatabaseId::PubMed),
            (cfg!(feature = "source-pmc"), DatabaseId::Pmc),
            (cfg!(feature = "source-koreamed"), DatabaseId::KoreaMed),
        ];
        for (compiled, id) in expected {
            assert_eq!(registry.has(id), compiled, "{} registration", id);
        }
    }

    #[test]
    fn test_registry_respects_disabled_sources() {
        let mut config = Config::default();
        config.sources.koreamed.enabled = false;

        let registry = SourceRegistry::from_config(&config).unwrap();
        assert!(!registry.has(DatabaseId::KoreaMed));
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = SourceRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(MockSource::new(DatabaseId::Pmc)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(DatabaseId::Pmc).unwrap().id(), DatabaseId::Pmc);
        assert!(registry.get_required(DatabaseId::PubMed).is_err());
    }

    #[cfg(all(feature = "source-pubmed", feature = "source-koreamed"))]
    #[test]
    fn test_capabilities() {
        let registry = SourceRegistry::from_config(&Config::default()).unwrap();

        let pubmed = registry.get(DatabaseId::PubMed).unwrap();
        assert!(pubmed.capabilities().contains(SourceCapabilities::MESH_TERMS));
        assert!(pubmed.supports_publication_type_filter());

        let koreamed = registry.get(DatabaseId::KoreaMed).unwrap();
        assert!(!koreamed.supports_publication_type_filter());
        assert!(!koreamed.capabilities().contains(SourceCapabilities::FIELD_TAGS));
    }
}
