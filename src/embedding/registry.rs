//! Process-wide registry of named embedding providers.
//!
//! Live indices reference providers by name; the registry tracks those references and refuses
//! to remove or re-dimension a provider that a live index still depends on. The manager binds a
//! reference when an index is created or resumed and releases it when the index is destroyed or
//! offloaded.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{EmbeddingProvider, ProviderKind};
use crate::events::{Event, EventBus, EventKind};

/// Errors raised by registry mutations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The provider is referenced by at least one live index.
    #[error("Provider '{id}' is in use by {count} live index(es)")]
    InUse {
        /// Provider identifier.
        id: String,
        /// Number of live indices holding a reference.
        count: usize,
    },
    /// Replacing the provider would change its dimension while references exist.
    #[error(
        "Changing dimension of provider '{id}' from {current} to {requested} would break existing embeddings"
    )]
    DimensionChange {
        /// Provider identifier.
        id: String,
        /// Dimension of the registered provider.
        current: usize,
        /// Dimension of the replacement.
        requested: usize,
    },
}

struct RegistryEntry {
    provider: EmbeddingProvider,
    created: OffsetDateTime,
    last_used: Option<OffsetDateTime>,
}

/// Read-only view of a registry entry plus its live usage.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    /// Registry identifier.
    pub id: String,
    /// Provider kind tag.
    pub kind: ProviderKind,
    /// Output dimension.
    pub dimension: usize,
    /// RFC 3339 creation instant.
    pub created: String,
    /// RFC 3339 instant of the most recent resolution, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<String>,
    /// Number of live indices currently referencing the provider.
    pub usage: usize,
}

/// Aggregate registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    /// Total registered providers.
    pub total: usize,
    /// Count of generic providers.
    pub generic: usize,
    /// Count of remote providers.
    pub remote: usize,
    /// Providers referenced by at least one live index.
    pub in_use: usize,
    /// Per-provider snapshots sorted by usage, recency, then age.
    pub providers: Vec<ProviderSnapshot>,
}

/// Named, process-wide table of embedding providers.
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    references: RwLock<HashMap<String, HashSet<String>>>,
    events: Arc<EventBus>,
}

impl ProviderRegistry {
    /// Create an empty registry publishing lifecycle events on the given bus.
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            references: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register a provider under `id`. Returns false when the id is already taken.
    pub fn add(&self, id: impl Into<String>, provider: EmbeddingProvider) -> bool {
        let id = id.into();
        {
            let mut entries = self.entries.write().expect("registry lock poisoned");
            if entries.contains_key(&id) {
                return false;
            }
            entries.insert(
                id.clone(),
                RegistryEntry {
                    provider,
                    created: OffsetDateTime::now_utc(),
                    last_used: None,
                },
            );
        }
        tracing::debug!(provider = %id, "Provider registered");
        self.events.emit(&Event::for_provider(
            EventKind::ProviderAdded,
            id,
            json!({}),
        ));
        true
    }

    /// Remove the provider under `id`.
    ///
    /// Returns `Ok(false)` when absent and fails while any live index references the provider.
    pub fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        let count = self.reference_count(id);
        if count > 0 {
            return Err(RegistryError::InUse {
                id: id.to_string(),
                count,
            });
        }

        let removed = {
            let mut entries = self.entries.write().expect("registry lock poisoned");
            entries.remove(id).is_some()
        };
        if removed {
            tracing::debug!(provider = %id, "Provider removed");
            self.events.emit(&Event::for_provider(
                EventKind::ProviderRemoved,
                id.to_string(),
                json!({}),
            ));
        }
        Ok(removed)
    }

    /// Replace the provider under `id`, keeping its creation instant.
    ///
    /// Returns `Ok(false)` when absent. Changing the dimension while live references exist is
    /// rejected because already-stored vectors would no longer match the provider's output.
    pub fn update(&self, id: &str, provider: EmbeddingProvider) -> Result<bool, RegistryError> {
        let old_snapshot = {
            let entries = self.entries.read().expect("registry lock poisoned");
            match entries.get(id) {
                Some(entry) => json!({
                    "kind": entry.provider.kind,
                    "dimension": entry.provider.dimension,
                }),
                None => return Ok(false),
            }
        };

        let references = self.reference_count(id);
        {
            let mut entries = self.entries.write().expect("registry lock poisoned");
            let Some(entry) = entries.get_mut(id) else {
                return Ok(false);
            };
            if references > 0 && entry.provider.dimension != provider.dimension {
                return Err(RegistryError::DimensionChange {
                    id: id.to_string(),
                    current: entry.provider.dimension,
                    requested: provider.dimension,
                });
            }
            entry.provider = provider;
        }

        let new_snapshot = {
            let entries = self.entries.read().expect("registry lock poisoned");
            entries.get(id).map(|entry| {
                json!({
                    "kind": entry.provider.kind,
                    "dimension": entry.provider.dimension,
                })
            })
        };
        tracing::debug!(provider = %id, "Provider updated");
        self.events.emit(&Event::for_provider(
            EventKind::ProviderUpdated,
            id.to_string(),
            json!({ "old": old_snapshot, "new": new_snapshot }),
        ));
        Ok(true)
    }

    /// Read-only lookup by id.
    pub fn get(&self, id: &str) -> Option<EmbeddingProvider> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.get(id).map(|entry| entry.provider.clone())
    }

    /// Lookup for embedding resolution: returns the provider and bumps `last_used`.
    pub fn resolve(&self, id: &str) -> Option<EmbeddingProvider> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.get_mut(id).map(|entry| {
            entry.last_used = Some(OffsetDateTime::now_utc());
            entry.provider.clone()
        })
    }

    /// Whether a provider is registered under `id`.
    pub fn has(&self, id: &str) -> bool {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.contains_key(id)
    }

    /// Snapshot every registered provider.
    pub fn list(&self) -> Vec<ProviderSnapshot> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let references = self.references.read().expect("registry lock poisoned");
        entries
            .iter()
            .map(|(id, entry)| snapshot(id, entry, &references))
            .collect()
    }

    /// Record that a live index references the provider.
    pub fn bind(&self, provider_id: &str, index_id: &str) {
        let mut references = self.references.write().expect("registry lock poisoned");
        references
            .entry(provider_id.to_string())
            .or_default()
            .insert(index_id.to_string());
    }

    /// Drop the reference a live index held on the provider.
    pub fn release(&self, provider_id: &str, index_id: &str) {
        let mut references = self.references.write().expect("registry lock poisoned");
        if let Some(indices) = references.get_mut(provider_id) {
            indices.remove(index_id);
            if indices.is_empty() {
                references.remove(provider_id);
            }
        }
    }

    /// Number of live indices referencing the provider.
    pub fn reference_count(&self, provider_id: &str) -> usize {
        let references = self.references.read().expect("registry lock poisoned");
        references
            .get(provider_id)
            .map(HashSet::len)
            .unwrap_or_default()
    }

    /// Aggregate statistics over the registry.
    pub fn stats(&self) -> RegistryStats {
        let mut providers = self.list();
        providers.sort_by(|a, b| {
            b.usage
                .cmp(&a.usage)
                .then_with(|| b.last_used.cmp(&a.last_used))
                .then_with(|| b.created.cmp(&a.created))
        });

        let generic = providers
            .iter()
            .filter(|p| p.kind == ProviderKind::Generic)
            .count();
        let remote = providers.len() - generic;
        let in_use = providers.iter().filter(|p| p.usage > 0).count();

        RegistryStats {
            total: providers.len(),
            generic,
            remote,
            in_use,
            providers,
        }
    }
}

fn snapshot(
    id: &str,
    entry: &RegistryEntry,
    references: &HashMap<String, HashSet<String>>,
) -> ProviderSnapshot {
    ProviderSnapshot {
        id: id.to_string(),
        kind: entry.provider.kind,
        dimension: entry.provider.dimension,
        created: format_rfc3339(entry.created),
        last_used: entry.last_used.map(format_rfc3339),
        usage: references.get(id).map(HashSet::len).unwrap_or_default(),
    }
}

fn format_rfc3339(instant: OffsetDateTime) -> String {
    instant
        .format(&Rfc3339)
        .unwrap_or_else(|_| instant.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock_embedding;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(Arc::new(EventBus::new()))
    }

    fn provider(dimension: usize) -> EmbeddingProvider {
        EmbeddingProvider::from_fn("test", dimension, move |text| {
            mock_embedding(text).into_iter().take(dimension).collect()
        })
    }

    #[test]
    fn add_rejects_duplicates() {
        let registry = registry();
        assert!(registry.add("p", provider(8)));
        assert!(!registry.add("p", provider(8)));
        assert!(registry.has("p"));
    }

    #[test]
    fn remove_fails_while_referenced() {
        let registry = registry();
        registry.add("p", provider(8));
        registry.bind("p", "ws:a");

        let error = registry.remove("p").unwrap_err();
        assert!(matches!(error, RegistryError::InUse { count: 1, .. }));

        registry.release("p", "ws:a");
        assert!(registry.remove("p").unwrap());
        assert!(!registry.remove("p").unwrap());
    }

    #[test]
    fn update_guards_dimension_changes() {
        let registry = registry();
        registry.add("p", provider(8));
        registry.bind("p", "ws:a");

        let error = registry.update("p", provider(16)).unwrap_err();
        assert!(matches!(
            error,
            RegistryError::DimensionChange {
                current: 8,
                requested: 16,
                ..
            }
        ));

        // Same dimension is always allowed, and any dimension once released.
        assert!(registry.update("p", provider(8)).unwrap());
        registry.release("p", "ws:a");
        assert!(registry.update("p", provider(16)).unwrap());
        assert_eq!(registry.get("p").unwrap().dimension, 16);
    }

    #[test]
    fn resolve_touches_last_used_but_get_does_not() {
        let registry = registry();
        registry.add("p", provider(8));

        registry.get("p").unwrap();
        assert!(registry.list()[0].last_used.is_none());

        registry.resolve("p").unwrap();
        assert!(registry.list()[0].last_used.is_some());
    }

    #[test]
    fn stats_sort_by_usage_first() {
        let registry = registry();
        registry.add("cold", provider(8));
        registry.add("hot", provider(8));
        registry.bind("hot", "ws:a");
        registry.bind("hot", "ws:b");

        let stats = registry.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.providers[0].id, "hot");
        assert_eq!(stats.providers[0].usage, 2);
    }
}
