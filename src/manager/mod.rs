//! Index lifecycle scheduling and request routing.
//!
//! The manager owns the map of live indices, the activity clock, the inactivity timers, the
//! offload directory, and the provider registry handle. It is the only component that
//! materializes, evicts, or destroys an index; sandboxes never outlive their entry here.
//!
//! Concurrency contract: operations against different ids run in parallel; operations against
//! the same id serialize on a per-entry lock held across the sandbox round-trip. `create_index`
//! holds the manager-wide create lock only for the atomic live/on-disk decision and the
//! placeholder insert; sandbox initialization and hydration run with that lock released.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

mod activity;
pub mod types;

use activity::ActivityClock;
pub use types::{
    CreateIndexOptions, DocumentInput, IndexError, LiveIndexInfo, ManagerStats, MonitoringStats,
    QueryInput, namespace_of,
};

use crate::config::Settings;
use crate::embedding::{
    EmbeddingClientError, EmbeddingProvider, MOCK_MODEL_NAME, ProviderRegistry,
};
use crate::events::{Event, EventBus, EventKind};
use crate::metrics::ServiceMetrics;
use crate::offload::{OffloadMetadata, OffloadStore};
use crate::sandbox::{SandboxDocument, SandboxHandle, SearchHit, SearchOptions};

/// The orchestrator hosting every live index and the cold-storage lifecycle.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct VectorIndexManager {
    inner: Arc<ManagerInner>,
}

enum Slot {
    /// Reserved by an in-flight `create_index`; blocks concurrent creates for the same id.
    Pending,
    Ready(Arc<LiveEntry>),
}

struct EntryState {
    document_count: u64,
    embedding_dimension: Option<usize>,
    inactivity_timeout: Duration,
    activity_monitoring: bool,
}

struct LiveEntry {
    id: String,
    created: String,
    options: CreateIndexOptions,
    from_offload: bool,
    sandbox: SandboxHandle,
    op_lock: AsyncMutex<()>,
    state: StdMutex<EntryState>,
}

impl LiveEntry {
    fn snapshot(&self) -> LiveIndexInfo {
        let state = self.state.lock().expect("entry state poisoned");
        LiveIndexInfo {
            id: self.id.clone(),
            created: self.created.clone(),
            document_count: state.document_count,
            embedding_dimension: state.embedding_dimension,
            from_offload: self.from_offload,
            inactivity_timeout: state.inactivity_timeout.as_millis() as u64,
            activity_monitoring: state.activity_monitoring,
        }
    }

    fn monitoring_settings(&self) -> (Duration, bool) {
        let state = self.state.lock().expect("entry state poisoned");
        (state.inactivity_timeout, state.activity_monitoring)
    }

    /// Effective options with the mutable scheduling fields folded back in.
    fn effective_options_value(&self) -> serde_json::Value {
        let mut options = self.options.clone();
        {
            let state = self.state.lock().expect("entry state poisoned");
            options.inactivity_timeout = Some(state.inactivity_timeout.as_millis() as u64);
            options.enable_activity_monitoring = Some(state.activity_monitoring);
        }
        options.resume = false;
        serde_json::to_value(&options).unwrap_or_else(|_| json!({}))
    }
}

struct ManagerInner {
    settings: Settings,
    live: StdRwLock<HashMap<String, Slot>>,
    create_lock: AsyncMutex<()>,
    clock: ActivityClock,
    store: OffloadStore,
    registry: Arc<ProviderRegistry>,
    events: Arc<EventBus>,
    metrics: Arc<ServiceMetrics>,
    monitoring_enabled: AtomicBool,
    default_provider: StdRwLock<Option<EmbeddingProvider>>,
}

impl VectorIndexManager {
    /// Build a manager over the configured offload directory.
    pub fn new(settings: Settings) -> Result<Self, IndexError> {
        let store = OffloadStore::new(&settings.offload_dir)?;
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(ProviderRegistry::new(Arc::clone(&events)));
        let monitoring = settings.activity_monitoring;

        tracing::info!(
            offload_dir = %settings.offload_dir.display(),
            max_instances = settings.max_instances,
            monitoring,
            "Vector index manager ready"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                settings,
                live: StdRwLock::new(HashMap::new()),
                create_lock: AsyncMutex::new(()),
                clock: ActivityClock::new(),
                store,
                registry,
                events,
                metrics: Arc::new(ServiceMetrics::new()),
                monitoring_enabled: AtomicBool::new(monitoring),
                default_provider: StdRwLock::new(None),
            }),
        })
    }

    /// Lifecycle event bus shared with the registry.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// The provider registry indices reference by name.
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.inner.registry
    }

    /// Settings this manager was built with.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Install an inline default provider, consulted after the named registry defaults.
    pub fn set_default_provider(&self, provider: Option<EmbeddingProvider>) {
        *self
            .inner
            .default_provider
            .write()
            .expect("default provider lock poisoned") = provider;
    }

    /// Create a live index from scratch, or hydrate an offloaded one when `resume` is set.
    ///
    /// Returns the canonical identifier. Exactly one of two concurrent calls for the same id
    /// succeeds; the decision between the new and hydrate paths is atomic with respect to the
    /// live map and the on-disk descriptor set.
    pub async fn create_index(&self, options: CreateIndexOptions) -> Result<String, IndexError> {
        let inner = &self.inner;
        let base = options
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let id = match &options.namespace {
            Some(namespace) => format!("{namespace}:{base}"),
            None => base,
        };

        {
            let live = inner.live.read().expect("live map poisoned");
            if live.len() >= inner.settings.max_instances {
                return Err(IndexError::Capacity(inner.settings.max_instances));
            }
        }

        let namespace = options
            .namespace
            .clone()
            .or_else(|| namespace_of(&id).map(str::to_string));
        if let Some(allowed) = &inner.settings.allowed_namespaces
            && !namespace
                .as_deref()
                .is_some_and(|candidate| allowed.iter().any(|entry| entry == candidate))
        {
            return Err(IndexError::NamespaceForbidden(
                namespace.unwrap_or_default(),
            ));
        }

        let hydrate;
        {
            let _create = inner.create_lock.lock().await;
            let mut live = inner.live.write().expect("live map poisoned");
            if live.len() >= inner.settings.max_instances {
                return Err(IndexError::Capacity(inner.settings.max_instances));
            }
            if live.contains_key(&id) {
                return Err(if options.resume {
                    IndexError::AlreadyRunning(id)
                } else {
                    IndexError::Exists(id)
                });
            }
            let on_disk = inner.store.contains(&id);
            match (on_disk, options.resume) {
                (true, false) => return Err(IndexError::ExistsOffloaded(id)),
                (false, true) => return Err(IndexError::NotFound(id)),
                _ => {}
            }
            hydrate = on_disk;
            live.insert(id.clone(), Slot::Pending);
        }

        let built = if hydrate {
            inner.hydrate_index(&id, options).await
        } else {
            inner.new_index(&id, options).await
        };

        let (entry, offloaded_at) = match built {
            Ok(parts) => parts,
            Err(error) => {
                let mut live = inner.live.write().expect("live map poisoned");
                live.remove(&id);
                return Err(error);
            }
        };

        {
            let mut live = inner.live.write().expect("live map poisoned");
            live.insert(id.clone(), Slot::Ready(Arc::clone(&entry)));
        }
        inner.clock.prime(&id);
        arm_timer(inner, &entry);

        match offloaded_at {
            Some(offloaded_at) => {
                inner.metrics.record_resume();
                tracing::info!(index_id = %id, "Index resumed from offload");
                inner.events.emit(&Event::for_index(
                    EventKind::IndexResumed,
                    id.clone(),
                    json!({ "offloadedAt": offloaded_at, "resumedAt": now_rfc3339() }),
                ));
            }
            None => {
                tracing::info!(index_id = %id, namespace = ?namespace, "Index created");
                inner.events.emit(&Event::for_index(
                    EventKind::IndexCreated,
                    id.clone(),
                    json!({ "namespace": namespace }),
                ));
            }
        }

        Ok(id)
    }

    /// Enrich and forward a batch of documents to the index's sandbox.
    ///
    /// Documents with a vector pass through unchanged; text-only documents are embedded via
    /// the provider resolution chain. Returns the number of documents accepted.
    pub async fn add_documents(
        &self,
        id: &str,
        documents: Vec<DocumentInput>,
    ) -> Result<usize, IndexError> {
        let inner = &self.inner;
        let entry = inner
            .get_ready(id)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;
        bump_activity(inner, &entry);
        let _op = entry.op_lock.lock().await;
        if !inner.is_current(&entry) {
            return Err(IndexError::NotFound(id.to_string()));
        }

        let established = entry
            .state
            .lock()
            .expect("entry state poisoned")
            .embedding_dimension;

        let mut batch: Vec<SandboxDocument> = Vec::with_capacity(documents.len());
        let mut pending: Vec<(usize, String)> = Vec::new();
        for document in documents {
            let doc_id = document
                .id
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            if let Some(vector) = document.vector {
                if let Some(expected) = established
                    && vector.len() != expected
                {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                batch.push(SandboxDocument {
                    id: doc_id,
                    vector: Some(vector),
                    text: document.text,
                    metadata: document.metadata,
                });
            } else if let Some(text) = document.text {
                batch.push(SandboxDocument {
                    id: doc_id,
                    vector: None,
                    text: Some(text.clone()),
                    metadata: document.metadata,
                });
                pending.push((batch.len() - 1, text));
            } else {
                return Err(IndexError::DocumentWithoutContent(doc_id));
            }
        }

        if !pending.is_empty() {
            let provider = inner.resolve_provider(&entry)?;
            let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
            let vectors =
                tokio::time::timeout(inner.settings.ingest_timeout, provider.embed(texts))
                    .await
                    .map_err(|_| IndexError::Timeout(inner.settings.ingest_timeout))??;
            if vectors.len() != pending.len() {
                return Err(IndexError::Embedding(
                    EmbeddingClientError::GenerationFailed(format!(
                        "expected {} embeddings, got {}",
                        pending.len(),
                        vectors.len()
                    )),
                ));
            }
            for ((position, _), vector) in pending.iter().zip(vectors) {
                if let Some(expected) = established
                    && vector.len() != expected
                {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                batch[*position].vector = Some(vector);
            }
        }

        let first_dimension = batch
            .iter()
            .find_map(|doc| doc.vector.as_ref().map(Vec::len));

        let added = tokio::time::timeout(
            inner.settings.ingest_timeout,
            entry.sandbox.add_documents(batch),
        )
        .await
        .map_err(|_| IndexError::Timeout(inner.settings.ingest_timeout))?
        .map_err(IndexError::from)?;

        let document_count = {
            let mut state = entry.state.lock().expect("entry state poisoned");
            state.document_count += added as u64;
            if state.embedding_dimension.is_none() {
                state.embedding_dimension = first_dimension;
            }
            state.document_count
        };

        inner.metrics.record_ingest(added as u64);
        tracing::debug!(index_id = %id, added, document_count, "Documents indexed");
        inner.events.emit(&Event::for_index(
            EventKind::DocumentAdded,
            id.to_string(),
            json!({ "count": added, "documentCount": document_count }),
        ));
        Ok(added)
    }

    /// Answer a similarity query, embedding the input first when it is text.
    pub async fn query_index(
        &self,
        id: &str,
        input: QueryInput,
        options: SearchOptions,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let inner = &self.inner;
        let entry = inner
            .get_ready(id)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;
        bump_activity(inner, &entry);
        let _op = entry.op_lock.lock().await;
        if !inner.is_current(&entry) {
            return Err(IndexError::NotFound(id.to_string()));
        }

        let vector = match input {
            QueryInput::Vector(vector) => vector,
            QueryInput::Text(text) => {
                let provider = inner.resolve_provider(&entry)?;
                let mut vectors =
                    tokio::time::timeout(inner.settings.query_timeout, provider.embed(vec![text]))
                        .await
                        .map_err(|_| IndexError::Timeout(inner.settings.query_timeout))??;
                vectors.pop().ok_or_else(|| {
                    IndexError::Embedding(EmbeddingClientError::GenerationFailed(
                        "provider returned no vectors".to_string(),
                    ))
                })?
            }
        };

        let hits = tokio::time::timeout(
            inner.settings.query_timeout,
            entry.sandbox.query(vector, options),
        )
        .await
        .map_err(|_| IndexError::Timeout(inner.settings.query_timeout))?
        .map_err(IndexError::from)?;

        inner.metrics.record_query();
        inner.events.emit(&Event::for_index(
            EventKind::QueryCompleted,
            id.to_string(),
            json!({ "resultCount": hits.len() }),
        ));
        Ok(hits)
    }

    /// Remove documents by id, ignoring unknown ids. Returns the count actually removed.
    pub async fn remove_documents(
        &self,
        id: &str,
        document_ids: Vec<String>,
    ) -> Result<usize, IndexError> {
        let inner = &self.inner;
        let entry = inner
            .get_ready(id)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;
        bump_activity(inner, &entry);
        let _op = entry.op_lock.lock().await;
        if !inner.is_current(&entry) {
            return Err(IndexError::NotFound(id.to_string()));
        }

        let removed = tokio::time::timeout(
            inner.settings.ingest_timeout,
            entry.sandbox.remove_documents(document_ids),
        )
        .await
        .map_err(|_| IndexError::Timeout(inner.settings.ingest_timeout))?
        .map_err(IndexError::from)?;

        let document_count = {
            let mut state = entry.state.lock().expect("entry state poisoned");
            state.document_count = state.document_count.saturating_sub(removed as u64);
            state.document_count
        };

        inner.events.emit(&Event::for_index(
            EventKind::DocumentRemoved,
            id.to_string(),
            json!({ "removed": removed, "documentCount": document_count }),
        ));
        Ok(removed)
    }

    /// Bump the index's activity and report whether it is live.
    pub fn ping(&self, id: &str) -> bool {
        let inner = &self.inner;
        match inner.get_ready(id) {
            Some(entry) => {
                bump_activity(inner, &entry);
                true
            }
            None => false,
        }
    }

    /// Write the index's state to its cold form and release the live entry.
    ///
    /// Safe against concurrent operations and destroys: in-flight work on the same id
    /// completes first, and persistence failures leave the live entry intact.
    pub async fn offload(&self, id: &str) -> Result<(), IndexError> {
        if self.inner.offload_entry(id).await? {
            Ok(())
        } else {
            Err(IndexError::NotFound(id.to_string()))
        }
    }

    /// Synonym for [`VectorIndexManager::offload`] on a live id.
    pub async fn manual_offload(&self, id: &str) -> Result<(), IndexError> {
        self.offload(id).await
    }

    /// Destroy a live index without touching its on-disk files.
    pub async fn destroy_index(&self, id: &str) -> Result<(), IndexError> {
        let inner = &self.inner;
        let entry = inner
            .get_ready(id)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;
        let _op = entry.op_lock.lock().await;
        {
            let mut live = inner.live.write().expect("live map poisoned");
            let still_current = matches!(
                live.get(id),
                Some(Slot::Ready(current)) if Arc::ptr_eq(current, &entry)
            );
            if !still_current {
                return Err(IndexError::NotFound(id.to_string()));
            }
            live.remove(id);
        }
        inner.clock.remove(id);
        entry.sandbox.destroy().await;
        inner.release_provider(&entry);

        let document_count = entry
            .state
            .lock()
            .expect("entry state poisoned")
            .document_count;
        tracing::info!(index_id = %id, document_count, "Index destroyed");
        inner.events.emit(&Event::for_index(
            EventKind::IndexDestroyed,
            id.to_string(),
            json!({ "documentCount": document_count }),
        ));
        Ok(())
    }

    /// Destroy every live index, optionally restricted to one namespace.
    ///
    /// Returns the number of indices destroyed.
    pub async fn destroy_all(&self, namespace: Option<&str>) -> usize {
        let ids: Vec<String> = {
            let live = self.inner.live.read().expect("live map poisoned");
            live.iter()
                .filter(|(id, slot)| {
                    matches!(slot, Slot::Ready(_))
                        && namespace.is_none_or(|ns| namespace_of(id) == Some(ns))
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        let results = join_all(ids.iter().map(|id| self.destroy_index(id))).await;
        results.into_iter().filter(Result::is_ok).count()
    }

    /// Delete the cold files of an offloaded index. Returns whether a descriptor existed.
    pub fn delete_offloaded_index(&self, id: &str) -> Result<bool, IndexError> {
        Ok(self.inner.store.delete(id)?)
    }

    /// Descriptors of every offloaded index, newest offload first.
    pub fn list_offloaded_indices(&self, namespace: Option<&str>) -> Vec<OffloadMetadata> {
        self.inner.store.list(namespace)
    }

    /// Snapshot of one live index, if the id is live.
    pub fn get_instance(&self, id: &str) -> Option<LiveIndexInfo> {
        self.inner.get_ready(id).map(|entry| entry.snapshot())
    }

    /// Snapshots of every live index, sorted by id.
    pub fn list_indices(&self, namespace: Option<&str>) -> Vec<LiveIndexInfo> {
        let live = self.inner.live.read().expect("live map poisoned");
        let mut infos: Vec<LiveIndexInfo> = live
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Ready(entry)
                    if namespace.is_none_or(|ns| namespace_of(id) == Some(ns)) =>
                {
                    Some(entry.snapshot())
                }
                _ => None,
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Toggle inactivity monitoring globally.
    ///
    /// Turning it off cancels every pending timer but leaves per-index flags untouched;
    /// turning it back on re-arms timers according to each index's own settings.
    pub fn set_activity_monitoring(&self, enabled: bool) {
        let inner = &self.inner;
        inner.monitoring_enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            let entries: Vec<Arc<LiveEntry>> = {
                let live = inner.live.read().expect("live map poisoned");
                live.values()
                    .filter_map(|slot| match slot {
                        Slot::Ready(entry) => Some(Arc::clone(entry)),
                        Slot::Pending => None,
                    })
                    .collect()
            };
            for entry in entries {
                arm_timer(inner, &entry);
            }
        } else {
            inner.clock.cancel_all_timers();
        }
        tracing::info!(enabled, "Activity monitoring toggled");
    }

    /// Update one index's eviction deadline; zero disables eviction for it.
    pub fn set_inactivity_timeout(&self, id: &str, timeout: Duration) -> Result<(), IndexError> {
        let inner = &self.inner;
        let entry = inner
            .get_ready(id)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;
        {
            let mut state = entry.state.lock().expect("entry state poisoned");
            state.inactivity_timeout = timeout;
        }
        inner.clock.cancel_timer(id);
        arm_timer(inner, &entry);
        Ok(())
    }

    /// Time remaining until the index would be offloaded, or `None` when monitoring does not
    /// apply to it.
    pub fn time_until_offload(&self, id: &str) -> Option<Duration> {
        let inner = &self.inner;
        let entry = inner.get_ready(id)?;
        if !inner.monitoring_enabled.load(Ordering::SeqCst) {
            return None;
        }
        let (timeout, monitoring) = entry.monitoring_settings();
        if !monitoring || timeout.is_zero() {
            return None;
        }
        let last = inner.clock.last_activity(id)?;
        let deadline = last.checked_add(timeout)?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    /// Aggregate statistics across the live map and the scheduler.
    pub fn stats(&self) -> ManagerStats {
        let inner = &self.inner;
        let mut total_documents = 0_u64;
        let mut namespaces: BTreeMap<String, usize> = BTreeMap::new();
        let live_count;
        {
            let live = inner.live.read().expect("live map poisoned");
            live_count = live.len();
            for (id, slot) in live.iter() {
                if let Slot::Ready(entry) = slot {
                    total_documents += entry
                        .state
                        .lock()
                        .expect("entry state poisoned")
                        .document_count;
                }
                let namespace = namespace_of(id).unwrap_or("default").to_string();
                *namespaces.entry(namespace).or_default() += 1;
            }
        }

        ManagerStats {
            live_count,
            total_documents,
            max_instances: inner.settings.max_instances,
            default_embedding_model: inner.settings.default_embedding_model.clone(),
            default_provider_name: inner.settings.default_provider_name.clone(),
            namespaces,
            monitoring: MonitoringStats {
                enabled: inner.monitoring_enabled.load(Ordering::SeqCst),
                default_timeout: inner.settings.default_inactivity_timeout.as_millis() as u64,
                active_timers: inner.clock.active_timers(),
                offload_directory: inner.store.dir().display().to_string(),
            },
            counters: inner.metrics.snapshot(),
        }
    }
}

impl ManagerInner {
    fn get_ready(&self, id: &str) -> Option<Arc<LiveEntry>> {
        let live = self.live.read().expect("live map poisoned");
        match live.get(id) {
            Some(Slot::Ready(entry)) => Some(Arc::clone(entry)),
            _ => None,
        }
    }

    /// Whether this exact entry is still the live one for its id.
    fn is_current(&self, entry: &Arc<LiveEntry>) -> bool {
        let live = self.live.read().expect("live map poisoned");
        matches!(live.get(&entry.id), Some(Slot::Ready(current)) if Arc::ptr_eq(current, entry))
    }

    /// The offload protocol. Returns `Ok(false)` when the id is not live (idempotent).
    async fn offload_entry(&self, id: &str) -> Result<bool, IndexError> {
        let Some(entry) = self.get_ready(id) else {
            return Ok(false);
        };
        let _op = entry.op_lock.lock().await;
        if !self.is_current(&entry) {
            return Ok(false);
        }

        let documents = tokio::time::timeout(
            self.settings.query_timeout,
            entry.sandbox.get_documents(),
        )
        .await
        .map_err(|_| IndexError::Timeout(self.settings.query_timeout))?
        .map_err(IndexError::from)?;

        let dimension = entry
            .state
            .lock()
            .expect("entry state poisoned")
            .embedding_dimension;
        let metadata = self.store.write(
            id,
            &entry.created,
            entry.effective_options_value(),
            dimension,
            &documents,
        )?;

        {
            let mut live = self.live.write().expect("live map poisoned");
            let still_current = matches!(
                live.get(id),
                Some(Slot::Ready(current)) if Arc::ptr_eq(current, &entry)
            );
            if !still_current {
                return Ok(false);
            }
            live.remove(id);
        }
        self.clock.remove(id);
        entry.sandbox.destroy().await;
        self.release_provider(&entry);
        self.metrics.record_offload();

        tracing::info!(
            index_id = %id,
            document_count = metadata.document_count,
            offloaded_at = %metadata.offloaded_at,
            "Index offloaded"
        );
        self.events.emit(&Event::for_index(
            EventKind::IndexOffloaded,
            id.to_string(),
            json!({
                "documentCount": metadata.document_count,
                "offloadedAt": metadata.offloaded_at,
            }),
        ));
        Ok(true)
    }

    async fn new_index(
        &self,
        id: &str,
        options: CreateIndexOptions,
    ) -> Result<(Arc<LiveEntry>, Option<String>), IndexError> {
        self.bind_provider(id, &options)?;
        let sandbox = SandboxHandle::spawn(id);
        let entry = self.build_entry(id, now_rfc3339(), options, false, sandbox, 0, None);
        Ok((entry, None))
    }

    async fn hydrate_index(
        &self,
        id: &str,
        options: CreateIndexOptions,
    ) -> Result<(Arc<LiveEntry>, Option<String>), IndexError> {
        let loaded = self.store.read(id)?;
        let stored: CreateIndexOptions =
            serde_json::from_value(loaded.metadata.options.clone()).unwrap_or_default();

        // Caller-supplied scheduling fields win; everything else falls back to the snapshot
        // taken at offload time.
        let effective = CreateIndexOptions {
            id: options.id,
            namespace: options.namespace.or(stored.namespace),
            embedding_provider: options.embedding_provider,
            embedding_provider_name: options
                .embedding_provider_name
                .or(stored.embedding_provider_name),
            inactivity_timeout: options.inactivity_timeout.or(stored.inactivity_timeout),
            enable_activity_monitoring: options
                .enable_activity_monitoring
                .or(stored.enable_activity_monitoring),
            resume: false,
        };

        self.bind_provider(id, &effective)?;

        let sandbox = SandboxHandle::spawn(id);
        if !loaded.documents.is_empty() {
            let outcome = tokio::time::timeout(
                self.settings.ingest_timeout,
                sandbox.add_documents(loaded.documents),
            )
            .await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(error)) => {
                    sandbox.destroy().await;
                    self.unbind_provider(id, &effective);
                    return Err(error.into());
                }
                Err(_) => {
                    sandbox.destroy().await;
                    self.unbind_provider(id, &effective);
                    return Err(IndexError::Timeout(self.settings.ingest_timeout));
                }
            }
        }

        // Restore the exclusivity invariant: an id is live or on disk, never both.
        if let Err(error) = self.store.delete(id) {
            sandbox.destroy().await;
            self.unbind_provider(id, &effective);
            return Err(error.into());
        }

        let entry = self.build_entry(
            id,
            loaded.metadata.created.clone(),
            effective,
            true,
            sandbox,
            loaded.metadata.document_count,
            loaded.metadata.embedding_dimension,
        );
        Ok((entry, Some(loaded.metadata.offloaded_at)))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_entry(
        &self,
        id: &str,
        created: String,
        options: CreateIndexOptions,
        from_offload: bool,
        sandbox: SandboxHandle,
        document_count: u64,
        embedding_dimension: Option<usize>,
    ) -> Arc<LiveEntry> {
        let inactivity_timeout = options
            .inactivity_timeout
            .map(Duration::from_millis)
            .unwrap_or(self.settings.default_inactivity_timeout);
        let activity_monitoring = options.enable_activity_monitoring.unwrap_or(true);

        Arc::new(LiveEntry {
            id: id.to_string(),
            created,
            options,
            from_offload,
            sandbox,
            op_lock: AsyncMutex::new(()),
            state: StdMutex::new(EntryState {
                document_count,
                embedding_dimension,
                inactivity_timeout,
                activity_monitoring,
            }),
        })
    }

    fn bind_provider(&self, id: &str, options: &CreateIndexOptions) -> Result<(), IndexError> {
        if options.embedding_provider.is_none()
            && let Some(name) = &options.embedding_provider_name
        {
            if self.registry.resolve(name).is_none() {
                return Err(IndexError::ProviderNotFound(name.clone()));
            }
            self.registry.bind(name, id);
        }
        Ok(())
    }

    fn unbind_provider(&self, id: &str, options: &CreateIndexOptions) {
        if options.embedding_provider.is_none()
            && let Some(name) = &options.embedding_provider_name
        {
            self.registry.release(name, id);
        }
    }

    fn release_provider(&self, entry: &LiveEntry) {
        self.unbind_provider(&entry.id, &entry.options);
    }

    /// Resolve the embedding source for an index, in priority order: inline provider, named
    /// registry provider, named manager default (configured-but-missing is a hard error),
    /// inline manager default, then the mock sentinel.
    fn resolve_provider(&self, entry: &LiveEntry) -> Result<EmbeddingProvider, IndexError> {
        if let Some(provider) = &entry.options.embedding_provider {
            return Ok(provider.clone());
        }
        if let Some(name) = &entry.options.embedding_provider_name {
            return self
                .registry
                .resolve(name)
                .ok_or_else(|| IndexError::ProviderNotFound(name.clone()));
        }
        if let Some(name) = &self.settings.default_provider_name {
            return self
                .registry
                .resolve(name)
                .ok_or_else(|| IndexError::ProviderNotFound(name.clone()));
        }
        if let Some(provider) = self
            .default_provider
            .read()
            .expect("default provider lock poisoned")
            .clone()
        {
            return Ok(provider);
        }
        if self.settings.default_embedding_model.as_deref() == Some(MOCK_MODEL_NAME) {
            return Ok(EmbeddingProvider::mock());
        }
        Err(IndexError::NoEmbeddingProvider(entry.id.clone()))
    }
}

fn bump_activity(inner: &Arc<ManagerInner>, entry: &Arc<LiveEntry>) {
    inner.clock.bump(&entry.id);
    arm_timer(inner, entry);
}

/// Arm (or re-arm) the entry's inactivity timer when monitoring applies to it.
fn arm_timer(inner: &Arc<ManagerInner>, entry: &Arc<LiveEntry>) {
    if !inner.monitoring_enabled.load(Ordering::SeqCst) {
        return;
    }
    let (timeout, monitoring) = entry.monitoring_settings();
    if !monitoring || timeout.is_zero() {
        return;
    }
    spawn_timer(inner, &entry.id, timeout);
}

fn spawn_timer(inner: &Arc<ManagerInner>, id: &str, delay: Duration) {
    let weak = Arc::downgrade(inner);
    let timer_id = id.to_string();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        on_timer_fired(inner, timer_id).await;
    });
    inner.clock.set_timer(id, handle.abort_handle());
}

async fn on_timer_fired(inner: Arc<ManagerInner>, id: String) {
    let Some(entry) = inner.get_ready(&id) else {
        return;
    };
    if !inner.monitoring_enabled.load(Ordering::SeqCst) {
        return;
    }
    let (timeout, monitoring) = entry.monitoring_settings();
    if !monitoring || timeout.is_zero() {
        return;
    }
    let Some(last) = inner.clock.last_activity(&id) else {
        return;
    };

    // A bump can slip in between the sleep elapsing and this check; the deadline then moved
    // and the timer must wait out the remainder instead of evicting early.
    let Some(due) = last.checked_add(timeout) else {
        return;
    };
    let now = Instant::now();
    if now < due {
        spawn_timer(&inner, &id, due - now);
        return;
    }

    tracing::info!(index_id = %id, "Inactivity deadline reached; offloading");
    match inner.offload_entry(&id).await {
        Ok(_) => {}
        Err(error) => {
            tracing::warn!(index_id = %id, error = %error, "Background offload failed");
            inner.events.emit(&Event::for_index(
                EventKind::Error,
                id.clone(),
                json!({ "operation": "offload", "error": error.to_string() }),
            ));
            if let Some(entry) = inner.get_ready(&id) {
                arm_timer(&inner, &entry);
            }
        }
    }
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
