//! Record source seam.
//!
//! A [`RecordSource`] is the data access layer the engine reads from: it
//! enumerates ordered primary keys and opens [`LoadSession`]s that resolve
//! keys to full records. Sources are located through a [`StoreResolver`],
//! normally a [`StoreRegistry`] built at job start.

use std::collections::HashMap;
use std::sync::Arc;

use massindex_types::{
    CacheMode, EntityType, HandleNamespace, JobParameters, KeyRange, MassIndexError, PrimaryKey,
    Record, Restriction,
};

/// Per-job hints passed to every source call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadContext {
    pub cache_mode: CacheMode,
    /// Only records of this tenant are in scope when set
    pub tenant_id: Option<String>,
}

impl LoadContext {
    pub fn new(cache_mode: CacheMode, tenant_id: Option<String>) -> Self {
        Self {
            cache_mode,
            tenant_id,
        }
    }

    pub fn from_params(params: &JobParameters) -> Self {
        Self::new(params.cache_mode, params.tenant_id.clone())
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

/// Ordered key enumeration and record loading for one backing store.
pub trait RecordSource: Send + Sync {
    /// Fetch up to `limit` keys of `entity_type` inside `range` that are
    /// strictly greater than `after`, in ascending order.
    ///
    /// `limit == None` fetches the whole remaining sequence. Malformed
    /// opaque queries are reported as [`MassIndexError::ScopeQuery`].
    fn fetch_keys(
        &self,
        entity_type: &EntityType,
        restriction: Option<&Restriction>,
        range: KeyRange,
        after: Option<PrimaryKey>,
        limit: Option<usize>,
        ctx: &LoadContext,
    ) -> Result<Vec<PrimaryKey>, MassIndexError>;

    /// Open a session for batched record loads.
    fn open_session(&self, ctx: &LoadContext) -> Result<Box<dyn LoadSession + '_>, MassIndexError>;
}

/// A unit of record loading with its own working cache.
pub trait LoadSession {
    /// Load records for `keys`.
    ///
    /// The outer error means the whole batch failed (store unreachable).
    /// The inner results are aligned with `keys`; an inner error is a
    /// failure of that one record.
    fn load(
        &mut self,
        entity_type: &EntityType,
        keys: &[PrimaryKey],
    ) -> Result<Vec<Result<Record, MassIndexError>>, MassIndexError>;

    /// Drop everything the session keeps in memory.
    fn clear(&mut self);
}

/// Locates a record source from a reference and namespace.
pub trait StoreResolver: Send + Sync {
    fn resolve(
        &self,
        reference: Option<&str>,
        namespace: HandleNamespace,
    ) -> Result<Arc<dyn RecordSource>, MassIndexError>;
}

/// Explicit registry of named record sources.
///
/// A reference is only required when more than one source is registered.
#[derive(Default)]
pub struct StoreRegistry {
    stores: HashMap<(HandleNamespace, String), Arc<dyn RecordSource>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding a single source under the default namespace.
    pub fn single(name: impl Into<String>, source: Arc<dyn RecordSource>) -> Self {
        let mut registry = Self::new();
        registry.register(HandleNamespace::default(), name, source);
        registry
    }

    pub fn register(
        &mut self,
        namespace: HandleNamespace,
        name: impl Into<String>,
        source: Arc<dyn RecordSource>,
    ) {
        self.stores.insert((namespace, name.into()), source);
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl StoreResolver for StoreRegistry {
    fn resolve(
        &self,
        reference: Option<&str>,
        namespace: HandleNamespace,
    ) -> Result<Arc<dyn RecordSource>, MassIndexError> {
        match reference {
            Some(name) => self
                .stores
                .get(&(namespace, name.to_string()))
                .cloned()
                .ok_or_else(|| {
                    MassIndexError::HandleNotFound(format!("{} in {}", name, namespace))
                }),
            None => {
                let mut stores = self.stores.values();
                match (stores.next(), stores.next()) {
                    (Some(only), None) => Ok(Arc::clone(only)),
                    (None, _) => Err(MassIndexError::HandleNotFound(
                        "no record store registered".to_string(),
                    )),
                    (Some(_), Some(_)) => Err(MassIndexError::HandleNotFound(format!(
                        "{} record stores registered, entityManagerFactoryReference is required",
                        self.stores.len()
                    ))),
                }
            }
        }
    }
}
