//! Entity shadow cache.
//!
//! A [`Shadow`] is the single in-memory representative of one stored entity
//! row. Its [`Controller`] owns an identity map from key to shadow: while a
//! shadow is cached, every lookup of its key returns the same `Arc`, and
//! changes to the row are applied to that object in place, so every holder
//! sees them.
//!
//! # Lifecycle
//!
//! - **Hydrate**: `get`/`find_one`/`load_all` fetch rows and build shadows
//!   from them, one hydration per controller at a time.
//! - **Refresh**: `update` and `load_all` replace the row snapshot of the live
//!   shadow and clear its resolved references.
//! - **Dispose**: `delete` removes the row, evicts the shadow and marks it
//!   destroyed. Any further access fails with `ObjectDestroyed`.
//! - **Evict**: shadows nobody outside the cache holds are dropped by
//!   [`Controller::evict_unused`], which also runs when the cache grows past
//!   its capacity.
//!
//! Mutators (`insert`, `update`, `delete`) require a context with an active
//! reaction: entities change only as the side effect of an event.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::error::ReactorError;
use crate::schema::{Row, Schema, TableSchema};
use crate::storage::{retry_serializable, Filter, KeyedRow, Storage};

/// Default number of cached shadows above which unused ones are evicted.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// A stored entity kind.
///
/// The entity is hydrated from its row with serde, so field names must match
/// the column names of [`Entity::schema`].
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Group {
///     pub name: String,
///     pub owner_id: Option<i64>,
/// }
///
/// impl Entity for Group {
///     const TABLE: &'static str = "groups";
///
///     fn schema() -> Schema {
///         Schema::new().text("name").optional("owner_id", ColumnType::Integer)
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;

    fn schema() -> Schema;

    fn table() -> TableSchema {
        TableSchema::new(Self::TABLE, Self::schema())
    }
}

struct State<T> {
    row: Row,
    entity: T,
}

/// Cached representative of one entity row.
pub struct Shadow<T: Entity> {
    key: i64,
    state: RwLock<State<T>>,
    destroyed: AtomicBool,
    references: Mutex<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl<T: Entity> Shadow<T> {
    fn hydrate(key: i64, row: Row) -> Result<Self, ReactorError> {
        let entity = decode::<T>(&row)?;
        Ok(Self {
            key,
            state: RwLock::new(State { row, entity }),
            destroyed: AtomicBool::new(false),
            references: Mutex::new(HashMap::new()),
        })
    }

    /// Identity key. Stable for the lifetime of the shadow, and readable
    /// after disposal.
    pub fn key(&self) -> i64 {
        self.key
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// A copy of the current entity.
    pub fn snapshot(&self) -> Result<T, ReactorError> {
        self.with(T::clone)
    }

    /// Read the current entity without copying it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactorError> {
        self.ensure_alive()?;
        Ok(f(&self.read().entity))
    }

    /// The current row snapshot.
    pub fn row(&self) -> Result<Row, ReactorError> {
        self.ensure_alive()?;
        Ok(self.read().row.clone())
    }

    /// Resolve the optional reference stored in `column` through `controller`.
    ///
    /// The resolved shadow is kept until the next refresh or disposal of this
    /// shadow. A null column, or a key with no row behind it, resolves to
    /// `None`.
    pub async fn reference<S: Entity>(
        &self,
        column: &'static str,
        controller: &Controller<S>,
    ) -> Result<Option<Arc<Shadow<S>>>, ReactorError> {
        self.ensure_alive()?;
        let Some(key) = self.column_key(column) else {
            return Ok(None);
        };
        if let Some(cached) = self.resolved::<S>(column, key) {
            return Ok(Some(cached));
        }

        let resolved = controller.get_or_null(key).await?;
        self.ensure_alive()?;
        if let Some(target) = &resolved {
            self.slots()
                .insert(column, target.clone() as Arc<dyn Any + Send + Sync>);
        }
        Ok(resolved)
    }

    /// Like [`Shadow::reference`], failing with `NotExists` when unresolved.
    pub async fn required_reference<S: Entity>(
        &self,
        column: &'static str,
        controller: &Controller<S>,
    ) -> Result<Arc<Shadow<S>>, ReactorError> {
        self.reference(column, controller).await?.ok_or_else(|| {
            ReactorError::not_exists(format!("{} referenced by {} #{}", S::TABLE, T::TABLE, self.key))
        })
    }

    fn column_key(&self, column: &str) -> Option<i64> {
        self.read().row.get(column).and_then(Value::as_i64)
    }

    fn resolved<S: Entity>(&self, column: &str, key: i64) -> Option<Arc<Shadow<S>>> {
        self.slots()
            .get(column)
            .cloned()
            .and_then(|slot| slot.downcast::<Shadow<S>>().ok())
            .filter(|target| target.key() == key && !target.is_destroyed())
    }

    fn refresh(&self, row: Row) -> Result<(), ReactorError> {
        let entity = decode::<T>(&row)?;
        {
            let mut state = self.write();
            state.row = row;
            state.entity = entity;
        }
        self.slots().clear();
        trace!(table = T::TABLE, key = self.key, "shadow refreshed");
        Ok(())
    }

    fn dispose(&self) {
        self.slots().clear();
        self.destroyed.store(true, Ordering::Release);
        debug!(table = T::TABLE, key = self.key, "shadow disposed");
    }

    fn ensure_alive(&self) -> Result<(), ReactorError> {
        if self.is_destroyed() {
            return Err(ReactorError::ObjectDestroyed {
                entity: T::TABLE,
                key: self.key,
            });
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, State<T>> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(table = T::TABLE, key = self.key, "shadow lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, State<T>> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(table = T::TABLE, key = self.key, "shadow lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<&'static str, Arc<dyn Any + Send + Sync>>> {
        match self.references.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: Entity + std::fmt::Debug> std::fmt::Debug for Shadow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Shadow");
        s.field("table", &T::TABLE).field("key", &self.key);
        if self.is_destroyed() {
            s.field("destroyed", &true);
        } else {
            s.field("entity", &self.read().entity);
        }
        s.finish()
    }
}

fn decode<T: Entity>(row: &Row) -> Result<T, ReactorError> {
    serde_json::from_value(Value::Object(row.clone())).map_err(|e| ReactorError::SchemaViolation {
        table: T::TABLE.to_string(),
        message: e.to_string(),
    })
}

fn encode<T: Entity>(entity: &T) -> Result<Row, ReactorError> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(ReactorError::SchemaViolation {
            table: T::TABLE.to_string(),
            message: format!("entity must serialize to an object, got {}", other),
        }),
        Err(e) => Err(ReactorError::SchemaViolation {
            table: T::TABLE.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Owner of the shadow cache of one entity kind.
pub struct Controller<T: Entity> {
    storage: Arc<dyn Storage>,
    cache: DashMap<i64, Arc<Shadow<T>>>,
    hydration: tokio::sync::Mutex<()>,
    capacity: usize,
}

impl<T: Entity> Controller<T> {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_capacity(storage, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(storage: Arc<dyn Storage>, capacity: usize) -> Self {
        Self {
            storage,
            cache: DashMap::new(),
            hydration: tokio::sync::Mutex::new(()),
            capacity,
        }
    }

    /// Create the entity table. Idempotent.
    pub async fn create_table(&self) -> Result<(), ReactorError> {
        self.storage.create_table(&T::table()).await
    }

    /// The shadow for `key`, failing with `NotExists` if there is no row.
    pub async fn get(&self, key: i64) -> Result<Arc<Shadow<T>>, ReactorError> {
        self.get_or_null(key)
            .await?
            .ok_or_else(|| ReactorError::not_exists(format!("{} #{}", T::TABLE, key)))
    }

    /// The shadow for `key`, or `None` if there is no row.
    pub async fn get_or_null(&self, key: i64) -> Result<Option<Arc<Shadow<T>>>, ReactorError> {
        if let Some(shadow) = self.cached(key) {
            return Ok(Some(shadow));
        }

        let _hydrating = self.hydration.lock().await;
        if let Some(shadow) = self.cached(key) {
            return Ok(Some(shadow));
        }

        let row = retry_serializable("get", move || async move {
            let mut tx = self.storage.begin().await?;
            let row = tx.get(T::TABLE, key).await?;
            tx.rollback().await?;
            Ok::<_, ReactorError>(row)
        })
        .await?;

        match row {
            Some(row) => Ok(Some(self.adopt(KeyedRow { key, row })?)),
            None => Ok(None),
        }
    }

    /// The first row matching `filter`, in key order.
    pub async fn find_one(&self, filter: &Filter) -> Result<Option<Arc<Shadow<T>>>, ReactorError> {
        let _hydrating = self.hydration.lock().await;
        let rows = self.select(filter).await?;

        match rows.into_iter().next() {
            Some(row) => Ok(Some(self.adopt(row)?)),
            None => Ok(None),
        }
    }

    /// Every row matching `filter`, in key order. Cached shadows are
    /// refreshed in place rather than replaced.
    pub async fn load_all(&self, filter: &Filter) -> Result<Vec<Arc<Shadow<T>>>, ReactorError> {
        let _hydrating = self.hydration.lock().await;
        let rows = self.select(filter).await?;

        let shadows = rows
            .into_iter()
            .map(|row| self.adopt(row))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(table = T::TABLE, count = shadows.len(), "loaded shadows");
        Ok(shadows)
    }

    /// Insert a new row for `entity` and return its shadow.
    pub async fn insert(&self, ctx: &Context, entity: &T) -> Result<Arc<Shadow<T>>, ReactorError> {
        ctx.require_reaction("insert")?;
        let row = encode(entity)?;

        let key = retry_serializable("insert", || {
            let row = row.clone();
            async move {
                let mut tx = self.storage.begin().await?;
                let key = tx.insert(T::TABLE, row).await?;
                tx.commit().await?;
                Ok::<_, ReactorError>(key)
            }
        })
        .await?;

        let _hydrating = self.hydration.lock().await;
        self.adopt(KeyedRow { key, row })
    }

    /// Merge `changes` into the shadow's row and refresh it in place.
    pub async fn update(&self, ctx: &Context, shadow: &Shadow<T>, changes: Row) -> Result<(), ReactorError> {
        ctx.require_reaction("update")?;
        shadow.ensure_alive()?;

        let key = shadow.key();
        let row = retry_serializable("update", || {
            let changes = changes.clone();
            async move {
                let mut tx = self.storage.begin().await?;
                let row = tx.update(T::TABLE, key, changes).await?;
                tx.commit().await?;
                Ok::<_, ReactorError>(row)
            }
        })
        .await?;

        shadow.refresh(row)
    }

    /// Delete the shadow's row, evict it and dispose it.
    pub async fn delete(&self, ctx: &Context, shadow: &Shadow<T>) -> Result<(), ReactorError> {
        ctx.require_reaction("delete")?;
        shadow.ensure_alive()?;

        let key = shadow.key();
        let removed = retry_serializable("delete", move || async move {
            let mut tx = self.storage.begin().await?;
            let removed = tx.delete_key(T::TABLE, key).await?;
            tx.commit().await?;
            Ok::<_, ReactorError>(removed)
        })
        .await?;

        self.cache.remove(&shadow.key());
        shadow.dispose();
        if !removed {
            return Err(ReactorError::not_exists(format!("{} #{}", T::TABLE, shadow.key())));
        }
        Ok(())
    }

    async fn select(&self, filter: &Filter) -> Result<Vec<KeyedRow>, ReactorError> {
        retry_serializable("select", move || async move {
            let mut tx = self.storage.begin().await?;
            let rows = tx.select(T::TABLE, filter).await?;
            tx.rollback().await?;
            Ok::<_, ReactorError>(rows)
        })
        .await
    }

    /// The cached, live shadow for `key`, without touching storage.
    pub fn cached(&self, key: i64) -> Option<Arc<Shadow<T>>> {
        self.cache
            .get(&key)
            .map(|entry| entry.value().clone())
            .filter(|shadow| !shadow.is_destroyed())
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop cached shadows held by nobody but the cache. Returns how many
    /// were evicted.
    pub fn evict_unused(&self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, shadow| Arc::strong_count(shadow) > 1);
        let evicted = before.saturating_sub(self.cache.len());
        if evicted > 0 {
            trace!(table = T::TABLE, evicted, "evicted unused shadows");
        }
        evicted
    }

    /// Install `row` into the cache: refresh the live shadow for its key or
    /// hydrate a new one. Callers hold the hydration lock.
    fn adopt(&self, row: KeyedRow) -> Result<Arc<Shadow<T>>, ReactorError> {
        if let Some(shadow) = self.cached(row.key) {
            shadow.refresh(row.row)?;
            return Ok(shadow);
        }

        let shadow = Arc::new(Shadow::hydrate(row.key, row.row)?);
        self.cache.insert(row.key, shadow.clone());
        trace!(table = T::TABLE, key = row.key, "shadow hydrated");

        if self.cache.len() > self.capacity {
            self.evict_unused();
        }
        Ok(shadow)
    }
}

impl<T: Entity> std::fmt::Debug for Controller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("table", &T::TABLE)
            .field("cached", &self.cache.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
