//! Client-facing facade over identity map, cache and mapper.
//!
//! Reads go identity map → cache → storage; anything loaded from the cache or
//! storage is placed in the identity map so a unit of work never holds two
//! copies of the same row. Writes go to storage through the mapper and are
//! written through to the cache.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::entity::{Entity, EntityRef};
use crate::mapper::{DataMapper, EntityTarget, GenericMapper};
use crate::{
    Cache, CacheError, Data, Filter, Id, IdentityMap, ModelError, RepositorySettings, Storage, Value,
};

/// Client-facing operations on one entity type.
pub trait Repository {
    type Mapper: DataMapper;

    fn mapper(&self) -> &Self::Mapper;

    fn settings(&self) -> &RepositorySettings;

    /// Entities matching `filter`, in query order.
    fn find(&self, filter: &Filter) -> Result<IndexMap<Id, EntityRef>, ModelError>;

    fn count(&self, filter: &Filter) -> Result<u64, ModelError>;

    /// Entities by id, in request order. Ids without a row are absent.
    fn fetch(&self, ids: &[Id]) -> Result<IndexMap<Id, EntityRef>, ModelError>;

    /// Insert or update. Returns the mapper's verdict.
    fn save(&self, entity: &EntityRef) -> Result<bool, ModelError>;

    fn delete(&self, target: EntityTarget<'_>) -> Result<bool, ModelError>;

    fn filter(&self) -> Filter {
        Filter::new()
    }

    /// A new, unsaved entity.
    fn create(&self, data: Data) -> Result<Entity, ModelError> {
        self.mapper().create(data)
    }

    fn find_first(&self, filter: Filter) -> Result<Option<EntityRef>, ModelError> {
        let found = self.find(&filter.offset(0).limit(1))?;
        Ok(found.into_values().next())
    }

    fn find_by_id(&self, id: Id) -> Result<Option<EntityRef>, ModelError> {
        Ok(self.fetch(&[id])?.shift_remove(&id))
    }

    /// Up to `limit` entities (the configured default when `None`), by id.
    fn find_all(&self, limit: Option<u64>) -> Result<IndexMap<Id, EntityRef>, ModelError> {
        let limit = limit.unwrap_or(self.settings().find_all_limit);
        self.find(&self.filter().limit(limit))
    }
}

/// Loads related data onto entities after they are fetched, e.g. tags onto
/// articles.
pub trait EntityAttachment {
    /// Entity type this attachment applies to.
    fn entity_type(&self) -> &str;

    fn attach(&self, items: &IndexMap<Id, EntityRef>) -> Result<(), ModelError>;

    /// The items this attachment cares about.
    fn filter_items<'a>(&self, items: &'a IndexMap<Id, EntityRef>) -> Vec<(Id, &'a EntityRef)> {
        items
            .iter()
            .filter(|(_, entity)| entity.borrow().type_name() == self.entity_type())
            .map(|(id, entity)| (*id, entity))
            .collect()
    }
}

/// Repository over a single table, optionally backed by a cache.
pub struct GenericRepository<M: DataMapper = GenericMapper> {
    storage: Arc<dyn Storage>,
    map: Rc<IdentityMap>,
    mapper: M,
    cache: Option<Arc<dyn Cache>>,
    settings: RepositorySettings,
}

impl<M: DataMapper> GenericRepository<M> {
    pub fn new(storage: Arc<dyn Storage>, map: Rc<IdentityMap>, mapper: M) -> Self {
        Self {
            storage,
            map,
            mapper,
            cache: None,
            settings: RepositorySettings::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_settings(mut self, settings: RepositorySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn identity_map(&self) -> &Rc<IdentityMap> {
        &self.map
    }

    /// Like `find`, then run each attachment over the result.
    pub fn find_with(
        &self,
        filter: &Filter,
        attachments: &[&dyn EntityAttachment],
    ) -> Result<IndexMap<Id, EntityRef>, ModelError> {
        let items = self.find(filter)?;
        for attachment in attachments {
            attachment.attach(&items)?;
        }
        Ok(items)
    }

    fn cache_key(&self, map_id: &str) -> String {
        format!("{}{map_id}", self.settings.cache_prefix)
    }

    fn cache_write(&self, map_id: &str, entity: &Entity) {
        let Some(cache) = &self.cache else {
            return;
        };
        let written = serde_json::to_string(&entity.to_data())
            .map_err(CacheError::from)
            .and_then(|payload| {
                cache.write(&self.cache_key(map_id), payload, self.settings.cache_ttl())
            });
        if let Err(error) = written {
            warn!(map_id, %error, "cache write failed");
        }
    }

    fn cache_delete(&self, map_id: &str) {
        if let Some(cache) = &self.cache {
            if let Err(error) = cache.delete(&self.cache_key(map_id)) {
                warn!(map_id, %error, "cache delete failed");
            }
        }
    }

    fn decode_cached<D: DataMapper + ?Sized>(
        &self,
        mapper: &D,
        id: Id,
        payload: &str,
    ) -> Option<Entity> {
        let entity = serde_json::from_str::<Data>(payload)
            .map_err(ModelError::from)
            .and_then(|data| mapper.create(data));
        match entity {
            Ok(entity) if entity.id() == Some(id) => Some(entity),
            Ok(_) => {
                warn!(id, "cached entity has a different id");
                None
            }
            Err(error) => {
                warn!(id, %error, "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Load entities of any mapper's type through this repository's identity
    /// map and cache.
    pub fn generic_fetch<D: DataMapper + ?Sized>(
        &self,
        ids: &[Id],
        mapper: &D,
    ) -> Result<IndexMap<Id, EntityRef>, ModelError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut found: IndexMap<Id, Option<EntityRef>> = ids
            .iter()
            .copied()
            .filter(|id| *id > 0 && seen.insert(*id))
            .map(|id| (id, None))
            .collect();

        let mut pending = Vec::new();
        for (id, slot) in found.iter_mut() {
            match self.map.get(&mapper.map_id(*id)) {
                Some(entity) => *slot = Some(entity),
                None => pending.push(*id),
            }
        }
        let map_hits = found.len() - pending.len();

        let mut cache_hits = 0usize;
        if let (Some(cache), false) = (&self.cache, pending.is_empty()) {
            let keys: Vec<String> = pending
                .iter()
                .map(|id| self.cache_key(&mapper.map_id(*id)))
                .collect();
            match cache.multi_read(&keys) {
                Ok(payloads) => {
                    pending.retain(|id| {
                        let cached = payloads
                            .get(&self.cache_key(&mapper.map_id(*id)))
                            .and_then(|payload| self.decode_cached(mapper, *id, payload));
                        let Some(entity) = cached else {
                            return true;
                        };
                        let entity = entity.shared();
                        self.map.set(mapper.map_id(*id), Rc::clone(&entity));
                        found.insert(*id, Some(entity));
                        cache_hits += 1;
                        false
                    });
                }
                Err(error) => warn!(%error, "cache read failed"),
            }
        }

        let mut loaded = 0usize;
        if !pending.is_empty() {
            for (id, entity) in mapper.fetch(&pending)? {
                let map_id = mapper.map_id(id);
                self.cache_write(&map_id, &entity);
                let entity = entity.shared();
                self.map.set(map_id, Rc::clone(&entity));
                found.insert(id, Some(entity));
                loaded += 1;
            }
        }

        debug!(
            entity = %mapper.entity_type().name(),
            requested = found.len(),
            map_hits,
            cache_hits,
            loaded,
            "fetch"
        );
        Ok(found
            .into_iter()
            .filter_map(|(id, entity)| entity.map(|e| (id, e)))
            .collect())
    }

    /// Insert or update through `mapper`, then (re)place the entity in the
    /// identity map and cache.
    pub fn generic_save<D: DataMapper + ?Sized>(
        &self,
        entity: &EntityRef,
        mapper: &D,
    ) -> Result<bool, ModelError> {
        let saved = {
            let mut entity = entity.borrow_mut();
            if entity.has_id() {
                mapper.update(&mut entity)?
            } else {
                mapper.insert(&mut entity)?
            }
        };

        let current = entity.borrow();
        if let Some(id) = current.id() {
            let map_id = mapper.map_id(id);
            self.map.set(map_id.clone(), Rc::clone(entity));
            self.cache_write(&map_id, &current);
        }
        Ok(saved)
    }

    /// Delete through `mapper` and forget the entity in the identity map and
    /// cache.
    pub fn generic_delete<D: DataMapper + ?Sized>(
        &self,
        target: EntityTarget<'_>,
        mapper: &D,
    ) -> Result<bool, ModelError> {
        let map_id = target.id().map(|id| mapper.map_id(id));
        let deleted = mapper.delete(target)?;
        if let Some(map_id) = map_id {
            self.map.remove(&map_id);
            self.cache_delete(&map_id);
        }
        Ok(deleted)
    }
}

/// Ids from a result column. Non-integer cells are skipped.
fn ids_from(values: Vec<Value>) -> Vec<Id> {
    values.iter().filter_map(Value::as_i64).collect()
}

impl<M: DataMapper> Repository for GenericRepository<M> {
    type Mapper = M;

    fn mapper(&self) -> &M {
        &self.mapper
    }

    fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    fn find(&self, filter: &Filter) -> Result<IndexMap<Id, EntityRef>, ModelError> {
        let query = filter.compile_select(&self.mapper, self.settings.default_page_size)?;
        let ids = ids_from(self.storage.get_col(&query.sql, &query.params)?);
        self.generic_fetch(&ids, &self.mapper)
    }

    fn count(&self, filter: &Filter) -> Result<u64, ModelError> {
        let query = filter.compile_count(&self.mapper)?;
        let count = self
            .storage
            .get_one(&query.sql, &query.params)?
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn fetch(&self, ids: &[Id]) -> Result<IndexMap<Id, EntityRef>, ModelError> {
        self.generic_fetch(ids, &self.mapper)
    }

    fn save(&self, entity: &EntityRef) -> Result<bool, ModelError> {
        self.generic_save(entity, &self.mapper)
    }

    fn delete(&self, target: EntityTarget<'_>) -> Result<bool, ModelError> {
        self.generic_delete(target, &self.mapper)
    }
}
