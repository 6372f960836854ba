//! Translation between entities and rows of a single table.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::entity::{EntityRef, EntitySchema, EntityType};
use crate::fieldset::{FieldDefinition, ID_FIELD};
use crate::{Data, Entity, Id, MapperSettings, ModelError, Params, Storage, Value};

/// One `column = :field` pair of an INSERT or UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: String,
    pub column: String,
    pub value: Value,
}

/// Result of a before-write hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Write these assignments (possibly rewritten by the hook).
    Proceed(Vec<Assignment>),
    /// Skip the write.
    Abort,
}

/// Per-mapper customisation points.
///
/// Every method has a default, so `impl MapperHooks for MyHooks {}` is a
/// mapper with stock behaviour.
pub trait MapperHooks {
    /// Storage column for a field. `None` keeps the field out of storage.
    fn column_name(&self, field: &FieldDefinition) -> Option<String> {
        Some(field.column_name().to_string())
    }

    /// Value written to storage for a field.
    fn column_value(&self, field: &FieldDefinition, entity: &Entity) -> Value {
        entity.get(field.name())
    }

    fn before_insert(&self, _entity: &Entity, assignments: Vec<Assignment>) -> HookOutcome {
        HookOutcome::Proceed(assignments)
    }

    fn after_insert(&self, _entity: &mut Entity) -> Result<(), ModelError> {
        Ok(())
    }

    fn before_update(&self, _entity: &Entity, assignments: Vec<Assignment>) -> HookOutcome {
        HookOutcome::Proceed(assignments)
    }

    fn after_update(&self, _entity: &mut Entity) -> Result<(), ModelError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl MapperHooks for DefaultHooks {}

/// What to delete: an id or an entity carrying one.
#[derive(Debug, Clone, Copy)]
pub enum EntityTarget<'a> {
    Id(Id),
    Entity(&'a Entity),
    Shared(&'a EntityRef),
}

impl EntityTarget<'_> {
    /// The id named by the target, if it has one.
    pub fn id(&self) -> Option<Id> {
        match self {
            EntityTarget::Id(id) => Some(*id),
            EntityTarget::Entity(entity) => entity.id(),
            EntityTarget::Shared(entity) => entity.borrow().id(),
        }
    }
}

impl From<Id> for EntityTarget<'_> {
    fn from(id: Id) -> Self {
        EntityTarget::Id(id)
    }
}

impl<'a> From<&'a Entity> for EntityTarget<'a> {
    fn from(entity: &'a Entity) -> Self {
        EntityTarget::Entity(entity)
    }
}

impl<'a> From<&'a EntityRef> for EntityTarget<'a> {
    fn from(entity: &'a EntityRef) -> Self {
        EntityTarget::Shared(entity)
    }
}

/// Moves entities of one type in and out of storage.
pub trait DataMapper {
    fn entity_type(&self) -> &Arc<EntityType>;

    fn table(&self) -> &str;

    /// Storage column for a declared field.
    fn column(&self, field: &str) -> Result<String, ModelError>;

    fn max_batch_size(&self) -> usize;

    /// Build an entity of this mapper's type.
    fn create(&self, data: Data) -> Result<Entity, ModelError> {
        Entity::new(Arc::clone(self.entity_type()), data)
    }

    /// Load entities by id with the configured batch limit.
    fn fetch(&self, ids: &[Id]) -> Result<IndexMap<Id, Entity>, ModelError> {
        self.fetch_limited(ids, self.max_batch_size())
    }

    /// Load entities by id in one query, keyed in request order.
    ///
    /// Duplicate ids are collapsed; ids without a row are left out.
    fn fetch_limited(
        &self,
        ids: &[Id],
        max_batch_size: usize,
    ) -> Result<IndexMap<Id, Entity>, ModelError>;

    /// Write a new entity. Returns whether it ended up with an id.
    fn insert(&self, entity: &mut Entity) -> Result<bool, ModelError>;

    /// Write the dirty fields of a persisted entity.
    fn update(&self, entity: &mut Entity) -> Result<bool, ModelError>;

    fn delete(&self, target: EntityTarget<'_>) -> Result<bool, ModelError>;

    fn map_id(&self, id: Id) -> String {
        self.entity_type().map_id(id)
    }
}

// Column layout derived once from the fieldset and hooks.
#[derive(Debug, Clone)]
struct TableLayout {
    table: String,
    id_column: String,
    columns: IndexMap<String, String>,
    select_list: String,
}

impl TableLayout {
    fn build<H: MapperHooks>(
        kind: &EntityType,
        table: String,
        hooks: &H,
    ) -> Result<Self, ModelError> {
        if table.is_empty() {
            return Err(ModelError::InvalidConfig {
                field: "table".to_string(),
                reason: format!("no table given for {}", kind.name()),
            });
        }

        let mut columns = IndexMap::new();
        for field in kind.fieldset() {
            if let Some(column) = hooks.column_name(field) {
                columns.insert(field.name().to_string(), column);
            }
        }
        let id_column = columns
            .get(ID_FIELD)
            .cloned()
            .ok_or_else(|| ModelError::InvalidField {
                field: ID_FIELD.to_string(),
                reason: format!("{} has no stored id field", kind.name()),
            })?;

        let select_list = columns
            .iter()
            .map(|(field, column)| {
                if field == column {
                    format!("`{column}`")
                } else {
                    format!("`{column}` AS `{field}`")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Self {
            table,
            id_column,
            columns,
            select_list,
        })
    }
}

/// Table-backed [`DataMapper`] driven by the entity's fieldset.
pub struct GenericMapper<H: MapperHooks = DefaultHooks> {
    kind: Arc<EntityType>,
    storage: Arc<dyn Storage>,
    hooks: H,
    layout: TableLayout,
    max_batch_size: usize,
}

impl GenericMapper {
    pub fn new(
        kind: Arc<EntityType>,
        storage: Arc<dyn Storage>,
        table: impl Into<String>,
    ) -> Result<Self, ModelError> {
        Self::with_hooks(kind, storage, table, DefaultHooks)
    }

    /// Mapper for a statically declared schema.
    pub fn for_schema<T: EntitySchema>(storage: Arc<dyn Storage>) -> Result<Self, ModelError> {
        Self::new(T::entity_type()?, storage, T::TABLE)
    }
}

impl<H: MapperHooks> GenericMapper<H> {
    pub fn with_hooks(
        kind: Arc<EntityType>,
        storage: Arc<dyn Storage>,
        table: impl Into<String>,
        hooks: H,
    ) -> Result<Self, ModelError> {
        let layout = TableLayout::build(&kind, table.into(), &hooks)?;
        Ok(Self {
            kind,
            storage,
            hooks,
            layout,
            max_batch_size: MapperSettings::default().max_batch_size,
        })
    }

    pub fn with_settings(mut self, settings: &MapperSettings) -> Self {
        self.max_batch_size = settings.max_batch_size;
        self
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn id_column(&self) -> &str {
        &self.layout.id_column
    }

    /// The column list used by batch fetches, with aliases for renamed fields.
    pub fn select_list(&self) -> &str {
        &self.layout.select_list
    }

    pub fn fetch_sql(&self, ids: &[Id]) -> String {
        let ids = ids
            .iter()
            .map(Id::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {} FROM `{}` WHERE `{}` IN ({ids})",
            self.layout.select_list, self.layout.table, self.layout.id_column
        )
    }

    fn check_kind(&self, entity: &Entity) -> Result<(), ModelError> {
        if Arc::ptr_eq(entity.kind(), &self.kind) || entity.type_name() == self.kind.name() {
            return Ok(());
        }
        Err(ModelError::WrongEntityType {
            expected: self.kind.name().to_string(),
            found: entity.type_name().to_string(),
        })
    }

    fn assignment(&self, field: &FieldDefinition, entity: &Entity) -> Option<Assignment> {
        let column = self.layout.columns.get(field.name())?;
        Some(Assignment {
            field: field.name().to_string(),
            column: column.clone(),
            value: self.hooks.column_value(field, entity),
        })
    }
}

fn set_clause(assignments: Vec<Assignment>) -> (String, IndexMap<String, Value>) {
    let mut clauses = Vec::with_capacity(assignments.len());
    let mut params = IndexMap::with_capacity(assignments.len());
    for Assignment {
        field,
        column,
        value,
    } in assignments
    {
        clauses.push(format!("`{column}` = :{field}"));
        params.insert(field, value);
    }
    (clauses.join(",\n"), params)
}

impl<H: MapperHooks> DataMapper for GenericMapper<H> {
    fn entity_type(&self) -> &Arc<EntityType> {
        &self.kind
    }

    fn table(&self) -> &str {
        &self.layout.table
    }

    fn column(&self, field: &str) -> Result<String, ModelError> {
        self.layout
            .columns
            .get(field)
            .cloned()
            .ok_or_else(|| ModelError::UnknownField(field.to_string()))
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn fetch_limited(
        &self,
        ids: &[Id],
        max_batch_size: usize,
    ) -> Result<IndexMap<Id, Entity>, ModelError> {
        if max_batch_size == 0 {
            return Err(ModelError::InvalidBatchSize(max_batch_size));
        }
        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<Id> = ids
            .iter()
            .copied()
            .filter(|id| *id > 0 && seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Ok(IndexMap::new());
        }
        if ids.len() > max_batch_size {
            return Err(ModelError::BatchTooLarge {
                requested: ids.len(),
                max: max_batch_size,
            });
        }

        let rows = self.storage.get_all(&self.fetch_sql(&ids), &Params::none())?;

        let mut slots: IndexMap<Id, Option<Entity>> = ids.iter().map(|id| (*id, None)).collect();
        for row in rows {
            let entity = self.create(row)?;
            if let Some(slot) = entity.id().and_then(|id| slots.get_mut(&id)) {
                *slot = Some(entity);
            }
        }
        let found: IndexMap<Id, Entity> = slots
            .into_iter()
            .filter_map(|(id, entity)| entity.map(|e| (id, e)))
            .collect();

        debug!(
            entity = %self.kind.name(),
            requested = ids.len(),
            found = found.len(),
            "batch fetch"
        );
        Ok(found)
    }

    fn insert(&self, entity: &mut Entity) -> Result<bool, ModelError> {
        self.check_kind(entity)?;
        if !entity.errors().is_empty() {
            return Err(entity.pending_errors());
        }
        if let Some(id) = entity.original(ID_FIELD).filter(|id| !id.is_empty()) {
            return Err(ModelError::already_persisted(self.kind.name(), id));
        }

        let preassigned = entity.has_id();
        let assignments = self
            .kind
            .fieldset()
            .iter()
            .filter(|field| preassigned || field.name() != ID_FIELD)
            .filter_map(|field| self.assignment(field, entity))
            .collect();

        let assignments = match self.hooks.before_insert(entity, assignments) {
            HookOutcome::Proceed(assignments) => assignments,
            HookOutcome::Abort => {
                debug!(entity = %self.kind.name(), "insert vetoed");
                return Ok(false);
            }
        };

        let (set, params) = set_clause(assignments);
        let sql = if set.is_empty() {
            format!("INSERT INTO `{}` () VALUES ()", self.layout.table)
        } else {
            format!("INSERT INTO `{}`\nSET {set}", self.layout.table)
        };
        self.storage.execute(&sql, &Params::Named(params))?;

        if !preassigned {
            let id = self.storage.insert_id()?;
            entity.set(ID_FIELD, id)?;
        }

        self.hooks.after_insert(entity)?;
        entity.mark_clean()?;

        debug!(entity = %self.kind.name(), id = ?entity.id(), "inserted");
        Ok(entity.has_id())
    }

    fn update(&self, entity: &mut Entity) -> Result<bool, ModelError> {
        self.check_kind(entity)?;
        if !entity.errors().is_empty() {
            return Err(entity.pending_errors());
        }
        let id = entity
            .id()
            .ok_or_else(|| ModelError::missing_id(self.kind.name()))?;

        let assignments = self
            .kind
            .fieldset()
            .iter()
            .filter(|field| field.name() != ID_FIELD && entity.is_field_dirty(field.name()))
            .filter_map(|field| self.assignment(field, entity))
            .collect();

        let assignments = match self.hooks.before_update(entity, assignments) {
            HookOutcome::Proceed(assignments) => assignments,
            HookOutcome::Abort => {
                debug!(entity = %self.kind.name(), id, "update vetoed");
                return Ok(false);
            }
        };

        if assignments.is_empty() {
            debug!(entity = %self.kind.name(), id, "nothing to update");
        } else {
            let written = assignments.len();
            let (set, mut params) = set_clause(assignments);
            params.insert(ID_FIELD.to_string(), Value::Int(id));
            let sql = format!(
                "UPDATE `{}`\nSET {set}\nWHERE `{}` = :{ID_FIELD}",
                self.layout.table, self.layout.id_column
            );
            self.storage.execute(&sql, &Params::Named(params))?;
            debug!(entity = %self.kind.name(), id, fields = written, "updated");
        }

        self.hooks.after_update(entity)?;
        entity.mark_clean()?;
        Ok(true)
    }

    fn delete(&self, target: EntityTarget<'_>) -> Result<bool, ModelError> {
        if let EntityTarget::Entity(entity) = target {
            self.check_kind(entity)?;
        }
        let id = target
            .id()
            .filter(|id| *id > 0)
            .ok_or_else(|| ModelError::missing_id(self.kind.name()))?;

        let sql = format!(
            "DELETE FROM `{}` WHERE `{}` = ?",
            self.layout.table, self.layout.id_column
        );
        let affected = self.storage.execute(&sql, &Params::positional([id]))?;

        debug!(entity = %self.kind.name(), id, affected, "deleted");
        Ok(affected > 0)
    }
}
