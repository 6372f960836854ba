//! Typed records with field validation and dirty tracking.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::fieldset::{Fieldset, ID_FIELD};
use crate::identity_map::map_id;
use crate::{Data, Id, ModelError, ValidationError, Value};

/// Custom assignment routine for one field.
///
/// Receives the entity and the raw value and is responsible for storing it,
/// usually through [`Entity::assign_validated`] or [`Entity::assign_raw`].
pub type Setter = Arc<dyn Fn(&mut Entity, Value) -> Result<(), ModelError> + Send + Sync>;

/// Computed read for one field.
pub type Getter = Arc<dyn Fn(&Entity) -> Value + Send + Sync>;

/// An entity shared between an identity map and its callers.
pub type EntityRef = Rc<RefCell<Entity>>;

/// Everything entities of one kind have in common: the type name used in
/// map-ids, the schema and any custom accessors.
pub struct EntityType {
    name: String,
    fieldset: Fieldset,
    setters: HashMap<String, Setter>,
    getters: HashMap<String, Getter>,
}

impl EntityType {
    pub fn new(name: impl Into<String>, fieldset: Fieldset) -> Arc<Self> {
        Self::builder(name, fieldset).build()
    }

    pub fn builder(name: impl Into<String>, fieldset: Fieldset) -> EntityTypeBuilder {
        EntityTypeBuilder {
            kind: EntityType {
                name: name.into(),
                fieldset,
                setters: HashMap::new(),
                getters: HashMap::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fieldset(&self) -> &Fieldset {
        &self.fieldset
    }

    /// Map-id for an entity of this type with the given id.
    pub fn map_id(&self, id: Id) -> String {
        map_id(&self.name, id)
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("fields", &self.fieldset.names().collect::<Vec<_>>())
            .field("setters", &self.setters.keys().collect::<Vec<_>>())
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct EntityTypeBuilder {
    kind: EntityType,
}

impl EntityTypeBuilder {
    pub fn setter<F>(mut self, field: impl Into<String>, setter: F) -> Self
    where
        F: Fn(&mut Entity, Value) -> Result<(), ModelError> + Send + Sync + 'static,
    {
        self.kind.setters.insert(field.into(), Arc::new(setter));
        self
    }

    pub fn getter<F>(mut self, field: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Entity) -> Value + Send + Sync + 'static,
    {
        self.kind.getters.insert(field.into(), Arc::new(getter));
        self
    }

    pub fn build(self) -> Arc<EntityType> {
        Arc::new(self.kind)
    }
}

/// Types whose schema is declared statically, usually via `#[derive(EntitySchema)]`.
pub trait EntitySchema: Sized {
    /// Entity type name, used in map-ids.
    const NAME: &'static str;
    /// Backing table.
    const TABLE: &'static str;

    fn fieldset() -> Result<Fieldset, ModelError>;

    /// Field values of this record, keyed by field name.
    fn into_data(self) -> Data;

    fn entity_type() -> Result<Arc<EntityType>, ModelError> {
        Ok(EntityType::new(Self::NAME, Self::fieldset()?))
    }
}

/// A record of one entity type.
///
/// Values live in two layers: `original` holds the last clean state and
/// `updated` buffers assignments made since. Validation failures are kept per
/// field and block [`Entity::mark_clean`] until a later assignment clears them.
#[derive(Clone)]
pub struct Entity {
    kind: Arc<EntityType>,
    original: Data,
    updated: Data,
    errors: IndexMap<String, ValidationError>,
}

impl Entity {
    /// Build an entity from input data.
    ///
    /// Every declared field is assigned from the input (by field or column
    /// name) or from its default; leftover keys are assigned untyped. The
    /// result is clean apart from any validation errors, which are kept.
    pub fn new(kind: Arc<EntityType>, mut data: Data) -> Result<Self, ModelError> {
        let mut entity = Entity {
            kind: Arc::clone(&kind),
            original: Data::new(),
            updated: Data::new(),
            errors: IndexMap::new(),
        };

        for field in kind.fieldset() {
            let value = match data.shift_remove(field.name()) {
                Some(value) => value,
                None => data
                    .shift_remove(field.column_name())
                    .unwrap_or_else(|| field.default()),
            };
            entity.set(field.name(), value)?;
        }
        for (key, value) in data {
            entity.set(&key, value)?;
        }

        let updated = std::mem::take(&mut entity.updated);
        entity.original.extend(updated);

        trace!(
            entity = %kind.name(),
            fields = entity.original.len(),
            errors = entity.errors.len(),
            "constructed entity"
        );
        Ok(entity)
    }

    pub fn shared(self) -> EntityRef {
        Rc::new(RefCell::new(self))
    }

    pub fn kind(&self) -> &Arc<EntityType> {
        &self.kind
    }

    pub fn type_name(&self) -> &str {
        self.kind.name()
    }

    /// Assign a field.
    ///
    /// A custom setter takes precedence, then declared fields are validated
    /// and anything else is stored untyped. Fails only when `id` is already set.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), ModelError> {
        if field == ID_FIELD && self.has_id() {
            return Err(ModelError::ImmutableField {
                entity: self.kind.name().to_string(),
                field: field.to_string(),
            });
        }
        self.errors.shift_remove(field);

        let value = value.into();
        if let Some(setter) = self.kind.setters.get(field).cloned() {
            return setter(self, value);
        }
        if self.kind.fieldset().contains(field) {
            return self.assign_validated(field, value);
        }
        self.assign_raw(field, value);
        Ok(())
    }

    /// Validate `value` against the field definition and buffer the result,
    /// recording any error.
    pub fn assign_validated(&mut self, field: &str, value: Value) -> Result<(), ModelError> {
        let (clean, error) = self.kind.fieldset().validate(field, value)?;
        self.updated.insert(field.to_string(), clean);
        match error {
            Some(error) => self.errors.insert(field.to_string(), error),
            None => self.errors.shift_remove(field),
        };
        Ok(())
    }

    /// Buffer a value without validation.
    pub fn assign_raw(&mut self, field: &str, value: Value) {
        self.updated.insert(field.to_string(), value);
    }

    /// Read a field through its custom getter, if any.
    pub fn get(&self, field: &str) -> Value {
        match self.kind.getters.get(field) {
            Some(getter) => getter(self),
            None => self.stored(field).cloned().unwrap_or_default(),
        }
    }

    /// The buffered value of a field, falling back to its clean value.
    pub fn stored(&self, field: &str) -> Option<&Value> {
        self.updated
            .get(field)
            .or_else(|| self.original.get(field))
    }

    /// Last clean value of a field.
    pub fn original(&self, field: &str) -> Option<&Value> {
        self.original.get(field)
    }

    /// Drop a buffered value and its error.
    pub fn unset(&mut self, field: &str) {
        self.updated.shift_remove(field);
        self.errors.shift_remove(field);
    }

    pub fn has_id(&self) -> bool {
        !self.errors.contains_key(ID_FIELD)
            && self.stored(ID_FIELD).is_some_and(|id| !id.is_empty())
    }

    pub fn id(&self) -> Option<Id> {
        if self.has_id() {
            self.stored(ID_FIELD).and_then(Value::as_i64)
        } else {
            None
        }
    }

    /// Identity map key, once the entity has an id.
    pub fn map_id(&self) -> Option<String> {
        self.id().map(|id| self.kind.map_id(id))
    }

    pub fn is_dirty(&self) -> bool {
        self.updated.keys().any(|field| self.is_field_dirty(field))
    }

    /// A field is dirty when its buffered value differs (loosely) from its
    /// clean value or it has no clean value at all.
    pub fn is_field_dirty(&self, field: &str) -> bool {
        match (self.updated.get(field), self.original.get(field)) {
            (Some(updated), Some(original)) => !updated.loose_eq(original),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn dirty_fields(&self) -> Vec<&str> {
        self.updated
            .keys()
            .filter(|field| self.is_field_dirty(field))
            .map(String::as_str)
            .collect()
    }

    pub fn errors(&self) -> &IndexMap<String, ValidationError> {
        &self.errors
    }

    pub fn error(&self, field: &str) -> Option<ValidationError> {
        self.errors.get(field).copied()
    }

    /// Record or clear an error for a field.
    pub fn set_error(&mut self, field: &str, error: Option<ValidationError>) {
        match error {
            Some(error) => {
                self.errors.insert(field.to_string(), error);
            }
            None => {
                self.errors.shift_remove(field);
            }
        }
    }

    pub(crate) fn pending_errors(&self) -> ModelError {
        ModelError::PendingErrors {
            entity: self.kind.name().to_string(),
            errors: self
                .errors
                .iter()
                .map(|(field, error)| (field.clone(), *error))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// Merge buffered values into the clean state.
    pub fn mark_clean(&mut self) -> Result<(), ModelError> {
        if !self.errors.is_empty() {
            return Err(self.pending_errors());
        }
        let updated = std::mem::take(&mut self.updated);
        self.original.extend(updated);
        Ok(())
    }

    /// Merge one buffered value into the clean state.
    pub fn mark_field_clean(&mut self, field: &str) -> Result<(), ModelError> {
        if let Some(error) = self.error(field) {
            return Err(ModelError::PendingErrors {
                entity: self.kind.name().to_string(),
                errors: BTreeMap::from([(field.to_string(), error)]),
            });
        }
        if let Some(value) = self.updated.shift_remove(field) {
            self.original.insert(field.to_string(), value);
        }
        Ok(())
    }

    /// Current values, clean state overlaid with buffered values.
    pub fn to_data(&self) -> Data {
        let mut data = self.original.clone();
        for (field, value) in &self.updated {
            data.insert(field.clone(), value.clone());
        }
        data
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.to_data()
                .iter()
                .map(|(field, value)| (field.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.kind.name())
            .field("original", &self.original)
            .field("updated", &self.updated)
            .field("errors", &self.errors)
            .finish()
    }
}
