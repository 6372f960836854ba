//! Datamap - entities, data mappers and repositories over relational storage.
//!
//! An entity is a typed record whose fields are declared by a [`Fieldset`].
//! Assignments are validated and buffered; validation failures are recorded on
//! the entity rather than returned, and block persistence until corrected.
//!
//! # Components
//!
//! - [`Fieldset`] / [`FieldDefinition`]: schema and per-field validation
//! - [`Entity`]: original/updated/error layers with dirty tracking
//! - [`IdentityMap`]: one live instance per entity identity per unit of work
//! - [`DataMapper`] / [`GenericMapper`]: INSERT/UPDATE/DELETE and batch SELECT
//!   for one table
//! - [`Filter`]: criteria compiled to parameterized SQL
//! - [`Repository`] / [`GenericRepository`]: identity map, then cache, then
//!   storage
//!
//! Storage and caching are collaborators behind the [`Storage`] and [`Cache`]
//! traits. The core is synchronous and meant to be used from one thread per
//! unit of work.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod cache;
mod config;
mod entity;
mod error;
mod fieldset;
mod filter;
mod identity_map;
mod mapper;
mod repository;
mod storage;
mod time;
mod validate;
mod value;

/// Entity identity.
pub type Id = i64;

pub use cache::{Cache, MemoryCache};
pub use config::{DatamapConfig, MapperSettings, RepositorySettings};
pub use entity::{
    Entity, EntityRef, EntitySchema, EntityType, EntityTypeBuilder, Getter, Setter,
};
pub use error::{CacheError, ModelError, StorageError, ValidationError};
pub use fieldset::{FieldDefinition, FieldType, Fieldset, FieldsetBuilder, ID_FIELD};
pub use filter::{CompiledQuery, Criterion, Filter, FilterSnapshot, Operand, Operator, Order};
pub use identity_map::{IdentityMap, map_id};
pub use mapper::{
    Assignment, DataMapper, DefaultHooks, EntityTarget, GenericMapper, HookOutcome, MapperHooks,
};
pub use repository::{EntityAttachment, GenericRepository, Repository};
pub use storage::{Params, Storage, transaction};
pub use value::{Data, FromValue, Value, data};

// Re-export derive macro
pub use datamap_derive::EntitySchema;
