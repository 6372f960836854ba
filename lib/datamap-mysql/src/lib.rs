//! MySQL storage backend for datamap.
//!
//! [`MySqlStorage`] implements the blocking [`datamap::Storage`] contract on
//! top of a sqlx connection pool. Statements from the core use `:name`
//! placeholders; they are rewritten to positional binds before they reach the
//! driver, and the identity generated by each insert is remembered for
//! [`Storage::insert_id`](datamap::Storage::insert_id).
//!
//! # Usage
//!
//! ```text
//! use std::sync::Arc;
//! use datamap::{GenericMapper, GenericRepository, IdentityMap, Repository};
//! use datamap_mysql::{MySqlSettings, MySqlStorage};
//!
//! let storage = Arc::new(MySqlStorage::connect(
//!     "mysql://app@localhost/blog",
//!     &MySqlSettings::default(),
//! )?);
//! let mapper = GenericMapper::for_schema::<Post>(storage.clone())?;
//! let posts = GenericRepository::new(storage, Rc::new(IdentityMap::new()), mapper);
//! let recent = posts.find(&posts.filter().order_by("created", Order::Desc))?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod bind;
mod config;
mod executor;

pub use bind::{Positional, arguments, decode_row, to_positional};
pub use config::{ConnectionConfig, MySqlSettings};
pub use executor::MySqlStorage;

// Re-export sqlx migration types
pub use sqlx::migrate;
pub use sqlx::migrate::Migrator;
