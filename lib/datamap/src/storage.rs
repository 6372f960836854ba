//! The relational storage collaborator consumed by mappers and repositories.

use indexmap::IndexMap;
use tracing::warn;

use crate::{Data, Id, StorageError, Value};

/// Parameters bound to a statement.
///
/// `Named` binds `:name` placeholders, `Positional` binds `?` placeholders in
/// order.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Named(IndexMap<String, Value>),
    Positional(Vec<Value>),
}

impl Params {
    pub fn none() -> Self {
        Params::Positional(Vec::new())
    }

    pub fn named<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn positional<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Named parameter lookup. Always `None` for positional parameters.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Params::Named(map) => map.get(name),
            Params::Positional(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Params::Named(map) => map.len(),
            Params::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::none()
    }
}

impl From<IndexMap<String, Value>> for Params {
    fn from(map: IndexMap<String, Value>) -> Self {
        Params::Named(map)
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

/// Blocking access to a relational store.
///
/// Rows come back as [`Data`] keyed by column label, in select-list order.
/// Implementations must be shareable between repositories, so `&self`
/// throughout; any connection or transaction state is interior.
pub trait Storage: Send + Sync {
    /// Run a statement that returns no rows. Returns the affected row count.
    fn execute(&self, sql: &str, params: &Params) -> Result<u64, StorageError>;

    /// Run a query and return every row.
    fn get_all(&self, sql: &str, params: &Params) -> Result<Vec<Data>, StorageError>;

    /// The first row, if any.
    fn get_row(&self, sql: &str, params: &Params) -> Result<Option<Data>, StorageError> {
        Ok(self.get_all(sql, params)?.into_iter().next())
    }

    /// The first column of every row.
    fn get_col(&self, sql: &str, params: &Params) -> Result<Vec<Value>, StorageError> {
        Ok(self
            .get_all(sql, params)?
            .into_iter()
            .filter_map(|row| row.into_iter().next().map(|(_, value)| value))
            .collect())
    }

    /// The first column of the first row.
    fn get_one(&self, sql: &str, params: &Params) -> Result<Option<Value>, StorageError> {
        Ok(self
            .get_row(sql, params)?
            .and_then(|row| row.into_iter().next().map(|(_, value)| value)))
    }

    /// Identity generated by the most recent statement, `0` when it generated none.
    fn insert_id(&self) -> Result<Id, StorageError>;

    fn begin(&self) -> Result<(), StorageError>;

    fn commit(&self) -> Result<(), StorageError>;

    fn rollback(&self) -> Result<(), StorageError>;
}

/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
///
/// A failed rollback is logged; the error from `f` is what's returned.
pub fn transaction<S, T, E, F>(storage: &S, f: F) -> Result<T, E>
where
    S: Storage + ?Sized,
    E: From<StorageError>,
    F: FnOnce(&S) -> Result<T, E>,
{
    storage.begin()?;
    match f(storage) {
        Ok(value) => {
            storage.commit()?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = storage.rollback() {
                warn!(error = %rollback, "rollback failed");
            }
            Err(error)
        }
    }
}
