//! MySQL implementation of Storage.

use std::future::Future;
use std::time::Instant;

use datamap::{Data, Id, Params, Storage, StorageError};
use parking_lot::Mutex;
use sqlx::mysql::{MySqlPoolOptions, MySqlQueryResult};
use sqlx::migrate::Migrator;
use sqlx::{MySql, MySqlPool, Transaction};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, trace};

use crate::bind::{arguments, decode_row, to_positional};
use crate::{ConnectionConfig, MySqlSettings};

/// Blocking [`Storage`] over a sqlx MySQL pool.
///
/// Owns a single-threaded tokio runtime and blocks on it for every call, so it
/// must not be used from inside another async runtime. While a transaction is
/// open every statement runs on the transaction's connection.
pub struct MySqlStorage {
    runtime: Runtime,
    pool: MySqlPool,
    last_insert_id: Mutex<Id>,
    tx: Mutex<Option<Transaction<'static, MySql>>>,
}

impl MySqlStorage {
    /// Connect to a MySQL database.
    pub fn connect(
        config: impl Into<ConnectionConfig>,
        settings: &MySqlSettings,
    ) -> Result<Self, StorageError> {
        let config = config.into();
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let pool = runtime
            .block_on(
                MySqlPoolOptions::new()
                    .max_connections(settings.max_connections)
                    .connect(config.url()),
            )
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        debug!(max_connections = settings.max_connections, "connected");
        Ok(Self::from_parts(runtime, pool))
    }

    /// Wrap an existing pool. The pool must have been created on `runtime`.
    pub fn from_parts(runtime: Runtime, pool: MySqlPool) -> Self {
        Self {
            runtime,
            pool,
            last_insert_id: Mutex::new(0),
            tx: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub fn migrate(&self, migrator: &Migrator) -> Result<(), StorageError> {
        self.block_on(migrator.run(&self.pool))
            .map_err(|e| StorageError::Query(e.to_string()))
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    // every statement overwrites the id, so non-inserts read back 0
    fn record(&self, result: &MySqlQueryResult) {
        *self.last_insert_id.lock() = insert_id_of(result.last_insert_id());
    }
}

fn insert_id_of(raw: u64) -> Id {
    Id::try_from(raw).unwrap_or(Id::MAX)
}

impl std::fmt::Debug for MySqlStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlStorage")
            .field("pool", &self.pool)
            .field("in_transaction", &self.tx.lock().is_some())
            .finish()
    }
}

impl Storage for MySqlStorage {
    fn execute(&self, sql: &str, params: &Params) -> Result<u64, StorageError> {
        let statement = to_positional(sql, params)?;
        let args = arguments(&statement.values)?;
        let started = Instant::now();

        let mut tx = self.tx.lock();
        let query = sqlx::query_with(&statement.sql, args);
        let result = match tx.as_mut() {
            Some(tx) => self.block_on(query.execute(&mut **tx)),
            None => self.block_on(query.execute(&self.pool)),
        }
        .map_err(|e| StorageError::Query(e.to_string()))?;

        self.record(&result);
        trace!(
            sql = %statement.sql,
            affected = result.rows_affected(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "execute"
        );
        Ok(result.rows_affected())
    }

    fn get_all(&self, sql: &str, params: &Params) -> Result<Vec<Data>, StorageError> {
        let statement = to_positional(sql, params)?;
        let args = arguments(&statement.values)?;
        let started = Instant::now();

        let mut tx = self.tx.lock();
        let query = sqlx::query_with(&statement.sql, args);
        let rows = match tx.as_mut() {
            Some(tx) => self.block_on(query.fetch_all(&mut **tx)),
            None => self.block_on(query.fetch_all(&self.pool)),
        }
        .map_err(|e| StorageError::Query(e.to_string()))?;

        trace!(
            sql = %statement.sql,
            rows = rows.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "query"
        );
        rows.iter().map(decode_row).collect()
    }

    fn insert_id(&self) -> Result<Id, StorageError> {
        Ok(*self.last_insert_id.lock())
    }

    fn begin(&self) -> Result<(), StorageError> {
        let mut tx = self.tx.lock();
        if tx.is_some() {
            return Err(StorageError::Transaction(
                "a transaction is already open".to_string(),
            ));
        }
        let opened = self
            .block_on(self.pool.begin())
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        *tx = Some(opened);
        trace!("begin");
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        let tx = self
            .tx
            .lock()
            .take()
            .ok_or_else(|| StorageError::Transaction("no open transaction".to_string()))?;
        self.block_on(tx.commit())
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        trace!("commit");
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        let tx = self
            .tx
            .lock()
            .take()
            .ok_or_else(|| StorageError::Transaction("no open transaction".to_string()))?;
        self.block_on(tx.rollback())
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        trace!("rollback");
        Ok(())
    }
}
