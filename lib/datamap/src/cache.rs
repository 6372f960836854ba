//! Key/value cache collaborator used by repositories as a write-through
//! accelerator in front of storage.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::CacheError;

/// A string key/value cache with per-key expiry.
///
/// A zero `ttl` means the entry never expires.
pub trait Cache: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Read several keys at once. Missing keys are absent from the result.
    fn multi_read(&self, keys: &[String]) -> Result<HashMap<String, String>, CacheError> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.read(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    fn write(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a key. Returns whether it was present.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key.
    fn flush(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<String, Slot>,
    // key -> expiry, only maintained when indexing is on
    index: HashMap<String, Option<Instant>>,
}

/// Process-local cache.
///
/// Keys are stored with an optional prefix. With indexing enabled the cache
/// also tracks which keys were written and when they expire.
#[derive(Debug, Default)]
pub struct MemoryCache {
    prefix: String,
    indexing: bool,
    state: Mutex<State>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_indexing(mut self) -> Self {
        self.indexing = true;
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Keys written (prefix included) and their expiry, or `None` when
    /// indexing is off.
    pub fn index(&self) -> Option<Vec<(String, Option<Instant>)>> {
        if !self.indexing {
            return None;
        }
        let state = self.state.lock();
        let mut entries: Vec<_> = state
            .index
            .iter()
            .map(|(key, expires)| (key.clone(), *expires))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Some(entries)
    }

    /// Forget the index without touching stored values.
    pub fn flush_index(&self) {
        self.state.lock().index.clear();
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| slot.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn read(&self, key: &str) -> Result<Option<String>, CacheError> {
        let key = self.key(key);
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.slots.get(&key) {
            Some(slot) if slot.is_live(now) => Ok(Some(slot.value.clone())),
            Some(_) => {
                state.slots.remove(&key);
                state.index.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let key = self.key(key);
        let expires = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        let mut state = self.state.lock();
        if self.indexing {
            state.index.insert(key.clone(), expires);
        }
        state.slots.insert(key, Slot { value, expires });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let key = self.key(key);
        let mut state = self.state.lock();
        state.index.remove(&key);
        Ok(state.slots.remove(&key).is_some())
    }

    fn flush(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        state.slots.clear();
        state.index.clear();
        Ok(())
    }
}
