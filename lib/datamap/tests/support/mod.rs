//! In-memory storage that understands the statements the mapper emits.
//!
//! Batch fetches, inserts, updates and deletes are applied to per-table row
//! maps. Any other query is answered from a queue of canned results. Every
//! statement is recorded.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use datamap::{
    Data, FieldDefinition, FieldType, Fieldset, GenericMapper, GenericRepository, Id,
    IdentityMap, Params, Storage, StorageError, Value,
};
use parking_lot::Mutex;

#[derive(Default)]
struct State {
    tables: HashMap<String, BTreeMap<Id, Data>>,
    next_id: Id,
    last_insert_id: Id,
    log: Vec<String>,
    canned: VecDeque<Vec<Data>>,
}

#[derive(Default)]
pub struct FakeStorage {
    state: Mutex<State>,
}

fn between<'a>(s: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = s.find(start)? + start.len();
    let to = s[from..].find(end)? + from;
    Some(&s[from..to])
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('`')
}

// "`a` = :a,\n`b` = :b" -> [(column, field)]
fn assignments(set: &str) -> Vec<(String, String)> {
    set.split(",\n")
        .filter_map(|pair| {
            let (column, field) = pair.split_once(" = :")?;
            Some((unquote(column).to_string(), field.trim().to_string()))
        })
        .collect()
}

impl FakeStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                next_id: 1,
                ..Default::default()
            }),
        })
    }

    /// Put a row straight into a table.
    pub fn seed(&self, table: &str, row: Data) {
        let mut state = self.state.lock();
        let id = row.get("id").and_then(Value::as_i64).unwrap_or(0);
        state.next_id = state.next_id.max(id + 1);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn row(&self, table: &str, id: Id) -> Option<Data> {
        self.state.lock().tables.get(table)?.get(&id).cloned()
    }

    /// Result for the next query the fake can't answer itself.
    pub fn queue(&self, rows: Vec<Data>) {
        self.state.lock().canned.push_back(rows);
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn count_starting_with(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }

    pub fn forget_statements(&self) {
        self.state.lock().log.clear();
    }

    fn insert(state: &mut State, sql: &str, params: &Params) -> Result<u64, StorageError> {
        let table = between(sql, "INSERT INTO `", "`").unwrap_or_default().to_string();
        let mut row = Data::new();
        if let Some((_, set)) = sql.split_once("\nSET ") {
            for (column, field) in assignments(set) {
                let value = params
                    .get(&field)
                    .cloned()
                    .ok_or(StorageError::MissingParameter(field))?;
                row.insert(column, value);
            }
        }
        let id = match row.get("id").and_then(Value::as_i64) {
            Some(id) => id,
            None => {
                let id = state.next_id;
                row.insert("id".to_string(), Value::Int(id));
                id
            }
        };
        state.next_id = state.next_id.max(id + 1);
        state.last_insert_id = id;
        state.tables.entry(table).or_default().insert(id, row);
        Ok(1)
    }

    fn update(state: &mut State, sql: &str, params: &Params) -> Result<u64, StorageError> {
        let table = between(sql, "UPDATE `", "`").unwrap_or_default();
        let set = between(sql, "\nSET ", "\nWHERE").unwrap_or_default();
        let id = params
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StorageError::MissingParameter("id".into()))?;
        let Some(row) = state.tables.get_mut(table).and_then(|t| t.get_mut(&id)) else {
            return Ok(0);
        };
        for (column, field) in assignments(set) {
            if let Some(value) = params.get(&field) {
                row.insert(column, value.clone());
            }
        }
        Ok(1)
    }

    fn delete(state: &mut State, sql: &str, params: &Params) -> u64 {
        let table = between(sql, "DELETE FROM `", "`").unwrap_or_default();
        let id = match params {
            Params::Positional(values) => values.first().and_then(Value::as_i64),
            Params::Named(_) => params.get("id").and_then(Value::as_i64),
        };
        let removed = id.and_then(|id| state.tables.get_mut(table)?.remove(&id));
        u64::from(removed.is_some())
    }

    // "SELECT `id`, `created_on` AS `created` FROM `t` WHERE `id` IN (1, 2)"
    fn batch_fetch(state: &State, sql: &str) -> Option<Vec<Data>> {
        let select = between(sql, "SELECT ", " FROM `")?;
        let table = between(sql, " FROM `", "`")?;
        let ids: Vec<Id> = between(sql, " IN (", ")")?
            .split(", ")
            .filter_map(|id| id.trim().parse().ok())
            .collect();
        let columns: Vec<(String, String)> = select
            .split(", ")
            .map(|item| match item.split_once(" AS ") {
                Some((column, label)) => (unquote(column).to_string(), unquote(label).to_string()),
                None => (unquote(item).to_string(), unquote(item).to_string()),
            })
            .collect();

        let rows = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|(id, _)| ids.contains(id))
                    .map(|(_, row)| {
                        columns
                            .iter()
                            .map(|(column, label)| {
                                (label.clone(), row.get(column).cloned().unwrap_or_default())
                            })
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(rows)
    }
}

impl Storage for FakeStorage {
    fn execute(&self, sql: &str, params: &Params) -> Result<u64, StorageError> {
        let mut state = self.state.lock();
        state.log.push(sql.to_string());
        state.last_insert_id = 0;
        if sql.starts_with("INSERT INTO") {
            Self::insert(&mut state, sql, params)
        } else if sql.starts_with("UPDATE") {
            Self::update(&mut state, sql, params)
        } else if sql.starts_with("DELETE FROM") {
            Ok(Self::delete(&mut state, sql, params))
        } else {
            Err(StorageError::Query(format!("unsupported statement: {sql}")))
        }
    }

    fn get_all(&self, sql: &str, _params: &Params) -> Result<Vec<Data>, StorageError> {
        let mut state = self.state.lock();
        state.log.push(sql.to_string());
        if !sql.contains('\n') {
            if let Some(rows) = Self::batch_fetch(&state, sql) {
                return Ok(rows);
            }
        }
        Ok(state.canned.pop_front().unwrap_or_default())
    }

    fn insert_id(&self) -> Result<Id, StorageError> {
        Ok(self.state.lock().last_insert_id)
    }

    fn begin(&self) -> Result<(), StorageError> {
        self.state.lock().log.push("BEGIN".to_string());
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        self.state.lock().log.push("COMMIT".to_string());
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        self.state.lock().log.push("ROLLBACK".to_string());
        Ok(())
    }
}

/// `{id, name (required), email, created (column created_on)}` in `users`.
pub fn user_fields() -> Fieldset {
    Fieldset::builder()
        .id()
        .field(FieldDefinition::new("name", FieldType::Text).required().max_length(80))
        .field(FieldDefinition::new("email", FieldType::Email).nullable())
        .field(FieldDefinition::new("created", FieldType::DateTime).column("created_on"))
        .build()
        .unwrap()
}

pub fn users(storage: &Arc<FakeStorage>) -> GenericMapper {
    let kind = datamap::EntityType::new("User", user_fields());
    let storage: Arc<dyn Storage> = storage.clone();
    GenericMapper::new(kind, storage, "users").unwrap()
}

pub fn user_repository(storage: &Arc<FakeStorage>) -> GenericRepository {
    let dynamic: Arc<dyn Storage> = storage.clone();
    GenericRepository::new(dynamic, Rc::new(IdentityMap::new()), users(storage))
}

pub fn user_row(id: Id, name: &str) -> Data {
    datamap::data([
        ("id", Value::Int(id)),
        ("name", Value::from(name)),
        ("email", Value::Null),
        ("created_on", Value::from("2024-01-02 03:04:05")),
    ])
}
