#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use datamap::{
    Cache, EntityAttachment, EntityRef, EntityTarget, EntityType, FieldDefinition, FieldType,
    Fieldset, GenericMapper, Id, MemoryCache, ModelError, Order, Repository, RepositorySettings,
    Storage, Value, data, transaction,
};
use indexmap::IndexMap;
use support::{FakeStorage, user_repository, user_row};

fn seeded() -> Arc<FakeStorage> {
    let storage = FakeStorage::new();
    for (id, name) in [(1, "ann"), (2, "bob"), (3, "cy")] {
        storage.seed("users", user_row(id, name));
    }
    storage
}

#[test]
fn fetch_skips_ids_already_in_the_identity_map() {
    let storage = seeded();
    let repo = user_repository(&storage);
    let bob = repo.find_by_id(2).unwrap().unwrap();
    storage.forget_statements();

    let found = repo.fetch(&[1, 2, 3]).unwrap();

    assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(storage.statements().len(), 1);
    assert!(storage.statements()[0].ends_with("WHERE `id` IN (1, 3)"));
    assert!(Rc::ptr_eq(&found[&2], &bob));
}

#[test]
fn one_instance_per_identity() {
    let storage = seeded();
    let repo = user_repository(&storage);

    let first = repo.find_by_id(1).unwrap().unwrap();
    first.borrow_mut().set("name", "annie").unwrap();
    let again = repo.fetch(&[1]).unwrap().shift_remove(&1).unwrap();

    assert!(Rc::ptr_eq(&first, &again));
    assert_eq!(again.borrow().get("name"), Value::from("annie"));
    assert_eq!(storage.count_starting_with("SELECT"), 1);
    assert!(repo.identity_map().has("User::1"));
}

#[test]
fn unknown_and_invalid_ids_are_absent() {
    let storage = seeded();
    let repo = user_repository(&storage);

    let found = repo.fetch(&[0, -4, 9, 3]).unwrap();

    assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![3]);
    assert!(storage.statements()[0].ends_with("IN (9, 3)"));
    assert!(repo.find_by_id(9).unwrap().is_none());
}

#[test]
fn save_inserts_then_updates() {
    let storage = FakeStorage::new();
    let repo = user_repository(&storage);
    let user = repo.create(data([("name", "dee")])).unwrap().shared();

    assert!(repo.save(&user).unwrap());
    let id = user.borrow().id().unwrap();
    assert!(Rc::ptr_eq(&repo.find_by_id(id).unwrap().unwrap(), &user));

    user.borrow_mut().set("name", "dina").unwrap();
    assert!(repo.save(&user).unwrap());
    assert_eq!(storage.count_starting_with("INSERT"), 1);
    assert_eq!(storage.count_starting_with("UPDATE"), 1);
    assert_eq!(storage.row("users", id).unwrap()["name"], Value::from("dina"));
}

#[test]
fn saves_are_written_through_to_the_cache() {
    let storage = FakeStorage::new();
    let cache = Arc::new(MemoryCache::new().with_indexing());
    let settings = RepositorySettings {
        cache_prefix: "app:".to_string(),
        ..Default::default()
    };
    let repo = user_repository(&storage)
        .with_cache(cache.clone())
        .with_settings(settings.clone());
    let user = repo.create(data([("name", "eve")])).unwrap().shared();
    repo.save(&user).unwrap();

    let payload = cache.read("app:User::1").unwrap().unwrap();
    let cached: datamap::Data = serde_json::from_str(&payload).unwrap();
    assert_eq!(cached["name"], Value::from("eve"));
    let index = cache.index().unwrap();
    assert_eq!(index.len(), 1);
    assert!(index[0].1.is_some());

    // a fresh unit of work is served from the cache
    storage.forget_statements();
    let other = user_repository(&storage)
        .with_cache(cache.clone())
        .with_settings(settings);
    let found = other.find_by_id(1).unwrap().unwrap();
    assert!(storage.statements().is_empty());
    assert_eq!(found.borrow().get("name"), Value::from("eve"));
    assert!(!found.borrow().is_dirty());
    assert!(!Rc::ptr_eq(&found, &user));
}

#[test]
fn storage_loads_fill_the_cache_and_bad_entries_are_misses() {
    let storage = seeded();
    let cache = Arc::new(MemoryCache::new());
    cache
        .write("User::2", "{not json".to_string(), Duration::ZERO)
        .unwrap();
    let repo = user_repository(&storage).with_cache(cache.clone());

    let found = repo.fetch(&[1, 2]).unwrap();

    assert_eq!(found.len(), 2);
    assert!(storage.statements()[0].ends_with("IN (1, 2)"));
    assert!(cache.read("User::1").unwrap().is_some());
    let repaired = cache.read("User::2").unwrap().unwrap();
    assert!(repaired.contains("bob"));
}

#[test]
fn delete_forgets_the_entity_everywhere() {
    let storage = seeded();
    let cache = Arc::new(MemoryCache::new());
    let repo = user_repository(&storage).with_cache(cache.clone());
    let cy = repo.find_by_id(3).unwrap().unwrap();
    assert!(cache.read("User::3").unwrap().is_some());

    assert!(repo.delete(EntityTarget::Shared(&cy)).unwrap());

    assert!(!repo.identity_map().has("User::3"));
    assert!(cache.read("User::3").unwrap().is_none());
    assert!(storage.row("users", 3).is_none());
    assert!(repo.find_by_id(3).unwrap().is_none());
}

#[test]
fn find_loads_matching_ids_in_query_order() {
    let storage = seeded();
    let repo = user_repository(&storage);
    storage.queue(vec![data([("id", 3)]), data([("id", 1)])]);

    let filter = repo
        .filter()
        .like("name", "%y%")
        .order_by("created", Order::Desc)
        .limit(10);
    let found = repo.find(&filter).unwrap();

    assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![3, 1]);
    let statements = storage.statements();
    assert_eq!(
        statements[0],
        "SELECT u.`id`\nFROM `users` AS u\nWHERE u.`name` LIKE :name\nORDER BY u.`created_on` DESC\nLIMIT :offset, :limit"
    );
    assert!(statements[1].ends_with("IN (3, 1)"));
}

#[test]
fn count_and_first() {
    let storage = seeded();
    let repo = user_repository(&storage);

    storage.queue(vec![data([("COUNT(u.`id`)", 2)])]);
    assert_eq!(repo.count(&repo.filter().gt("id", 1)).unwrap(), 2);
    assert!(storage.statements()[0].starts_with("SELECT COUNT(u.`id`)"));

    storage.queue(vec![data([("id", 2)])]);
    let first = repo.find_first(repo.filter()).unwrap().unwrap();
    assert_eq!(first.borrow().id(), Some(2));

    // nothing queued: no rows
    assert!(repo.find_first(repo.filter()).unwrap().is_none());
    assert_eq!(repo.count(&repo.filter()).unwrap(), 0);
}

#[test]
fn find_all_uses_the_configured_limit() {
    let storage = seeded();
    let repo = user_repository(&storage).with_settings(RepositorySettings {
        find_all_limit: 2,
        ..Default::default()
    });
    storage.queue(vec![data([("id", 1)]), data([("id", 2)])]);

    let all = repo.find_all(None).unwrap();
    assert_eq!(all.len(), 2);
    assert!(storage.statements()[0].contains("ORDER BY u.`id` ASC"));
}

struct Nicknames;

impl EntityAttachment for Nicknames {
    fn entity_type(&self) -> &str {
        "User"
    }

    fn attach(&self, items: &IndexMap<Id, EntityRef>) -> Result<(), ModelError> {
        for (id, user) in self.filter_items(items) {
            let mut user = user.borrow_mut();
            user.set("nickname", format!("user-{id}"))?;
            user.mark_field_clean("nickname")?;
        }
        Ok(())
    }
}

#[test]
fn attachments_run_after_find() {
    let storage = seeded();
    let repo = user_repository(&storage);
    storage.queue(vec![data([("id", 1)]), data([("id", 2)])]);

    let found = repo.find_with(&repo.filter(), &[&Nicknames]).unwrap();

    assert_eq!(found[&2].borrow().get("nickname"), Value::from("user-2"));
    assert!(!found[&1].borrow().is_dirty());
}

#[test]
fn related_types_share_the_identity_map() {
    let storage = seeded();
    let posts = Fieldset::builder()
        .id()
        .field(FieldDefinition::new("title", FieldType::Text).required())
        .field(FieldDefinition::new("user_id", FieldType::Integer))
        .build()
        .unwrap();
    storage.seed(
        "posts",
        data([
            ("id", Value::Int(1)),
            ("title", Value::from("hello")),
            ("user_id", Value::Int(2)),
        ]),
    );
    let dynamic: Arc<dyn Storage> = storage.clone();
    let post_mapper =
        GenericMapper::new(EntityType::new("Post", posts), dynamic, "posts").unwrap();
    let repo = user_repository(&storage);

    let post = repo.generic_fetch(&[1], &post_mapper).unwrap();
    let user = repo.find_by_id(1).unwrap().unwrap();

    assert_eq!(post[&1].borrow().type_name(), "Post");
    assert_eq!(user.borrow().type_name(), "User");
    assert!(repo.identity_map().has("Post::1"));
    assert!(repo.identity_map().has("User::1"));
    assert_eq!(repo.identity_map().len(), 2);
}

#[test]
fn transactions_commit_or_roll_back() {
    let storage = FakeStorage::new();
    let repo = user_repository(&storage);

    let saved: Result<bool, ModelError> = transaction(&*storage, |_| {
        let user = repo.create(data([("name", "fay")]))?.shared();
        repo.save(&user)
    });
    assert!(saved.unwrap());

    let failed: Result<bool, ModelError> = transaction(&*storage, |_| {
        let user = repo.create(data([("name", "")]))?.shared();
        repo.save(&user)
    });
    assert!(matches!(failed, Err(ModelError::PendingErrors { .. })));

    let statements = storage.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements[2], "COMMIT");
    assert_eq!(statements[3..], ["BEGIN", "ROLLBACK"]);
}
