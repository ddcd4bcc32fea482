//! LocalStore behavior shared by every backend. The `check_*` functions are
//! reused by the SQLite suite.

use std::sync::Arc;

use reviewer_sync::storage::{LocalStore, MemoryBackend};
use reviewer_sync::types::{
    Article, BoxName, Collection, Kind, Lang, Settings, StateBlob, VocabItem,
};
use serde_json::json;

pub(super) fn item(id: &str, box_name: BoxName, position: u32) -> VocabItem {
    VocabItem {
        id: id.to_string(),
        text: format!("text-{id}"),
        lang: Lang::Ja,
        kind: Kind::Vocab,
        box_name,
        position,
        updated_at: 10,
        deleted: false,
    }
}

pub(super) fn article(id: &str, created_at: i64) -> Article {
    Article {
        id: id.to_string(),
        created_at,
        lang: Lang::En,
        raw: "raw".to_string(),
        html: "<p>raw</p>".to_string(),
        used_block_ids: vec![],
        updated_at: created_at,
        deleted: false,
    }
}

fn ids<T: reviewer_sync::types::Record>(records: &[T]) -> Vec<String> {
    records.iter().map(|r| r.key().to_string()).collect()
}

// ============================================================================
// Checks
// ============================================================================

pub(super) fn check_put_get_and_replace(store: &LocalStore) {
    let mut x = item("x", BoxName::Stash, 0);
    store.put(Collection::Items, &x).unwrap();
    assert_eq!(store.get::<VocabItem>(Collection::Items, "x").unwrap(), Some(x.clone()));

    x.text = "changed".to_string();
    x.deleted = true;
    store.put(Collection::Items, &x).unwrap();
    let stored = store.get::<VocabItem>(Collection::Items, "x").unwrap().unwrap();
    assert_eq!(stored.text, "changed");
    assert!(stored.deleted);
    assert_eq!(store.count(Collection::Items).unwrap(), 1);

    assert_eq!(store.get::<VocabItem>(Collection::Items, "missing").unwrap(), None);
}

pub(super) fn check_storage_order_survives_replace(store: &LocalStore) {
    store
        .bulk_put(
            Collection::Items,
            &[
                item("c", BoxName::Stash, 0),
                item("a", BoxName::Stash, 1),
                item("b", BoxName::Stash, 2),
            ],
        )
        .unwrap();
    // replacing "c" must not move it to the end
    store
        .put(Collection::Items, &item("c", BoxName::Box1, 0))
        .unwrap();

    let all: Vec<VocabItem> = store.get_all(Collection::Items).unwrap();
    assert_eq!(ids(&all), vec!["c", "a", "b"]);
}

pub(super) fn check_box_scan_orders_by_position(store: &LocalStore) {
    store
        .bulk_put(
            Collection::Items,
            &[
                item("p2", BoxName::Box2, 2),
                item("p0", BoxName::Box2, 0),
                item("other", BoxName::Box3, 0),
                item("p1", BoxName::Box2, 1),
            ],
        )
        .unwrap();

    assert_eq!(ids(&store.items_in_box(BoxName::Box2).unwrap()), vec!["p0", "p1", "p2"]);
    assert_eq!(ids(&store.items_in_box(BoxName::Box3).unwrap()), vec!["other"]);
    assert!(store.items_in_box(BoxName::Trash).unwrap().is_empty());
}

pub(super) fn check_newest_first_keeps_storage_order_on_ties(store: &LocalStore) {
    store
        .bulk_put(
            Collection::Articles,
            &[article("old", 1), article("tie-1", 5), article("tie-2", 5), article("new", 9)],
        )
        .unwrap();

    let listed: Vec<Article> = store.newest_first(Collection::Articles).unwrap();
    assert_eq!(ids(&listed), vec!["new", "tie-1", "tie-2", "old"]);
}

pub(super) fn check_collections_are_isolated(store: &LocalStore) {
    store.put(Collection::Articles, &article("same", 1)).unwrap();
    store
        .put(Collection::UnreadArticles, &article("same", 2))
        .unwrap();

    assert_eq!(store.count(Collection::Articles).unwrap(), 1);
    assert_eq!(store.clear(Collection::Articles).unwrap(), 1);
    assert_eq!(store.count(Collection::Articles).unwrap(), 0);
    let unread = store
        .get::<Article>(Collection::UnreadArticles, "same")
        .unwrap()
        .unwrap();
    assert_eq!(unread.created_at, 2);
}

pub(super) fn check_meta_round_trip(store: &LocalStore) {
    assert_eq!(store.get_meta("sync:last_pull").unwrap(), None);
    store.set_meta("sync:last_pull", "123").unwrap();
    store.set_meta("sync:last_pull", "456").unwrap();
    assert_eq!(store.get_meta("sync:last_pull").unwrap().as_deref(), Some("456"));
    store.delete_meta("sync:last_pull").unwrap();
    store.delete_meta("sync:last_pull").unwrap();
    assert_eq!(store.get_meta("sync:last_pull").unwrap(), None);
}

pub(super) fn check_singletons_and_state(store: &LocalStore) {
    let settings = Settings {
        values: json!({"ratio": 0.25}).as_object().cloned().unwrap(),
        updated_at: 7,
    };
    store.put(Collection::Settings, &settings).unwrap();
    store
        .put(
            Collection::State,
            &StateBlob {
                key: "draft".to_string(),
                value: "猫 犬".to_string(),
                updated_at: 7,
            },
        )
        .unwrap();

    assert_eq!(
        store.get::<Settings>(Collection::Settings, "settings").unwrap(),
        Some(settings)
    );
    let blob: StateBlob = store.get(Collection::State, "draft").unwrap().unwrap();
    assert_eq!(blob.value, "猫 犬");
    assert!(store.delete(Collection::State, "draft").unwrap());
    assert!(!store.delete(Collection::State, "draft").unwrap());
}

pub(super) fn check_get_many_skips_missing(store: &LocalStore) {
    store
        .bulk_put(
            Collection::Items,
            &[item("a", BoxName::Stash, 0), item("b", BoxName::Stash, 1)],
        )
        .unwrap();

    let found: Vec<VocabItem> = store
        .get_many(
            Collection::Items,
            &["b".to_string(), "nope".to_string(), "a".to_string()],
        )
        .unwrap();
    assert_eq!(ids(&found), vec!["b", "a"]);
}

// ============================================================================
// Memory backend
// ============================================================================

fn memory() -> LocalStore {
    LocalStore::open(Arc::new(MemoryBackend::new())).unwrap()
}

#[test]
fn memory_put_get_and_replace() {
    check_put_get_and_replace(&memory());
}

#[test]
fn memory_storage_order_survives_replace() {
    check_storage_order_survives_replace(&memory());
}

#[test]
fn memory_box_scan_orders_by_position() {
    check_box_scan_orders_by_position(&memory());
}

#[test]
fn memory_newest_first_keeps_storage_order_on_ties() {
    check_newest_first_keeps_storage_order_on_ties(&memory());
}

#[test]
fn memory_collections_are_isolated() {
    check_collections_are_isolated(&memory());
}

#[test]
fn memory_meta_round_trip() {
    check_meta_round_trip(&memory());
}

#[test]
fn memory_singletons_and_state() {
    check_singletons_and_state(&memory());
}

#[test]
fn memory_get_many_skips_missing() {
    check_get_many_skips_missing(&memory());
}

#[test]
fn undecodable_record_is_reported_as_corruption() {
    let store = memory();
    store.put(Collection::Items, &item("x", BoxName::Stash, 0)).unwrap();

    // an item row read back as an article cannot decode
    let err = store
        .get::<Article>(Collection::Items, "x")
        .unwrap_err();
    assert!(err.to_string().contains("items/x"));
}

#[test]
fn raw_value_keeps_local_field_names() {
    let store = memory();
    store.put(Collection::Items, &item("x", BoxName::Box1, 4)).unwrap();

    let value = store.get_value(Collection::Items, "x").unwrap().unwrap();
    assert_eq!(value["box"], "box1");
    assert_eq!(value["updatedAt"], 10);
}
