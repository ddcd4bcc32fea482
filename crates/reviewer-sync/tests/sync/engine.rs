//! SyncEngine push/pull against the in-memory remote.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use reviewer_sync::config::SyncOptions;
use reviewer_sync::error::{ReviewerError, SyncError};
use reviewer_sync::repository::Repository;
use reviewer_sync::sync::types::{SyncErrorKind, SyncTransportError};
use reviewer_sync::sync::wire::{to_iso, WireRecord};
use reviewer_sync::types::{BoxName, Collection, Kind, Lang, VocabItem};

use crate::common::{drafts, signed_in, signed_out, Device, FakeRemote, USER};

fn remote_item(id: &str, box_name: &str, updated_at: i64) -> serde_json::Map<String, serde_json::Value> {
    json!({
        "id": id,
        "user_id": USER,
        "text": id,
        "lang": "en",
        "kind": "vocab",
        "box": box_name,
        "position": 0,
        "updated_at": to_iso(updated_at),
        "deleted": false,
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn local_item(id: &str, box_name: BoxName, updated_at: i64) -> VocabItem {
    VocabItem {
        id: id.to_string(),
        text: id.to_string(),
        lang: Lang::En,
        kind: Kind::Vocab,
        box_name,
        position: 0,
        updated_at,
        deleted: false,
    }
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn push_uploads_dirty_records_and_clears_them() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    let items = d.repo.add_vocab_items(drafts(&["a", "b"])).unwrap();

    let report = engine.push_all().await.unwrap();

    assert_eq!(report.pushed_in(Collection::Items), 2);
    assert!(d.dirty.is_empty().unwrap());
    let row = remote.row("items", &items[0].id).unwrap();
    assert_eq!(row["user_id"], USER);
    assert_eq!(row["text"], "a");
    assert_eq!(row["updated_at"], to_iso(items[0].updated_at).as_str());
    assert_eq!(engine.status().snapshot().last_push, Some(d.now()));
}

#[tokio::test]
async fn pushing_twice_leaves_the_same_remote_state() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    let item = d.repo.add_vocab_items(drafts(&["a"])).unwrap().remove(0);

    engine.push_all().await.unwrap();
    let once = remote.rows("items");

    // mark the unchanged record dirty again and push it again
    d.dirty
        .mark_dirty(Collection::Items, &[item.id.clone()])
        .unwrap();
    engine.push_all().await.unwrap();

    assert_eq!(remote.rows("items"), once);
    assert_eq!(remote.upsert_calls().len(), 2);
}

#[tokio::test]
async fn push_with_nothing_dirty_does_not_touch_the_remote() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());

    let report = engine.push_all().await.unwrap();

    assert_eq!(report.total(), 0);
    assert!(remote.upsert_calls().is_empty());
    assert_eq!(engine.status().snapshot().last_push, None);
}

#[tokio::test]
async fn push_requires_an_identity() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_out());
    d.repo.add_vocab_items(drafts(&["a"])).unwrap();

    let err = engine.push_all().await.unwrap_err();

    assert!(matches!(err, ReviewerError::Sync(SyncError::NotAuthenticated)));
    assert!(remote.upsert_calls().is_empty());
    assert!(!d.dirty.is_empty().unwrap());
}

#[tokio::test]
async fn failed_collection_keeps_its_dirty_ids_and_reports_error() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    let item = d.repo.add_vocab_items(drafts(&["a"])).unwrap().remove(0);
    d.repo
        .save_settings(serde_json::Map::from_iter([("k".to_string(), json!(1))]))
        .unwrap();
    remote.on_upsert(|table| {
        if table == "user_settings" {
            Err(SyncTransportError::with_kind("rate limited", SyncErrorKind::Capacity))
        } else {
            Ok(())
        }
    });

    let err = engine.push_all().await.unwrap_err();

    match err {
        ReviewerError::Sync(SyncError::Transport { collection, source }) => {
            assert_eq!(collection, Collection::Settings);
            assert_eq!(source.kind, SyncErrorKind::Capacity);
        }
        other => panic!("unexpected error: {other}"),
    }
    // items went through before the failure; settings stay dirty
    assert!(d.dirty.dirty_ids(Collection::Items).unwrap().is_empty());
    assert_eq!(
        d.dirty.dirty_ids(Collection::Settings).unwrap(),
        vec!["settings".to_string()]
    );
    assert!(remote.row("items", &item.id).is_some());

    let status = engine.status().snapshot();
    assert!(!status.pushing);
    assert!(status.error.unwrap().contains("rate limited"));
    assert_eq!(status.last_push, None);

    remote.heal();
    engine.push_all().await.unwrap();
    assert!(d.dirty.is_empty().unwrap());
    assert_eq!(engine.status().error(), None);
}

#[tokio::test]
async fn dirty_clear_only_removes_pushed_ids() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    let items = d.repo.add_vocab_items(drafts(&["a", "b"])).unwrap();

    // simulate a push that only covered {a}
    d.dirty
        .clear_dirty(Collection::Items, &[items[0].id.clone()])
        .unwrap();
    assert_eq!(
        d.dirty.dirty_ids(Collection::Items).unwrap(),
        vec![items[1].id.clone()]
    );

    engine.push_all().await.unwrap();
    assert_eq!(remote.rows("items").len(), 1);
    assert!(remote.row("items", &items[1].id).is_some());
}

#[tokio::test]
async fn dirty_id_without_local_record_is_cleared() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    d.dirty
        .mark_dirty(Collection::Items, &["ghost".to_string()])
        .unwrap();

    let report = engine.push_all().await.unwrap();

    assert_eq!(report.missing, 1);
    assert!(remote.upsert_calls().is_empty());
    assert!(d.dirty.is_empty().unwrap());
}

#[tokio::test]
async fn edit_made_while_upsert_is_in_flight_stays_dirty() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    let item = d.repo.add_vocab_items(drafts(&["orig"])).unwrap().remove(0);

    // A second handle on the same store edits the item while the first
    // upsert is still awaiting the remote.
    let editor = Repository::new(
        d.store.clone(),
        d.dirty.clone(),
        d.clock.clone(),
        d.changes.clone(),
        &SyncOptions::default(),
    );
    let edited = Arc::new(AtomicBool::new(false));
    let (id, once) = (item.id.clone(), edited.clone());
    remote.on_upsert(move |table| {
        if table == "items" && !once.swap(true, Ordering::SeqCst) {
            editor.edit_vocab_text(&id, "edited-mid-push").unwrap();
        }
        Ok(())
    });

    engine.push_all().await.unwrap();

    assert!(edited.load(Ordering::SeqCst));
    assert_eq!(remote.row("items", &item.id).unwrap()["text"], "orig");
    assert_eq!(
        d.dirty.dirty_ids(Collection::Items).unwrap(),
        vec![item.id.clone()]
    );

    engine.push_all().await.unwrap();

    assert_eq!(
        remote.row("items", &item.id).unwrap()["text"],
        "edited-mid-push"
    );
    assert!(d.dirty.is_empty().unwrap());
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn older_remote_loses_to_local() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    d.store
        .put(Collection::Items, &local_item("x", BoxName::Box1, 100))
        .unwrap();
    remote.insert("items", remote_item("x", "box2", 50));

    let report = engine.pull_all(false).await.unwrap();

    assert_eq!((report.applied, report.ignored), (0, 1));
    let local = d.repo.get_vocab_item("x").unwrap().unwrap();
    assert_eq!((local.box_name, local.updated_at), (BoxName::Box1, 100));
}

#[tokio::test]
async fn newer_remote_wins_without_marking_dirty() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    d.store
        .put(Collection::Items, &local_item("x", BoxName::Box1, 100))
        .unwrap();
    remote.insert("items", remote_item("x", "box2", 200));

    let report = engine.pull_all(false).await.unwrap();

    assert_eq!(report.applied, 1);
    let local = d.repo.get_vocab_item("x").unwrap().unwrap();
    assert_eq!((local.box_name, local.updated_at), (BoxName::Box2, 200));
    assert!(d.dirty.is_empty().unwrap());
}

#[tokio::test]
async fn equal_timestamps_keep_local() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    d.store
        .put(Collection::Items, &local_item("x", BoxName::Box1, 100))
        .unwrap();
    remote.insert("items", remote_item("x", "box2", 100));

    engine.pull_all(false).await.unwrap();

    assert_eq!(
        d.repo.get_vocab_item("x").unwrap().unwrap().box_name,
        BoxName::Box1
    );
}

#[tokio::test]
async fn remote_tombstone_for_unknown_record_is_ignored() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    let mut row = remote_item("gone", "stash", 500);
    row.insert("deleted".into(), json!(true));
    remote.insert("items", row);

    engine.pull_all(false).await.unwrap();

    assert_eq!(d.repo.get_vocab_item("gone").unwrap(), None);
}

#[tokio::test]
async fn malformed_rows_are_skipped() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    let mut bad = remote_item("bad", "stash", 500);
    bad.insert("updated_at".into(), json!("not a date"));
    remote.insert("items", bad);
    remote.insert("items", remote_item("good", "box3", 500));

    let report = engine.pull_all(false).await.unwrap();

    assert_eq!((report.applied, report.skipped), (1, 1));
    assert!(d.repo.get_vocab_item("good").unwrap().is_some());
}

#[tokio::test]
async fn checkpoint_is_the_pull_start_time() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    let started = d.now();

    engine.pull_all(false).await.unwrap();
    assert_eq!(engine.last_pull().unwrap(), Some(started));
    assert_eq!(engine.status().snapshot().last_pull, Some(started));

    d.tick();
    engine.pull_all(false).await.unwrap();
    let calls = remote.select_calls();
    assert!(calls.iter().take(5).all(|(_, since)| since.is_none()));
    assert!(calls.iter().skip(5).all(|(_, since)| *since == Some(started)));

    engine.pull_all(true).await.unwrap();
    assert!(remote.select_calls().iter().skip(10).all(|(_, since)| since.is_none()));
}

#[tokio::test]
async fn failed_pull_keeps_the_checkpoint() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    engine.pull_all(false).await.unwrap();
    let checkpoint = engine.last_pull().unwrap();

    d.tick();
    remote.on_select(|table| {
        if table == "magic_items" {
            Err(SyncTransportError::new("offline"))
        } else {
            Ok(())
        }
    });
    let err = engine.pull_all(false).await.unwrap_err();

    assert!(err.to_string().contains("magic_items"));
    assert_eq!(engine.last_pull().unwrap(), checkpoint);
    let status = engine.status().snapshot();
    assert!(!status.pulling);
    assert_eq!(status.error.as_deref(), Some(err.to_string().as_str()));
}

#[tokio::test]
async fn pull_brings_in_every_synced_collection() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    remote.insert("items", remote_item("i1", "box1", 10));
    remote.insert(
        "unread_articles",
        json!({
            "id": "u1", "user_id": USER, "lang": "ja", "raw": "r", "html": "<p>r</p>",
            "used_block_ids": ["i1"], "created_at": to_iso(5), "updated_at": to_iso(10),
            "deleted": false,
        })
        .as_object()
        .cloned()
        .unwrap(),
    );
    remote.insert(
        "user_settings",
        json!({"id": "settings", "user_id": USER, "data": {"ratio": 0.5},
               "updated_at": to_iso(10), "deleted": false})
        .as_object()
        .cloned()
        .unwrap(),
    );
    // another user's row is never selected
    let mut foreign = remote_item("i2", "box1", 10);
    foreign.insert("user_id".into(), json!("someone-else"));
    remote.insert("items", foreign);

    let report = engine.pull_all(false).await.unwrap();

    assert_eq!(report.applied, 3);
    let unread = d
        .repo
        .list_live_articles(reviewer_sync::types::ArticleKind::Unread)
        .unwrap();
    assert_eq!(unread[0].used_block_ids, vec!["i1".to_string()]);
    assert_eq!(unread[0].lang, Lang::Ja);
    assert_eq!(d.repo.settings().unwrap().values["ratio"], 0.5);
    assert_eq!(d.repo.get_vocab_item("i2").unwrap(), None);
}

// ============================================================================
// Both
// ============================================================================

#[tokio::test]
async fn sync_all_pushes_before_pulling() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    let item = d.repo.add_vocab_items(drafts(&["a"])).unwrap().remove(0);

    let report = engine.sync_all().await.unwrap();

    assert_eq!(report.push.total(), 1);
    // our own row comes back with the same timestamp and is ignored
    assert_eq!(report.pull.applied, 0);
    assert_eq!(report.pull.ignored, 1);
    assert_eq!(remote.upsert_calls()[0].1, vec![item.id]);
}

#[tokio::test]
async fn wiping_local_data_resets_status() {
    let d = Device::new();
    let remote = FakeRemote::new();
    let engine = d.engine(remote.clone(), signed_in());
    engine.pull_all(false).await.unwrap();
    assert!(engine.status().snapshot().last_pull.is_some());

    d.repo.wipe_all_local_data().unwrap();

    assert_eq!(engine.status().snapshot().last_pull, None);
    assert_eq!(engine.last_pull().unwrap(), None);
}

#[test]
fn wire_rows_round_trip_items() {
    let item = local_item("x", BoxName::Trash, 42);
    assert_eq!(VocabItem::from_wire("items", &item.to_wire(USER)).unwrap(), item);
}
