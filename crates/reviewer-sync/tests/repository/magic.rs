//! Magic bag: copy-on-collect with per-source dedupe and weak references.

use reviewer_sync::repository::CollectOutcome;

use crate::common::{drafts, Device};

#[test]
fn collect_copies_the_source() {
    let d = Device::new();
    let source = d.repo.add_vocab_items(drafts(&["apple"])).unwrap().remove(0);

    let CollectOutcome::Added(magic) = d.repo.collect_magic_item(&source.id).unwrap() else {
        panic!("expected a new magic item");
    };
    assert_ne!(magic.id, source.id);
    assert_eq!(magic.source_block_id, source.id);
    assert_eq!(magic.text, "apple");
    assert_eq!(magic.box_name, source.box_name);
    assert!(!magic.copied);
}

#[test]
fn second_collect_of_same_source_is_suppressed() {
    let d = Device::new();
    let source = d.repo.add_vocab_items(drafts(&["apple"])).unwrap().remove(0);

    let first = d.repo.collect_magic_item(&source.id).unwrap();
    let second = d.repo.collect_magic_item(&source.id).unwrap();

    let (CollectOutcome::Added(a), CollectOutcome::AlreadyCollected(b)) = (first, second) else {
        panic!("expected Added then AlreadyCollected");
    };
    assert_eq!(a.id, b.id);
    assert_eq!(d.repo.list_live_magic_items().unwrap().len(), 1);
}

#[test]
fn collect_again_after_deleting_the_magic_item() {
    let d = Device::new();
    let source = d.repo.add_vocab_items(drafts(&["apple"])).unwrap().remove(0);
    let CollectOutcome::Added(first) = d.repo.collect_magic_item(&source.id).unwrap() else {
        panic!("expected a new magic item");
    };
    assert!(d.repo.soft_delete_magic_item(&first.id).unwrap());

    assert!(matches!(
        d.repo.collect_magic_item(&source.id).unwrap(),
        CollectOutcome::Added(_)
    ));
}

#[test]
fn missing_source_cannot_be_collected() {
    let d = Device::new();
    assert_eq!(
        d.repo.collect_magic_item("nope").unwrap(),
        CollectOutcome::SourceMissing
    );
}

#[test]
fn dangling_source_resolves_to_none() {
    let d = Device::new();
    let source = d.repo.add_vocab_items(drafts(&["apple"])).unwrap().remove(0);
    let CollectOutcome::Added(magic) = d.repo.collect_magic_item(&source.id).unwrap() else {
        panic!("expected a new magic item");
    };
    assert_eq!(
        d.repo.resolve_magic_source(&magic).unwrap().map(|s| s.id),
        Some(source.id.clone())
    );

    d.repo.soft_delete_vocab_item(&source.id).unwrap();

    assert_eq!(d.repo.resolve_magic_source(&magic).unwrap(), None);
    // the magic item itself is untouched
    assert_eq!(d.repo.list_live_magic_items().unwrap().len(), 1);
}

#[test]
fn list_is_newest_first_and_copied_flag_persists() {
    let d = Device::new();
    let sources = d.repo.add_vocab_items(drafts(&["a", "b"])).unwrap();
    for s in &sources {
        d.tick();
        d.repo.collect_magic_item(&s.id).unwrap();
    }

    let listed = d.repo.list_live_magic_items().unwrap();
    assert_eq!(listed[0].text, "b");
    assert_eq!(listed[1].text, "a");

    let updated = d.repo.set_magic_copied(&listed[1].id, true).unwrap().unwrap();
    assert!(updated.copied);
    assert!(d.repo.get_magic_item(&listed[1].id).unwrap().unwrap().copied);
    assert_eq!(d.repo.set_magic_copied("missing", true).unwrap(), None);
}
