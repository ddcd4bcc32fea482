//! Saved and unread articles: cap, trim, load-and-remove, bulk delete.

use reviewer_sync::config::SyncOptions;
use reviewer_sync::types::{Article, ArticleKind, Lang, Timestamp};

use crate::common::Device;

fn article(id: &str, created_at: Timestamp, lang: Lang) -> Article {
    Article {
        id: id.to_string(),
        created_at,
        lang,
        raw: format!("raw {id}"),
        html: format!("<p>{id}</p>"),
        used_block_ids: Vec::new(),
        updated_at: 0,
        deleted: false,
    }
}

/// A device whose save path never trims on its own.
fn uncapped() -> Device {
    Device::with_options(&SyncOptions {
        max_saved_articles: Some(usize::MAX),
        ..SyncOptions::default()
    })
}

fn live_ids(d: &Device, kind: ArticleKind) -> Vec<String> {
    d.repo
        .list_live_articles(kind)
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect()
}

#[test]
fn trim_keeps_the_most_recent_and_is_idempotent() {
    let d = uncapped();
    for i in 0..20 {
        d.repo
            .save_article(article(&format!("a{i:02}"), 100 + i, Lang::En))
            .unwrap();
    }

    assert_eq!(d.repo.trim_old_articles(15).unwrap(), 5);

    let live = live_ids(&d, ArticleKind::Saved);
    assert_eq!(live.len(), 15);
    assert_eq!(live.first().map(String::as_str), Some("a19"));
    assert_eq!(live.last().map(String::as_str), Some("a05"));
    for i in 0..5 {
        let old = d
            .repo
            .get_article(ArticleKind::Saved, &format!("a{i:02}"))
            .unwrap()
            .unwrap();
        assert!(old.deleted, "a{i:02} should be tombstoned");
    }

    assert_eq!(d.repo.trim_old_articles(15).unwrap(), 0);
}

#[test]
fn trim_breaks_created_at_ties_by_storage_order() {
    let d = uncapped();
    d.repo.save_article(article("first", 100, Lang::En)).unwrap();
    d.repo.save_article(article("second", 100, Lang::En)).unwrap();
    d.repo.save_article(article("newest", 200, Lang::En)).unwrap();

    d.repo.trim_old_articles(2).unwrap();

    assert_eq!(live_ids(&d, ArticleKind::Saved), vec!["newest", "second"]);
}

#[test]
fn save_applies_the_configured_cap() {
    let d = Device::with_options(&SyncOptions {
        max_saved_articles: Some(3),
        ..SyncOptions::default()
    });
    for i in 0..5 {
        d.repo
            .save_article(article(&format!("a{i}"), 100 + i, Lang::Ja))
            .unwrap();
    }
    assert_eq!(live_ids(&d, ArticleKind::Saved), vec!["a4", "a3", "a2"]);
}

#[test]
fn unread_articles_are_uncapped() {
    let d = Device::with_options(&SyncOptions {
        max_saved_articles: Some(1),
        ..SyncOptions::default()
    });
    for i in 0..4 {
        d.repo
            .add_unread_article(article(&format!("u{i}"), 100 + i, Lang::En))
            .unwrap();
    }
    assert_eq!(live_ids(&d, ArticleKind::Unread).len(), 4);
}

#[test]
fn take_oldest_unread_filters_by_language_and_removes() {
    let d = Device::new();
    d.repo.add_unread_article(article("en-new", 300, Lang::En)).unwrap();
    d.repo.add_unread_article(article("ja-old", 100, Lang::Ja)).unwrap();
    d.repo.add_unread_article(article("en-old", 200, Lang::En)).unwrap();

    let taken = d.repo.take_oldest_unread(Lang::En).unwrap().unwrap();
    assert_eq!(taken.id, "en-old");
    assert_eq!(live_ids(&d, ArticleKind::Unread), vec!["en-new", "ja-old"]);

    d.repo.take_oldest_unread(Lang::En).unwrap().unwrap();
    assert!(d.repo.take_oldest_unread(Lang::En).unwrap().is_none());
}

#[test]
fn bulk_delete_and_clear_tombstone_each_record() {
    let d = Device::new();
    for i in 0..4 {
        d.repo
            .add_unread_article(article(&format!("u{i}"), 100 + i, Lang::En))
            .unwrap();
    }

    let removed = d
        .repo
        .soft_delete_articles(
            ArticleKind::Unread,
            &["u0".to_string(), "u1".to_string(), "missing".to_string()],
        )
        .unwrap();
    assert_eq!(removed, 2);

    assert_eq!(d.repo.clear_articles(ArticleKind::Unread).unwrap(), 2);
    assert!(live_ids(&d, ArticleKind::Unread).is_empty());
    assert_eq!(
        d.store
            .count(ArticleKind::Unread.collection())
            .unwrap(),
        4
    );
}

#[test]
fn deleting_from_one_kind_leaves_the_other() {
    let d = Device::new();
    d.repo.save_article(article("same", 100, Lang::En)).unwrap();
    d.repo.add_unread_article(article("same", 100, Lang::En)).unwrap();

    assert!(d.repo.soft_delete_article(ArticleKind::Unread, "same").unwrap());
    assert_eq!(live_ids(&d, ArticleKind::Saved), vec!["same"]);
}
