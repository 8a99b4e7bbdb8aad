mod util;

use anyhow::Result;
use deck_search::model::types::CardRecord;
use deck_search::storage::sqlite::{CardStore, ImportError};
use rusqlite::{Connection, params};
use std::sync::Arc;
use std::thread;
use util::{CardBuilder, TestTracing, sample_catalog, temp_store};

fn names(cards: &[CardRecord]) -> Vec<&str> {
    cards.iter().map(|c| c.name.as_str()).collect()
}

#[test]
fn schema_version_created_on_open() -> Result<()> {
    let (_dir, store) = temp_store();
    assert_eq!(store.schema_version()?, 2);
    Ok(())
}

#[test]
fn ranked_prefix_search_excludes_tokens() -> Result<()> {
    let (_dir, store) = temp_store();
    store.bulk_upsert(&sample_catalog(), |_, _, _| {})?;

    let hits = store.search_by_name("Sol", 100, None)?;
    assert_eq!(names(&hits), vec!["Sol Ring", "Solemn Simulacrum"]);

    let goblins = store.search_by_name("goblin", 100, None)?;
    assert!(goblins.is_empty(), "tokens leaked: {:?}", names(&goblins));
    Ok(())
}

#[test]
fn exact_match_ranks_before_prefix_and_contains() -> Result<()> {
    let (_dir, store) = temp_store();
    for name in ["Ring of Three Wishes", "The One Ring", "Ring", "Ringwraiths"] {
        store.upsert(&CardBuilder::new(name).type_line("Artifact").build())?;
    }
    let hits = store.search_by_name("ring", 10, None)?;
    assert_eq!(
        names(&hits),
        vec!["Ring", "Ring of Three Wishes", "Ringwraiths", "The One Ring"]
    );
    Ok(())
}

#[test]
fn interior_spaces_are_wildcards() -> Result<()> {
    let (_dir, store) = temp_store();
    store.bulk_upsert(&sample_catalog(), |_, _, _| {})?;
    let hits = store.search_by_name("light bolt", 10, None)?;
    assert_eq!(names(&hits), vec!["Lightning Bolt"]);
    Ok(())
}

#[test]
fn predicate_does_not_consume_limit() -> Result<()> {
    let (_dir, store) = temp_store();
    let cards: Vec<_> = (0..20)
        .map(|i| {
            CardBuilder::new(&format!("Goblin {i:02}"))
                .type_line("Creature — Goblin")
                .cmc(f64::from(i % 2))
                .build()
        })
        .collect();
    store.bulk_upsert(&cards, |_, _, _| {})?;

    let odd: &dyn Fn(&CardRecord) -> bool = &|c| c.cmc == 1.0;
    let hits = store.search_by_name("goblin", 5, Some(odd))?;
    assert_eq!(hits.len(), 5);
    assert!(hits.iter().all(|c| odd(c)));
    Ok(())
}

#[test]
fn multi_face_token_detected_from_first_face() -> Result<()> {
    let (_dir, store) = temp_store();
    store.upsert(
        &CardBuilder::new("Double Token")
            .faces(&[
                ("Front", "Token Creature — Spirit", ""),
                ("Back", "Token Creature — Angel", ""),
            ])
            .build(),
    )?;
    assert!(store.search_by_name("double", 10, None)?.is_empty());
    assert!(store.get("Double Token")?.is_some());
    Ok(())
}

#[test]
fn upsert_round_trips_unknown_fields() -> Result<()> {
    let (_dir, store) = temp_store();
    let card: CardRecord = serde_json::from_value(serde_json::json!({
        "name": "Arcane Signet",
        "type_line": "Artifact",
        "cmc": 2.0,
        "rarity": "common",
        "prices": {"usd": "0.25"}
    }))?;
    store.upsert(&card)?;
    let back = store.get("arcane signet")?.expect("stored");
    assert_eq!(back, card);
    assert_eq!(back.extra["rarity"], "common");
    Ok(())
}

#[test]
fn failed_bulk_import_leaves_store_unchanged() -> Result<()> {
    let (_dir, store) = temp_store();
    store.upsert(&CardBuilder::new("Existing").build())?;

    let mut batch: Vec<_> = (0..1000)
        .map(|i| CardBuilder::new(&format!("Card {i}")).build())
        .collect();
    batch[999].name.clear();

    let err = store.bulk_upsert(&batch, |_, _, _| {}).unwrap_err();
    assert!(matches!(err, ImportError::InvalidRecord { index: 999, .. }));
    assert_eq!(store.count()?, 1);
    assert!(store.get("Card 0")?.is_none());
    Ok(())
}

#[test]
fn legacy_store_gains_type_line_column() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("legacy.db");
    {
        let conn = Connection::open(&path)?;
        conn.execute_batch("CREATE TABLE cards (name TEXT PRIMARY KEY, json_data TEXT)")?;
        for card in [
            CardBuilder::new("Sol Ring").type_line("Artifact").build(),
            CardBuilder::new("Soldier Token").type_line("Token Creature — Soldier").build(),
        ] {
            conn.execute(
                "INSERT INTO cards (name, json_data) VALUES (?1, ?2)",
                params![card.name, serde_json::to_string(&card)?],
            )?;
        }
        conn.execute(
            "INSERT INTO cards (name, json_data) VALUES ('Broken', NULL)",
            [],
        )?;
    }

    let tracing = TestTracing::new();
    let _guard = tracing.install();
    let store = CardStore::open(&path)?;
    assert_eq!(store.schema_version()?, 2);
    assert_eq!(store.count()?, 3);
    assert_eq!(names(&store.search_by_name("sol", 10, None)?), vec!["Sol Ring"]);
    assert!(store.get("Broken")?.is_none());
    tracing.assert_contains("back-filled projected type_line");
    Ok(())
}

#[test]
fn readers_see_whole_batches_only() -> Result<()> {
    let (_dir, store) = temp_store();
    let batch: Vec<_> = (0..3000)
        .map(|i| CardBuilder::new(&format!("Card {i:04}")).build())
        .collect();

    let reader_store = Arc::clone(&store);
    let reader = thread::spawn(move || -> Result<Vec<usize>> {
        let mut seen = Vec::new();
        for _ in 0..50 {
            seen.push(reader_store.count()?);
        }
        Ok(seen)
    });
    store.bulk_upsert(&batch, |_, _, _| {})?;

    let seen = reader.join().expect("reader thread")?;
    assert!(seen.iter().all(|n| *n == 0 || *n == 3000), "{seen:?}");
    assert_eq!(store.count()?, 3000);
    Ok(())
}

#[test]
fn iter_all_visits_every_valid_record() -> Result<()> {
    let (_dir, store) = temp_store();
    let catalog = sample_catalog();
    store.bulk_upsert(&catalog, |_, _, _| {})?;

    let mut scanned: Vec<String> = store.iter_all()?.map(|c| c.name).collect();
    scanned.sort();
    let mut expected: Vec<String> = catalog.into_iter().map(|c| c.name).collect();
    expected.sort();
    assert_eq!(scanned, expected);
    Ok(())
}

#[test]
fn scan_in_progress_ignores_later_bulk_import() -> Result<()> {
    let (_dir, store) = temp_store();
    let batch = |set: &str| -> Vec<CardRecord> {
        (0..2500)
            .map(|i| CardBuilder::new(&format!("Card {i:04}")).set(set).build())
            .collect()
    };
    store.bulk_upsert(&batch("old"), |_, _, _| {})?;

    let mut scan = store.iter_all()?;
    let mut seen: Vec<CardRecord> = scan.by_ref().take(1000).collect();
    store.bulk_upsert(&batch("new"), |_, _, _| {})?;
    seen.extend(scan);

    assert_eq!(seen.len(), 2500);
    assert!(seen.iter().all(|c| c.set.as_deref() == Some("old")));

    let fresh: Vec<CardRecord> = store.iter_all()?.collect();
    assert_eq!(fresh.len(), 2500);
    assert!(fresh.iter().all(|c| c.set.as_deref() == Some("new")));
    Ok(())
}
