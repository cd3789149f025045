use quota_storage::{SectionBatch, SledStateStore, StateStore, StorageError, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Balances {
    holders: BTreeMap<String, u128>,
}

fn balances(entries: &[(&str, u128)]) -> Balances {
    Balances {
        holders: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    }
}

#[test]
fn sections_survive_reopen() {
    let temp_dir = TempDir::new().expect("temp dir");
    let db_path = temp_dir.path().join("db");

    {
        let store = SledStateStore::new(&db_path).expect("open store");
        let mut batch = SectionBatch::new();
        batch
            .put("token", &balances(&[("alice", 8_888), ("bob", 1)]))
            .expect("serialize token");
        batch.put("epoch", &7u64).expect("serialize epoch");
        let meta = store.commit(batch).expect("commit");
        assert_eq!(meta.commits, 1);
        store.flush().expect("flush");
    }

    let reopened = SledStateStore::new(&db_path).expect("reopen store");
    assert!(reopened.is_initialized().expect("meta"));
    assert_eq!(reopened.meta().expect("meta").schema_version, SCHEMA_VERSION);
    let token: Balances = reopened
        .load("token")
        .expect("load token")
        .expect("token present");
    assert_eq!(token, balances(&[("alice", 8_888), ("bob", 1)]));
    assert_eq!(reopened.load::<u64>("epoch").expect("load epoch"), Some(7));

    let mut names = reopened.section_names().expect("names");
    names.sort();
    assert_eq!(names, vec!["epoch".to_string(), "token".to_string()]);
}

#[test]
fn later_commit_replaces_sections() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = SledStateStore::new(temp_dir.path().join("db")).expect("open store");

    for epoch in 1..=3u64 {
        let mut batch = SectionBatch::new();
        batch.put("epoch", &epoch).expect("serialize");
        store.commit(batch).expect("commit");
    }

    assert_eq!(store.load::<u64>("epoch").expect("load"), Some(3));
    assert_eq!(store.meta().expect("meta").commits, 3);
}

#[test]
fn corrupt_section_is_a_serialization_error() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = SledStateStore::new(temp_dir.path().join("db")).expect("open store");

    let mut batch = SectionBatch::new();
    batch.put("epoch", &"not a number").expect("serialize");
    store.commit(batch).expect("commit");

    assert!(matches!(
        store.load::<u64>("epoch"),
        Err(StorageError::Serialization(_))
    ));
}
