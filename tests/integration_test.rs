use rochefort::{StoreError, StoreRegistry};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

#[test]
fn end_to_end_append_tag_query_compact() {
    let dir = tempdir().unwrap();
    let registry = StoreRegistry::open(dir.path()).unwrap();
    let store = registry.get_or_create("events").unwrap();

    let rust_and_db = store.append_with_tags(0, b"rust+db", &["rust".into(), "db".into()]).unwrap();
    let rust_only = store.append_with_tags(0, b"rust", &["rust".into()]).unwrap();
    let db_only = store.append_with_tags(0, b"db", &["db".into()]).unwrap();

    let and_tree = serde_json::json!({"and": [{"tag": "rust"}, {"tag": "db"}]});
    let hits: Vec<u64> = store.query(&and_tree).unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(hits, vec![rust_and_db]);

    let or_tree = serde_json::json!({"or": [{"tag": "rust"}, {"tag": "db"}]});
    let hits: Vec<u64> = store.query(&or_tree).unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(hits, vec![rust_and_db, rust_only, db_only]);

    // Compaction is refused while tag indexes exist.
    let err = store.compact().unwrap_err();
    assert!(matches!(err, StoreError::CompactionRefused(_)));
}

#[test]
fn compact_after_closing_drops_postings_then_relocates() {
    let dir = tempdir().unwrap();
    let registry = StoreRegistry::open(dir.path()).unwrap();
    let offsets: Vec<u64>;
    {
        let store = registry.get_or_create("log").unwrap();
        offsets = (0..20)
            .map(|i: u32| store.append(256, format!("record-{i}").as_bytes()).unwrap())
            .collect();
    }

    // A fresh store handle over the same directory has no postings lists,
    // so compaction is allowed even though the data does.
    registry.close("log").unwrap();
    let store = registry.get_or_create("log").unwrap();
    let relocation = store.compact().unwrap();

    for (i, offset) in offsets.iter().enumerate() {
        let new_offset = relocation[offset];
        assert_eq!(store.read(new_offset).unwrap(), format!("record-{i}").into_bytes());
    }
}

#[test]
fn registry_isolates_namespaces() {
    let dir = tempdir().unwrap();
    let registry = StoreRegistry::open(dir.path()).unwrap();

    let a = registry.get_or_create("a").unwrap();
    let b = registry.get_or_create("b").unwrap();

    let offset_a = a.append(0, b"only in a").unwrap();
    let offset_b = b.append(0, b"only in b").unwrap();

    assert_eq!(a.read(offset_a).unwrap(), b"only in a");
    assert_eq!(b.read(offset_b).unwrap(), b"only in b");
    // Same numeric offset, different file — no cross-namespace bleed.
    assert_eq!(offset_a, offset_b);
}

#[test]
fn concurrent_appends_across_threads_all_land_and_read_back() {
    let dir = tempdir().unwrap();
    let registry = Arc::new(StoreRegistry::open(dir.path()).unwrap());

    let mut handles = Vec::new();
    for t in 0..6u8 {
        let registry = registry.clone();
        handles.push(thread::spawn(move || {
            let store = registry.get_or_create("shared").unwrap();
            let mut written = Vec::new();
            for i in 0..40u32 {
                let payload = format!("thread-{t}-record-{i}").into_bytes();
                let offset = store.append(payload.len() as u32 + 8, &payload).unwrap();
                written.push((offset, payload));
            }
            written
        }));
    }

    let store = registry.get_or_create("shared").unwrap();
    let mut all = Vec::new();
    for h in handles {
        all.extend(h.join().unwrap());
    }

    let mut offsets: Vec<u64> = all.iter().map(|(o, _)| *o).collect();
    offsets.sort_unstable();
    let before = offsets.len();
    offsets.dedup();
    assert_eq!(offsets.len(), before, "every appender must land at a distinct offset");

    for (offset, payload) in &all {
        assert_eq!(&store.read(*offset).unwrap(), payload);
    }
}

#[test]
fn delete_namespace_removes_files_from_disk() {
    let dir = tempdir().unwrap();
    let registry = StoreRegistry::open(dir.path()).unwrap();
    registry.get_or_create("temp").unwrap().append(0, b"x").unwrap();
    assert!(dir.path().join("temp").exists());

    registry.delete("temp").unwrap();
    assert!(!dir.path().join("temp").exists());
    assert!(registry.get("temp").is_err());
}
