//! Store — a single append-only file plus a map of tag postings lists.
//!
//! # Concurrency
//! Appends reserve space by atomically bumping `offset`, then write the
//! payload, then write the header *last* — the header is the publication
//! step. Readers never take a lock; the only thing standing between a
//! reader and a torn record is the header checksum (`header.rs`). `modify`
//! and `read`/`scan`/`append` all take the store's read guard so they can
//! run concurrently with each other; only `compact` takes the write guard,
//! because it rewrites the whole file and invalidates every offset.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::header::{RecordHeader, HEADER_LEN};
use crate::postings::{sanitize_tag, PostingsList};
use crate::query::{build_query, QueryNode, Term, NO_MORE};

/// Name of the append-only record file within a store's root directory.
pub const RAW_FILE_NAME: &str = "append.raw";
/// Suffix every postings file carries.
pub const POSTINGS_EXT: &str = "postings";

/// Per-tag and aggregate counters returned by [`Store::stats`].
#[derive(Debug, Clone)]
pub struct Stats {
    pub path: PathBuf,
    pub used_bytes: u64,
    pub tag_counts: HashMap<String, u64>,
}

/// One append-only record file plus its tag postings lists.
pub struct Store {
    root: PathBuf,
    file: File,
    /// Next free byte in `append.raw`. Bumped with `fetch_add` so parallel
    /// appenders never see the same reservation twice.
    offset: AtomicU64,
    postings: RwLock<HashMap<String, Arc<PostingsList>>>,
    /// Held for read by append/read/modify/scan, for write only by compact.
    structural: RwLock<()>,
}

impl Store {
    /// Open (creating if necessary) the store rooted at `root`. Seeds
    /// `offset` from the file's current size and eagerly opens every
    /// `*.postings` file already present.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let raw_path = root.join(RAW_FILE_NAME);
        let file = OpenOptions::new().create(true).read(true).write(true).open(&raw_path)?;
        let offset = file.metadata()?.len();

        let mut postings = HashMap::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(POSTINGS_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    let pl = PostingsList::open(&path)?;
                    postings.insert(stem.to_string(), Arc::new(pl));
                }
            }
        }

        tracing::info!(root = %root.display(), offset, tags = postings.len(), "store opened");

        Ok(Self {
            root,
            file,
            offset: AtomicU64::new(offset),
            postings: RwLock::new(postings),
            structural: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Append ───────────────────────────────────────────────────────────────

    /// Reserve `max(alloc_size, payload.len())` payload bytes, write the
    /// payload, then publish the header. Returns the record's offset.
    pub fn append(&self, alloc_size: u32, payload: &[u8]) -> Result<u64> {
        let n = payload.len() as u32;
        let alloc_size = alloc_size.max(n);
        let slot_len = HEADER_LEN as u64 + alloc_size as u64;

        let _guard = self.structural.read();
        let current_offset = self.offset.fetch_add(slot_len, Ordering::SeqCst);

        self.file.write_at(payload, current_offset + HEADER_LEN as u64)?;
        let header = RecordHeader::encode(n, alloc_size);
        self.file.write_at(&header, current_offset)?;

        Ok(current_offset)
    }

    /// Append, then append the record's offset to every tag's postings
    /// list.
    pub fn append_with_tags(&self, alloc_size: u32, payload: &[u8], tags: &[String]) -> Result<u64> {
        let offset = self.append(alloc_size, payload)?;
        for tag in tags {
            self.append_posting(tag, offset)?;
        }
        Ok(offset)
    }

    /// Sanitize `tag`, find-or-create its postings list, append `record_offset`.
    pub fn append_posting(&self, tag: &str, record_offset: u64) -> Result<()> {
        let sanitized = sanitize_tag(tag);
        if sanitized.is_empty() {
            return Err(StoreError::EmptyTagName(tag.to_string()));
        }
        let pl = self.get_or_create_postings(&sanitized)?;
        pl.append(record_offset)?;
        Ok(())
    }

    fn get_or_create_postings(&self, sanitized: &str) -> Result<Arc<PostingsList>> {
        if let Some(pl) = self.postings.read().get(sanitized) {
            return Ok(pl.clone());
        }
        let mut write = self.postings.write();
        if let Some(pl) = write.get(sanitized) {
            return Ok(pl.clone());
        }
        let path = self.root.join(format!("{sanitized}.{POSTINGS_EXT}"));
        let pl = Arc::new(PostingsList::open(path)?);
        write.insert(sanitized.to_string(), pl.clone());
        Ok(pl)
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    /// Decode the header at `offset`, validate its checksum, read `data_len`
    /// payload bytes. Completely lockless against concurrent appends.
    pub fn read(&self, offset: u64) -> Result<Vec<u8>> {
        let _guard = self.structural.read();
        let header = self.read_header(offset)?;
        let mut payload = vec![0u8; header.data_len as usize];
        self.file.read_exact_at(&mut payload, offset + HEADER_LEN as u64)?;
        Ok(payload)
    }

    fn read_header(&self, offset: u64) -> Result<RecordHeader> {
        let mut buf = [0u8; HEADER_LEN];
        self.file.read_exact_at(&mut buf, offset)?;
        RecordHeader::decode(&buf, offset)
    }

    // ── Modify ───────────────────────────────────────────────────────────────

    /// Overwrite bytes within a record's already-reserved slot. `pos < 0`
    /// means "append at the current end of valid data". `alloc_size` never
    /// changes. The header is only rewritten when the valid length grows or
    /// `reset_length` is set.
    pub fn modify(&self, offset: u64, pos: i32, data: &[u8], reset_length: bool) -> Result<()> {
        let _guard = self.structural.read();
        let header = self.read_header(offset)?;

        let pos: u32 = if pos < 0 { header.data_len } else { pos as u32 };
        let end = pos as u64 + data.len() as u64;
        if end > header.alloc_size as u64 {
            return Err(StoreError::OutOfAlloc {
                pos: pos as i64,
                len: data.len(),
                alloc_size: header.alloc_size,
            });
        }

        self.file.write_at(data, offset + HEADER_LEN as u64 + pos as u64)?;

        if end as u32 > header.data_len || reset_length {
            let new_header = RecordHeader::encode(end as u32, header.alloc_size);
            self.file.write_at(&new_header, offset)?;
        }
        Ok(())
    }

    // ── Scan ─────────────────────────────────────────────────────────────────

    /// Walk every record in insertion order from 0 up to the offset
    /// observed at the start of the scan. Stops (without erroring) on the
    /// first bad header — that marks either EOF or the current write
    /// frontier. `callback` returning `false` stops the scan early.
    pub fn scan<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(u64, Vec<u8>) -> bool,
    {
        let _guard = self.structural.read();
        let end = self.offset.load(Ordering::SeqCst);
        let mut cursor = 0u64;

        while cursor < end {
            let header = match self.read_header(cursor) {
                Ok(h) => h,
                Err(_) => break,
            };
            let mut payload = vec![0u8; header.data_len as usize];
            if self.file.read_exact_at(&mut payload, cursor + HEADER_LEN as u64).is_err() {
                break;
            }

            let keep_going = callback(cursor, payload);
            cursor += HEADER_LEN as u64 + header.alloc_size as u64;
            if !keep_going {
                break;
            }
        }
        Ok(())
    }

    // ── Query ────────────────────────────────────────────────────────────────

    /// Parse `tree` into a query node (materializing a [`Term`] per
    /// referenced tag) and return an iterator over `(offset, payload)`.
    pub fn query(&self, tree: &Value) -> Result<QueryResults<'_>> {
        let mut resolve = |tag: &str| -> Result<Term> {
            let sanitized = sanitize_tag(tag);
            let pl = self.get_or_create_postings(&sanitized)?;
            Ok(Term::new(pl.snapshot()?))
        };
        let node = build_query(tree, &mut resolve)?;
        Ok(QueryResults { store: self, node, done: false })
    }

    // ── Compact ──────────────────────────────────────────────────────────────

    /// Rewrite the file with no allocation slack, returning the relocation
    /// map old-offset -> new-offset. Refuses if any postings list exists
    /// (they would reference now-stale offsets). Takes the exclusive guard
    /// for the whole walk.
    pub fn compact(&self) -> Result<HashMap<u64, u64>> {
        {
            let postings = self.postings.read();
            if !postings.is_empty() {
                return Err(StoreError::CompactionRefused(postings.len()));
            }
        }

        let _guard = self.structural.write();
        // Re-check under the exclusive guard: a postings list could have
        // been created between the check above and taking the write lock.
        {
            let postings = self.postings.read();
            if !postings.is_empty() {
                return Err(StoreError::CompactionRefused(postings.len()));
            }
        }

        let end = self.offset.load(Ordering::SeqCst);
        let mut relocation = HashMap::new();
        let mut read_cursor = 0u64;
        let mut write_cursor = 0u64;

        while read_cursor < end {
            let header = self.read_header(read_cursor)?;
            let mut payload = vec![0u8; header.data_len as usize];
            self.file.read_exact_at(&mut payload, read_cursor + HEADER_LEN as u64)?;

            // write_cursor <= read_cursor always holds (slack only shrinks),
            // so writing in place never clobbers data not yet read.
            let new_header = RecordHeader::encode(header.data_len, header.data_len);
            self.file.write_at(&new_header, write_cursor)?;
            self.file.write_at(&payload, write_cursor + HEADER_LEN as u64)?;

            relocation.insert(read_cursor, write_cursor);
            write_cursor += HEADER_LEN as u64 + header.data_len as u64;
            read_cursor += HEADER_LEN as u64 + header.alloc_size as u64;
        }

        self.file.set_len(write_cursor)?;
        self.offset.store(write_cursor, Ordering::SeqCst);
        tracing::info!(root = %self.root.display(), records = relocation.len(), new_size = write_cursor, "compaction complete");
        Ok(relocation)
    }

    // ── Stats / lifecycle ────────────────────────────────────────────────────

    pub fn stats(&self) -> Stats {
        let tag_counts = self.postings.read().iter().map(|(k, v)| (k.clone(), v.count())).collect();
        Stats {
            path: self.root.join(RAW_FILE_NAME),
            used_bytes: self.offset.load(Ordering::SeqCst),
            tag_counts,
        }
    }

    /// No-op beyond what `Drop` on the underlying file handle does — the
    /// store never forces a flush. Exposed explicitly so the registry can
    /// retire a store deterministically.
    pub fn close(&self) {
        tracing::info!(root = %self.root.display(), "store closed");
    }
}

/// Iterator over `(offset, payload)` produced by [`Store::query`]. Stops
/// (yielding the error once) on the first record-read failure.
pub struct QueryResults<'a> {
    store: &'a Store,
    node: Box<dyn QueryNode>,
    done: bool,
}

impl<'a> Iterator for QueryResults<'a> {
    type Item = Result<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let doc_id = self.node.next();
        if doc_id == NO_MORE {
            self.done = true;
            return None;
        }
        let offset = doc_id as u64;
        match self.store.read(offset) {
            Ok(payload) => Some(Ok((offset, payload))),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let offset = store.append(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(offset, 0);

        let raw_len = fs::metadata(dir.path().join(RAW_FILE_NAME)).unwrap().len();
        assert_eq!(raw_len, 24);

        assert_eq!(store.read(0).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn compaction_removes_allocation_slack() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let mut uncompacted = 0u64;
        for i in 0..100u32 {
            store.append(1024 + i, &[1, 2, 3, 4]).unwrap();
            uncompacted += 20 + 1024 + i as u64;
        }
        assert_eq!(uncompacted, 107_350);
        assert_eq!(fs::metadata(dir.path().join(RAW_FILE_NAME)).unwrap().len(), uncompacted);

        store.compact().unwrap();
        let compacted_size = 100 * 24;
        assert_eq!(fs::metadata(dir.path().join(RAW_FILE_NAME)).unwrap().len(), compacted_size);

        // Further compactions are no-ops on size.
        for _ in 0..10 {
            store.compact().unwrap();
            assert_eq!(fs::metadata(dir.path().join(RAW_FILE_NAME)).unwrap().len(), compacted_size);
        }
    }

    #[test]
    fn modify_rewrites_bytes_within_reserved_slot() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let offset = store.append(64, b"hello").unwrap();
        store.modify(offset, 5, b" world", false).unwrap();
        assert_eq!(store.read(offset).unwrap(), b"hello world");

        store.modify(offset, -1, b"!", false).unwrap();
        assert_eq!(store.read(offset).unwrap(), b"hello world!");

        store.modify(offset, 0, b"HELLO", true).unwrap();
        assert_eq!(store.read(offset).unwrap(), b"HELLO");
    }

    #[test]
    fn modify_past_alloc_size_is_rejected() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let offset = store.append(4, b"abcd").unwrap();
        let err = store.modify(offset, 0, b"abcde", false).unwrap_err();
        assert!(matches!(err, StoreError::OutOfAlloc { .. }));
        assert_eq!(store.read(offset).unwrap(), b"abcd");
    }

    #[test]
    fn tag_query_and_or_match_tagged_records() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let o1 = store.append_with_tags(0, b"x", &["a".into(), "b".into()]).unwrap();
        let o2 = store.append_with_tags(0, b"y", &["a".into()]).unwrap();
        let o3 = store.append_with_tags(0, b"z", &["b".into()]).unwrap();

        let and_tree: Value = serde_json::json!({"and": [{"tag": "a"}, {"tag": "b"}]});
        let and_results: Vec<u64> = store.query(&and_tree).unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(and_results, vec![o1]);

        let or_tree: Value = serde_json::json!({"or": [{"tag": "a"}, {"tag": "b"}]});
        let or_results: Vec<u64> = store.query(&or_tree).unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(or_results, vec![o1, o2, o3]);
    }

    #[test]
    fn compact_refused_with_postings() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.append_with_tags(0, b"x", &["a".into()]).unwrap();

        let err = store.compact().unwrap_err();
        assert!(matches!(err, StoreError::CompactionRefused(1)));
    }

    #[test]
    fn scan_visits_in_insertion_order() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let o1 = store.append(0, b"a").unwrap();
        let o2 = store.append(0, b"bb").unwrap();
        let o3 = store.append(0, b"ccc").unwrap();

        let mut seen = Vec::new();
        store
            .scan(|offset, payload| {
                seen.push((offset, payload));
                true
            })
            .unwrap();

        assert_eq!(seen, vec![(o1, b"a".to_vec()), (o2, b"bb".to_vec()), (o3, b"ccc".to_vec())]);
    }

    #[test]
    fn scan_stops_early_when_callback_returns_false() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.append(0, b"a").unwrap();
        store.append(0, b"b").unwrap();
        store.append(0, b"c").unwrap();

        let mut count = 0;
        store
            .scan(|_, _| {
                count += 1;
                count < 2
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn reopen_picks_up_existing_offset_and_tags() {
        let dir = tempdir().unwrap();
        let offset;
        {
            let store = Store::open(dir.path()).unwrap();
            offset = store.append_with_tags(0, b"hi", &["a".into()]).unwrap();
        }
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.read(offset).unwrap(), b"hi");
        assert_eq!(store.stats().tag_counts.get("a"), Some(&1));
    }

    #[test]
    fn stats_reports_used_bytes_and_tag_counts() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.append_with_tags(10, b"hi", &["a".into(), "b".into()]).unwrap();
        store.append_with_tags(10, b"yo", &["a".into()]).unwrap();

        let stats = store.stats();
        assert_eq!(stats.used_bytes, 2 * (HEADER_LEN as u64 + 10));
        assert_eq!(stats.tag_counts.get("a"), Some(&2));
        assert_eq!(stats.tag_counts.get("b"), Some(&1));
    }

    #[test]
    fn empty_tag_name_rejected() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let err = store.append_posting("---", 0).unwrap_err();
        assert!(matches!(err, StoreError::EmptyTagName(_)));
    }

    #[test]
    fn concurrent_appends_are_distinct_and_readable() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());

        let mut handles = Vec::new();
        for t in 0..8u8 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                let mut recorded = Vec::new();
                for i in 0..50u32 {
                    let payload = vec![t; (i % 17 + 1) as usize];
                    let alloc = payload.len() as u32 + (i % 5);
                    let offset = store.append(alloc, &payload).unwrap();
                    recorded.push((offset, payload));
                }
                recorded
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }

        // Every appender lands at a distinct offset.
        let mut offsets: Vec<u64> = all.iter().map(|(o, _)| *o).collect();
        offsets.sort_unstable();
        let distinct = offsets.len();
        offsets.dedup();
        assert_eq!(offsets.len(), distinct);

        // Every recorded offset reads back its exact bytes.
        for (offset, payload) in &all {
            assert_eq!(&store.read(*offset).unwrap(), payload);
        }

        // Relocation map preserves content across compaction.
        drop(store); // ensure no postings lists open (there are none here)
        let store = Store::open(dir.path()).unwrap();
        let relocation = store.compact().unwrap();
        for (offset, payload) in &all {
            let new_offset = relocation[offset];
            assert_eq!(&store.read(new_offset).unwrap(), payload);
        }
    }
}
