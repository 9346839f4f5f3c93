//! Error kinds produced by the core.

use std::io;
use thiserror::Error;

/// Every error the store, postings list, or query engine can raise.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Header checksum did not match its stored digest — torn or corrupt write.
    #[error("record header checksum mismatch at offset {offset}")]
    Checksum { offset: u64 },

    /// `modify` would write past the record's reserved allocation.
    #[error("modify at pos {pos} with {len} bytes exceeds alloc_size {alloc_size}")]
    OutOfAlloc { pos: i64, len: usize, alloc_size: u32 },

    /// A query tree node failed to parse.
    #[error("query parse error: {0}")]
    QueryParse(String),

    /// `compact` was called on a store that still has postings lists.
    #[error("compaction refused: store has {0} postings list(s); drop tag indexes first")]
    CompactionRefused(usize),

    /// A tag name sanitized to the empty string.
    #[error("tag name '{0}' sanitizes to empty — no valid characters")]
    EmptyTagName(String),

    /// A namespace is unknown to the registry.
    #[error("no store open for namespace '{0}'")]
    UnknownNamespace(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
