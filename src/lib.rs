//! # rochefort — append-only, checksummed, block-addressed record store
//!
//! Format guarantees:
//! - All numeric fields are little-endian; never negotiated
//! - Every record is self-describing: `data_len`, `alloc_size`, a mandatory
//!   CRC32 over the header prefix; a torn or corrupt header is rejected,
//!   never silently trusted
//! - The header is the last thing a writer publishes, so a lockless reader
//!   never observes a record whose payload hasn't fully landed
//! - Tag postings are a separate append-only file per tag; the record store
//!   never has to be rewritten to add or remove a tag
//! - Compaction is offline and explicit: it refuses to run while any
//!   postings list exists, because it invalidates every offset they hold

pub mod config;
pub mod error;
pub mod header;
pub mod postings;
pub mod query;
pub mod registry;
pub mod store;

pub use config::Config;
pub use error::{Result, StoreError};
pub use header::{RecordHeader, HEADER_LEN};
pub use postings::{sanitize_tag, PostingsList};
pub use query::{build_query, BoolAnd, BoolOr, QueryNode, Term, NO_MORE, NOT_READY};
pub use registry::StoreRegistry;
pub use store::{Stats, Store};
