//! Record header format — fully self-describing, mandatory checksum.
//!
//! # On-disk layout (20 bytes, all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   data_len     valid payload bytes
//!    4      8   reserved     always zero (legacy "next block" link)
//!   12      4   alloc_size   total reserved payload slot; >= data_len
//!   16      4   checksum     CRC32([0..16))  <- LAST
//! ```
//!
//! # Checksum
//! `checksum` covers only the 16 bytes preceding it — never the payload.
//! That is deliberate: payload integrity is not this format's job. The
//! checksum exists so that a lockless reader (or a forward-scanning
//! recovery walk) can reject a header that is either torn mid-write or has
//! not been written at all, without taking any lock. See `store.rs` for why
//! the header is always the *last* thing a writer publishes.

use crate::error::{Result, StoreError};
use byteorder::{ByteOrder, LittleEndian};

/// Fixed byte size of every record header.
pub const HEADER_LEN: usize = 20;

/// A decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub data_len: u32,
    pub alloc_size: u32,
}

impl RecordHeader {
    /// Encode a header for a slot reserving `alloc_size` bytes and currently
    /// holding `data_len` valid bytes. `alloc_size` must be >= `data_len`;
    /// callers enforce this before calling.
    pub fn encode(data_len: u32, alloc_size: u32) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        LittleEndian::write_u32(&mut buf[0..4], data_len);
        // bytes [4..12) are the reserved field — left zero.
        LittleEndian::write_u32(&mut buf[12..16], alloc_size);

        let checksum = checksum_of(&buf[0..16]);
        LittleEndian::write_u32(&mut buf[16..20], checksum);
        buf
    }

    /// Parse and validate a 20-byte header. Returns `Checksum` if the
    /// stored digest doesn't match bytes `[0..16)` — the header is either
    /// torn (a concurrent writer hasn't finished its publish) or corrupt.
    /// The reserved field is parsed implicitly (ignored) by skipping it.
    pub fn decode(buf: &[u8; HEADER_LEN], offset: u64) -> Result<Self> {
        let stored_checksum = LittleEndian::read_u32(&buf[16..20]);
        let expected_checksum = checksum_of(&buf[0..16]);
        if stored_checksum != expected_checksum {
            return Err(StoreError::Checksum { offset });
        }

        let data_len = LittleEndian::read_u32(&buf[0..4]);
        let alloc_size = LittleEndian::read_u32(&buf[12..16]);
        Ok(Self { data_len, alloc_size })
    }
}

fn checksum_of(bytes: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(bytes);
    h.finalize()
}
