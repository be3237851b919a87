//! A block is `[type u8][varint len(timestamps)][timestamps][values]`. The block checksum
//! is a CRC-32 (IEEE) over exactly these bytes and is kept in the file index.

pub mod decoder;
pub mod encoder;

pub use decoder::{block_count, block_type, decode_block, unpack_block};
pub use encoder::encode_block;

/// BLOCK_FLOAT64 designates a block encodes float64 values.
pub const BLOCK_FLOAT64: u8 = 0;

/// BLOCK_INTEGER designates a block encodes int64 values.
pub const BLOCK_INTEGER: u8 = 1;

/// BLOCK_BOOLEAN designates a block encodes boolean values.
pub const BLOCK_BOOLEAN: u8 = 2;

/// BLOCK_STRING designates a block encodes string values.
pub const BLOCK_STRING: u8 = 3;

/// BLOCK_UNSIGNED designates a block encodes uint64 values.
pub const BLOCK_UNSIGNED: u8 = 4;

/// ENCODED_BLOCK_HEADER_SIZE is the size of the header for an encoded block.  There is one
/// byte encoding the type of the block.
pub const ENCODED_BLOCK_HEADER_SIZE: usize = 1;

pub fn block_type_name(typ: u8) -> &'static str {
    match typ {
        BLOCK_FLOAT64 => "float",
        BLOCK_INTEGER => "integer",
        BLOCK_BOOLEAN => "boolean",
        BLOCK_STRING => "string",
        BLOCK_UNSIGNED => "unsigned",
        _ => "unknown",
    }
}

/// checksum computes the CRC-32 (IEEE) of an encoded block.
#[inline]
pub fn checksum(block: &[u8]) -> u32 {
    crc32fast::hash(block)
}

/// verify recomputes the checksum of `block` and compares it with `expected`.
#[inline]
pub fn verify(block: &[u8], expected: u32) -> bool {
    checksum(block) == expected
}
