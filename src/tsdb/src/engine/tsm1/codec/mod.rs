//! Column codecs used to build TSM blocks. Every encoder is deterministic: the same input
//! always produces the same bytes, which keeps block checksums stable across compactions.

pub mod bit;
pub mod varint;
pub mod zigzag;

pub mod boolean;
pub mod float;
pub mod integer;
pub mod string;
pub mod timestamp;
pub mod unsigned;

pub trait Encoder<T> {
    fn write(&mut self, v: T);
    fn flush(&mut self);
    fn bytes(&mut self) -> anyhow::Result<Vec<u8>>;
}

/// Decoder yields values one at a time. `next` returns false once the input is exhausted
/// or an error occurred, in which case `err` reports it.
pub trait Decoder<T> {
    fn next(&mut self) -> bool;
    fn read(&self) -> T;
    fn err(&self) -> Option<&anyhow::Error>;
}

/// encoding_header packs an encoding id into the high nibble and a parameter into the low one.
#[inline]
pub(crate) fn encoding_header(encoding: u8, low: u8) -> u8 {
    (encoding << 4) | (low & 0x0F)
}

#[inline]
pub(crate) fn read_u64_be(b: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = b.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
