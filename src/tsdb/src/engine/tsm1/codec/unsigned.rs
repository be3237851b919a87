//! Unsigned integers reuse the integer encoding on their two's complement bit pattern.

use crate::engine::tsm1::codec::integer::{IntegerDecoder, IntegerEncoder};
use crate::engine::tsm1::codec::{Decoder, Encoder};

pub struct UnsignedEncoder {
    enc: IntegerEncoder,
}

impl UnsignedEncoder {
    pub fn new(sz: usize) -> Self {
        Self {
            enc: IntegerEncoder::new(sz),
        }
    }
}

impl Encoder<u64> for UnsignedEncoder {
    fn write(&mut self, v: u64) {
        self.enc.write(v as i64);
    }

    fn flush(&mut self) {
        self.enc.flush();
    }

    fn bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        self.enc.bytes()
    }
}

pub struct UnsignedDecoder<'a> {
    dec: IntegerDecoder<'a>,
}

impl<'a> UnsignedDecoder<'a> {
    pub fn new(b: &'a [u8]) -> anyhow::Result<Self> {
        IntegerDecoder::new(b).map(|dec| Self { dec })
    }
}

impl<'a> Decoder<u64> for UnsignedDecoder<'a> {
    fn next(&mut self) -> bool {
        self.dec.next()
    }

    fn read(&self) -> u64 {
        self.dec.read() as u64
    }

    fn err(&self) -> Option<&anyhow::Error> {
        self.dec.err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_round_trip() {
        let values = [0u64, 1, u64::MAX, u64::MAX / 2, 42, 42];
        let mut enc = UnsignedEncoder::new(values.len());
        for v in values {
            enc.write(v);
        }
        let b = enc.bytes().unwrap();

        let mut dec = UnsignedDecoder::new(&b).unwrap();
        let mut got = vec![];
        while dec.next() {
            got.push(dec.read());
        }
        assert_eq!(got, values);
    }
}
