//! Integer encoding uses two different strategies depending on the range of values in
//! the uncompressed data. Values are first delta encoded (wrapping) and then zig-zag
//! encoded so that small negative deltas stay small.
//!
//! If every delta after the first value is identical the run is stored using run length
//! encoding: header, 8 byte zig-zag first value, varint delta, varint repeat count.
//! Otherwise the first value and each delta are written as varints.
//!
//! The 4 high bits of the header byte store the encoding type.

use crate::engine::tsm1::codec::varint::VarInt;
use crate::engine::tsm1::codec::zigzag::{zig_zag_decode, zig_zag_encode};
use crate::engine::tsm1::codec::{encoding_header, read_u64_be, Decoder, Encoder};

/// INT_COMPRESSED_PACKED is a varint packed format
const INT_COMPRESSED_PACKED: u8 = 1;
/// INT_COMPRESSED_RLE is a run-length encoding format
const INT_COMPRESSED_RLE: u8 = 2;

/// IntegerEncoder encodes int64s into byte slices.
pub struct IntegerEncoder {
    prev: i64,
    rle: bool,
    values: Vec<u64>,
}

impl IntegerEncoder {
    pub fn new(sz: usize) -> Self {
        Self {
            prev: 0,
            rle: true,
            values: Vec::with_capacity(sz),
        }
    }

    fn encode_rle(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(1 + 8 + 2 * super::varint::MAX_VARINT_LEN64);
        b.push(encoding_header(INT_COMPRESSED_RLE, 0));
        // The first value
        b.extend_from_slice(&self.values[0].to_be_bytes());
        // The value to add to the first value
        self.values[1].encode_var_vec(&mut b);
        // The number of times the delta is repeated
        ((self.values.len() - 1) as u64).encode_var_vec(&mut b);
        b
    }

    fn encode_packed(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(1 + self.values.len() * 2);
        b.push(encoding_header(INT_COMPRESSED_PACKED, 0));
        for v in &self.values {
            v.encode_var_vec(&mut b);
        }
        b
    }
}

impl Encoder<i64> for IntegerEncoder {
    fn write(&mut self, v: i64) {
        // Delta-encode each value as it's written. This happens before
        // zig_zag_encode because deltas could be negative.
        let delta = v.wrapping_sub(self.prev);
        self.prev = v;
        let enc = zig_zag_encode(delta);

        if self.values.len() > 1 {
            self.rle = self.rle && self.values[self.values.len() - 1] == enc;
        }

        self.values.push(enc);
    }

    fn flush(&mut self) {}

    fn bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        if self.values.is_empty() {
            return Ok(vec![]);
        }

        if self.rle && self.values.len() > 2 {
            return Ok(self.encode_rle());
        }

        Ok(self.encode_packed())
    }
}

/// IntegerDecoder decodes a byte slice into int64s.
pub struct IntegerDecoder<'a> {
    encoding: u8,
    bytes: &'a [u8],

    value: i64,

    // rle state
    rle_delta: i64,
    rle_remaining: u64,
    first_pending: bool,

    err: Option<anyhow::Error>,
}

impl<'a> IntegerDecoder<'a> {
    pub fn new(b: &'a [u8]) -> anyhow::Result<Self> {
        let mut dec = Self {
            encoding: INT_COMPRESSED_PACKED,
            bytes: &[],
            value: 0,
            rle_delta: 0,
            rle_remaining: 0,
            first_pending: false,
            err: None,
        };

        if b.is_empty() {
            return Ok(dec);
        }

        dec.encoding = b[0] >> 4;
        let b = &b[1..];
        match dec.encoding {
            INT_COMPRESSED_PACKED => {
                dec.bytes = b;
            }
            INT_COMPRESSED_RLE => {
                let first = read_u64_be(b).ok_or_else(|| {
                    anyhow!("IntegerDecoder: not enough data to decode RLE starting value")
                })?;
                let b = &b[8..];
                let (delta, n) = u64::decode_var(b)
                    .ok_or_else(|| anyhow!("IntegerDecoder: invalid RLE delta value"))?;
                let (repeat, _) = u64::decode_var(&b[n..])
                    .ok_or_else(|| anyhow!("IntegerDecoder: invalid RLE repeat value"))?;

                dec.value = zig_zag_decode(first);
                dec.rle_delta = zig_zag_decode(delta);
                dec.rle_remaining = repeat;
                dec.first_pending = true;
            }
            _ => return Err(anyhow!("IntegerDecoder: unknown encoding {}", dec.encoding)),
        }

        Ok(dec)
    }
}

impl<'a> Decoder<i64> for IntegerDecoder<'a> {
    fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }

        if self.encoding == INT_COMPRESSED_RLE {
            if self.first_pending {
                self.first_pending = false;
                return true;
            }
            if self.rle_remaining == 0 {
                return false;
            }
            self.rle_remaining -= 1;
            self.value = self.value.wrapping_add(self.rle_delta);
            return true;
        }

        if self.bytes.is_empty() {
            return false;
        }

        match u64::decode_var(self.bytes) {
            Some((v, n)) => {
                self.bytes = &self.bytes[n..];
                self.value = self.value.wrapping_add(zig_zag_decode(v));
                true
            }
            None => {
                self.err = Some(anyhow!("IntegerDecoder: invalid packed value"));
                false
            }
        }
    }

    fn read(&self) -> i64 {
        self.value
    }

    fn err(&self) -> Option<&anyhow::Error> {
        self.err.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    fn encode(values: &[i64]) -> Vec<u8> {
        let mut enc = IntegerEncoder::new(values.len());
        for v in values {
            enc.write(*v);
        }
        enc.bytes().unwrap()
    }

    fn decode(b: &[u8]) -> Vec<i64> {
        let mut dec = IntegerDecoder::new(b).unwrap();
        let mut got = vec![];
        while dec.next() {
            got.push(dec.read());
        }
        assert!(dec.err().is_none());
        got
    }

    #[test]
    fn test_integer_encoder_rle() {
        let values: Vec<i64> = (0..500).map(|i| 100 - i * 3).collect();
        let b = encode(&values);
        assert_eq!(b[0] >> 4, INT_COMPRESSED_RLE);
        assert!(b.len() < 16);
        assert_eq!(decode(&b), values);
    }

    #[test]
    fn test_integer_encoder_packed() {
        let values = vec![1, -1, 1_000_000, i64::MAX, i64::MIN, 0];
        let b = encode(&values);
        assert_eq!(b[0] >> 4, INT_COMPRESSED_PACKED);
        assert_eq!(decode(&b), values);
    }

    #[test]
    fn test_integer_encoder_short() {
        assert_eq!(decode(&encode(&[7])), vec![7]);
        assert_eq!(decode(&encode(&[7, 7])), vec![7, 7]);
        assert_eq!(decode(&encode(&[5, 5, 5])), vec![5, 5, 5]);
    }

    #[test]
    fn test_integer_decoder_corrupt() {
        assert!(IntegerDecoder::new(&[0x20, 1, 2]).is_err());
        assert!(IntegerDecoder::new(&[0x50]).is_err());

        let mut dec = IntegerDecoder::new(&[0x10, 0x02, 0x80]).unwrap();
        assert!(dec.next());
        assert_eq!(dec.read(), 1);
        assert!(!dec.next());
        assert!(dec.err().is_some());
    }

    quickcheck! {
        fn prop_integer_round_trip(values: Vec<i64>) -> bool {
            decode(&encode(&values)) == values
        }
    }
}
