//! Boolean encoding uses 1 bit per value. Each compressed byte slice contains a 1 byte header
//! indicating the compression type, followed by a variable byte encoded length indicating
//! how many booleans are packed in the slice. The remaining bytes contain 1 byte for every
//! 8 boolean values encoded, most significant bit first.

use crate::engine::tsm1::codec::varint::VarInt;
use crate::engine::tsm1::codec::{encoding_header, Decoder, Encoder};

/// BOOLEAN_COMPRESSED_BIT_PACKED is a bit packing format
const BOOLEAN_COMPRESSED_BIT_PACKED: u8 = 1;

/// BooleanEncoder encodes a series of booleans to an in-memory buffer.
pub struct BooleanEncoder {
    // The encoded bytes
    bytes: Vec<u8>,
    // The current byte being encoded
    b: u8,
    // The number of bools packed into b
    i: usize,
    // The total number of bools written
    n: usize,
}

impl BooleanEncoder {
    pub fn new(sz: usize) -> Self {
        Self {
            bytes: Vec::with_capacity((sz + 7) / 8),
            b: 0,
            i: 0,
            n: 0,
        }
    }
}

impl Encoder<bool> for BooleanEncoder {
    fn write(&mut self, v: bool) {
        // If we have filled the current byte, flush it
        if self.i >= 8 {
            self.flush();
        }

        // Use 1 bit for each boolean value, shift the current byte
        // by 1 and set the least significant bit accordingly
        self.b <<= 1;
        if v {
            self.b |= 1;
        }

        self.i += 1;
        self.n += 1;
    }

    fn flush(&mut self) {
        if self.i > 0 {
            // Left-justify the remaining bits
            self.b <<= 8 - self.i;
            self.bytes.push(self.b);
            self.b = 0;
            self.i = 0;
        }
    }

    fn bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        self.flush();

        let mut b = Vec::with_capacity(1 + super::varint::MAX_VARINT_LEN64 + self.bytes.len());
        b.push(encoding_header(BOOLEAN_COMPRESSED_BIT_PACKED, 0));
        // Encode the number of booleans written
        (self.n as u64).encode_var_vec(&mut b);
        b.extend_from_slice(&self.bytes);

        Ok(b)
    }
}

/// BooleanDecoder decodes a series of booleans from an in-memory buffer.
pub struct BooleanDecoder<'a> {
    b: &'a [u8],
    i: Option<usize>,
    n: usize,
}

impl<'a> BooleanDecoder<'a> {
    pub fn new(b: &'a [u8]) -> anyhow::Result<Self> {
        if b.is_empty() {
            return Ok(Self { b, i: None, n: 0 });
        }

        if b[0] >> 4 != BOOLEAN_COMPRESSED_BIT_PACKED {
            return Err(anyhow!("BooleanDecoder: unknown encoding {}", b[0] >> 4));
        }

        // First byte stores the encoding type, next is the count of values.
        let (count, n) = usize::decode_var(&b[1..])
            .ok_or_else(|| anyhow!("BooleanDecoder: invalid count"))?;
        let b = &b[1 + n..];

        let min = (count / 8) + usize::from(count % 8 != 0);
        if b.len() < min {
            return Err(anyhow!(
                "BooleanDecoder: not enough data for {} values: got {} bytes",
                count,
                b.len()
            ));
        }

        Ok(Self { b, i: None, n: count })
    }
}

impl<'a> Decoder<bool> for BooleanDecoder<'a> {
    fn next(&mut self) -> bool {
        let i = self.i.map(|x| x + 1).unwrap_or(0);
        if i >= self.n {
            return false;
        }
        self.i = Some(i);
        true
    }

    fn read(&self) -> bool {
        let i = self.i.unwrap_or(0);

        // Index into the byte slice
        let idx = i >> 3;
        // Bit position
        let pos = 7 - (i & 0x7);

        (self.b[idx] >> pos) & 1 == 1
    }

    fn err(&self) -> Option<&anyhow::Error> {
        None
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    fn encode(values: &[bool]) -> Vec<u8> {
        let mut enc = BooleanEncoder::new(values.len());
        for v in values {
            enc.write(*v);
        }
        enc.bytes().unwrap()
    }

    fn decode(b: &[u8]) -> Vec<bool> {
        let mut dec = BooleanDecoder::new(b).unwrap();
        let mut got = vec![];
        while dec.next() {
            got.push(dec.read());
        }
        got
    }

    #[test]
    fn test_boolean_encoder_multi_byte() {
        let values: Vec<bool> = (0..19).map(|i| i % 3 == 0).collect();
        let b = encode(&values);
        assert_eq!(b.len(), 1 + 1 + 3);
        assert_eq!(decode(&b), values);
    }

    #[test]
    fn test_boolean_decoder_short_buffer() {
        let b = encode(&[true; 16]);
        assert!(BooleanDecoder::new(&b[..b.len() - 1]).is_err());
        assert!(BooleanDecoder::new(&[0x30, 0]).is_err());
    }

    quickcheck! {
        fn prop_boolean_round_trip(values: Vec<bool>) -> bool {
            decode(&encode(&values)) == values
        }
    }
}
