//! String encoding uses snappy compression to compress each string.  Each string is
//! appended to byte slice prefixed with a variable byte length followed by the string
//! bytes.  The bytes are compressed using snappy compressor and a 1 byte header is used
//! to indicate the type of encoding.

use crate::engine::tsm1::codec::varint::VarInt;
use crate::engine::tsm1::codec::{encoding_header, Decoder, Encoder};

/// STRING_COMPRESSED_SNAPPY is a compressed encoding using Snappy compression
const STRING_COMPRESSED_SNAPPY: u8 = 1;

/// StringEncoder encodes multiple strings into a byte slice.
pub struct StringEncoder {
    // The uncompressed length-prefixed strings
    bytes: Vec<u8>,
}

impl StringEncoder {
    /// new returns a StringEncoder with an initial buffer ready to hold sz bytes.
    pub fn new(sz: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(sz),
        }
    }

    /// write_bytes appends s to the underlying buffer.
    pub fn write_bytes(&mut self, s: &[u8]) {
        // Append the length of the string using variable byte encoding
        (s.len() as u64).encode_var_vec(&mut self.bytes);
        // Append the string bytes
        self.bytes.extend_from_slice(s);
    }
}

impl Encoder<Vec<u8>> for StringEncoder {
    fn write(&mut self, v: Vec<u8>) {
        self.write_bytes(v.as_slice());
    }

    fn flush(&mut self) {}

    fn bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        let max_encoded_len = snap::raw::max_compress_len(self.bytes.len());
        if max_encoded_len == 0 {
            return Err(anyhow!("StringEncoder: source length too large"));
        }

        let mut compressed = vec![0u8; max_encoded_len + 1];
        compressed[0] = encoding_header(STRING_COMPRESSED_SNAPPY, 0);

        let n = snap::raw::Encoder::new()
            .compress(self.bytes.as_slice(), &mut compressed[1..])
            .map_err(|e| anyhow!("StringEncoder: {}", e))?;

        compressed.truncate(1 + n);
        Ok(compressed)
    }
}

/// StringDecoder decodes a byte slice into strings.
pub struct StringDecoder {
    b: Vec<u8>,
    // offset of the next length prefix
    i: usize,

    lower: usize,
    upper: usize,

    err: Option<anyhow::Error>,
}

impl StringDecoder {
    pub fn new(b: &[u8]) -> anyhow::Result<Self> {
        if b.is_empty() {
            return Err(anyhow!("StringDecoder: no data found"));
        }
        if b[0] >> 4 != STRING_COMPRESSED_SNAPPY {
            return Err(anyhow!("StringDecoder: unknown encoding {}", b[0] >> 4));
        }

        let decoded = snap::raw::Decoder::new()
            .decompress_vec(&b[1..])
            .map_err(|e| anyhow!("StringDecoder: {}", e))?;

        Ok(Self {
            b: decoded,
            i: 0,
            lower: 0,
            upper: 0,
            err: None,
        })
    }

    fn read_range(&self) -> anyhow::Result<(usize, usize)> {
        // Read the length of the string
        let (length, n) = usize::decode_var(&self.b[self.i..])
            .ok_or_else(|| anyhow!("StringDecoder: invalid encoded string length"))?;

        let lower = self.i + n;
        let upper = lower
            .checked_add(length)
            .ok_or_else(|| anyhow!("StringDecoder: length overflow"))?;
        if upper > self.b.len() {
            return Err(anyhow!(
                "StringDecoder: not enough data to represent encoded string"
            ));
        }

        Ok((lower, upper))
    }

    /// read_slice borrows the current value.
    pub fn read_slice(&self) -> &[u8] {
        &self.b[self.lower..self.upper]
    }
}

impl Decoder<Vec<u8>> for StringDecoder {
    fn next(&mut self) -> bool {
        if self.err.is_some() || self.i >= self.b.len() {
            return false;
        }

        match self.read_range() {
            Ok((lower, upper)) => {
                self.lower = lower;
                self.upper = upper;
                self.i = upper;
                true
            }
            Err(e) => {
                self.err = Some(e);
                false
            }
        }
    }

    fn read(&self) -> Vec<u8> {
        self.read_slice().to_vec()
    }

    fn err(&self) -> Option<&anyhow::Error> {
        self.err.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    fn decode(b: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut dec = StringDecoder::new(b)?;
        let mut got = vec![];
        while dec.next() {
            got.push(dec.read());
        }
        match dec.err() {
            Some(e) => Err(anyhow!("{}", e)),
            None => Ok(got),
        }
    }

    #[test]
    fn test_string_encoder_multi_compressed() {
        let mut enc = StringEncoder::new(1024);

        let values: Vec<Vec<u8>> = (0..10).map(|i| format!("value {}", i).into_bytes()).collect();
        for v in &values {
            enc.write(v.clone());
        }

        let b = enc.bytes().unwrap();
        assert_eq!(b[0] >> 4, STRING_COMPRESSED_SNAPPY);
        assert_eq!(decode(&b).unwrap(), values);
    }

    #[test]
    fn test_string_encoder_binary_and_empty_strings() {
        let values = vec![vec![], vec![0xFF, 0x00, 0xFE], b"".to_vec(), b"x".to_vec()];
        let mut enc = StringEncoder::new(16);
        for v in &values {
            enc.write(v.clone());
        }
        let b = enc.bytes().unwrap();
        assert_eq!(decode(&b).unwrap(), values);
    }

    #[test]
    fn test_string_decoder_corrupt() {
        assert!(StringDecoder::new(&[]).is_err());
        assert!(StringDecoder::new(&[0x20, 0]).is_err());

        // valid snappy frame holding a length prefix longer than the payload
        let mut raw = vec![];
        10u64.encode_var_vec(&mut raw);
        raw.extend_from_slice(b"abc");
        let mut b = vec![STRING_COMPRESSED_SNAPPY << 4];
        b.extend(snap::raw::Encoder::new().compress_vec(&raw).unwrap());
        assert!(decode(&b).is_err());
    }

    quickcheck! {
        fn prop_string_round_trip(values: Vec<Vec<u8>>) -> bool {
            let mut enc = StringEncoder::new(0);
            for v in &values {
                enc.write(v.clone());
            }
            let b = enc.bytes().unwrap();
            decode(&b).map(|got| got == values).unwrap_or(false)
        }
    }
}
