//! Timestamp encoding is adaptive and based on structure of the timestamps that are encoded.
//!
//! Timestamps to be encoded should be sorted. They are first delta-encoded: the first value is the
//! starting timestamp, subsequent values are the difference from the prior value. Many timestamps
//! fall on even boundaries of time such as every 10s, so the deltas are scaled down by the largest
//! common divisor that is also a power of 10.
//!
//! If all the scaled deltas are the same, the run is stored using run length encoding. Otherwise each
//! scaled delta is written as a varint.
//!
//! Each encoded slice has a 1 byte header. The 4 high bits indicate the encoding type, the 4 low
//! bits store the log10 of the scaling factor.
//!
//! Run length layout: header, 8 byte starting timestamp, varint delta, varint count.
//! Packed layout: header, 8 byte starting timestamp, one varint per following delta.

use crate::engine::tsm1::codec::varint::VarInt;
use crate::engine::tsm1::codec::{encoding_header, read_u64_be, Decoder, Encoder};

/// TIME_COMPRESSED_PACKED is a format storing each scaled delta as a varint
const TIME_COMPRESSED_PACKED: u8 = 1;
/// TIME_COMPRESSED_RLE is a run-length encoding format
const TIME_COMPRESSED_RLE: u8 = 2;

/// The largest divisor tried when scaling deltas.
const MAX_DIVISOR_LOG10: u8 = 12;

/// TimeEncoder encodes timestamps to byte slices.
pub struct TimeEncoder {
    ts: Vec<u64>,
}

impl TimeEncoder {
    pub fn new(sz: usize) -> Self {
        Self {
            ts: Vec::with_capacity(sz),
        }
    }

    /// reduce turns the buffered timestamps into deltas in place and returns the log10 of the
    /// largest common power of 10 divisor and whether the deltas are all equal.
    fn reduce(&mut self) -> (u8, bool) {
        let deltas = self.ts.as_mut_slice();

        let mut log10 = MAX_DIVISOR_LOG10;
        let mut divisor = 10u64.pow(MAX_DIVISOR_LOG10 as u32);

        // Indicates whether the deltas can be run-length encoded
        let mut rle = true;

        // Iterate in reverse so we can apply deltas in place
        for i in (1..deltas.len()).rev() {
            deltas[i] = deltas[i].wrapping_sub(deltas[i - 1]);
            let v = deltas[i];

            while divisor > 1 && v % divisor != 0 {
                divisor /= 10;
                log10 -= 1;
            }

            // The deltas can be RLE if they are all equal.
            rle = i == deltas.len() - 1 || (rle && deltas[i + 1] == v);
        }

        (log10, rle)
    }

    fn encode_packed(&self, log10: u8) -> Vec<u8> {
        let div = 10u64.pow(log10 as u32);

        let mut bytes = Vec::with_capacity(1 + 8 + (self.ts.len() - 1) * 2);
        bytes.push(encoding_header(TIME_COMPRESSED_PACKED, log10));
        bytes.extend_from_slice(&self.ts[0].to_be_bytes());

        for v in &self.ts[1..] {
            (*v / div).encode_var_vec(&mut bytes);
        }

        bytes
    }

    fn encode_rle(&self, log10: u8) -> Vec<u8> {
        let div = 10u64.pow(log10 as u32);

        // Large varints can take up to 10 bytes, we're encoding 2 + 8 byte first + 1 byte type
        let mut bytes = Vec::with_capacity(29);
        bytes.push(encoding_header(TIME_COMPRESSED_RLE, log10));

        // The first timestamp
        bytes.extend_from_slice(&self.ts[0].to_be_bytes());
        // The first delta
        (self.ts[1] / div).encode_var_vec(&mut bytes);
        // The number of timestamps in the run
        (self.ts.len() as u64).encode_var_vec(&mut bytes);

        bytes
    }
}

impl Encoder<i64> for TimeEncoder {
    fn write(&mut self, v: i64) {
        self.ts.push(v as u64);
    }

    fn flush(&mut self) {}

    fn bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        if self.ts.is_empty() {
            return Ok(vec![]);
        }

        let (log10, rle) = self.reduce();

        let bytes = if rle && self.ts.len() > 1 {
            self.encode_rle(log10)
        } else {
            self.encode_packed(log10)
        };

        Ok(bytes)
    }
}

fn split_header(b: &[u8]) -> anyhow::Result<(u8, u64, &[u8])> {
    let encoding = b[0] >> 4;
    let log10 = (b[0] & 0x0F) as u32;
    if log10 > MAX_DIVISOR_LOG10 as u32 {
        return Err(anyhow!("TimeDecoder: invalid scaling exponent {}", log10));
    }
    Ok((encoding, 10u64.pow(log10), &b[1..]))
}

/// count_timestamps returns the number of timestamps in an encoded slice without decoding them.
pub fn count_timestamps(b: &[u8]) -> anyhow::Result<usize> {
    if b.is_empty() {
        return Ok(0);
    }

    let (encoding, _, b) = split_header(b)?;
    if b.len() < 8 {
        return Err(anyhow!("TimeDecoder: not enough data for the starting value"));
    }
    let b = &b[8..];

    match encoding {
        TIME_COMPRESSED_RLE => {
            let (_, n) =
                u64::decode_var(b).ok_or_else(|| anyhow!("TimeDecoder: invalid run length"))?;
            let (count, _) = usize::decode_var(&b[n..])
                .ok_or_else(|| anyhow!("TimeDecoder: invalid repeat value"))?;
            Ok(count)
        }
        TIME_COMPRESSED_PACKED => {
            if b.last().map(|x| x & 0x80 != 0).unwrap_or(false) {
                return Err(anyhow!("TimeDecoder: truncated packed delta"));
            }
            // every varint ends with exactly one byte that has the continuation bit clear
            Ok(1 + b.iter().filter(|x| *x & 0x80 == 0).count())
        }
        _ => Err(anyhow!("TimeDecoder: unknown encoding {}", encoding)),
    }
}

pub enum TimeDecoder<'a> {
    Rle(RleDecoder),
    Packed(PackedDecoder<'a>),
    Empty,
}

impl<'a> TimeDecoder<'a> {
    pub fn new(b: &'a [u8]) -> anyhow::Result<Self> {
        if b.is_empty() {
            return Ok(TimeDecoder::Empty);
        }

        let (encoding, div, b) = split_header(b)?;
        match encoding {
            TIME_COMPRESSED_PACKED => Ok(TimeDecoder::Packed(PackedDecoder::new(b, div)?)),
            TIME_COMPRESSED_RLE => Ok(TimeDecoder::Rle(RleDecoder::new(b, div)?)),
            _ => Err(anyhow!("TimeDecoder: unknown encoding {}", encoding)),
        }
    }
}

impl<'a> Decoder<i64> for TimeDecoder<'a> {
    fn next(&mut self) -> bool {
        match self {
            Self::Rle(d) => d.next(),
            Self::Packed(d) => d.next(),
            Self::Empty => false,
        }
    }

    fn read(&self) -> i64 {
        match self {
            Self::Rle(d) => d.read(),
            Self::Packed(d) => d.read(),
            Self::Empty => 0,
        }
    }

    fn err(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Rle(d) => d.err(),
            Self::Packed(d) => d.err(),
            Self::Empty => None,
        }
    }
}

pub struct RleDecoder {
    value: i64,
    delta: i64,
    repeat: u64,
    step: u64,
}

impl RleDecoder {
    pub fn new(bytes: &[u8], div: u64) -> anyhow::Result<Self> {
        // First 8 bytes is the starting timestamp
        let first = read_u64_be(bytes)
            .ok_or_else(|| anyhow!("TimeDecoder: not enough data to decode RLE starting value"))?;
        let mut i = 8;

        // Next 1-10 bytes is the delta value
        let (delta, n) = u64::decode_var(&bytes[i..])
            .ok_or_else(|| anyhow!("TimeDecoder: invalid run length in decodeRLE"))?;
        i += n;

        // Last 1-10 bytes is how many times the value repeats
        let (repeat, _) = u64::decode_var(&bytes[i..])
            .ok_or_else(|| anyhow!("TimeDecoder: invalid repeat value in decodeRLE"))?;

        Ok(Self {
            value: first as i64,
            delta: delta.wrapping_mul(div) as i64,
            repeat,
            step: 0,
        })
    }
}

impl Decoder<i64> for RleDecoder {
    fn next(&mut self) -> bool {
        if self.step >= self.repeat {
            return false;
        }

        if self.step > 0 {
            self.value = self.value.wrapping_add(self.delta);
        }
        self.step += 1;

        true
    }

    fn read(&self) -> i64 {
        self.value
    }

    fn err(&self) -> Option<&anyhow::Error> {
        None
    }
}

pub struct PackedDecoder<'a> {
    value: i64,
    div: u64,

    bytes: &'a [u8],
    started: bool,

    err: Option<anyhow::Error>,
}

impl<'a> PackedDecoder<'a> {
    pub fn new(bytes: &'a [u8], div: u64) -> anyhow::Result<Self> {
        // First 8 bytes is the starting value
        let first = read_u64_be(bytes).ok_or_else(|| {
            anyhow!("TimeDecoder: not enough data to decode packed starting value")
        })?;

        Ok(Self {
            value: first as i64,
            div,
            bytes: &bytes[8..],
            started: false,
            err: None,
        })
    }
}

impl<'a> Decoder<i64> for PackedDecoder<'a> {
    fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }

        if !self.started {
            self.started = true;
            return true;
        }

        if self.bytes.is_empty() {
            return false;
        }

        match u64::decode_var(self.bytes) {
            Some((delta, n)) => {
                self.bytes = &self.bytes[n..];
                self.value = self.value.wrapping_add(delta.wrapping_mul(self.div) as i64);
                true
            }
            None => {
                self.err = Some(anyhow!("TimeDecoder: invalid packed delta"));
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

    fn encode(ts: &[i64]) -> Vec<u8> {
        let mut enc = TimeEncoder::new(ts.len());
        for t in ts {
            enc.write(*t);
        }
        enc.bytes().unwrap()
    }

    fn decode(b: &[u8]) -> Vec<i64> {
        let mut dec = TimeDecoder::new(b).unwrap();
        let mut got = vec![];
        while dec.next() {
            got.push(dec.read());
        }
        assert!(dec.err().is_none());
        got
    }

    #[test]
    fn test_time_encoder_rle() {
        let ts: Vec<i64> = (0..100).map(|i| 1_000_000_000 + i * 10_000_000_000).collect();
        let b = encode(&ts);
        assert_eq!(b[0] >> 4, TIME_COMPRESSED_RLE);
        assert_eq!(b[0] & 0x0F, 10);
        assert!(b.len() < 20);
        assert_eq!(count_timestamps(&b).unwrap(), 100);
        assert_eq!(decode(&b), ts);
    }

    #[test]
    fn test_time_encoder_packed() {
        let ts = vec![1000, 3000, 4000, 9000, 9000, 10000];
        let b = encode(&ts);
        assert_eq!(b[0] >> 4, TIME_COMPRESSED_PACKED);
        assert_eq!(b[0] & 0x0F, 3);
        assert_eq!(count_timestamps(&b).unwrap(), ts.len());
        assert_eq!(decode(&b), ts);
    }

    #[test]
    fn test_time_encoder_single_and_empty() {
        let b = encode(&[-5]);
        assert_eq!(count_timestamps(&b).unwrap(), 1);
        assert_eq!(decode(&b), vec![-5]);

        assert!(encode(&[]).is_empty());
        assert_eq!(count_timestamps(&[]).unwrap(), 0);
    }

    #[test]
    fn test_time_encoder_extremes() {
        let ts = vec![i64::MIN, -1, 0, 1, i64::MAX];
        let b = encode(&ts);
        assert_eq!(decode(&b), ts);
    }

    #[test]
    fn test_time_decoder_corrupt() {
        assert!(TimeDecoder::new(&[0x10, 0, 0]).is_err());
        assert!(TimeDecoder::new(&[0x70, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
        assert!(TimeDecoder::new(&[0x1F, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());

        let mut b = encode(&[1, 2, 4, 1000]);
        b.push(0x80);
        assert!(count_timestamps(&b).is_err());

        let mut dec = TimeDecoder::new(&b).unwrap();
        while dec.next() {}
        assert!(dec.err().is_some());
    }

    quickcheck! {
        fn prop_time_round_trip(ts: Vec<i64>) -> bool {
            let mut ts = ts;
            ts.sort();
            let b = encode(&ts);
            count_timestamps(&b).unwrap() == ts.len() && decode(&b) == ts
        }
    }
}
