use bytes::{Buf, BufMut};

use crate::engine::tsm1::block::{
    BLOCK_BOOLEAN, BLOCK_FLOAT64, BLOCK_INTEGER, BLOCK_STRING, BLOCK_UNSIGNED,
};
use crate::engine::tsm1::file_store::MAX_KEY_LENGTH;
use crate::engine::tsm1::value::{Value, Values};

/// WRITE_ENTRY_TYPE marks a record holding values for one or more keys.
pub const WRITE_ENTRY_TYPE: u8 = 1;

/// DELETE_RANGE_ENTRY_TYPE marks a record holding a time range deleted from a set of keys.
pub const DELETE_RANGE_ENTRY_TYPE: u8 = 3;

/// RECORD_HEADER_SIZE is `type u8 | len u32 | crc32 u32`.
pub const RECORD_HEADER_SIZE: usize = 9;

/// WalEntry is one logical record of the write ahead log.
#[derive(Debug, Clone, PartialEq)]
pub enum WalEntry {
    Write(Vec<(Vec<u8>, Values)>),
    DeleteRange { keys: Vec<Vec<u8>>, min: i64, max: i64 },
}

impl WalEntry {
    pub fn entry_type(&self) -> u8 {
        match self {
            WalEntry::Write(_) => WRITE_ENTRY_TYPE,
            WalEntry::DeleteRange { .. } => DELETE_RANGE_ENTRY_TYPE,
        }
    }

    pub fn marshal_binary(&self) -> anyhow::Result<Vec<u8>> {
        let mut b = vec![];
        match self {
            WalEntry::Write(values) => {
                for (key, v) in values {
                    if key.len() > MAX_KEY_LENGTH {
                        return Err(anyhow!("wal: key length {} too long", key.len()));
                    }
                    b.put_u8(v.block_type());
                    b.put_u16(key.len() as u16);
                    b.put_slice(key);
                    b.put_u32(v.len() as u32);
                    encode_values(&mut b, v);
                }
            }
            WalEntry::DeleteRange { keys, min, max } => {
                b.put_i64(*min);
                b.put_i64(*max);
                for key in keys {
                    b.put_u32(key.len() as u32);
                    b.put_slice(key);
                }
            }
        }
        Ok(b)
    }

    pub fn unmarshal_binary(typ: u8, mut b: &[u8]) -> anyhow::Result<Self> {
        match typ {
            WRITE_ENTRY_TYPE => {
                let mut values = vec![];
                while b.has_remaining() {
                    ensure(b, 3)?;
                    let block_type = b.get_u8();
                    let key_len = b.get_u16() as usize;
                    ensure(b, key_len + 4)?;
                    let key = b[..key_len].to_vec();
                    b.advance(key_len);
                    let count = b.get_u32() as usize;
                    let v = decode_values(&mut b, block_type, count)?;
                    values.push((key, v));
                }
                Ok(WalEntry::Write(values))
            }
            DELETE_RANGE_ENTRY_TYPE => {
                ensure(b, 16)?;
                let min = b.get_i64();
                let max = b.get_i64();
                let mut keys = vec![];
                while b.has_remaining() {
                    ensure(b, 4)?;
                    let key_len = b.get_u32() as usize;
                    ensure(b, key_len)?;
                    keys.push(b[..key_len].to_vec());
                    b.advance(key_len);
                }
                Ok(WalEntry::DeleteRange { keys, min, max })
            }
            _ => Err(anyhow!("wal: unknown entry type {}", typ)),
        }
    }

    /// encode frames the entry as `type | len | crc32 | snappy(payload)`. The checksum covers
    /// the compressed payload.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let payload = self.marshal_binary()?;
        let compressed = snap::raw::Encoder::new()
            .compress_vec(&payload)
            .map_err(|e| anyhow!("wal: snappy compress: {}", e))?;

        let mut b = Vec::with_capacity(RECORD_HEADER_SIZE + compressed.len());
        b.put_u8(self.entry_type());
        b.put_u32(compressed.len() as u32);
        b.put_u32(crc32fast::hash(&compressed));
        b.put_slice(&compressed);
        Ok(b)
    }
}

/// Record is the outcome of decoding one framed record.
#[derive(Debug)]
pub enum Record {
    /// A complete entry and the number of bytes it took.
    Entry(WalEntry, usize),
    /// The buffer ends before the record does.
    Truncated,
    Corrupt(String),
}

/// decode_record reads the framed record at the start of `b`.
pub fn decode_record(b: &[u8]) -> Record {
    if b.len() < RECORD_HEADER_SIZE {
        return Record::Truncated;
    }

    let mut header = &b[..RECORD_HEADER_SIZE];
    let typ = header.get_u8();
    let len = header.get_u32() as usize;
    let crc = header.get_u32();

    let end = RECORD_HEADER_SIZE + len;
    if b.len() < end {
        return Record::Truncated;
    }

    let compressed = &b[RECORD_HEADER_SIZE..end];
    let actual = crc32fast::hash(compressed);
    if actual != crc {
        return Record::Corrupt(format!(
            "checksum mismatch: got {} but expected {}",
            actual, crc
        ));
    }

    let payload = match snap::raw::Decoder::new().decompress_vec(compressed) {
        Ok(p) => p,
        Err(e) => return Record::Corrupt(format!("snappy decompress: {}", e)),
    };

    match WalEntry::unmarshal_binary(typ, &payload) {
        Ok(entry) => Record::Entry(entry, end),
        Err(e) => Record::Corrupt(e.to_string()),
    }
}

fn ensure(b: &[u8], n: usize) -> anyhow::Result<()> {
    if b.remaining() < n {
        return Err(anyhow!(
            "wal: short payload, need {} bytes but {} remain",
            n,
            b.remaining()
        ));
    }
    Ok(())
}

fn encode_values(b: &mut Vec<u8>, values: &Values) {
    match values {
        Values::Float(v) => v.iter().for_each(|x| {
            b.put_i64(x.unix_nano);
            b.put_f64(x.value);
        }),
        Values::Integer(v) => v.iter().for_each(|x| {
            b.put_i64(x.unix_nano);
            b.put_i64(x.value);
        }),
        Values::Bool(v) => v.iter().for_each(|x| {
            b.put_i64(x.unix_nano);
            b.put_u8(x.value as u8);
        }),
        Values::Str(v) => v.iter().for_each(|x| {
            b.put_i64(x.unix_nano);
            b.put_u32(x.value.len() as u32);
            b.put_slice(&x.value);
        }),
        Values::Unsigned(v) => v.iter().for_each(|x| {
            b.put_i64(x.unix_nano);
            b.put_u64(x.value);
        }),
    }
}

fn decode_values(b: &mut &[u8], typ: u8, count: usize) -> anyhow::Result<Values> {
    let values = match typ {
        BLOCK_FLOAT64 => {
            ensure(b, count * 16)?;
            Values::Float((0..count).map(|_| Value::new(b.get_i64(), b.get_f64())).collect())
        }
        BLOCK_INTEGER => {
            ensure(b, count * 16)?;
            Values::Integer((0..count).map(|_| Value::new(b.get_i64(), b.get_i64())).collect())
        }
        BLOCK_UNSIGNED => {
            ensure(b, count * 16)?;
            Values::Unsigned((0..count).map(|_| Value::new(b.get_i64(), b.get_u64())).collect())
        }
        BLOCK_BOOLEAN => {
            ensure(b, count * 9)?;
            Values::Bool(
                (0..count)
                    .map(|_| Value::new(b.get_i64(), b.get_u8() != 0))
                    .collect(),
            )
        }
        BLOCK_STRING => {
            let mut v = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                ensure(b, 12)?;
                let t = b.get_i64();
                let len = b.get_u32() as usize;
                ensure(b, len)?;
                v.push(Value::new(t, b[..len].to_vec()));
                b.advance(len);
            }
            Values::Str(v)
        }
        _ => return Err(anyhow!("wal: unknown value type {}", typ)),
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_entry() -> WalEntry {
        WalEntry::Write(vec![
            (
                b"cpu,host=a#!~#value".to_vec(),
                Values::Float(vec![Value::new(1, 1.5), Value::new(2, -2.0)]),
            ),
            (
                b"cpu,host=a#!~#count".to_vec(),
                Values::Integer(vec![Value::new(1, 7)]),
            ),
            (
                b"cpu,host=a#!~#up".to_vec(),
                Values::Bool(vec![Value::new(3, true)]),
            ),
            (
                b"cpu,host=a#!~#msg".to_vec(),
                Values::Str(vec![Value::new(4, b"hello".to_vec()), Value::new(5, vec![])]),
            ),
            (
                b"cpu,host=a#!~#total".to_vec(),
                Values::Unsigned(vec![Value::new(6, u64::MAX)]),
            ),
        ])
    }

    #[test]
    fn test_record_decode() {
        let entries = vec![
            write_entry(),
            WalEntry::DeleteRange {
                keys: vec![b"cpu".to_vec(), vec![]],
                min: i64::MIN,
                max: 100,
            },
        ];

        let mut buf = vec![];
        for e in &entries {
            buf.extend(e.encode().unwrap());
        }

        let mut got = vec![];
        let mut b = buf.as_slice();
        while !b.is_empty() {
            match decode_record(b) {
                Record::Entry(e, n) => {
                    got.push(e);
                    b = &b[n..];
                }
                r => panic!("unexpected record {:?}", r),
            }
        }
        assert_eq!(got, entries);
    }

    #[test]
    fn test_record_torn_and_corrupt() {
        let rec = write_entry().encode().unwrap();

        for n in [0, 4, RECORD_HEADER_SIZE, rec.len() - 1] {
            assert!(matches!(decode_record(&rec[..n]), Record::Truncated));
        }

        let mut bad = rec.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        assert!(matches!(decode_record(&bad), Record::Corrupt(_)));

        let mut bad_type = rec;
        bad_type[0] = 9;
        assert!(matches!(decode_record(&bad_type), Record::Corrupt(_)));
    }
}
