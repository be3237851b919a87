use crate::engine::tsm1::block::{
    BLOCK_BOOLEAN, BLOCK_FLOAT64, BLOCK_INTEGER, BLOCK_STRING, BLOCK_UNSIGNED,
    ENCODED_BLOCK_HEADER_SIZE,
};
use crate::engine::tsm1::codec::boolean::BooleanDecoder;
use crate::engine::tsm1::codec::float::FloatDecoder;
use crate::engine::tsm1::codec::integer::IntegerDecoder;
use crate::engine::tsm1::codec::string::StringDecoder;
use crate::engine::tsm1::codec::timestamp::{count_timestamps, TimeDecoder};
use crate::engine::tsm1::codec::unsigned::UnsignedDecoder;
use crate::engine::tsm1::codec::varint::VarInt;
use crate::engine::tsm1::codec::Decoder;
use crate::engine::tsm1::value::{FieldType, Value, Values};

/// Upper bound for pre-allocating decoded values, the count comes from untrusted bytes.
const MAX_PREALLOC: usize = 4096;

/// decode_block decodes every point of an encoded block.
pub fn decode_block(block: &[u8]) -> anyhow::Result<Values> {
    let (typ, tb, vb) = unpack_block(block)?;
    let sz = count_timestamps(tb)?;

    match typ {
        BLOCK_FLOAT64 => decode_block_using(tb, FloatDecoder::new(vb, sz)?, sz).map(Values::Float),
        BLOCK_INTEGER => decode_block_using(tb, IntegerDecoder::new(vb)?, sz).map(Values::Integer),
        BLOCK_BOOLEAN => decode_block_using(tb, BooleanDecoder::new(vb)?, sz).map(Values::Bool),
        BLOCK_STRING => decode_block_using(tb, StringDecoder::new(vb)?, sz).map(Values::Str),
        BLOCK_UNSIGNED => {
            decode_block_using(tb, UnsignedDecoder::new(vb)?, sz).map(Values::Unsigned)
        }
        _ => Err(anyhow!("unknown block type: {}", typ)),
    }
}

fn decode_block_using<T>(
    tb: &[u8],
    mut v_dec: impl Decoder<T>,
    sz: usize,
) -> anyhow::Result<Vec<Value<T>>>
where
    T: FieldType,
{
    let mut ts_dec = TimeDecoder::new(tb)?;
    let mut values = Vec::with_capacity(sz.min(MAX_PREALLOC));

    while ts_dec.next() {
        if !v_dec.next() {
            return Err(match v_dec.err() {
                Some(e) => anyhow!("{}", e),
                None => anyhow!(
                    "decode block: fewer values than timestamps: {} < {}",
                    values.len(),
                    sz
                ),
            });
        }
        values.push(Value::new(ts_dec.read(), v_dec.read()));
    }

    if let Some(e) = ts_dec.err() {
        return Err(anyhow!("{}", e));
    }
    if v_dec.next() {
        return Err(anyhow!(
            "decode block: more values than timestamps: {}",
            values.len()
        ));
    }
    if let Some(e) = v_dec.err() {
        return Err(anyhow!("{}", e));
    }

    Ok(values)
}

/// unpack_block splits a block into its type, timestamp bytes and value bytes.
pub fn unpack_block(block: &[u8]) -> anyhow::Result<(u8, &[u8], &[u8])> {
    if block.len() <= ENCODED_BLOCK_HEADER_SIZE {
        return Err(anyhow!(
            "decode of short block: got {}, exp > {}",
            block.len(),
            ENCODED_BLOCK_HEADER_SIZE
        ));
    }

    // Unpack the type
    let typ = block[0];

    // Unpack the timestamp block length
    let (ts_len, n) = usize::decode_var(&block[1..])
        .ok_or_else(|| anyhow!("unpack_block: unable to read timestamp block length"))?;

    // Unpack the timestamp bytes
    let ts_idx = 1 + n;
    let v_idx = ts_idx
        .checked_add(ts_len)
        .filter(|x| *x <= block.len())
        .ok_or_else(|| {
            anyhow!(
                "unpack_block: not enough data for timestamp: {} > {}",
                ts_len,
                block.len() - ts_idx
            )
        })?;

    Ok((typ, &block[ts_idx..v_idx], &block[v_idx..]))
}

/// block_type returns the type of value encoded in a block or an error if the block type is unknown.
pub fn block_type(block: &[u8]) -> anyhow::Result<u8> {
    let typ = *block
        .first()
        .ok_or_else(|| anyhow!("block_type: empty block"))?;
    match typ {
        BLOCK_FLOAT64 | BLOCK_INTEGER | BLOCK_BOOLEAN | BLOCK_STRING | BLOCK_UNSIGNED => Ok(typ),
        _ => Err(anyhow!("unknown block type: {}", typ)),
    }
}

/// block_count returns the number of timestamps encoded in block.
pub fn block_count(block: &[u8]) -> anyhow::Result<usize> {
    let (_, tb, _) = unpack_block(block)?;
    count_timestamps(tb)
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;
    use rand::Rng;

    use crate::engine::tsm1::block::{checksum, encode_block, verify};

    use super::*;

    fn round_trip(values: Values) {
        let block = encode_block(&values).unwrap();
        assert_eq!(block_type(&block).unwrap(), values.block_type());
        assert_eq!(block_count(&block).unwrap(), values.len());
        assert_eq!(decode_block(&block).unwrap(), values);
    }

    #[test]
    fn test_block_round_trip_all_types() {
        round_trip(Values::Float(vec![Value::new(1, 1.0), Value::new(2, 2.0)]));
        round_trip(Values::Integer(
            (0..1000).map(|i| Value::new(i * 10, i * i - 500)).collect(),
        ));
        round_trip(Values::Bool(
            (0..9).map(|i| Value::new(i, i % 2 == 0)).collect(),
        ));
        round_trip(Values::Str(vec![
            Value::new(-10, b"a".to_vec()),
            Value::new(0, b"".to_vec()),
            Value::new(10, "🦀".as_bytes().to_vec()),
        ]));
        round_trip(Values::Unsigned(vec![
            Value::new(5, u64::MAX),
            Value::new(6, 0),
        ]));
    }

    #[test]
    fn test_block_float_bit_exact() {
        let values = vec![
            Value::new(1, f64::NAN),
            Value::new(2, -0.0),
            Value::new(3, f64::from_bits(0xFFF0_0000_0000_0001)),
        ];
        let block = encode_block(&Values::Float(values.clone())).unwrap();
        match decode_block(&block).unwrap() {
            Values::Float(got) => {
                let got: Vec<(i64, u64)> = got.iter().map(|v| (v.unix_nano, v.value.to_bits())).collect();
                let exp: Vec<(i64, u64)> = values.iter().map(|v| (v.unix_nano, v.value.to_bits())).collect();
                assert_eq!(got, exp);
            }
            other => panic!("unexpected values {:?}", other),
        }
    }

    #[test]
    fn test_encode_deterministic() {
        let values = Values::Float((0..100).map(|i| Value::new(i, i as f64 * 0.5)).collect());
        assert_eq!(encode_block(&values).unwrap(), encode_block(&values).unwrap());
    }

    #[test]
    fn test_encode_empty() {
        assert!(encode_block(&Values::Float(vec![])).is_err());
    }

    #[test]
    fn test_checksum_detects_bit_flips() {
        let mut rng = rand::thread_rng();
        let values = Values::Integer((0..50).map(|i| Value::new(i, rng.gen_range(-100..100))).collect());
        let block = encode_block(&values).unwrap();
        let sum = checksum(&block);
        assert!(verify(&block, sum));

        for i in 0..block.len() * 8 {
            let mut corrupt = block.clone();
            corrupt[i / 8] ^= 1 << (i % 8);
            assert!(!verify(&corrupt, sum), "bit {} flip not detected", i);
        }
    }

    #[test]
    fn test_decode_truncated_blocks() {
        let blocks = vec![
            encode_block(&Values::Float((0..20).map(|i| Value::new(i, i as f64 / 3.0)).collect())).unwrap(),
            encode_block(&Values::Integer((0..20).map(|i| Value::new(i * 7, i * 1000 - 3)).collect())).unwrap(),
            encode_block(&Values::Str((0..20).map(|i| Value::new(i, format!("s{}", i).into_bytes())).collect())).unwrap(),
        ];

        for block in blocks {
            for n in 0..block.len() {
                assert!(decode_block(&block[..n]).is_err(), "truncated at {} decoded", n);
            }
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut block = encode_block(&Values::Bool(vec![Value::new(1, true)])).unwrap();
        block[0] = 9;
        assert!(decode_block(&block).is_err());
        assert!(block_type(&block).is_err());
        assert!(block_type(&[]).is_err());
    }

    quickcheck! {
        fn prop_integer_block_round_trip(points: Vec<(i64, i64)>) -> bool {
            let values: Vec<Value<i64>> = points.into_iter().map(|(t, v)| Value::new(t, v)).collect();
            let values = Values::Integer(values).deduplicate();
            if values.is_empty() {
                return true;
            }
            let block = encode_block(&values).unwrap();
            decode_block(&block).unwrap() == values
        }

        fn prop_string_block_round_trip(points: Vec<(i64, String)>) -> bool {
            let values: Vec<Value<Vec<u8>>> = points.into_iter().map(|(t, v)| Value::new(t, v.into_bytes())).collect();
            let values = Values::Str(values).deduplicate();
            if values.is_empty() {
                return true;
            }
            let block = encode_block(&values).unwrap();
            decode_block(&block).unwrap() == values
        }
    }
}
