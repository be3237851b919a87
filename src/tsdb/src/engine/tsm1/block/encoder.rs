use crate::engine::tsm1::block::{
    BLOCK_BOOLEAN, BLOCK_FLOAT64, BLOCK_INTEGER, BLOCK_STRING, BLOCK_UNSIGNED,
};
use crate::engine::tsm1::codec::boolean::BooleanEncoder;
use crate::engine::tsm1::codec::float::FloatEncoder;
use crate::engine::tsm1::codec::integer::IntegerEncoder;
use crate::engine::tsm1::codec::string::StringEncoder;
use crate::engine::tsm1::codec::timestamp::TimeEncoder;
use crate::engine::tsm1::codec::unsigned::UnsignedEncoder;
use crate::engine::tsm1::codec::varint::{VarInt, MAX_VARINT_LEN64};
use crate::engine::tsm1::codec::Encoder;
use crate::engine::tsm1::value::{FieldType, Value, Values};

/// encode_block encodes `values` into a new block. The values must be sorted by time and
/// must not be empty.
pub fn encode_block(values: &Values) -> anyhow::Result<Vec<u8>> {
    match values {
        Values::Float(values) => {
            let v_enc = FloatEncoder::new(values.len());
            encode_block_using(BLOCK_FLOAT64, values, v_enc)
        }
        Values::Integer(values) => {
            let v_enc = IntegerEncoder::new(values.len());
            encode_block_using(BLOCK_INTEGER, values, v_enc)
        }
        Values::Bool(values) => {
            let v_enc = BooleanEncoder::new(values.len());
            encode_block_using(BLOCK_BOOLEAN, values, v_enc)
        }
        Values::Str(values) => {
            let v_enc = StringEncoder::new(values.iter().map(|v| v.value.len() + 1).sum());
            encode_block_using(BLOCK_STRING, values, v_enc)
        }
        Values::Unsigned(values) => {
            let v_enc = UnsignedEncoder::new(values.len());
            encode_block_using(BLOCK_UNSIGNED, values, v_enc)
        }
    }
}

fn encode_block_using<T>(
    typ: u8,
    values: &[Value<T>],
    mut v_enc: impl Encoder<T>,
) -> anyhow::Result<Vec<u8>>
where
    T: FieldType,
{
    if values.is_empty() {
        return Err(anyhow!("encode_block: no data found"));
    }

    let mut ts_enc = TimeEncoder::new(values.len());
    for Value { unix_nano, value } in values {
        ts_enc.write(*unix_nano);
        v_enc.write(value.clone());
    }

    ts_enc.flush();
    v_enc.flush();

    // Encoded timestamp values
    let tb = ts_enc.bytes()?;
    // Encoded values
    let vb = v_enc.bytes()?;

    Ok(pack_block(typ, &tb, &vb))
}

pub(crate) fn pack_block(typ: u8, ts: &[u8], values: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + MAX_VARINT_LEN64 + ts.len() + values.len());

    buf.push(typ);
    ts.len().encode_var_vec(&mut buf);

    buf.extend_from_slice(ts);
    buf.extend_from_slice(values);

    buf
}
