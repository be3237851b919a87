use std::fmt::{Debug, Display, Formatter};

use crate::engine::tsm1::block::{
    BLOCK_BOOLEAN, BLOCK_FLOAT64, BLOCK_INTEGER, BLOCK_STRING, BLOCK_UNSIGNED,
};
use crate::engine::tsm1::value::Values;

/// FieldType is implemented by every value type a TSM block can hold.
pub trait FieldType: Send + Sync + Debug + Clone + PartialEq + 'static {
    /// BLOCK_TYPE is the block type byte for blocks of this value type.
    const BLOCK_TYPE: u8;

    /// encode_size approximates the in-memory size of one point, timestamp included.
    fn encode_size(&self) -> usize;

    fn into_values(values: Vec<Value<Self>>) -> Values;

    fn format(&self) -> String;
}

impl FieldType for f64 {
    const BLOCK_TYPE: u8 = BLOCK_FLOAT64;

    fn encode_size(&self) -> usize {
        16
    }

    fn into_values(values: Vec<Value<Self>>) -> Values {
        Values::Float(values)
    }

    fn format(&self) -> String {
        self.to_string()
    }
}

impl FieldType for i64 {
    const BLOCK_TYPE: u8 = BLOCK_INTEGER;

    fn encode_size(&self) -> usize {
        16
    }

    fn into_values(values: Vec<Value<Self>>) -> Values {
        Values::Integer(values)
    }

    fn format(&self) -> String {
        format!("{}i", self)
    }
}

impl FieldType for bool {
    const BLOCK_TYPE: u8 = BLOCK_BOOLEAN;

    fn encode_size(&self) -> usize {
        9
    }

    fn into_values(values: Vec<Value<Self>>) -> Values {
        Values::Bool(values)
    }

    fn format(&self) -> String {
        self.to_string()
    }
}

impl FieldType for Vec<u8> {
    const BLOCK_TYPE: u8 = BLOCK_STRING;

    fn encode_size(&self) -> usize {
        8 + self.len()
    }

    fn into_values(values: Vec<Value<Self>>) -> Values {
        Values::Str(values)
    }

    fn format(&self) -> String {
        format!("{:?}", String::from_utf8_lossy(self))
    }
}

impl FieldType for u64 {
    const BLOCK_TYPE: u8 = BLOCK_UNSIGNED;

    fn encode_size(&self) -> usize {
        16
    }

    fn into_values(values: Vec<Value<Self>>) -> Values {
        Values::Unsigned(values)
    }

    fn format(&self) -> String {
        format!("{}u", self)
    }
}

/// Value is a single point: a unix nanosecond timestamp and a field value.
#[derive(Debug, Clone, PartialEq)]
pub struct Value<T>
where
    T: FieldType,
{
    pub unix_nano: i64,
    pub value: T,
}

impl<T> Value<T>
where
    T: FieldType,
{
    pub fn new(unix_nano: i64, value: T) -> Self {
        Self { unix_nano, value }
    }
}

impl<T> Display for Value<T>
where
    T: FieldType,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.unix_nano, self.value.format())
    }
}

pub type FloatValue = Value<f64>;
pub type IntegerValue = Value<i64>;
pub type BoolValue = Value<bool>;
pub type StringValue = Value<Vec<u8>>;
pub type UnsignedValue = Value<u64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::new(1, 1.5).to_string(), "1 1.5");
        assert_eq!(Value::new(2, -3i64).to_string(), "2 -3i");
        assert_eq!(Value::new(3, 7u64).to_string(), "3 7u");
        assert_eq!(Value::new(4, b"a\"b".to_vec()).to_string(), "4 \"a\\\"b\"");
        assert_eq!(Value::new(5, true).to_string(), "5 true");
    }
}
