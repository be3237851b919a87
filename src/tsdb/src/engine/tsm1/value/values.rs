use crate::engine::tsm1::block::block_type_name;
use crate::engine::tsm1::block::{
    BLOCK_BOOLEAN, BLOCK_FLOAT64, BLOCK_INTEGER, BLOCK_STRING, BLOCK_UNSIGNED,
};
use crate::engine::tsm1::value::{FieldType, Value};
use crate::error::{Error, Result};

/// TValues is the set of time-ordered operations shared by every typed value slice.
/// Unless noted otherwise the slice is expected to be sorted by time.
pub trait TValues {
    fn min_time(&self) -> i64;
    fn max_time(&self) -> i64;
    fn size(&self) -> usize;

    /// ordered returns true if the timestamps are strictly increasing.
    fn ordered(&self) -> bool;

    /// deduplicate sorts the values by time and keeps the last written value for each timestamp.
    /// The input does not need to be sorted.
    fn deduplicate(self) -> Self;

    /// exclude removes the values whose timestamps fall within [min, max].
    fn exclude(self, min: i64, max: i64) -> Self;

    /// include keeps only the values whose timestamps fall within [min, max].
    fn include(self, min: i64, max: i64) -> Self;

    /// merge combines two sorted slices. When both contain a timestamp the value from `b` wins.
    fn merge(self, b: Self) -> Self;
}

impl<T> TValues for Vec<Value<T>>
where
    T: FieldType,
{
    fn min_time(&self) -> i64 {
        self.first().map(|v| v.unix_nano).unwrap_or_default()
    }

    fn max_time(&self) -> i64 {
        self.last().map(|v| v.unix_nano).unwrap_or_default()
    }

    fn size(&self) -> usize {
        self.iter().map(|x| x.value.encode_size()).sum()
    }

    fn ordered(&self) -> bool {
        self.windows(2).all(|w| w[0].unix_nano < w[1].unix_nano)
    }

    fn deduplicate(mut self) -> Self {
        if self.len() <= 1 || self.ordered() {
            return self;
        }

        // stable, so later writes stay after earlier ones with the same timestamp
        self.sort_by_key(|x| x.unix_nano);

        let mut i = 0;
        for j in 1..self.len() {
            if self[j].unix_nano != self[i].unix_nano {
                i += 1;
            }
            self.swap(i, j);
        }

        self.truncate(i + 1);
        self
    }

    fn exclude(mut self, min: i64, max: i64) -> Self {
        if self.is_empty() || min > max {
            return self;
        }

        let lo = self.partition_point(|v| v.unix_nano < min);
        let hi = self.partition_point(|v| v.unix_nano <= max);
        if lo < hi {
            self.drain(lo..hi);
        }
        self
    }

    fn include(mut self, min: i64, max: i64) -> Self {
        if min > max {
            self.clear();
            return self;
        }

        let lo = self.partition_point(|v| v.unix_nano < min);
        let hi = self.partition_point(|v| v.unix_nano <= max);
        self.truncate(hi);
        self.drain(..lo.min(hi));
        self
    }

    fn merge(self, b: Self) -> Self {
        if self.is_empty() {
            return b;
        }
        if b.is_empty() {
            return self;
        }

        // Stored blocks should not contain duplicates, but a cache entry may.
        let mut a = self.deduplicate();
        let mut b = b.deduplicate();

        if a.max_time() < b.min_time() {
            a.extend(b);
            return a;
        }

        if b.max_time() < a.min_time() {
            b.extend(a);
            return b;
        }

        let mut out = Vec::with_capacity(a.len() + b.len());
        let mut a = a.into_iter().peekable();
        let mut b = b.into_iter().peekable();

        loop {
            let next = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => {
                    if x.unix_nano < y.unix_nano {
                        a.next()
                    } else {
                        if x.unix_nano == y.unix_nano {
                            a.next();
                        }
                        b.next()
                    }
                }
                (Some(_), None) => a.next(),
                (None, Some(_)) => b.next(),
                (None, None) => break,
            };
            out.extend(next);
        }

        out
    }
}

/// Values describes the various types of block data that can be held within a TSM file.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Float(Vec<Value<f64>>),
    Integer(Vec<Value<i64>>),
    Bool(Vec<Value<bool>>),
    Str(Vec<Value<Vec<u8>>>),
    Unsigned(Vec<Value<u64>>),
}

macro_rules! each_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            Values::Float($v) => $body,
            Values::Integer($v) => $body,
            Values::Bool($v) => $body,
            Values::Str($v) => $body,
            Values::Unsigned($v) => $body,
        }
    };
}

macro_rules! map_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            Values::Float($v) => Values::Float($body),
            Values::Integer($v) => Values::Integer($body),
            Values::Bool($v) => Values::Bool($body),
            Values::Str($v) => Values::Str($body),
            Values::Unsigned($v) => Values::Unsigned($body),
        }
    };
}

impl<T> From<Vec<Value<T>>> for Values
where
    T: FieldType,
{
    fn from(values: Vec<Value<T>>) -> Self {
        T::into_values(values)
    }
}

impl Values {
    /// with_block_type returns an empty value slice for the block type, None for an unknown type.
    pub fn with_block_type(typ: u8) -> Option<Self> {
        match typ {
            BLOCK_FLOAT64 => Some(Self::Float(vec![])),
            BLOCK_INTEGER => Some(Self::Integer(vec![])),
            BLOCK_BOOLEAN => Some(Self::Bool(vec![])),
            BLOCK_STRING => Some(Self::Str(vec![])),
            BLOCK_UNSIGNED => Some(Self::Unsigned(vec![])),
            _ => None,
        }
    }

    pub fn block_type(&self) -> u8 {
        match self {
            Self::Float(_) => BLOCK_FLOAT64,
            Self::Integer(_) => BLOCK_INTEGER,
            Self::Bool(_) => BLOCK_BOOLEAN,
            Self::Str(_) => BLOCK_STRING,
            Self::Unsigned(_) => BLOCK_UNSIGNED,
        }
    }

    pub fn type_name(&self) -> &'static str {
        block_type_name(self.block_type())
    }

    pub fn len(&self) -> usize {
        each_values!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn min_time(&self) -> i64 {
        each_values!(self, v => v.min_time())
    }

    pub fn max_time(&self) -> i64 {
        each_values!(self, v => v.max_time())
    }

    pub fn size(&self) -> usize {
        each_values!(self, v => v.size())
    }

    pub fn ordered(&self) -> bool {
        each_values!(self, v => v.ordered())
    }

    pub fn timestamps(&self) -> Vec<i64> {
        each_values!(self, v => v.iter().map(|x| x.unix_nano).collect())
    }

    /// format_points renders every point as `(timestamp, value)` for diagnostics.
    pub fn format_points(&self) -> Vec<(i64, String)> {
        each_values!(self, v => v.iter().map(|x| (x.unix_nano, x.value.format())).collect())
    }

    pub fn deduplicate(self) -> Self {
        map_values!(self, v => v.deduplicate())
    }

    pub fn exclude(self, min: i64, max: i64) -> Self {
        map_values!(self, v => v.exclude(min, max))
    }

    pub fn include(self, min: i64, max: i64) -> Self {
        map_values!(self, v => v.include(min, max))
    }

    /// merge combines two value slices of the same type, `b` wins on equal timestamps.
    pub fn merge(self, b: Self) -> Result<Self> {
        match (self, b) {
            (Self::Float(a), Self::Float(b)) => Ok(Self::Float(a.merge(b))),
            (Self::Integer(a), Self::Integer(b)) => Ok(Self::Integer(a.merge(b))),
            (Self::Bool(a), Self::Bool(b)) => Ok(Self::Bool(a.merge(b))),
            (Self::Str(a), Self::Str(b)) => Ok(Self::Str(a.merge(b))),
            (Self::Unsigned(a), Self::Unsigned(b)) => Ok(Self::Unsigned(a.merge(b))),
            (a, b) => Err(Error::FieldTypeConflict {
                expected: a.block_type(),
                actual: b.block_type(),
            }),
        }
    }

    /// append adds the values of `b` after the existing ones without sorting.
    pub fn append(&mut self, b: Self) -> Result<()> {
        match (self, b) {
            (Self::Float(a), Self::Float(b)) => a.extend(b),
            (Self::Integer(a), Self::Integer(b)) => a.extend(b),
            (Self::Bool(a), Self::Bool(b)) => a.extend(b),
            (Self::Str(a), Self::Str(b)) => a.extend(b),
            (Self::Unsigned(a), Self::Unsigned(b)) => a.extend(b),
            (a, b) => {
                return Err(Error::FieldTypeConflict {
                    expected: a.block_type(),
                    actual: b.block_type(),
                })
            }
        }
        Ok(())
    }

    /// chunks splits the values into runs of at most `size` points, one per block.
    pub fn chunks(self, size: usize) -> Vec<Values> {
        let size = size.max(1);
        each_values!(self, v => {
            let mut out = Vec::with_capacity(v.len() / size + 1);
            let mut v = v;
            while v.len() > size {
                let rest = v.split_off(size);
                out.push(Values::from(v));
                v = rest;
            }
            if !v.is_empty() {
                out.push(Values::from(v));
            }
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(points: &[(i64, f64)]) -> Vec<Value<f64>> {
        points.iter().map(|(t, v)| Value::new(*t, *v)).collect()
    }

    #[test]
    fn test_deduplicate_last_wins() {
        let v = floats(&[(3, 3.0), (1, 1.0), (3, 30.0), (2, 2.0), (1, 10.0)]);
        assert_eq!(v.deduplicate(), floats(&[(1, 10.0), (2, 2.0), (3, 30.0)]));
    }

    #[test]
    fn test_exclude() {
        let v = floats(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0), (5, 5.0)]);
        assert_eq!(v.clone().exclude(2, 3), floats(&[(1, 1.0), (4, 4.0), (5, 5.0)]));
        assert_eq!(v.clone().exclude(0, 1), floats(&[(2, 2.0), (3, 3.0), (4, 4.0), (5, 5.0)]));
        assert_eq!(v.clone().exclude(5, 9), floats(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]));
        assert_eq!(v.clone().exclude(6, 9), v);
        assert_eq!(v.clone().exclude(3, 2), v);
        assert!(v.exclude(i64::MIN, i64::MAX).is_empty());
    }

    #[test]
    fn test_include() {
        let v = floats(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]);
        assert_eq!(v.clone().include(2, 3), floats(&[(2, 2.0), (3, 3.0)]));
        assert_eq!(v.clone().include(0, 1), floats(&[(1, 1.0)]));
        assert!(v.clone().include(5, 9).is_empty());
        assert!(v.include(3, 2).is_empty());
    }

    #[test]
    fn test_merge_b_wins() {
        let a = floats(&[(1, 1.0), (3, 3.0), (5, 5.0)]);
        let b = floats(&[(2, 20.0), (3, 30.0), (6, 60.0)]);
        assert_eq!(
            a.merge(b),
            floats(&[(1, 1.0), (2, 20.0), (3, 30.0), (5, 5.0), (6, 60.0)])
        );

        let a = floats(&[(5, 5.0)]);
        let b = floats(&[(1, 1.0)]);
        assert_eq!(a.merge(b), floats(&[(1, 1.0), (5, 5.0)]));
    }

    #[test]
    fn test_values_merge_type_conflict() {
        let a = Values::Float(floats(&[(1, 1.0)]));
        let b = Values::Integer(vec![Value::new(1, 1)]);
        assert!(matches!(
            a.merge(b),
            Err(Error::FieldTypeConflict {
                expected: BLOCK_FLOAT64,
                actual: BLOCK_INTEGER
            })
        ));
    }

    #[test]
    fn test_values_chunks() {
        let v = Values::Integer((0..25).map(|i| Value::new(i, i)).collect());
        let chunks = v.chunks(10);
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert_eq!(chunks[2].min_time(), 20);
        assert_eq!(chunks[2].max_time(), 24);
    }

    #[test]
    fn test_values_append_and_type() {
        let mut v = Values::with_block_type(BLOCK_STRING).unwrap();
        v.append(Values::Str(vec![Value::new(1, b"a".to_vec())])).unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v.type_name(), "string");
        assert!(v.append(Values::Bool(vec![])).is_err());
        assert!(Values::with_block_type(9).is_none());
    }
}
