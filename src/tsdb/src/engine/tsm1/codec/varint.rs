//! Unsigned LEB128 variable-length integers, as used by protobuf and Go's `binary.Uvarint`.

/// MAX_VARINT_LEN64 is the maximum length of a varint-encoded 64-bit integer.
pub const MAX_VARINT_LEN64: usize = 10;

pub trait VarInt: Sized + Copy {
    /// required_space returns how many bytes are needed to encode this value.
    fn required_space(self) -> usize;

    /// encode_var writes the value into `dst`, which must be at least `required_space` long,
    /// and returns the number of bytes written.
    fn encode_var(self, dst: &mut [u8]) -> usize;

    /// decode_var reads a value from the start of `src` and returns it with the number of
    /// bytes consumed, or None if `src` is truncated or the value overflows.
    fn decode_var(src: &[u8]) -> Option<(Self, usize)>;

    fn encode_var_vec(self, dst: &mut Vec<u8>) -> usize {
        let mut buf = [0u8; MAX_VARINT_LEN64];
        let n = self.encode_var(&mut buf);
        dst.extend_from_slice(&buf[..n]);
        n
    }
}

impl VarInt for u64 {
    fn required_space(self) -> usize {
        let mut v = self;
        let mut n = 1;
        while v >= 0x80 {
            v >>= 7;
            n += 1;
        }
        n
    }

    fn encode_var(self, dst: &mut [u8]) -> usize {
        let mut v = self;
        let mut i = 0;
        while v >= 0x80 {
            dst[i] = (v as u8) | 0x80;
            v >>= 7;
            i += 1;
        }
        dst[i] = v as u8;
        i + 1
    }

    fn decode_var(src: &[u8]) -> Option<(Self, usize)> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for (i, &b) in src.iter().enumerate() {
            if i == MAX_VARINT_LEN64 {
                return None;
            }
            // the tenth byte may only carry the top bit of a u64
            if i == MAX_VARINT_LEN64 - 1 && b > 1 {
                return None;
            }

            result |= ((b & 0x7F) as u64) << shift;
            if b < 0x80 {
                return Some((result, i + 1));
            }
            shift += 7;
        }
        None
    }
}

impl VarInt for usize {
    fn required_space(self) -> usize {
        (self as u64).required_space()
    }

    fn encode_var(self, dst: &mut [u8]) -> usize {
        (self as u64).encode_var(dst)
    }

    fn decode_var(src: &[u8]) -> Option<(Self, usize)> {
        let (v, n) = u64::decode_var(src)?;
        usize::try_from(v).ok().map(|v| (v, n))
    }
}
