/// Bit
///
/// An enum used to represent a single bit, can be either `Zero` or `One`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Bit {
    Zero,
    One,
}

impl Bit {
    /// Convert a bit to u64, so `Zero` becomes 0 and `One` becomes 1.
    pub fn to_u64(self) -> u64 {
        match self {
            Bit::Zero => 0,
            Bit::One => 1,
        }
    }
}

/// Eof is returned when reading past the end of the stream.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("encountered the end of the bit stream")]
pub struct Eof;

/// Read
///
/// Read is a trait that encapsulates the functionality required to read from a stream of bits.
pub trait Read {
    /// Read a single bit from the underlying stream.
    fn read_bit(&mut self) -> Result<Bit, Eof>;

    /// Read a single byte from the underlying stream.
    fn read_byte(&mut self) -> Result<u8, Eof>;

    /// Read `num` bits from the underlying stream.
    fn read_bits(&mut self, num: u32) -> Result<u64, Eof>;
}

/// Write
///
/// Write is a trait that encapsulates the functionality required to write a stream of bits.
pub trait Write {
    /// Write a single bit to the underlying stream.
    fn write_bit(&mut self, bit: Bit);

    /// Write a single byte to the underlying stream.
    fn write_byte(&mut self, byte: u8);

    /// Write the bottom `num` bits of `bits` to the underlying stream.
    fn write_bits(&mut self, bits: u64, num: u32);

    /// Close the underlying stream and return the written bytes. A partially written
    /// last byte is padded with zero bits.
    fn close(self) -> Vec<u8>;
}

/// BufferedReader
///
/// BufferedReader reads bits MSB first from a borrowed byte slice.
#[derive(Debug)]
pub struct BufferedReader<'a> {
    bytes: &'a [u8], // internal buffer of bytes
    index: usize,    // index into bytes
    pos: u32,        // position in the byte we are currently reading
}

impl<'a> BufferedReader<'a> {
    /// new creates a new `BufferedReader` from `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        BufferedReader {
            bytes,
            index: 0,
            pos: 0,
        }
    }

    fn get_byte(&self) -> Result<u8, Eof> {
        self.bytes.get(self.index).copied().ok_or(Eof)
    }
}

impl<'a> Read for BufferedReader<'a> {
    fn read_bit(&mut self) -> Result<Bit, Eof> {
        if self.pos == 8 {
            self.index += 1;
            self.pos = 0;
        }

        let byte = self.get_byte()?;

        let bit = if byte & 1u8.wrapping_shl(7 - self.pos) == 0 {
            Bit::Zero
        } else {
            Bit::One
        };

        self.pos += 1;

        Ok(bit)
    }

    fn read_byte(&mut self) -> Result<u8, Eof> {
        if self.pos == 0 {
            let byte = self.get_byte()?;
            self.pos = 8;
            return Ok(byte);
        }

        if self.pos == 8 {
            let byte = self
                .bytes
                .get(self.index + 1)
                .copied()
                .ok_or(Eof)?;
            self.index += 1;
            return Ok(byte);
        }

        // the byte straddles two bytes of the buffer
        let hi = self.get_byte()?;
        let lo = self.bytes.get(self.index + 1).copied().ok_or(Eof)?;
        self.index += 1;

        Ok(hi.wrapping_shl(self.pos) | lo.wrapping_shr(8 - self.pos))
    }

    fn read_bits(&mut self, mut num: u32) -> Result<u64, Eof> {
        // can't read more than 64 bits into a u64
        if num > 64 {
            num = 64;
        }

        let mut bits: u64 = 0;
        while num >= 8 {
            let byte = self.read_byte().map(u64::from)?;
            bits = bits.wrapping_shl(8) | byte;
            num -= 8;
        }

        while num > 0 {
            let bit = self.read_bit()?;
            bits = bits.wrapping_shl(1) | bit.to_u64();
            num -= 1;
        }

        Ok(bits)
    }
}

/// BufferedWriter
///
/// BufferedWriter writes bits MSB first to a growable buffer.
#[derive(Debug)]
pub struct BufferedWriter {
    buf: Vec<u8>,
    pos: u32, // position in the last byte in the buffer
}

impl Default for BufferedWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedWriter {
    /// new creates a new BufferedWriter
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BufferedWriter {
            buf: Vec::with_capacity(capacity),
            // set pos to 8 to indicate the buffer has no space presently since it is empty
            pos: 8,
        }
    }

    fn grow(&mut self) {
        self.buf.push(0);
    }

    fn last_index(&self) -> usize {
        self.buf.len() - 1
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }
}

impl Write for BufferedWriter {
    fn write_bit(&mut self, bit: Bit) {
        if self.pos == 8 {
            self.grow();
            self.pos = 0;
        }

        let i = self.last_index();

        if bit == Bit::One {
            self.buf[i] |= 1u8.wrapping_shl(7 - self.pos);
        }

        self.pos += 1;
    }

    fn write_byte(&mut self, byte: u8) {
        if self.pos == 8 {
            self.buf.push(byte);
            return;
        }

        let i = self.last_index();
        self.buf[i] |= byte.wrapping_shr(self.pos);

        self.grow();
        self.buf[i + 1] |= byte.wrapping_shl(8 - self.pos);
    }

    fn write_bits(&mut self, mut bits: u64, mut num: u32) {
        // we should never write more than 64 bits for a u64
        if num > 64 {
            num = 64;
        }
        if num == 0 {
            return;
        }

        bits = bits.wrapping_shl(64 - num);
        while num >= 8 {
            let byte = bits.wrapping_shr(56);
            self.write_byte(byte as u8);

            bits = bits.wrapping_shl(8);
            num -= 8;
        }

        while num > 0 {
            let bit = if bits.wrapping_shr(63) == 1 {
                Bit::One
            } else {
                Bit::Zero
            };
            self.write_bit(bit);

            bits = bits.wrapping_shl(1);
            num -= 1;
        }
    }

    fn close(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_mixed() {
        let mut w = BufferedWriter::new();
        w.write_bit(Bit::One);
        w.write_bits(0b101, 3);
        w.write_byte(0xAB);
        w.write_bits(u64::MAX, 64);
        w.write_bits(0x1F, 5);
        let buf = w.close();

        let mut r = BufferedReader::new(&buf);
        assert_eq!(r.read_bit().unwrap(), Bit::One);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
        assert_eq!(r.read_byte().unwrap(), 0xAB);
        assert_eq!(r.read_bits(64).unwrap(), u64::MAX);
        assert_eq!(r.read_bits(5).unwrap(), 0x1F);
    }

    #[test]
    fn test_read_past_end() {
        let buf = [0b1000_0000u8];
        let mut r = BufferedReader::new(&buf);
        assert_eq!(r.read_bits(8).unwrap(), 0x80);
        assert_eq!(r.read_bit(), Err(Eof));
        assert_eq!(r.read_byte(), Err(Eof));

        let mut r = BufferedReader::new(&buf);
        r.read_bit().unwrap();
        assert_eq!(r.read_byte(), Err(Eof));
    }

    #[test]
    fn test_aligned_bytes() {
        let mut w = BufferedWriter::with_capacity(2);
        w.write_byte(1);
        w.write_byte(2);
        assert_eq!(w.as_slice(), &[1, 2]);

        let buf = w.close();
        let mut r = BufferedReader::new(&buf);
        assert_eq!(r.read_byte().unwrap(), 1);
        assert_eq!(r.read_byte().unwrap(), 2);
        assert_eq!(r.read_byte(), Err(Eof));
    }
}
