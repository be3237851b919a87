//! Float compression as presented in the Gorilla paper: http://www.vldb.org/pvldb/vol8/p1816-teller.pdf
//!
//! The first value is stored verbatim, each following value as the XOR with its predecessor. The
//! stream carries no end marker: the decoder is told how many values to read (the block's timestamp
//! count), so every bit pattern, NaN payloads included, round-trips exactly.

use crate::engine::tsm1::codec::bit::Bit::{One, Zero};
use crate::engine::tsm1::codec::bit::{BufferedReader, BufferedWriter, Read, Write};
use crate::engine::tsm1::codec::{Decoder, Encoder};

/// FLOAT_COMPRESSED_GORILLA is a compressed format using the gorilla paper encoding
const FLOAT_COMPRESSED_GORILLA: u8 = 1;

/// FloatEncoder encodes multiple float64s into a byte slice.
pub struct FloatEncoder {
    val: u64,
    // leading and trailing zero counts of the current meaningful bits window
    window: Option<(u32, u32)>,

    bw: BufferedWriter,

    first: bool,
}

impl FloatEncoder {
    pub fn new(sz: usize) -> Self {
        Self {
            val: 0,
            window: None,
            bw: BufferedWriter::with_capacity(1 + sz * 2),
            first: true,
        }
    }
}

impl Encoder<f64> for FloatEncoder {
    fn write(&mut self, v: f64) {
        let v = v.to_bits();

        if self.first {
            self.first = false;
            self.val = v;
            self.bw.write_byte(FLOAT_COMPRESSED_GORILLA << 4);
            self.bw.write_bits(v, 64);
            return;
        }

        let v_delta = v ^ self.val;
        self.val = v;

        if v_delta == 0 {
            self.bw.write_bit(Zero);
            return;
        }
        self.bw.write_bit(One);

        // Clamp number of leading zeros to fit in 5 bits
        let leading = v_delta.leading_zeros().min(31);
        let trailing = v_delta.trailing_zeros();

        match self.window {
            Some((l, t)) if leading >= l && trailing >= t => {
                self.bw.write_bit(Zero);
                self.bw.write_bits(v_delta >> t, 64 - l - t);
            }
            _ => {
                self.window = Some((leading, trailing));

                self.bw.write_bit(One);
                self.bw.write_bits(leading as u64, 5);

                // sigbits is never 0 since v_delta != 0. 64 doesn't fit in 6 bits,
                // so it is written as 0 and restored on decode.
                let sigbits = 64 - leading - trailing;
                self.bw.write_bits((sigbits & 0x3F) as u64, 6);
                self.bw.write_bits(v_delta >> trailing, sigbits);
            }
        }
    }

    fn flush(&mut self) {}

    fn bytes(&mut self) -> anyhow::Result<Vec<u8>> {
        let bw = std::mem::take(&mut self.bw);
        Ok(bw.close())
    }
}

/// FloatDecoder decodes a byte slice into a known number of float64 values.
pub struct FloatDecoder<'a> {
    val: u64,
    window: Option<(u32, u32)>,

    br: BufferedReader<'a>,

    remaining: usize,
    first: bool,

    err: Option<anyhow::Error>,
}

impl<'a> FloatDecoder<'a> {
    pub fn new(b: &'a [u8], count: usize) -> anyhow::Result<Self> {
        if count > 0 {
            if b.is_empty() {
                return Err(anyhow!("FloatDecoder: no data found"));
            }
            if b[0] >> 4 != FLOAT_COMPRESSED_GORILLA {
                return Err(anyhow!("FloatDecoder: unknown encoding {}", b[0] >> 4));
            }
        }

        let b = if b.is_empty() { b } else { &b[1..] };

        Ok(Self {
            val: 0,
            window: None,
            br: BufferedReader::new(b),
            remaining: count,
            first: true,
            err: None,
        })
    }

    fn read_next(&mut self) -> anyhow::Result<()> {
        if self.first {
            self.first = false;
            self.val = self.br.read_bits(64)?;
            return Ok(());
        }

        if self.br.read_bit()? == Zero {
            // same value as before
            return Ok(());
        }

        let (leading, trailing) = if self.br.read_bit()? == Zero {
            self.window
                .ok_or_else(|| anyhow!("FloatDecoder: reuse of undefined bits window"))?
        } else {
            let leading = self.br.read_bits(5)? as u32;
            let mut sigbits = self.br.read_bits(6)? as u32;
            if sigbits == 0 {
                sigbits = 64;
            }
            if leading + sigbits > 64 {
                return Err(anyhow!(
                    "FloatDecoder: invalid bits window {} + {}",
                    leading,
                    sigbits
                ));
            }
            let window = (leading, 64 - leading - sigbits);
            self.window = Some(window);
            window
        };

        let bits = self.br.read_bits(64 - leading - trailing)?;
        self.val ^= bits << trailing;

        Ok(())
    }
}

impl<'a> Decoder<f64> for FloatDecoder<'a> {
    fn next(&mut self) -> bool {
        if self.err.is_some() || self.remaining == 0 {
            return false;
        }

        match self.read_next() {
            Ok(()) => {
                self.remaining -= 1;
                true
            }
            Err(e) => {
                self.err = Some(e);
                false
            }
        }
    }

    fn read(&self) -> f64 {
        f64::from_bits(self.val)
    }

    fn err(&self) -> Option<&anyhow::Error> {
        self.err.as_ref()
    }
}
