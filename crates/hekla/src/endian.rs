//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

// Byte-order handling. A pattern's endianness is resolved once at creation;
// all raw-byte swaps happen here at read time.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order of a pattern or of a whole evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// The byte order of the machine running the evaluator.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

impl std::fmt::Display for Endian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endian::Big => f.write_str("big"),
            Endian::Little => f.write_str("little"),
        }
    }
}

/// Decode `buf` (1..=16 bytes) as an unsigned integer.
pub fn read_unsigned(buf: &[u8], endian: Endian) -> u128 {
    match endian {
        Endian::Big => BigEndian::read_uint128(buf, buf.len()),
        Endian::Little => LittleEndian::read_uint128(buf, buf.len()),
    }
}

/// Decode `buf` (1..=16 bytes) as a sign-extended integer.
pub fn read_signed(buf: &[u8], endian: Endian) -> i128 {
    match endian {
        Endian::Big => BigEndian::read_int128(buf, buf.len()),
        Endian::Little => LittleEndian::read_int128(buf, buf.len()),
    }
}

/// Decode `buf` (4 or 8 bytes) as a floating point number, widened to f64.
pub fn read_float(buf: &[u8], endian: Endian) -> f64 {
    match (buf.len(), endian) {
        (4, Endian::Big) => BigEndian::read_f32(buf) as f64,
        (4, Endian::Little) => LittleEndian::read_f32(buf) as f64,
        (_, Endian::Big) => BigEndian::read_f64(buf),
        (_, Endian::Little) => LittleEndian::read_f64(buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_round_width() {
        assert_eq!(read_unsigned(&[0x01, 0x02, 0x03, 0x04], Endian::Little), 0x0403_0201);
        assert_eq!(read_unsigned(&[0x01, 0x02, 0x03, 0x04], Endian::Big), 0x0102_0304);
        assert_eq!(read_unsigned(&[0xFF], Endian::Big), 0xFF);
    }

    #[test]
    fn signed_extends() {
        assert_eq!(read_signed(&[0xFF], Endian::Little), -1);
        assert_eq!(read_signed(&[0xFE, 0xFF], Endian::Little), -2);
        assert_eq!(read_signed(&[0x7F], Endian::Little), 127);
    }

    #[test]
    fn odd_widths() {
        // 3-byte unsigned, as produced by a bitfield window.
        assert_eq!(read_unsigned(&[0x01, 0x02, 0x03], Endian::Little), 0x03_0201);
        assert_eq!(read_unsigned(&[0x01, 0x02, 0x03], Endian::Big), 0x01_0203);
    }

    #[test]
    fn floats() {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, 1.5);
        assert_eq!(read_float(&buf, Endian::Little), 1.5);
        let mut buf = [0u8; 8];
        BigEndian::write_f64(&mut buf, -2.25);
        assert_eq!(read_float(&buf, Endian::Big), -2.25);
    }
}
