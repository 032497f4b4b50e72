use byteorder::{ByteOrder, LittleEndian};

use super::DecodeError;

/// Cursor over a borrowed module binary.
///
/// Every read is bounds checked; running off the end yields
/// [`DecodeError::UnexpectedEof`] carrying the offset where the read started.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader {
            bytes,
            pos: 0,
            base: 0,
        }
    }

    // Basic operations --------------------------------------------------------

    /// Absolute offset into the original binary, also for sub-readers.
    pub fn pos(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        match self.bytes.get(self.pos) {
            Some(byte) => {
                self.pos += 1;
                Ok(*byte)
            }
            None => Err(DecodeError::UnexpectedEof { offset: self.pos() }),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof { offset: self.pos() });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Split off the next `len` bytes as an independent reader, used for
    /// section and function bodies whose size is declared up front.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>, DecodeError> {
        let base = self.pos();
        let bytes = self.read_bytes(len)?;
        Ok(Reader { bytes, pos: 0, base })
    }

    // Fixed width, little endian ----------------------------------------------

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(LittleEndian::read_f32(self.read_bytes(4)?))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(LittleEndian::read_f64(self.read_bytes(8)?))
    }

    // LEB128 ------------------------------------------------------------------

    pub fn read_vu32(&mut self) -> Result<u32, DecodeError> {
        let start = self.pos();
        let mut result: u32 = 0;
        for i in 0..5 {
            let byte = self.read_byte()?;
            if i == 4 {
                // only the low 4 bits of the fifth byte carry value
                if byte & 0x80 != 0 {
                    return Err(DecodeError::IntegerTooLong { offset: start });
                }
                if byte & 0x70 != 0 {
                    return Err(DecodeError::IntegerTooLarge { offset: start });
                }
            }
            result |= ((byte & 0x7f) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(DecodeError::IntegerTooLong { offset: start })
    }

    pub fn read_vs32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_signed(32)? as i32)
    }

    pub fn read_vs64(&mut self) -> Result<i64, DecodeError> {
        self.read_signed(64)
    }

    /// Block types are encoded as a signed 33-bit integer when they refer to a
    /// type index.
    pub fn read_vs33(&mut self) -> Result<i64, DecodeError> {
        self.read_signed(33)
    }

    fn read_signed(&mut self, bits: u32) -> Result<i64, DecodeError> {
        let start = self.pos();
        let max_bytes = (bits + 6) / 7;
        let mut result: i64 = 0;
        let mut shift: u32 = 0;

        for i in 0..max_bytes {
            let byte = self.read_byte()?;
            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(DecodeError::IntegerTooLong { offset: start });
                }
                // unused high bits must be a sign extension of the last used bit
                let used = bits - shift;
                let high = (byte & 0x7f) >> (used - 1);
                if high != 0 && high != (0x7f >> (used - 1)) {
                    return Err(DecodeError::IntegerTooLarge { offset: start });
                }
            }
            result |= ((byte & 0x7f) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
        Err(DecodeError::IntegerTooLong { offset: start })
    }

    // Composite ---------------------------------------------------------------

    pub fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_vu32()? as usize;
        let offset = self.pos();
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    /// Read a vector length prefix and check it against `limit` before the
    /// caller allocates anything.
    pub fn read_count(&mut self, limit: u32, what: &'static str) -> Result<u32, DecodeError> {
        let count = self.read_vu32()?;
        if count > limit {
            return Err(DecodeError::TooMany {
                what,
                count,
                limit,
            });
        }
        Ok(count)
    }
}
