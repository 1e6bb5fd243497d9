//! A forward-only byte cursor over a single event body, grounded on the
//! `LogBuffer` cursor type the teacher repo's decoder built all event
//! parsing on (`log/log_buffer.rs`). Trimmed to the subset this converter
//! needs: little-endian fixed-width reads, MySQL's packed length-encoded
//! integers/strings, and null/columns-present bitmaps.

use bit_set::BitSet;

use crate::error::ConverterError;

pub struct LogBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> LogBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        LogBuffer { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn need(&self, n: usize) -> Result<(), ConverterError> {
        if self.remaining() < n {
            Err(ConverterError::Truncated(format!(
                "need {n} bytes, {} remain",
                self.remaining()
            )))
        } else {
            Ok(())
        }
    }

    pub fn forward(&mut self, n: usize) -> Result<(), ConverterError> {
        self.need(n)?;
        self.pos += n;
        Ok(())
    }

    pub fn peek_bytes(&self, n: usize) -> Result<&'a [u8], ConverterError> {
        self.need(n)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ConverterError> {
        let bytes = self.peek_bytes(n)?;
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, ConverterError> {
        self.need(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, ConverterError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_u24_le(&mut self) -> Result<u32, ConverterError> {
        let b = self.read_bytes(3)?;
        Ok(u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[2]) << 16)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, ConverterError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_u48_le(&mut self) -> Result<u64, ConverterError> {
        let b = self.read_bytes(6)?;
        let mut buf = [0u8; 8];
        buf[..6].copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, ConverterError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_i8(&mut self) -> Result<i8, ConverterError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16_le(&mut self) -> Result<i16, ConverterError> {
        Ok(self.read_u16_le()? as i16)
    }

    pub fn read_i32_le(&mut self) -> Result<i32, ConverterError> {
        Ok(self.read_u32_le()? as i32)
    }

    pub fn read_i64_le(&mut self) -> Result<i64, ConverterError> {
        Ok(self.read_u64_le()? as i64)
    }

    /// MySQL "packed integer" length-encoding used in `TABLE_MAP_EVENT`'s
    /// column count and a few other spots: a single byte < 251 is the
    /// value itself; 0xfc/0xfd/0xfe introduce a 2/3/8-byte little-endian
    /// value.
    pub fn read_packed_integer(&mut self) -> Result<u64, ConverterError> {
        let first = self.read_u8()?;
        match first {
            0..=0xfb => Ok(first as u64),
            0xfc => Ok(self.read_u16_le()? as u64),
            0xfd => Ok(self.read_u24_le()? as u64),
            0xfe => self.read_u64_le(),
            0xff => Err(ConverterError::Protocol(
                "packed integer 0xff is an error sentinel".into(),
            )),
        }
    }

    /// Reads a null-bitmap / columns-present bitmap of `num_columns` bits,
    /// packed LSB-first into `ceil(num_columns / 8)` bytes, the same
    /// `bit_set::BitSet` representation the teacher uses for these bitmaps.
    pub fn read_bitmap(&mut self, num_columns: usize) -> Result<BitSet, ConverterError> {
        let byte_len = (num_columns + 7) / 8;
        let bytes = self.read_bytes(byte_len)?;
        let mut bits = BitSet::with_capacity(num_columns);
        for i in 0..num_columns {
            let byte = bytes[i / 8];
            if byte & (1 << (i % 8)) != 0 {
                bits.insert(i);
            }
        }
        Ok(bits)
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fixed_width_little_endian() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut buf = LogBuffer::new(&data);
        assert_eq!(buf.read_u8().unwrap(), 0x01);
        assert_eq!(buf.read_u16_le().unwrap(), 0x0302);
        assert_eq!(buf.read_u24_le().unwrap(), 0x060504);
        assert_eq!(buf.read_u8().unwrap(), 0x07);
        assert_eq!(buf.remaining(), 1);
    }

    #[test]
    fn packed_integer_small_value() {
        let data = [5u8];
        let mut buf = LogBuffer::new(&data);
        assert_eq!(buf.read_packed_integer().unwrap(), 5);
    }

    #[test]
    fn packed_integer_two_byte_prefix() {
        let data = [0xfc, 0x34, 0x12];
        let mut buf = LogBuffer::new(&data);
        assert_eq!(buf.read_packed_integer().unwrap(), 0x1234);
    }

    #[test]
    fn bitmap_reads_lsb_first() {
        // bits for 10 columns: byte0=0b0000_0101 (cols 0,2 set), byte1=0b0000_0001 (col 8 set)
        let data = [0b0000_0101u8, 0b0000_0001];
        let mut buf = LogBuffer::new(&data);
        let bits = buf.read_bitmap(10).unwrap();
        assert!(bits.contains(0));
        assert!(!bits.contains(1));
        assert!(bits.contains(2));
        assert!(bits.contains(8));
        assert!(!bits.contains(9));
    }

    #[test]
    fn forward_past_end_errors() {
        let data = [1u8, 2, 3];
        let mut buf = LogBuffer::new(&data);
        assert!(buf.forward(10).is_err());
    }
}
