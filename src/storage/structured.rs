//! Structured file I/O for binary index data.
//!
//! Every segment stream file is written through [`StructWriter`] and read
//! back through [`StructReader`]: little-endian fixed-width integers,
//! varints, length-prefixed byte strings, and a trailing CRC32 over the
//! whole body that the reader verifies before trusting the payload.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, XystonError};
use crate::storage::traits::{StorageInput, StorageOutput};
use crate::util::varint::{decode_u64, encode_u64};

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.track(&[value]);
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write an i64 value (little-endian).
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.writer.write_i64::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = encode_u64(value);
        self.writer.write_all(&encoded)?;
        self.track(&encoded);
        Ok(())
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.writer.write_all(value)?;
        self.track(value);
        Ok(())
    }

    /// Write a delta-compressed, sorted u32 sequence.
    ///
    /// Callers must pass values in non-decreasing order; deltas are encoded
    /// as varints so dense runs stay close to one byte per value.
    pub fn write_delta_u32s(&mut self, values: &[u32]) -> Result<()> {
        self.write_varint(values.len() as u64)?;

        let mut previous = 0u32;
        for &value in values {
            let delta = value.wrapping_sub(previous);
            self.write_varint(delta as u64)?;
            previous = value;
        }

        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Update the running checksum and position.
    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Write the trailing checksum, then flush and close the writer.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.hasher.finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: crc32fast::Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        Ok(StructReader {
            reader,
            hasher: crc32fast::Hasher::new(),
            position: 0,
            file_size,
        })
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8()?;
        self.track(&[value]);
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    /// Read an i64 value (little-endian).
    pub fn read_i64(&mut self) -> Result<i64> {
        let value = self.reader.read_i64::<LittleEndian>()?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.reader.read_u8()?;
            bytes.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
        }

        let (value, _) = decode_u64(&bytes)?;
        self.track(&bytes);
        Ok(value)
    }

    /// Read a length-prefixed string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| XystonError::other(format!("Invalid UTF-8: {e}")))
    }

    /// Read length-prefixed raw bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint()? as usize;
        if self.position + len as u64 > self.file_size {
            return Err(XystonError::other(format!(
                "Byte length {len} exceeds remaining file size"
            )));
        }

        let mut buffer = vec![0u8; len];
        self.reader.read_exact(&mut buffer)?;
        self.track(&buffer);
        Ok(buffer)
    }

    /// Read a delta-compressed, sorted u32 sequence.
    pub fn read_delta_u32s(&mut self) -> Result<Vec<u32>> {
        let count = self.read_varint()? as usize;
        let mut values = Vec::with_capacity(count.min(1 << 20));

        let mut previous = 0u32;
        for _ in 0..count {
            let delta = self.read_varint()? as u32;
            previous = previous.wrapping_add(delta);
            values.push(previous);
        }

        Ok(values)
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get total file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of body bytes remaining before the trailing checksum.
    pub fn remaining_body(&self) -> u64 {
        self.file_size.saturating_sub(self.position + 4)
    }

    /// Update the running checksum and position.
    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Read the trailing checksum and compare it against the bytes consumed.
    ///
    /// Must be called once the whole body has been read; a mismatch means the
    /// file is corrupt or was decoded with the wrong layout.
    pub fn verify_checksum(&mut self, file: &str) -> Result<()> {
        let expected = std::mem::take(&mut self.hasher).finalize();
        let stored = self.reader.read_u32::<LittleEndian>()?;
        self.position += 4;

        if stored != expected {
            return Err(XystonError::format_mismatch(
                file,
                format!("checksum mismatch: stored {stored:#010x}, computed {expected:#010x}"),
            ));
        }

        Ok(())
    }
}
