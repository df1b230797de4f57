//! Wire encoding primitives: little-endian integers, compact sizes and a
//! bounds-checked reader
//!
//! Every decoder in the crate reads through [`ByteReader`], so a short or
//! lying payload surfaces as `MalformedMessage` instead of a panic.

use crate::error::{Result, WalletError};
use crate::types::Hash;

/// Encode a number as a Bitcoin compact size (var-int)
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffffffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}

/// Append a var-int length followed by the bytes
pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&encode_varint(bytes.len() as u64));
    out.extend_from_slice(bytes);
}

/// Append a var-int length followed by UTF-8 bytes (a single zero for "")
pub fn write_var_str(out: &mut Vec<u8>, s: &str) {
    write_var_bytes(out, s.as_bytes());
}

/// Cursor over a payload that refuses to read past the end
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(WalletError::MalformedMessage(format!(
                "need {} bytes at offset {}, only {} remain",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Everything not yet consumed
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_hash(&mut self) -> Result<Hash> {
        self.read_array()
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        match self.read_u8()? {
            0xff => self.read_u64(),
            0xfe => Ok(self.read_u32()? as u64),
            0xfd => Ok(self.read_u16_le()? as u64),
            n => Ok(n as u64),
        }
    }

    /// Read a var-int count, rejecting counts that cannot fit in what is left
    /// given a minimum encoded size per item.
    pub fn read_count(&mut self, min_item_size: usize) -> Result<usize> {
        let count = self.read_varint()?;
        let max = (self.remaining() / min_item_size.max(1)) as u64;
        if count > max {
            return Err(WalletError::MalformedMessage(format!(
                "count {} exceeds the {} bytes remaining",
                count,
                self.remaining()
            )));
        }
        Ok(count as usize)
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_count(1)?;
        self.read_bytes(len)
    }

    pub fn read_var_str(&mut self) -> Result<String> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| WalletError::MalformedMessage(format!("invalid UTF-8 string: {}", e)))
    }

    /// Fail if anything is left over
    pub fn finish(&self, what: &str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(WalletError::MalformedMessage(format!(
                "{} trailing bytes after {}",
                self.remaining(),
                what
            )))
        }
    }
}
