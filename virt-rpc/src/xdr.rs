//! XDR (RFC 4506) encoding for the subset of types libvirt's remote protocol uses
//!
//! Everything is big-endian and padded to 4-byte units.

use crate::error::VirtError;

/// Serializer into a growable buffer
#[derive(Debug, Default)]
pub struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Variable-length string: length, bytes, zero padding
    pub fn put_string(&mut self, s: &str) -> &mut Self {
        self.put_u32(s.len() as u32);
        self.put_fixed_opaque(s.as_bytes())
    }

    /// Optional string (XDR pointer: discriminant then value)
    pub fn put_opt_string(&mut self, s: Option<&str>) -> &mut Self {
        match s {
            Some(s) => self.put_u32(1).put_string(s),
            None => self.put_u32(0),
        }
    }

    /// Fixed-length opaque data, padded to a 4-byte boundary
    pub fn put_fixed_opaque(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        let pad = padding(data.len());
        self.buf.extend(std::iter::repeat(0u8).take(pad));
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Deserializer over a borrowed buffer
#[derive(Debug)]
pub struct XdrReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> XdrReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], VirtError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                VirtError::Decode(format!(
                    "need {} bytes at offset {}, have {}",
                    n,
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn get_u32(&mut self) -> Result<u32, VirtError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i32(&mut self) -> Result<i32, VirtError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_string(&mut self) -> Result<String, VirtError> {
        let len = self.get_u32()? as usize;
        let bytes = self.get_fixed_opaque(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| VirtError::Decode(format!("invalid UTF-8 string: {e}")))
    }

    pub fn get_opt_string(&mut self) -> Result<Option<String>, VirtError> {
        match self.get_u32()? {
            0 => Ok(None),
            1 => self.get_string().map(Some),
            d => Err(VirtError::Decode(format!("bad optional discriminant {d}"))),
        }
    }

    pub fn get_fixed_opaque(&mut self, len: usize) -> Result<&'a [u8], VirtError> {
        let bytes = self.take(len)?;
        self.take(padding(len))?;
        Ok(bytes)
    }
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}
