// Canonical byte encoding for ledger data structures

use std::io::{self, Cursor, Read};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unexpected end of data: {0}")]
    Truncated(#[from] io::Error),

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    #[error("length {0} exceeds remaining data")]
    LengthOverflow(u64),
}

/// Types with a canonical, deterministic byte encoding.
/// `deserialize` must consume the whole input.
pub trait Serializable: Sized {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    fn write_to(&self, buf: &mut Vec<u8>);

    fn read_from(reader: &mut Cursor<&[u8]>) -> Result<Self, CodecError>;

    fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(data);
        let value = Self::read_from(&mut cursor)?;
        let consumed = cursor.position() as usize;
        if consumed != data.len() {
            return Err(CodecError::TrailingBytes(data.len() - consumed));
        }
        Ok(value)
    }
}

/// Write a variable-length integer (VarInt)
pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffffffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    match first_byte[0] {
        0..=0xfc => Ok(first_byte[0] as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            Ok(u32::from_le_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Read bytes with length prefix
pub fn read_var_bytes(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>, CodecError> {
    let len = read_length(reader)?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Read a VarInt length and check it against the bytes left in the cursor,
/// so corrupt lengths fail instead of allocating.
pub fn read_length(reader: &mut Cursor<&[u8]>) -> Result<usize, CodecError> {
    let len = read_varint(reader)?;
    let remaining = (reader.get_ref().len() as u64).saturating_sub(reader.position());
    if len > remaining {
        return Err(CodecError::LengthOverflow(len));
    }
    Ok(len as usize)
}

pub fn read_array<const N: usize>(reader: &mut Cursor<&[u8]>) -> Result<[u8; N], CodecError> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_small() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 100);
        assert_eq!(buf, vec![100]);

        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(read_varint(&mut cursor).unwrap(), 100);
    }

    #[test]
    fn test_varint_medium() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 1000);
        assert_eq!(buf.len(), 3); // 0xfd + 2 bytes

        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(read_varint(&mut cursor).unwrap(), 1000);
    }

    #[test]
    fn test_varint_large() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 100000);
        assert_eq!(buf.len(), 5); // 0xfe + 4 bytes

        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(read_varint(&mut cursor).unwrap(), 100000);
    }

    #[test]
    fn test_var_bytes() {
        let data = b"hello world";
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, data);

        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(read_var_bytes(&mut cursor).unwrap(), data);
    }

    #[test]
    fn test_var_bytes_length_overflow() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 1_000_000);
        buf.extend_from_slice(b"short");

        let mut cursor = Cursor::new(buf.as_slice());
        assert!(matches!(
            read_var_bytes(&mut cursor),
            Err(CodecError::LengthOverflow(1_000_000))
        ));
    }
}
