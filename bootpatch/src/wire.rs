//! Length-prefixed wire primitives shared by the serializer and the reader
//!
//! All multi-byte fields in a patch artifact are little-endian. Byte
//! buffers are written as a u16 length followed by the raw bytes; u16
//! arrays as a u16 count followed by the elements; symbol names as a byte
//! buffer holding the ASCII name plus one trailing NUL inside the length.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Narrow a collection length to the u16 the wire format requires
pub(crate) fn u16_len(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len)
        .map_err(|_| Error::invalid_format(format!("{what} has {len} elements, the limit is 65535")))
}

pub(crate) fn write_bytes<W: Write>(writer: &mut W, data: &[u8]) -> Result<()> {
    writer.write_u16::<LittleEndian>(u16_len(data.len(), "byte buffer")?)?;
    writer.write_all(data)?;
    Ok(())
}

pub(crate) fn write_u16s<W: Write>(writer: &mut W, values: &[u16]) -> Result<()> {
    writer.write_u16::<LittleEndian>(u16_len(values.len(), "position list")?)?;
    for &v in values {
        writer.write_u16::<LittleEndian>(v)?;
    }
    Ok(())
}

/// Write an ASCII symbol name, NUL-terminated inside its length prefix
pub(crate) fn write_name<W: Write>(writer: &mut W, name: &str) -> Result<()> {
    writer.write_u16::<LittleEndian>(u16_len(name.len() + 1, "symbol name")?)?;
    writer.write_all(name.as_bytes())?;
    writer.write_all(&[0])?;
    Ok(())
}

pub(crate) fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader.read_u16::<LittleEndian>()?;
    let mut data = vec![0u8; usize::from(len)];
    reader.read_exact(&mut data)?;
    Ok(data)
}

pub(crate) fn read_u16s<R: Read>(reader: &mut R) -> Result<Vec<u16>> {
    let count = reader.read_u16::<LittleEndian>()?;
    let mut values = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        values.push(reader.read_u16::<LittleEndian>()?);
    }
    Ok(values)
}

/// Read a symbol name, tolerating a missing trailing NUL
pub(crate) fn read_name<R: Read>(reader: &mut R) -> Result<String> {
    let mut data = read_bytes(reader)?;
    if data.last() == Some(&0) {
        data.pop();
    }
    if !data.is_ascii() {
        return Err(Error::invalid_format("symbol name is not ASCII"));
    }
    String::from_utf8(data).map_err(|_| Error::invalid_format("symbol name is not ASCII"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_bytes_round_trip() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, &[1, 2, 3]).unwrap();
        assert_eq!(buf, vec![3, 0, 1, 2, 3]);
        assert_eq!(read_bytes(&mut Cursor::new(&buf)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_u16s_round_trip() {
        let mut buf = Vec::new();
        write_u16s(&mut buf, &[0x1234, 4]).unwrap();
        assert_eq!(buf, vec![2, 0, 0x34, 0x12, 4, 0]);
        assert_eq!(
            read_u16s(&mut Cursor::new(&buf)).unwrap(),
            vec![0x1234, 4]
        );
    }

    #[test]
    fn test_name_includes_trailing_nul() {
        let mut buf = Vec::new();
        write_name(&mut buf, "memcpy").unwrap();
        // Length prefix counts the NUL
        assert_eq!(buf[0], 7);
        assert_eq!(buf[1], 0);
        assert_eq!(&buf[2..], b"memcpy\0");
        assert_eq!(read_name(&mut Cursor::new(&buf)).unwrap(), "memcpy");
    }

    #[test]
    fn test_truncated_buffer_fails() {
        let buf = vec![10, 0, 1, 2];
        assert!(read_bytes(&mut Cursor::new(&buf)).is_err());
    }
}
