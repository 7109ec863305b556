//! PE section names and their dictionary compaction
//!
//! Section names are 8 bytes, NUL-padded, exactly as they appear in a PE
//! section header. Three names cover almost every patch, so the wire format
//! compresses them: a dictionary hit is written as a zero byte followed by
//! the dictionary index (2 bytes instead of 8). Any other name passes
//! through literally. Since a leading zero byte is the compact-form marker,
//! a custom name starting with NUL cannot be represented and is rejected at
//! construction.

use std::fmt;
use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{Error, Result};

/// Length of a raw PE section name
pub const SECTION_NAME_LEN: usize = 8;

/// An 8-byte NUL-padded PE section name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionName([u8; SECTION_NAME_LEN]);

/// Dictionary of well-known section names, in wire index order
const DICTIONARY: [[u8; SECTION_NAME_LEN]; 3] = [
    [0, 0, 0, 0, 0, 0, 0, 0],
    [b'.', b't', b'e', b'x', b't', 0, 0, 0],
    [b'.', b'r', b'd', b'a', b't', b'a', 0, 0],
];

impl SectionName {
    /// The blank section (no section restriction)
    pub const BLANK: SectionName = SectionName(DICTIONARY[0]);
    /// The `.text` code section
    pub const TEXT: SectionName = SectionName(DICTIONARY[1]);
    /// The `.rdata` read-only data section
    pub const RDATA: SectionName = SectionName(DICTIONARY[2]);

    /// Create a section name from its raw 8 bytes
    ///
    /// Fails if the name starts with a NUL byte but is not the blank
    /// entry, since such a name would be indistinguishable from the
    /// dictionary compact form on the wire.
    pub fn new(raw: [u8; SECTION_NAME_LEN]) -> Result<Self> {
        if raw[0] == 0 && raw != DICTIONARY[0] {
            return Err(Error::invalid_patch(
                "section name starts with a NUL byte but is not blank",
            ));
        }
        Ok(SectionName(raw))
    }

    /// Parse a section name from document text (e.g. `.text`)
    ///
    /// An empty string is the blank section. Names longer than 8 bytes or
    /// containing non-ASCII characters are rejected.
    pub fn parse(text: &str) -> Result<Self> {
        if text.len() > SECTION_NAME_LEN {
            return Err(Error::invalid_patch(format!(
                "section name {text:?} is longer than {SECTION_NAME_LEN} bytes"
            )));
        }
        if !text.is_ascii() {
            return Err(Error::invalid_patch(format!(
                "section name {text:?} is not ASCII"
            )));
        }
        let mut raw = [0u8; SECTION_NAME_LEN];
        raw[..text.len()].copy_from_slice(text.as_bytes());
        SectionName::new(raw)
    }

    /// The raw 8-byte name
    pub fn as_bytes(&self) -> &[u8; SECTION_NAME_LEN] {
        &self.0
    }

    /// Write the name in its wire form (2-byte compact or 8-byte raw)
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for (index, entry) in DICTIONARY.iter().enumerate() {
            if self.0 == *entry {
                writer.write_all(&[0, index as u8])?;
                return Ok(());
            }
        }
        writer.write_all(&self.0)?;
        Ok(())
    }

    /// Read a name from its wire form
    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let first = reader.read_u8()?;
        if first == 0 {
            let index = usize::from(reader.read_u8()?);
            let entry = DICTIONARY.get(index).ok_or_else(|| {
                Error::invalid_format(format!("section dictionary index {index} out of range"))
            })?;
            return Ok(SectionName(*entry));
        }
        let mut raw = [0u8; SECTION_NAME_LEN];
        raw[0] = first;
        reader.read_exact(&mut raw[1..])?;
        Ok(SectionName(raw))
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        for &b in &self.0[..end] {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_known_names() {
        assert_eq!(SectionName::parse("").unwrap(), SectionName::BLANK);
        assert_eq!(SectionName::parse(".text").unwrap(), SectionName::TEXT);
        assert_eq!(SectionName::parse(".rdata").unwrap(), SectionName::RDATA);
    }

    #[test]
    fn test_dictionary_names_compact_to_two_bytes() {
        let mut buf = Vec::new();
        SectionName::TEXT.write_to(&mut buf).unwrap();
        assert_eq!(buf, vec![0, 1]);

        let decoded = SectionName::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, SectionName::TEXT);
        assert_eq!(decoded.as_bytes(), b".text\0\0\0");
    }

    #[test]
    fn test_blank_round_trips_through_index_zero() {
        let mut buf = Vec::new();
        SectionName::BLANK.write_to(&mut buf).unwrap();
        assert_eq!(buf, vec![0, 0]);
        assert_eq!(
            SectionName::read_from(&mut Cursor::new(&buf)).unwrap(),
            SectionName::BLANK
        );
    }

    #[test]
    fn test_custom_name_passes_through_raw() {
        let name = SectionName::parse("customX").unwrap();
        let mut buf = Vec::new();
        name.write_to(&mut buf).unwrap();
        assert_eq!(buf, b"customX\0");
        assert_eq!(
            SectionName::read_from(&mut Cursor::new(&buf)).unwrap(),
            name
        );
    }

    #[test]
    fn test_leading_nul_custom_name_rejected() {
        let err = SectionName::new([0, b'x', 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::InvalidPatchDefinition(_)));
    }

    #[test]
    fn test_too_long_name_rejected() {
        assert!(SectionName::parse(".verylongname").is_err());
    }

    #[test]
    fn test_display_trims_padding() {
        assert_eq!(SectionName::TEXT.to_string(), ".text");
        assert_eq!(SectionName::BLANK.to_string(), "");
    }
}
