//! Hex-with-markers byte pattern codec
//!
//! Patterns are authored as hex-digit pairs, optionally separated by
//! whitespace, with three marker kinds mixed in:
//!
//! - `??`: a wildcard byte (matches anything at that position)
//! - `[` ... `]`: a direct position, recording the bracketed field's
//!   *offset*; the bytes themselves are kept literally
//! - `{` ... `}`: a relocation position, same but the field must later be
//!   resolved to the address of an external symbol
//!
//! Parsing yields the literal byte sequence with every wildcard position
//! stamped with a concrete value that is guaranteed not to occur as a
//! literal byte anywhere else in the same pattern. The external applier
//! matches "all bytes equal, except positions holding the wildcard value",
//! so an ambiguous wildcard would let a legitimate literal byte be read as
//! "don't care".

use crate::error::{Error, Result};

/// A decoded byte pattern with its marker metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePattern {
    bytes: Vec<u8>,
    wildcard: u8,
    wildcard_count: usize,
    direct_positions: Vec<u16>,
    reloc_positions: Vec<u16>,
}

impl BytePattern {
    /// Parse a hex-with-markers pattern text
    ///
    /// # Examples
    ///
    /// ```
    /// use bootpatch::pattern::BytePattern;
    ///
    /// let p = BytePattern::parse("AA BB ?? [12345678] CC").unwrap();
    /// assert_eq!(p.bytes().len(), 8);
    /// assert_eq!(p.direct_positions(), &[3]);
    /// assert!(p.has_wildcards());
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        // Whitespace and closing brackets carry no information
        let mut clean = String::with_capacity(text.len());
        let mut direct = Vec::new();
        let mut reloc = Vec::new();

        for c in text.chars() {
            match c {
                c if c.is_ascii_whitespace() => {}
                ']' | '}' => {}
                '[' => direct.push(clean.len() / 2),
                '{' => reloc.push(clean.len() / 2),
                _ => clean.push(c),
            }
        }

        if !clean.is_ascii() {
            return Err(Error::MalformedHex(format!(
                "non-ASCII characters in pattern {text:?}"
            )));
        }
        if clean.len() % 2 != 0 {
            return Err(Error::MalformedHex(format!(
                "odd number of hex digits in pattern {text:?}"
            )));
        }
        let len = clean.len() / 2;
        if len > usize::from(u16::MAX) {
            return Err(Error::MalformedHex(format!(
                "pattern is {len} bytes long, the limit is 65535"
            )));
        }

        let mut bytes = vec![0u8; len];
        let mut wildcard_positions = Vec::new();
        let mut seen = [false; 256];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &clean[2 * i..2 * i + 2];
            if pair == "??" {
                wildcard_positions.push(i);
            } else if pair.contains('?') {
                return Err(Error::MalformedHex(format!(
                    "mixed wildcard pair {pair:?}: both nibbles must be '?'"
                )));
            } else {
                *byte = u8::from_str_radix(pair, 16).map_err(|_| {
                    Error::MalformedHex(format!("invalid hex pair {pair:?}"))
                })?;
                seen[usize::from(*byte)] = true;
            }
        }

        let wildcard = if wildcard_positions.is_empty() {
            // Never dereferenced by a consumer since no position is marked;
            // the first literal byte is the conventional filler
            bytes.first().copied().unwrap_or(0)
        } else {
            let value = seen
                .iter()
                .position(|used| !used)
                .ok_or(Error::NoAvailableWildcard)? as u8;
            log::trace!(
                "chose wildcard {value:#04X} for pattern with {} wildcard byte(s)",
                wildcard_positions.len()
            );
            for &pos in &wildcard_positions {
                bytes[pos] = value;
            }
            value
        };

        Ok(BytePattern {
            bytes,
            wildcard,
            wildcard_count: wildcard_positions.len(),
            direct_positions: direct.into_iter().map(|p| p as u16).collect(),
            reloc_positions: reloc.into_iter().map(|p| p as u16).collect(),
        })
    }

    /// The decoded bytes, with wildcard positions stamped
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the pattern, returning the decoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The chosen wildcard byte value
    pub fn wildcard(&self) -> u8 {
        self.wildcard
    }

    /// Whether the pattern contained any `??` bytes
    pub fn has_wildcards(&self) -> bool {
        self.wildcard_count > 0
    }

    /// Offsets of `[`-marked fields, in order of appearance
    pub fn direct_positions(&self) -> &[u16] {
        &self.direct_positions
    }

    /// Offsets of `{`-marked fields, in order of appearance
    pub fn reloc_positions(&self) -> &[u16] {
        &self.reloc_positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_hex() {
        let p = BytePattern::parse("0048 8b05").unwrap();
        assert_eq!(p.bytes(), &[0x00, 0x48, 0x8B, 0x05]);
        assert!(!p.has_wildcards());
        assert!(p.direct_positions().is_empty());
        assert!(p.reloc_positions().is_empty());
    }

    #[test]
    fn test_lowercase_and_whitespace() {
        let p = BytePattern::parse(" aa\tBb\ncC ").unwrap();
        assert_eq!(p.bytes(), &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_wildcard_never_collides_with_literals() {
        // Literals cover 0x00 and 0x01, so the lowest free value is 0x02
        let p = BytePattern::parse("00 01 ??").unwrap();
        assert_eq!(p.wildcard(), 0x02);
        assert_eq!(p.bytes(), &[0x00, 0x01, 0x02]);
        assert!(!p.bytes()[..2].contains(&p.wildcard()));
    }

    #[test]
    fn test_wildcard_is_lowest_unused() {
        let p = BytePattern::parse("AA BB ??").unwrap();
        assert_eq!(p.wildcard(), 0x00);
        assert_eq!(p.bytes(), &[0xAA, 0xBB, 0x00]);
    }

    #[test]
    fn test_no_wildcard_uses_first_byte() {
        let p = BytePattern::parse("E8 00 00 00 00").unwrap();
        assert_eq!(p.wildcard(), 0xE8);
    }

    #[test]
    fn test_empty_pattern() {
        let p = BytePattern::parse("").unwrap();
        assert!(p.bytes().is_empty());
        assert_eq!(p.wildcard(), 0);
    }

    #[test]
    fn test_direct_positions() {
        let p = BytePattern::parse("8B05[44332211]90").unwrap();
        assert_eq!(p.bytes(), &[0x8B, 0x05, 0x44, 0x33, 0x22, 0x11, 0x90]);
        assert_eq!(p.direct_positions(), &[2]);
    }

    #[test]
    fn test_reloc_and_direct_positions() {
        let p = BytePattern::parse("{00000000}FF[AABBCCDD]{00000000}").unwrap();
        assert_eq!(p.direct_positions(), &[5]);
        assert_eq!(p.reloc_positions(), &[0, 9]);
        assert_eq!(p.bytes().len(), 13);
    }

    #[test]
    fn test_odd_digit_count_fails() {
        let err = BytePattern::parse("AAB").unwrap_err();
        assert!(matches!(err, Error::MalformedHex(_)));
    }

    #[test]
    fn test_mixed_wildcard_pair_fails() {
        let err = BytePattern::parse("?A").unwrap_err();
        assert!(matches!(err, Error::MalformedHex(_)));
    }

    #[test]
    fn test_non_hex_fails() {
        let err = BytePattern::parse("GG").unwrap_err();
        assert!(matches!(err, Error::MalformedHex(_)));
    }

    #[test]
    fn test_round_trip_is_stable() {
        // Re-encoding the decoded bytes of a wildcard-free pattern and
        // parsing again yields the same bytes
        let p = BytePattern::parse("DE AD BE EF").unwrap();
        let hex: String = p.bytes().iter().map(|b| format!("{b:02X}")).collect();
        let q = BytePattern::parse(&hex).unwrap();
        assert_eq!(p.bytes(), q.bytes());
    }
}
