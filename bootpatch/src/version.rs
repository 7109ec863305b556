//! Packed executable version numbers and alias resolution
//!
//! Versions follow the `VS_FIXEDFILEINFO` convention: four 16-bit
//! components (major, minor, build, revision) packed most-significant
//! first into a u64, so ordinary integer comparison orders versions
//! correctly. The packed value 0 doubles as "no bound" for range maxima.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Table of named version aliases declared at the document root
pub type VersionAliases = HashMap<String, PackedVersion>;

/// A four-component version packed into a u64
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PackedVersion(u64);

impl PackedVersion {
    /// The zero version, used as "no bound" for range maxima
    pub const ZERO: PackedVersion = PackedVersion(0);

    /// Pack four 16-bit components, most significant first
    pub fn from_components(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        PackedVersion(
            (u64::from(major) << 48)
                | (u64::from(minor) << 32)
                | (u64::from(build) << 16)
                | u64::from(revision),
        )
    }

    /// Wrap an already-packed value
    pub fn from_raw(value: u64) -> Self {
        PackedVersion(value)
    }

    /// The packed 64-bit value
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Unpack into (major, minor, build, revision)
    pub fn components(&self) -> (u16, u16, u16, u16) {
        (
            (self.0 >> 48) as u16,
            (self.0 >> 32) as u16,
            (self.0 >> 16) as u16,
            self.0 as u16,
        )
    }

    /// Resolve a version token from the source document
    ///
    /// An empty token resolves to [`PackedVersion::ZERO`] ("no bound",
    /// meaningful only for range maxima). A token matching a declared
    /// alias resolves to the aliased value. Anything else must be a
    /// literal dotted version with exactly four components.
    pub fn resolve(token: &str, aliases: &VersionAliases) -> Result<Self> {
        if token.is_empty() {
            return Ok(PackedVersion::ZERO);
        }
        if let Some(&version) = aliases.get(token) {
            return Ok(version);
        }
        token.parse()
    }
}

impl FromStr for PackedVersion {
    type Err = Error;

    /// Parse a literal dotted version such as `6.1.7600.16385`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 4 {
            return Err(Error::MalformedVersion(format!(
                "{s:?}: expected exactly four dot-separated components"
            )));
        }
        let mut components = [0u16; 4];
        for (slot, part) in components.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                Error::MalformedVersion(format!(
                    "{s:?}: component {part:?} is not an integer in 0..=65535"
                ))
            })?;
        }
        Ok(PackedVersion::from_components(
            components[0],
            components[1],
            components[2],
            components[3],
        ))
    }
}

impl fmt::Display for PackedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, build, revision) = self.components();
        write!(f, "{major}.{minor}.{build}.{revision}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_packing_order() {
        let v = PackedVersion::from_components(1, 2, 3, 4);
        assert_eq!(v.as_raw(), 0x0001_0002_0003_0004);
        assert_eq!(v.components(), (1, 2, 3, 4));
    }

    #[test]
    fn test_parse_literal() {
        let v: PackedVersion = "1.2.3.4".parse().unwrap();
        assert_eq!(v, PackedVersion::from_components(1, 2, 3, 4));
        assert_eq!(v.to_string(), "1.2.3.4");
    }

    #[test]
    fn test_ordering_matches_component_order() {
        let a: PackedVersion = "6.1.7600.16385".parse().unwrap();
        let b: PackedVersion = "6.1.7601.0".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_wrong_component_count_fails() {
        assert!(matches!(
            "1.2.3".parse::<PackedVersion>(),
            Err(Error::MalformedVersion(_))
        ));
        assert!(matches!(
            "1.2.3.4.5".parse::<PackedVersion>(),
            Err(Error::MalformedVersion(_))
        ));
    }

    #[test]
    fn test_component_overflow_fails() {
        assert!(matches!(
            "1.2.3.70000".parse::<PackedVersion>(),
            Err(Error::MalformedVersion(_))
        ));
    }

    #[test]
    fn test_resolve_empty_is_zero() {
        let aliases = VersionAliases::new();
        assert_eq!(
            PackedVersion::resolve("", &aliases).unwrap(),
            PackedVersion::ZERO
        );
    }

    #[test]
    fn test_resolve_alias_equals_literal() {
        let mut aliases = VersionAliases::new();
        aliases.insert("Win7SP1".to_string(), "6.1.7601.17514".parse().unwrap());
        assert_eq!(
            PackedVersion::resolve("Win7SP1", &aliases).unwrap(),
            PackedVersion::resolve("6.1.7601.17514", &aliases).unwrap()
        );
    }

    #[test]
    fn test_resolve_unknown_name_fails() {
        let aliases = VersionAliases::new();
        assert!(matches!(
            PackedVersion::resolve("NotAVersion", &aliases),
            Err(Error::MalformedVersion(_))
        ));
    }
}
