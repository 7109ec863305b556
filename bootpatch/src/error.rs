//! Error types for patch compilation and artifact decoding

use std::io;
use thiserror::Error;

/// Result type alias for patch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for patch compilation and decoding
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The source document is not well-formed XML
    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// A hex-with-markers pattern could not be decoded
    #[error("Malformed hex pattern: {0}")]
    MalformedHex(String),

    /// A version token is neither empty, an alias, nor four dotted u16 components
    #[error("Malformed version: {0}")]
    MalformedVersion(String),

    /// All 256 byte values occur literally in the pattern
    #[error("No available wildcard value: all 256 byte values occur in the pattern")]
    NoAvailableWildcard,

    /// A patch variant violated a kind-specific invariant
    #[error("Invalid patch definition: {0}")]
    InvalidPatchDefinition(String),

    /// The source document does not match the patch document schema
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// A version range wraps an element that is not a known patch kind
    #[error("Unknown patch kind: {0}")]
    UnknownPatchKind(String),

    /// The artifact does not start with the patch magic
    #[error("Bad magic: expected 0x7C9A, found {0:#06X}")]
    BadMagic(u16),

    /// The artifact was written by a newer compiler
    #[error("Unsupported format version {major}.{minor}")]
    UnsupportedFormatVersion {
        /// Format major version found in the artifact
        major: u16,
        /// Format minor version found in the artifact
        minor: u16,
    },

    /// The artifact declares a compression tag this reader does not know
    #[error("Unknown compression tag: {0}")]
    UnknownCompression(u16),

    /// The artifact contains a patch discriminant this reader does not know
    #[error("Unknown patch discriminant: {0:#06X}")]
    UnknownPatchTag(u16),

    /// The artifact body is structurally invalid
    #[error("Invalid artifact format: {0}")]
    InvalidFormat(String),

    /// An error located at a specific element of the source document
    #[error("at {location}: {source}")]
    At {
        /// Path to the offending element (entry id, platform, range index)
        location: String,
        /// The underlying error
        source: Box<Error>,
    },
}

impl Error {
    /// Create a new `InvalidPatchDefinition` error
    pub fn invalid_patch<S: Into<String>>(msg: S) -> Self {
        Error::InvalidPatchDefinition(msg.into())
    }

    /// Create a new `SchemaViolation` error
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        Error::SchemaViolation(msg.into())
    }

    /// Create a new `InvalidFormat` error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Wrap this error with the document location it occurred at
    pub fn at<S: Into<String>>(self, location: S) -> Self {
        Error::At {
            location: location.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, unwrapping any location wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::At { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MalformedHex("odd number of digits".to_string());
        assert_eq!(
            err.to_string(),
            "Malformed hex pattern: odd number of digits"
        );

        let err = Error::BadMagic(0x1234);
        assert_eq!(err.to_string(), "Bad magic: expected 0x7C9A, found 0x1234");
    }

    #[test]
    fn test_location_wrapping() {
        let err = Error::invalid_patch("Target and Value must be the same length")
            .at("Entry 1 > Platform AMD64 > VersionRange #2");
        assert!(err.to_string().starts_with("at Entry 1 > Platform AMD64"));
        assert!(matches!(
            err.root_cause(),
            Error::InvalidPatchDefinition(_)
        ));
    }
}
