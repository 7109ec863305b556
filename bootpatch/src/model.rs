//! The compiled patch tree and its artifact serialization
//!
//! A [`PatchFile`] owns an ordered list of entries; each entry groups
//! platforms; each platform groups version ranges; each range owns exactly
//! one patch. The artifact layout is a fixed uncompressed header (magic,
//! format version, file version, compression tag) followed by the whole
//! tree serialized little-endian inside the chosen compression stream.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};

use crate::error::{Error, Result};
use crate::patch::Patch;
use crate::version::PackedVersion;
use crate::wire;

/// First two bytes of every patch artifact
pub const PATCH_MAGIC: u16 = 0x7C9A;
/// Major version of the document grammar this compiler understands
pub const FORMAT_MAJOR: u16 = 0;
/// Minor version of the document grammar this compiler understands
pub const FORMAT_MINOR: u16 = 3;

/// PE machine type a platform's patches apply to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineType {
    /// 32-bit x86 (`IMAGE_FILE_MACHINE_I386`)
    I386,
    /// 64-bit x86 (`IMAGE_FILE_MACHINE_AMD64`)
    Amd64,
}

impl MachineType {
    /// The PE machine tag written to the wire
    pub fn tag(&self) -> u16 {
        match self {
            MachineType::I386 => 0x014C,
            MachineType::Amd64 => 0x8664,
        }
    }

    /// Decode a PE machine tag
    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            0x014C => Ok(MachineType::I386),
            0x8664 => Ok(MachineType::Amd64),
            other => Err(Error::invalid_format(format!(
                "unknown machine type {other:#06X}"
            ))),
        }
    }
}

impl FromStr for MachineType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "I386" => Ok(MachineType::I386),
            "AMD64" => Ok(MachineType::Amd64),
            other => Err(Error::schema(format!(
                "unknown platform type {other:?}, expected I386 or AMD64"
            ))),
        }
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineType::I386 => write!(f, "I386"),
            MachineType::Amd64 => write!(f, "AMD64"),
        }
    }
}

/// Compression applied to the artifact body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Body stored verbatim
    None,
    /// Gzip-wrapped deflate
    Gzip,
    /// Raw deflate (what the compiler emits)
    #[default]
    Deflate,
}

impl Compression {
    /// The wire tag following the header
    pub fn tag(&self) -> u16 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Deflate => 2,
        }
    }

    /// Decode a compression tag
    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Deflate),
            other => Err(Error::UnknownCompression(other)),
        }
    }
}

/// An inclusive version range owning exactly one patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    min: PackedVersion,
    max: PackedVersion,
    patch: Patch,
}

impl VersionRange {
    /// Create a range; `max` of zero means "unbounded above"
    pub fn new(min: PackedVersion, max: PackedVersion, patch: Patch) -> Self {
        VersionRange { min, max, patch }
    }

    /// Lower bound (inclusive)
    pub fn min(&self) -> PackedVersion {
        self.min
    }

    /// Upper bound (inclusive); zero means unbounded
    pub fn max(&self) -> PackedVersion {
        self.max
    }

    /// The patch this range applies
    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    /// Whether `version` falls inside this range
    pub fn matches(&self, version: PackedVersion) -> bool {
        self.min <= version && (self.max == PackedVersion::ZERO || self.max >= version)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LittleEndian>(self.min.as_raw())?;
        writer.write_u64::<LittleEndian>(self.max.as_raw())?;
        writer.write_u16::<LittleEndian>(self.patch.tag())?;
        self.patch.write_to(writer)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let min = PackedVersion::from_raw(reader.read_u64::<LittleEndian>()?);
        let max = PackedVersion::from_raw(reader.read_u64::<LittleEndian>()?);
        let tag = reader.read_u16::<LittleEndian>()?;
        let patch = Patch::read_from(reader, tag)?;
        Ok(VersionRange { min, max, patch })
    }
}

/// All version ranges targeting one machine type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    machine: MachineType,
    ranges: Vec<VersionRange>,
}

impl Platform {
    /// Create a platform from its ranges, kept in document order
    pub fn new(machine: MachineType, ranges: Vec<VersionRange>) -> Self {
        Platform { machine, ranges }
    }

    /// The machine type this platform targets
    pub fn machine(&self) -> MachineType {
        self.machine
    }

    /// All ranges, in document order
    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    /// Every range containing `version`, in document order
    ///
    /// Overlapping ranges are legal; all matches are returned.
    pub fn matching(&self, version: PackedVersion) -> impl Iterator<Item = &VersionRange> {
        self.ranges.iter().filter(move |r| r.matches(version))
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<LittleEndian>(self.machine.tag())?;
        writer.write_u16::<LittleEndian>(wire::u16_len(self.ranges.len(), "version ranges")?)?;
        for range in &self.ranges {
            range.write_to(writer)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let machine = MachineType::from_tag(reader.read_u16::<LittleEndian>()?)?;
        let count = reader.read_u16::<LittleEndian>()?;
        let mut ranges = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            ranges.push(VersionRange::read_from(reader)?);
        }
        Ok(Platform { machine, ranges })
    }
}

/// A group of platform-specific patch rules sharing a logical id
///
/// Ids are not unique: multiple entries may carry the same id, representing
/// independently authored alternative rule sets for the same target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    id: u16,
    platforms: Vec<Platform>,
}

impl Entry {
    /// Create an entry from its platforms, kept in document order
    pub fn new(id: u16, platforms: Vec<Platform>) -> Self {
        Entry { id, platforms }
    }

    /// The entry's logical id
    pub fn id(&self) -> u16 {
        self.id
    }

    /// All platforms, in document order
    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    /// The first platform with the given machine type, if any
    pub fn platform(&self, machine: MachineType) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.machine() == machine)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<LittleEndian>(self.id)?;
        writer.write_u16::<LittleEndian>(wire::u16_len(self.platforms.len(), "platforms")?)?;
        for platform in &self.platforms {
            platform.write_to(writer)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let id = reader.read_u16::<LittleEndian>()?;
        let count = reader.read_u16::<LittleEndian>()?;
        let mut platforms = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            platforms.push(Platform::read_from(reader)?);
        }
        Ok(Entry { id, platforms })
    }
}

/// A compiled patch artifact: file version plus the entry tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    file_major: u16,
    file_minor: u16,
    entries: Vec<Entry>,
}

impl PatchFile {
    /// Assemble an artifact from compiled entries
    pub fn new(file_major: u16, file_minor: u16, entries: Vec<Entry>) -> Self {
        PatchFile {
            file_major,
            file_minor,
            entries,
        }
    }

    /// The author-supplied version of the source document
    pub fn file_version(&self) -> (u16, u16) {
        (self.file_major, self.file_minor)
    }

    /// All entries, in document order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Every entry with the given id, in document order, no dedup
    pub fn entries_with_id(&self, id: u16) -> Vec<&Entry> {
        self.entries.iter().filter(|e| e.id() == id).collect()
    }

    /// Every patch applying to `(id, machine, version)`
    ///
    /// For each entry sharing the id, the first platform with the machine
    /// tag contributes all of its matching ranges' patches. Results are
    /// concatenated in document order and never deduplicated; callers must
    /// tolerate redundant patches addressing the same bytes.
    pub fn patches(
        &self,
        id: u16,
        machine: MachineType,
        version: PackedVersion,
    ) -> Vec<&Patch> {
        self.entries_with_id(id)
            .into_iter()
            .filter_map(|e| e.platform(machine))
            .flat_map(|p| p.matching(version).map(VersionRange::patch))
            .collect()
    }

    /// Write the artifact with the default (deflate) body compression
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.write_compressed(writer, Compression::default())
    }

    /// Write the artifact with an explicit body compression
    pub fn write_compressed<W: Write>(
        &self,
        writer: &mut W,
        compression: Compression,
    ) -> Result<()> {
        writer.write_u16::<LittleEndian>(PATCH_MAGIC)?;
        writer.write_u16::<LittleEndian>(FORMAT_MAJOR)?;
        writer.write_u16::<LittleEndian>(FORMAT_MINOR)?;
        writer.write_u16::<LittleEndian>(self.file_major)?;
        writer.write_u16::<LittleEndian>(self.file_minor)?;
        writer.write_u16::<LittleEndian>(compression.tag())?;

        log::debug!(
            "writing {} entr{} with {compression:?} body compression",
            self.entries.len(),
            if self.entries.len() == 1 { "y" } else { "ies" }
        );

        match compression {
            Compression::None => self.write_body(writer),
            Compression::Gzip => {
                let mut encoder =
                    GzEncoder::new(&mut *writer, flate2::Compression::default());
                self.write_body(&mut encoder)?;
                encoder.finish()?;
                Ok(())
            }
            Compression::Deflate => {
                let mut encoder =
                    DeflateEncoder::new(&mut *writer, flate2::Compression::default());
                self.write_body(&mut encoder)?;
                encoder.finish()?;
                Ok(())
            }
        }
    }

    fn write_body<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<LittleEndian>(wire::u16_len(self.entries.len(), "entries")?)?;
        for entry in &self.entries {
            entry.write_to(writer)?;
        }
        Ok(())
    }

    /// Read an artifact back, decoding whichever compression it declares
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u16::<LittleEndian>()?;
        if magic != PATCH_MAGIC {
            return Err(Error::BadMagic(magic));
        }
        let format_major = reader.read_u16::<LittleEndian>()?;
        let format_minor = reader.read_u16::<LittleEndian>()?;
        if format_major != FORMAT_MAJOR || format_minor > FORMAT_MINOR {
            return Err(Error::UnsupportedFormatVersion {
                major: format_major,
                minor: format_minor,
            });
        }
        let file_major = reader.read_u16::<LittleEndian>()?;
        let file_minor = reader.read_u16::<LittleEndian>()?;
        let compression = Compression::from_tag(reader.read_u16::<LittleEndian>()?)?;

        let mut body: Box<dyn Read + '_> = match compression {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            Compression::Deflate => Box::new(DeflateDecoder::new(reader)),
        };
        let count = body.read_u16::<LittleEndian>()?;
        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            entries.push(Entry::read_from(&mut body)?);
        }
        Ok(PatchFile {
            file_major,
            file_minor,
            entries,
        })
    }
}
