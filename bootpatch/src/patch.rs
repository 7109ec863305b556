//! The four patch variants and their wire payloads
//!
//! A patch is a closed sum of four kinds, each with its own addressing
//! scheme. The discriminant written to the wire is the variant tag; the
//! reader dispatches on it with an exhaustive match. Constructors take the
//! raw pattern texts from the source document, decode them through
//! [`BytePattern`], and enforce every kind-specific invariant, so a value
//! of these types is always serializable.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::pattern::BytePattern;
use crate::section::SectionName;
use crate::wire;

/// A compiled patch, ready for serialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// Replace a byte sequence with another of the same length
    Direct(DirectPatch),
    /// Match a pattern whose marked 32-bit fields vary per instance
    Dwords(DwordsPatch),
    /// Match a pattern with one variable string/table offset field
    String(StringPatch),
    /// Inject a new function body and redirect a call site to it
    AddFunction(AddFunctionPatch),
}

impl Patch {
    /// The wire discriminant of this variant
    pub fn tag(&self) -> u16 {
        match self {
            Patch::Direct(_) => DirectPatch::TAG,
            Patch::Dwords(_) => DwordsPatch::TAG,
            Patch::String(_) => StringPatch::TAG,
            Patch::AddFunction(_) => AddFunctionPatch::TAG,
        }
    }

    /// The section this patch is restricted to
    pub fn section(&self) -> SectionName {
        match self {
            Patch::Direct(p) => p.section,
            Patch::Dwords(p) => p.section,
            Patch::String(p) => p.section,
            Patch::AddFunction(p) => p.section,
        }
    }

    /// Write the discriminant-specific payload (the tag itself is written
    /// by the owning version range)
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            Patch::Direct(p) => p.write_to(writer),
            Patch::Dwords(p) => p.write_to(writer),
            Patch::String(p) => p.write_to(writer),
            Patch::AddFunction(p) => p.write_to(writer),
        }
    }

    /// Read the payload for a previously read discriminant
    pub(crate) fn read_from<R: Read>(reader: &mut R, tag: u16) -> Result<Self> {
        match tag {
            DirectPatch::TAG => Ok(Patch::Direct(DirectPatch::read_from(reader)?)),
            DwordsPatch::TAG => Ok(Patch::Dwords(DwordsPatch::read_from(reader)?)),
            StringPatch::TAG => Ok(Patch::String(StringPatch::read_from(reader)?)),
            AddFunctionPatch::TAG => {
                Ok(Patch::AddFunction(AddFunctionPatch::read_from(reader)?))
            }
            other => Err(Error::UnknownPatchTag(other)),
        }
    }
}

fn check_dword_pos(positions: &[u16], buffer: &[u8], field: &str) -> Result<()> {
    for &pos in positions {
        if usize::from(pos) + 4 > buffer.len() {
            return Err(Error::invalid_patch(format!(
                "position {pos} in {field} overruns the {}-byte buffer",
                buffer.len()
            )));
        }
    }
    Ok(())
}

/// The 32-bit little-endian value at `pos`, assuming bounds were checked
fn dword_at(buffer: &[u8], pos: u16) -> u32 {
    let pos = usize::from(pos);
    u32::from_le_bytes([
        buffer[pos],
        buffer[pos + 1],
        buffer[pos + 2],
        buffer[pos + 3],
    ])
}

fn reject_wildcards(pattern: &BytePattern, field: &str) -> Result<()> {
    if pattern.has_wildcards() {
        return Err(Error::invalid_patch(format!(
            "{field} must not contain wildcard bytes"
        )));
    }
    Ok(())
}

/// Replace `target` (wildcards allowed) with `value`, byte for byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectPatch {
    section: SectionName,
    wildcard: u8,
    target: Vec<u8>,
    value: Vec<u8>,
}

impl DirectPatch {
    /// Wire discriminant
    pub const TAG: u16 = 0x0001;

    /// Build from the `Target` and `Value` pattern texts
    pub fn new(section: SectionName, target: &str, value: &str) -> Result<Self> {
        let target = BytePattern::parse(target)?;
        let value = BytePattern::parse(value)?;
        reject_wildcards(&value, "Value")?;
        if target.bytes().len() != value.bytes().len() {
            return Err(Error::invalid_patch(format!(
                "Target ({} bytes) and Value ({} bytes) must be the same length",
                target.bytes().len(),
                value.bytes().len()
            )));
        }
        Ok(DirectPatch {
            section,
            wildcard: target.wildcard(),
            target: target.into_bytes(),
            value: value.into_bytes(),
        })
    }

    /// The pattern to locate
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    /// The replacement bytes
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The wildcard byte standing for "any value" in the target
    pub fn wildcard(&self) -> u8 {
        self.wildcard
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.section.write_to(writer)?;
        writer.write_u8(self.wildcard)?;
        wire::write_bytes(writer, &self.target)?;
        wire::write_bytes(writer, &self.value)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let section = SectionName::read_from(reader)?;
        let wildcard = reader.read_u8()?;
        let target = wire::read_bytes(reader)?;
        let value = wire::read_bytes(reader)?;
        if target.len() != value.len() {
            return Err(Error::invalid_format(
                "direct patch target and value lengths differ",
            ));
        }
        Ok(DirectPatch {
            section,
            wildcard,
            target,
            value,
        })
    }
}

/// Match a pattern treating marked 4-byte fields as variable values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwordsPatch {
    section: SectionName,
    positions: Vec<u16>,
    wildcard: u8,
    target: Vec<u8>,
}

impl DwordsPatch {
    /// Wire discriminant
    pub const TAG: u16 = 0x0002;

    /// Build from the `Target` pattern text; `[`-marked fields become the
    /// variable dword positions
    pub fn new(section: SectionName, target: &str) -> Result<Self> {
        let target = BytePattern::parse(target)?;
        check_dword_pos(target.direct_positions(), target.bytes(), "Target")?;
        Ok(DwordsPatch {
            section,
            positions: target.direct_positions().to_vec(),
            wildcard: target.wildcard(),
            target: target.into_bytes(),
        })
    }

    /// Offsets of the variable 32-bit fields
    pub fn positions(&self) -> &[u16] {
        &self.positions
    }

    /// The pattern to locate
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.section.write_to(writer)?;
        wire::write_u16s(writer, &self.positions)?;
        writer.write_u8(self.wildcard)?;
        wire::write_bytes(writer, &self.target)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let section = SectionName::read_from(reader)?;
        let positions = wire::read_u16s(reader)?;
        let wildcard = reader.read_u8()?;
        let target = wire::read_bytes(reader)?;
        check_dword_pos(&positions, &target, "target")
            .map_err(|_| Error::invalid_format("dwords patch position out of range"))?;
        Ok(DwordsPatch {
            section,
            positions,
            wildcard,
            target,
        })
    }
}

/// Match a pattern with one variable string/table offset field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringPatch {
    section: SectionName,
    position: u16,
    wildcard: u8,
    target: Vec<u8>,
}

impl StringPatch {
    /// Wire discriminant
    pub const TAG: u16 = 0x0003;

    /// Build from the `Target` pattern text, which must carry exactly one
    /// `[`-marked field
    pub fn new(section: SectionName, target: &str) -> Result<Self> {
        let target = BytePattern::parse(target)?;
        let position = match *target.direct_positions() {
            [position] => position,
            [] => {
                return Err(Error::invalid_patch(
                    "Target needs one marked position",
                ));
            }
            _ => {
                return Err(Error::invalid_patch(
                    "Target must carry exactly one marked position",
                ));
            }
        };
        if usize::from(position) + 2 > target.bytes().len() {
            return Err(Error::invalid_patch(format!(
                "position {position} in Target overruns the {}-byte buffer",
                target.bytes().len()
            )));
        }
        Ok(StringPatch {
            section,
            position,
            wildcard: target.wildcard(),
            target: target.into_bytes(),
        })
    }

    /// Offset of the variable field
    pub fn position(&self) -> u16 {
        self.position
    }

    /// The pattern to locate
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.section.write_to(writer)?;
        writer.write_u16::<LittleEndian>(self.position)?;
        writer.write_u8(self.wildcard)?;
        wire::write_bytes(writer, &self.target)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let section = SectionName::read_from(reader)?;
        let position = reader.read_u16::<LittleEndian>()?;
        let wildcard = reader.read_u8()?;
        let target = wire::read_bytes(reader)?;
        if usize::from(position) + 2 > target.len() {
            return Err(Error::invalid_format("string patch position out of range"));
        }
        Ok(StringPatch {
            section,
            position,
            wildcard,
            target,
        })
    }
}

/// Inject a function body and redirect an existing call site to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddFunctionPatch {
    section: SectionName,
    wildcard: u8,
    target: Vec<u8>,
    call: Vec<u8>,
    call_pos: u16,
    func: Vec<u8>,
    direct_positions: Vec<u16>,
    reloc_positions: Vec<u16>,
    func_names: Vec<String>,
}

impl AddFunctionPatch {
    /// Wire discriminant
    pub const TAG: u16 = 0x0004;

    /// Build from the `Target`, `Call` and `Function` pattern texts plus
    /// the declared symbol names
    ///
    /// `Call` must carry exactly one `[`-marked field (the call offset to
    /// overwrite). Within `Function`, `[` marks position-relative 32-bit
    /// fix-ups and `{` marks fields resolved to external symbol addresses.
    /// The symbol-name count must equal the number of relocation fields
    /// whose existing bytes are all zero; a non-zero field is assumed
    /// pre-resolved and consumes no name.
    pub fn new(
        section: SectionName,
        target: &str,
        call: &str,
        func: &str,
        func_names: Vec<String>,
    ) -> Result<Self> {
        let target = BytePattern::parse(target)?;

        let call = BytePattern::parse(call)?;
        reject_wildcards(&call, "Call")?;
        let call_pos = match *call.direct_positions() {
            [position] => position,
            [] => return Err(Error::invalid_patch("Call needs one marked position")),
            _ => {
                return Err(Error::invalid_patch(
                    "Call must carry exactly one marked position",
                ));
            }
        };
        if usize::from(call_pos) + 4 > call.bytes().len() {
            return Err(Error::invalid_patch(format!(
                "position {call_pos} in Call overruns the {}-byte buffer",
                call.bytes().len()
            )));
        }

        let func = BytePattern::parse(func)?;
        reject_wildcards(&func, "Function")?;
        check_dword_pos(func.direct_positions(), func.bytes(), "Function")?;
        check_dword_pos(func.reloc_positions(), func.bytes(), "Function")?;

        let unresolved = func
            .reloc_positions()
            .iter()
            .filter(|&&pos| dword_at(func.bytes(), pos) == 0)
            .count();
        if func_names.len() != unresolved {
            return Err(Error::invalid_patch(format!(
                "{} function name(s) declared but {unresolved} zero-filled \
                 relocation position(s) need one",
                func_names.len()
            )));
        }
        for name in &func_names {
            if name.is_empty() || !name.is_ascii() {
                return Err(Error::invalid_patch(format!(
                    "function name {name:?} must be non-empty ASCII"
                )));
            }
        }

        let direct_positions = func.direct_positions().to_vec();
        let reloc_positions = func.reloc_positions().to_vec();
        Ok(AddFunctionPatch {
            section,
            wildcard: target.wildcard(),
            target: target.into_bytes(),
            call: call.into_bytes(),
            call_pos,
            func: func.into_bytes(),
            direct_positions,
            reloc_positions,
            func_names,
        })
    }

    /// The existing code pattern to locate
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    /// The call-site pattern
    pub fn call(&self) -> &[u8] {
        &self.call
    }

    /// Offset within the call pattern to overwrite with the redirect
    pub fn call_pos(&self) -> u16 {
        self.call_pos
    }

    /// The new function body
    pub fn func(&self) -> &[u8] {
        &self.func
    }

    /// In-body offsets of position-relative 32-bit fix-ups
    pub fn direct_positions(&self) -> &[u16] {
        &self.direct_positions
    }

    /// In-body offsets of symbol-address relocations
    pub fn reloc_positions(&self) -> &[u16] {
        &self.reloc_positions
    }

    /// Symbol names, one per zero-filled relocation position
    pub fn func_names(&self) -> &[String] {
        &self.func_names
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.section.write_to(writer)?;
        writer.write_u8(self.wildcard)?;
        wire::write_bytes(writer, &self.target)?;
        wire::write_bytes(writer, &self.call)?;
        writer.write_u16::<LittleEndian>(self.call_pos)?;
        wire::write_bytes(writer, &self.func)?;
        wire::write_u16s(writer, &self.direct_positions)?;
        wire::write_u16s(writer, &self.reloc_positions)?;
        // No name count on the wire; the reader re-derives it from the
        // zero-filled relocation slots
        for name in &self.func_names {
            wire::write_name(writer, name)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let section = SectionName::read_from(reader)?;
        let wildcard = reader.read_u8()?;
        let target = wire::read_bytes(reader)?;
        let call = wire::read_bytes(reader)?;
        let call_pos = reader.read_u16::<LittleEndian>()?;
        let func = wire::read_bytes(reader)?;
        let direct_positions = wire::read_u16s(reader)?;
        let reloc_positions = wire::read_u16s(reader)?;

        if usize::from(call_pos) + 4 > call.len() {
            return Err(Error::invalid_format(
                "add-function call position out of range",
            ));
        }
        check_dword_pos(&direct_positions, &func, "function body")
            .map_err(|_| Error::invalid_format("add-function body position out of range"))?;
        check_dword_pos(&reloc_positions, &func, "function body")
            .map_err(|_| Error::invalid_format("add-function body position out of range"))?;

        let mut func_names = Vec::new();
        for &pos in &reloc_positions {
            if dword_at(&func, pos) == 0 {
                func_names.push(wire::read_name(reader)?);
            }
        }

        Ok(AddFunctionPatch {
            section,
            wildcard,
            target,
            call,
            call_pos,
            func,
            direct_positions,
            reloc_positions,
            func_names,
        })
    }
}
