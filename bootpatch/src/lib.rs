//! Compiler and reader for boot-loader binary patch description files.
//!
//! This crate turns a schema-validated XML document describing byte-level
//! modifications (per target executable, machine architecture, and version
//! range) into a compact deflate-compressed binary artifact that a
//! separate runtime patch applier consumes, and reads such artifacts back
//! for validation and introspection.
//!
//! # Examples
//!
//! ```
//! use bootpatch::{compile_str, MachineType, PackedVersion, PatchFile};
//!
//! let xml = r#"
//!     <Patches version="1.0">
//!       <Entry id="1">
//!         <Platform type="AMD64">
//!           <VersionRange min="" max="">
//!             <PatchDirect>
//!               <Section>.text</Section>
//!               <Target>74 05 ??</Target>
//!               <Value>EB 05 90</Value>
//!             </PatchDirect>
//!           </VersionRange>
//!         </Platform>
//!       </Entry>
//!     </Patches>"#;
//!
//! let file = compile_str(xml).unwrap();
//! let mut artifact = Vec::new();
//! file.write_to(&mut artifact).unwrap();
//!
//! let back = PatchFile::read_from(&mut artifact.as_slice()).unwrap();
//! let version: PackedVersion = "6.1.7600.16385".parse().unwrap();
//! assert_eq!(back.patches(1, MachineType::Amd64, version).len(), 1);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod compiler;
pub mod error;
pub mod model;
pub mod patch;
pub mod pattern;
pub mod section;
pub mod version;

mod schema;
mod wire;

pub use compiler::{compile_file, compile_str};
pub use error::{Error, Result};
pub use model::{
    Compression, Entry, FORMAT_MAJOR, FORMAT_MINOR, MachineType, PATCH_MAGIC, PatchFile,
    Platform, VersionRange,
};
pub use patch::{AddFunctionPatch, DirectPatch, DwordsPatch, Patch, StringPatch};
pub use pattern::BytePattern;
pub use section::SectionName;
pub use version::{PackedVersion, VersionAliases};
