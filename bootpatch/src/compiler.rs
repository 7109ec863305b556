//! The compiler front end: XML document in, patch tree out
//!
//! Compilation is fail-fast: the first schema violation or invariant
//! failure aborts the whole run, since a partially correct artifact would
//! silently corrupt a downstream binary. Errors raised below the document
//! root are wrapped with the entry/platform/range path they occurred at.
//!
//! Each call builds its own scoped context (the version alias table);
//! nothing is shared between compilations.

use std::fs;
use std::path::Path;

use roxmltree::{Document, Node};

use crate::error::{Error, Result};
use crate::model::{Entry, MachineType, PatchFile, Platform, VersionRange};
use crate::patch::{AddFunctionPatch, DirectPatch, DwordsPatch, Patch, StringPatch};
use crate::schema;
use crate::section::SectionName;
use crate::version::{PackedVersion, VersionAliases};

/// Compile a patch description document into a [`PatchFile`]
pub fn compile_str(xml: &str) -> Result<PatchFile> {
    let doc = Document::parse(xml)?;
    schema::validate(&doc)?;

    let root = doc.root_element();
    let (file_major, file_minor) = parse_file_version(root)?;

    let context = Context::new(root)?;
    let entries: Vec<Entry> = elements(root)
        .filter(|n| n.has_tag_name("Entry"))
        .map(|n| context.build_entry(n))
        .collect::<Result<_>>()?;

    log::info!(
        "compiled {} entr{} from document version {file_major}.{file_minor}",
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" }
    );
    Ok(PatchFile::new(file_major, file_minor, entries))
}

/// Compile a patch description file into a [`PatchFile`]
pub fn compile_file<P: AsRef<Path>>(path: P) -> Result<PatchFile> {
    let xml = fs::read_to_string(path)?;
    compile_str(&xml)
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(Node::is_element)
}

/// The document version attribute, already shape-checked by the schema
fn parse_file_version(root: Node) -> Result<(u16, u16)> {
    let version = root.attribute("version").unwrap_or_default();
    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| Error::schema(format!("malformed document version {version:?}")))?;
    let parse = |s: &str| {
        s.parse::<u16>()
            .map_err(|_| Error::schema(format!("malformed document version {version:?}")))
    };
    Ok((parse(major)?, parse(minor)?))
}

/// Per-compilation context: the resolved version alias table
struct Context {
    aliases: VersionAliases,
}

impl Context {
    fn new(root: Node) -> Result<Self> {
        let mut aliases = VersionAliases::new();
        for decl in elements(root).filter(|n| n.has_tag_name("Version")) {
            let name = decl.attribute("name").unwrap_or_default();
            let value = decl.attribute("value").unwrap_or_default();
            // Alias values must be literals; forward references between
            // aliases are not a thing the format supports
            let version: PackedVersion = value
                .parse()
                .map_err(|e: Error| e.at(format!("Version {name:?}")))?;
            if aliases.insert(name.to_string(), version).is_some() {
                return Err(Error::schema(format!(
                    "duplicate <Version> declaration {name:?}"
                )));
            }
            log::debug!("version alias {name} = {version}");
        }
        Ok(Context { aliases })
    }

    fn build_entry(&self, node: Node) -> Result<Entry> {
        let id: u16 = node
            .attribute("id")
            .unwrap_or_default()
            .parse()
            .map_err(|_| Error::schema("malformed entry id"))?;
        let location = format!("Entry {id}");

        let platforms = elements(node)
            .map(|p| self.build_platform(p, &location))
            .collect::<Result<_>>()?;
        Ok(Entry::new(id, platforms))
    }

    fn build_platform(&self, node: Node, parent: &str) -> Result<Platform> {
        let machine: MachineType = node.attribute("type").unwrap_or_default().parse()?;
        let location = format!("{parent} > Platform {machine}");

        let ranges = elements(node)
            .enumerate()
            .map(|(i, r)| self.build_range(r, &location, i + 1))
            .collect::<Result<_>>()?;
        Ok(Platform::new(machine, ranges))
    }

    fn build_range(&self, node: Node, parent: &str, index: usize) -> Result<VersionRange> {
        let location = format!("{parent} > VersionRange #{index}");
        self.build_range_inner(node)
            .map_err(|e| e.at(location))
    }

    fn build_range_inner(&self, node: Node) -> Result<VersionRange> {
        let min = PackedVersion::resolve(node.attribute("min").unwrap_or_default(), &self.aliases)?;
        let max = PackedVersion::resolve(node.attribute("max").unwrap_or_default(), &self.aliases)?;

        let patch_node = elements(node)
            .next()
            .ok_or_else(|| Error::schema("range wraps no patch element"))?;
        let patch = build_patch(patch_node)?;
        Ok(VersionRange::new(min, max, patch))
    }
}

fn build_patch(node: Node) -> Result<Patch> {
    let section = SectionName::parse(child_text(node, "Section").trim())?;
    match node.tag_name().name() {
        "PatchDirect" => Ok(Patch::Direct(DirectPatch::new(
            section,
            &child_text(node, "Target"),
            &child_text(node, "Value"),
        )?)),
        "PatchDwords" => Ok(Patch::Dwords(DwordsPatch::new(
            section,
            &child_text(node, "Target"),
        )?)),
        "PatchString" => Ok(Patch::String(StringPatch::new(
            section,
            &child_text(node, "Target"),
        )?)),
        "PatchAddFunction" => {
            let names = elements(node)
                .find(|c| c.has_tag_name("FuncNames"))
                .map(|names| {
                    elements(names)
                        .map(|n| n.text().unwrap_or_default().trim().to_string())
                        .collect()
                })
                .unwrap_or_default();
            Ok(Patch::AddFunction(AddFunctionPatch::new(
                section,
                &child_text(node, "Target"),
                &child_text(node, "Call"),
                &child_text(node, "Function"),
                names,
            )?))
        }
        other => Err(Error::UnknownPatchKind(format!("<{other}>"))),
    }
}

/// Text content of the named child element, empty if absent
fn child_text(node: Node, name: &str) -> String {
    elements(node)
        .find(|c| c.has_tag_name(name))
        .and_then(|c| c.text())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOC: &str = r#"
        <Patches version="1.3">
          <Version name="Win7RTM" value="6.1.7600.16385"/>
          <Entry id="1">
            <Platform type="AMD64">
              <VersionRange min="Win7RTM" max="">
                <PatchDirect>
                  <Section>.text</Section>
                  <Target>AA BB ??</Target>
                  <Value>CC DD EE</Value>
                </PatchDirect>
              </VersionRange>
            </Platform>
          </Entry>
        </Patches>"#;

    #[test]
    fn test_compile_minimal_document() {
        let file = compile_str(DOC).unwrap();
        assert_eq!(file.file_version(), (1, 3));
        assert_eq!(file.entries().len(), 1);

        let entry = &file.entries()[0];
        assert_eq!(entry.id(), 1);
        let platform = entry.platform(MachineType::Amd64).unwrap();
        assert_eq!(platform.ranges().len(), 1);

        let range = &platform.ranges()[0];
        assert_eq!(range.min(), "6.1.7600.16385".parse().unwrap());
        assert_eq!(range.max(), PackedVersion::ZERO);
        assert_eq!(range.patch().tag(), 1);
    }

    #[test]
    fn test_alias_resolution_matches_literal() {
        let literal = DOC.replace("min=\"Win7RTM\"", "min=\"6.1.7600.16385\"");
        let a = compile_str(DOC).unwrap();
        let b = compile_str(&literal).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_undeclared_alias_fails() {
        let doc = DOC.replace("Win7RTM\" max", "Win8RTM\" max");
        let err = compile_str(&doc).unwrap_err();
        assert!(matches!(err.root_cause(), Error::MalformedVersion(_)));
        assert!(err.to_string().contains("Entry 1"));
    }

    #[test]
    fn test_duplicate_alias_fails() {
        let doc = DOC.replace(
            "<Entry",
            "<Version name=\"Win7RTM\" value=\"6.1.7600.16385\"/><Entry",
        );
        let err = compile_str(&doc).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn test_invariant_violation_is_located() {
        let doc = DOC.replace("CC DD EE", "CC DD");
        let err = compile_str(&doc).unwrap_err();
        assert!(matches!(
            err.root_cause(),
            Error::InvalidPatchDefinition(_)
        ));
        let msg = err.to_string();
        assert!(msg.contains("Entry 1 > Platform AMD64 > VersionRange #1"), "{msg}");
    }

    #[test]
    fn test_malformed_xml_fails() {
        assert!(matches!(compile_str("<Patches"), Err(Error::Xml(_))));
    }
}
