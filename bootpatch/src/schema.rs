//! Structural validation of patch description documents
//!
//! The document grammar is owned by the front end and versioned together
//! with the artifact format ([`crate::model::FORMAT_MAJOR`] /
//! [`crate::model::FORMAT_MINOR`]). Validation runs before any model
//! construction so that structural faults are reported ahead of semantic
//! (invariant) faults, and every violation names the element path that
//! triggered it.
//!
//! Grammar:
//!
//! ```text
//! <Patches version="major.minor">
//!   <Version name="..." value="a.b.c.d"/>*
//!   <Entry id="...">+
//!     <Platform type="I386|AMD64">+
//!       <VersionRange min="..." max="...">+
//!         exactly one of:
//!           <PatchDirect>      <Section/> <Target/> <Value/>
//!           <PatchDwords>      <Section/> <Target/>
//!           <PatchString>      <Section/> <Target/>
//!           <PatchAddFunction> <Section/> <Target/> <Call/> <Function/>
//!                              [<FuncNames> <Name/>* </FuncNames>]
//! ```

use roxmltree::{Document, Node};

use crate::error::{Error, Result};

/// Element names recognized inside a `VersionRange`
pub(crate) const PATCH_KINDS: [&str; 4] = [
    "PatchDirect",
    "PatchDwords",
    "PatchString",
    "PatchAddFunction",
];

/// Validate a parsed document against the patch grammar
pub(crate) fn validate(doc: &Document) -> Result<()> {
    let root = doc.root_element();
    if root.tag_name().name() != "Patches" {
        return Err(Error::schema(format!(
            "root element must be <Patches>, found <{}>",
            root.tag_name().name()
        )));
    }
    check_document_version(root)?;

    let mut entries = 0;
    for child in elements(root) {
        match child.tag_name().name() {
            "Version" => check_version_decl(child)?,
            "Entry" => {
                entries += 1;
                check_entry(child)?;
            }
            other => {
                return Err(Error::schema(format!(
                    "unexpected <{other}> under <Patches>, expected <Version> or <Entry>"
                )));
            }
        }
    }
    if entries == 0 {
        return Err(Error::schema("document declares no <Entry> elements"));
    }
    Ok(())
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(Node::is_element)
}

fn check_document_version(root: Node) -> Result<()> {
    let version = root
        .attribute("version")
        .ok_or_else(|| Error::schema("<Patches> is missing the version attribute"))?;
    let valid = match version.split_once('.') {
        Some((major, minor)) => {
            major.parse::<u16>().is_ok() && minor.parse::<u16>().is_ok()
        }
        None => false,
    };
    if !valid {
        return Err(Error::schema(format!(
            "<Patches> version {version:?} is not of the form major.minor"
        )));
    }
    Ok(())
}

fn check_version_decl(node: Node) -> Result<()> {
    let name = node
        .attribute("name")
        .ok_or_else(|| Error::schema("<Version> is missing the name attribute"))?;
    if name.is_empty() {
        return Err(Error::schema("<Version> name attribute is empty"));
    }
    if node.attribute("value").is_none() {
        return Err(Error::schema(format!(
            "<Version name={name:?}> is missing the value attribute"
        )));
    }
    if elements(node).next().is_some() {
        return Err(Error::schema(format!(
            "<Version name={name:?}> must not have child elements"
        )));
    }
    Ok(())
}

fn check_entry(node: Node) -> Result<()> {
    let id = node
        .attribute("id")
        .ok_or_else(|| Error::schema("<Entry> is missing the id attribute"))?;
    if id.parse::<u16>().is_err() {
        return Err(Error::schema(format!(
            "<Entry> id {id:?} is not an integer in 0..=65535"
        )));
    }
    let location = format!("Entry {id}");

    let mut platforms = 0;
    for child in elements(node) {
        if child.tag_name().name() != "Platform" {
            return Err(Error::schema(format!(
                "{location}: unexpected <{}>, expected <Platform>",
                child.tag_name().name()
            )));
        }
        platforms += 1;
        check_platform(child, &location)?;
    }
    if platforms == 0 {
        return Err(Error::schema(format!(
            "{location}: entry declares no <Platform> elements"
        )));
    }
    Ok(())
}

fn check_platform(node: Node, parent: &str) -> Result<()> {
    let kind = node.attribute("type").ok_or_else(|| {
        Error::schema(format!("{parent}: <Platform> is missing the type attribute"))
    })?;
    if kind != "I386" && kind != "AMD64" {
        return Err(Error::schema(format!(
            "{parent}: <Platform> type {kind:?} is not I386 or AMD64"
        )));
    }
    let location = format!("{parent} > Platform {kind}");

    let mut ranges = 0;
    for child in elements(node) {
        if child.tag_name().name() != "VersionRange" {
            return Err(Error::schema(format!(
                "{location}: unexpected <{}>, expected <VersionRange>",
                child.tag_name().name()
            )));
        }
        ranges += 1;
        check_range(child, &location, ranges)?;
    }
    if ranges == 0 {
        return Err(Error::schema(format!(
            "{location}: platform declares no <VersionRange> elements"
        )));
    }
    Ok(())
}

fn check_range(node: Node, parent: &str, index: usize) -> Result<()> {
    let location = format!("{parent} > VersionRange #{index}");
    for attr in ["min", "max"] {
        if node.attribute(attr).is_none() {
            return Err(Error::schema(format!(
                "{location}: missing the {attr} attribute"
            )));
        }
    }

    let mut patches = elements(node);
    let patch = patches.next().ok_or_else(|| {
        Error::schema(format!("{location}: range wraps no patch element"))
    })?;
    if patches.next().is_some() {
        return Err(Error::schema(format!(
            "{location}: range must wrap exactly one patch element"
        )));
    }

    let kind = patch.tag_name().name();
    match kind {
        "PatchDirect" => check_patch_fields(patch, &location, &["Section", "Target", "Value"]),
        "PatchDwords" | "PatchString" => {
            check_patch_fields(patch, &location, &["Section", "Target"])
        }
        "PatchAddFunction" => check_add_function(patch, &location),
        other => Err(Error::UnknownPatchKind(format!("{location}: <{other}>"))),
    }
}

/// Require each named field exactly once and nothing else
fn check_patch_fields(node: Node, location: &str, fields: &[&str]) -> Result<()> {
    check_patch_fields_allowing(node, location, fields, &[])
}

fn check_add_function(node: Node, location: &str) -> Result<()> {
    check_patch_fields_allowing(
        node,
        location,
        &["Section", "Target", "Call", "Function"],
        &["FuncNames"],
    )?;
    if let Some(names) = elements(node).find(|c| c.tag_name().name() == "FuncNames") {
        for child in elements(names) {
            if child.tag_name().name() != "Name" {
                return Err(Error::schema(format!(
                    "{location}: unexpected <{}> in <FuncNames>, expected <Name>",
                    child.tag_name().name()
                )));
            }
        }
    }
    Ok(())
}

/// Like [`check_patch_fields`] but tolerating optional container elements
fn check_patch_fields_allowing(
    node: Node,
    location: &str,
    fields: &[&str],
    optional: &[&str],
) -> Result<()> {
    let kind = node.tag_name().name();
    for field in fields {
        let count = elements(node)
            .filter(|c| c.tag_name().name() == *field)
            .count();
        if count == 0 {
            return Err(Error::schema(format!(
                "{location}: <{kind}> is missing <{field}>"
            )));
        }
        if count > 1 {
            return Err(Error::schema(format!(
                "{location}: <{kind}> declares <{field}> more than once"
            )));
        }
    }
    for child in elements(node) {
        let name = child.tag_name().name();
        if fields.contains(&name) {
            if elements(child).next().is_some() {
                return Err(Error::schema(format!(
                    "{location}: <{name}> must not have child elements"
                )));
            }
        } else if !optional.contains(&name) {
            return Err(Error::schema(format!(
                "{location}: unexpected <{name}> in <{kind}>"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_str(xml: &str) -> Result<()> {
        let doc = Document::parse(xml)?;
        validate(&doc)
    }

    const MINIMAL: &str = r#"
        <Patches version="1.0">
          <Entry id="1">
            <Platform type="AMD64">
              <VersionRange min="" max="">
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
    fn test_minimal_document_validates() {
        validate_str(MINIMAL).unwrap();
    }

    #[test]
    fn test_wrong_root_rejected() {
        let err = validate_str(r#"<Patch version="1.0"/>"#).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn test_missing_document_version_rejected() {
        let err = validate_str(r#"<Patches><Entry id="1"/></Patches>"#).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn test_entry_without_platform_rejected() {
        let err =
            validate_str(r#"<Patches version="1.0"><Entry id="1"/></Patches>"#).unwrap_err();
        assert!(err.to_string().contains("Entry 1"));
    }

    #[test]
    fn test_bad_platform_type_rejected() {
        let xml = MINIMAL.replace("AMD64", "ARM64");
        let err = validate_str(&xml).unwrap_err();
        assert!(err.to_string().contains("ARM64"));
    }

    #[test]
    fn test_unknown_patch_kind_reported() {
        let xml = MINIMAL.replace("PatchDirect", "PatchMagic");
        let err = validate_str(&xml).unwrap_err();
        assert!(matches!(err, Error::UnknownPatchKind(_)));
        assert!(err.to_string().contains("PatchMagic"));
    }

    #[test]
    fn test_missing_field_names_location() {
        let xml = MINIMAL.replace("<Value>CC DD EE</Value>", "");
        let err = validate_str(&xml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Entry 1"), "{msg}");
        assert!(msg.contains("Platform AMD64"), "{msg}");
        assert!(msg.contains("Value"), "{msg}");
    }

    #[test]
    fn test_two_patches_in_one_range_rejected() {
        let xml = MINIMAL.replace(
            "</PatchDirect>",
            "</PatchDirect><PatchDwords><Section/><Target>AA</Target></PatchDwords>",
        );
        assert!(validate_str(&xml).is_err());
    }
}
