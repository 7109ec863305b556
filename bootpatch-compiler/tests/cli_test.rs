//! CLI smoke tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const SAMPLE: &str = r#"
    <Patches version="1.0">
      <Entry id="1">
        <Platform type="AMD64">
          <VersionRange min="" max="">
            <PatchDirect>
              <Section>.text</Section>
              <Target>74 05 ??</Target>
              <Value>EB 05 90</Value>
            </PatchDirect>
          </VersionRange>
        </Platform>
      </Entry>
    </Patches>"#;

#[test]
fn compiles_to_explicit_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.xml");
    let output = dir.path().join("sample.patch");
    fs::write(&input, SAMPLE).unwrap();

    Command::cargo_bin("bootpatch-compiler")
        .unwrap()
        .arg(&input)
        .arg(&output)
        .assert()
        .success();

    let artifact = fs::read(&output).unwrap();
    assert_eq!(artifact[..2], 0x7C9Au16.to_le_bytes());
}

#[test]
fn output_directory_gets_default_name() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.xml");
    fs::write(&input, SAMPLE).unwrap();

    Command::cargo_bin("bootpatch-compiler")
        .unwrap()
        .arg(&input)
        .arg(dir.path())
        .assert()
        .success();

    assert!(dir.path().join("sample.patch").exists());
}

#[test]
fn invalid_document_fails_with_context() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.xml");
    fs::write(&input, SAMPLE.replace("EB 05 90", "EB 05")).unwrap();

    Command::cargo_bin("bootpatch-compiler")
        .unwrap()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to compile"));
}

#[test]
fn missing_input_argument_fails() {
    Command::cargo_bin("bootpatch-compiler")
        .unwrap()
        .assert()
        .failure();
}
