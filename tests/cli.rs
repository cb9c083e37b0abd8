//! CLI test cases.
//!
//! None of these talk to a real OCR service. Recognition itself is covered by
//! the unit tests, which use scripted backends.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("tiff2text").unwrap();
    for prefix in ["OCR", "RECOGNIZE_TEXT"] {
        cmd.env_remove(format!("{prefix}_ENDPOINT"));
        cmd.env_remove(format!("{prefix}_SUBSCRIPTION_KEY"));
    }
    cmd
}

#[test]
fn test_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("RECOGNIZE_TEXT_ENDPOINT"));
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_document_schema() {
    cmd()
        .arg("schema")
        .arg("document")
        .assert()
        .success()
        .stdout(predicate::str::contains("recognize_text"));
}

#[test]
fn test_file_input_schema() {
    cmd()
        .arg("schema")
        .arg("file-input")
        .assert()
        .success()
        .stdout(predicate::str::contains("path"));
}

#[test]
fn test_print_store() {
    cmd()
        .arg("print")
        .arg("tests/fixtures/documents.jsonl")
        .arg("--batch-size")
        .arg("2")
        .assert()
        .success()
        .stderr(predicate::str::contains("letter.tif - Page 1 of 1"))
        .stderr(predicate::str::contains("Dear Customer,"))
        .stderr(predicate::str::contains("invoice.tif - Page 2 of 2"))
        .stderr(predicate::str::contains("Printed 5 documents"));
}

#[test]
fn test_print_reads_older_store_records() {
    cmd()
        .arg("print")
        .arg("tests/fixtures/documents.jsonl")
        .assert()
        .success()
        .stderr(predicate::str::contains("legacy-letter.tif - Page 1 of 1"))
        .stderr(predicate::str::contains("Legacy record"))
        .stderr(predicate::str::contains("legacy-memo.tif - Page 1 of 1"))
        .stderr(predicate::str::contains("Memo from 2019"));
}

#[test]
fn test_print_rejects_zero_batch_size() {
    cmd()
        .arg("print")
        .arg("tests/fixtures/documents.jsonl")
        .arg("--batch-size")
        .arg("0")
        .assert()
        .failure();
}

#[test]
fn test_follow_requires_store() {
    cmd().arg("print").arg("--follow").assert().failure();
}

#[test]
fn test_recognize_without_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.jsonl");
    std::fs::write(&input, "{\"path\":\"missing.tif\"}\n").unwrap();
    cmd()
        .current_dir(dir.path())
        .arg("recognize")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("RECOGNIZE_TEXT_ENDPOINT"));
}

#[test]
fn test_recognize_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.jsonl");
    std::fs::write(&input, "{\"path\":\"missing.tif\"}\n").unwrap();
    cmd()
        .current_dir(dir.path())
        .env("OCR_ENDPOINT", "http://127.0.0.1:9/")
        .env("OCR_SUBSCRIPTION_KEY", "test-key")
        .arg("recognize")
        .arg("--backend")
        .arg("ocr")
        .arg(&input)
        .arg("--out")
        .arg(dir.path().join("out.jsonl"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.tif"));
}
