//! The `docsign-agent` binary.

mod common;

use assert_cmd::Command;
use common::{sample_pdf, standard_store, TEST_PIN};
use docsign_agent::signatures::verify_pdf;
use docsign_agent::signing::verify_detached;

fn agent() -> Command {
    let mut cmd = Command::cargo_bin("docsign-agent").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_parse_error_exits_2() {
    let output = agent().arg("frobnicate").output().unwrap();
    assert_eq!(output.status.code(), Some(2));

    // Selector is mandatory and exclusive
    let output = agent().args(["sign", "--file", "x"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let output = agent()
        .args(["sign", "--file", "x", "--cert-index", "0", "--thumbprint", "AB"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_list_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let output = agent().arg("--store").arg(dir.path()).arg("list").output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("No certificates"));
}

#[test]
fn test_list_shows_certificates() {
    let store = standard_store();
    let output = agent().arg("--store").arg(store.path()).arg("list").output().unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("[0] CN=Alice"));
    assert!(text.contains("[1] CN=Carol"));
    assert!(!text.contains("CN=Bob"));

    let output = agent()
        .arg("--store")
        .arg(store.path())
        .args(["list", "--all"])
        .output()
        .unwrap();
    assert!(stdout(&output).contains("[1] CN=Bob"));
}

#[test]
fn test_sign_writes_p7s() {
    let store = standard_store();
    let work = tempfile::tempdir().unwrap();
    let file = work.path().join("report.txt");
    std::fs::write(&file, b"quarterly numbers").unwrap();

    let output = agent()
        .arg("--store")
        .arg(store.path())
        .args(["sign", "--cert-index", "0", "--file"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("Signed by CN=Alice"));

    let der = std::fs::read(work.path().join("report.txt.p7s")).unwrap();
    assert!(verify_detached(&der, b"quarterly numbers").is_ok());
}

#[test]
fn test_sign_with_pin_from_stdin() {
    let store = standard_store();
    let work = tempfile::tempdir().unwrap();
    let file = work.path().join("memo.txt");
    std::fs::write(&file, b"memo").unwrap();

    let output = agent()
        .arg("--store")
        .arg(store.path())
        .args(["sign", "--cert-index", "1", "--pin-stdin", "--file"])
        .arg(&file)
        .write_stdin(format!("{}\n", TEST_PIN))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("CN=Carol"));
    assert!(work.path().join("memo.txt.p7s").is_file());
}

#[test]
fn test_missing_input_reports_and_exits_0() {
    let store = standard_store();
    let output = agent()
        .arg("--store")
        .arg(store.path())
        .args(["sign", "--cert-index", "0", "--file", "/definitely/not/here.txt"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error: input not found"));
}

#[test]
fn test_pdf_sign_then_verify() {
    let store = standard_store();
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("in.pdf");
    let signed = work.path().join("out.pdf");
    std::fs::write(&input, sample_pdf(1)).unwrap();

    let output = agent()
        .arg("--store")
        .arg(store.path())
        .args(["pdf-sign", "--cert-index", "0", "--protocol", "NS-CLI-7", "--p7s", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&signed)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("protocol NS-CLI-7"));
    assert!(work.path().join("out.pdf.p7s").is_file());

    let reports = verify_pdf(&std::fs::read(&signed).unwrap()).unwrap();
    assert!(reports[0].is_valid());

    let output = agent().arg("verify-pdf").arg("--input").arg(&signed).output().unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("[valid]"));
    assert!(text.contains("signer:    CN=Alice"));
}

#[test]
fn test_enroll_then_list() {
    let dir = tempfile::tempdir().unwrap();
    let output = agent()
        .arg("--store")
        .arg(dir.path())
        .args(["enroll", "--subject", "CN=Frank", "--key-bits", "1024", "--name", "frank"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(dir.path().join("frank.key").is_file());

    let output = agent().arg("--store").arg(dir.path()).arg("list").output().unwrap();
    assert!(stdout(&output).contains("[0] CN=Frank"));
}
