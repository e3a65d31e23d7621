//! Shared fixtures for integration tests.
#![allow(dead_code)]

use docsign_agent::certificates::{enroll, EnrollOptions};
use docsign_agent::pin::Pin;
use std::path::Path;
use tempfile::TempDir;

/// PIN used by every protected test key.
pub const TEST_PIN: &str = "4321";

/// Enrol a 1024-bit certificate. Small keys and few KDF rounds keep the
/// suite fast.
pub fn enroll_test(store: &Path, subject: &str, stem: &str, pin: Option<&str>) {
    let mut options = EnrollOptions::new(subject)
        .with_key_bits(1024)
        .with_kdf_iterations(1_000)
        .with_file_stem(stem);
    if let Some(pin) = pin {
        options = options.with_pin(Pin::new(pin));
    }
    enroll(store, &options).expect("enroll");
}

/// Store holding `CN=Alice` (no PIN) as `a_alice` and `CN=Carol` (PIN
/// protected) as `c_carol`, plus `b_orphan`, a certificate whose key was
/// removed.
pub fn standard_store() -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    enroll_test(dir.path(), "CN=Alice", "a_alice", None);
    enroll_test(dir.path(), "CN=Bob", "b_orphan", None);
    std::fs::remove_file(dir.path().join("b_orphan.key")).expect("remove key");
    enroll_test(dir.path(), "CN=Carol", "c_carol", Some(TEST_PIN));
    dir
}

/// Minimal classic-xref PDF with `pages` A4 pages.
pub fn sample_pdf(pages: usize) -> Vec<u8> {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages),
    ];
    for i in 0..pages {
        let content = format!("BT /F1 12 Tf 72 720 Td (Page {}) Tj ET", i + 1);
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] /Contents {} 0 R >>",
            4 + 2 * i
        ));
        objects.push(format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content));
    }

    let mut pdf = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    pdf
}
