//! Folder-backed certificate directory.
//!
//! Layout, per certificate:
//!
//! ```text
//! alice.pem     certificate (PEM: .pem .crt .cer, or DER: .der)
//! alice.key     PKCS#8 PEM key, `ENCRYPTED PRIVATE KEY` when PIN-protected
//! alice.token   key lives on a hardware token; file holds its description
//! ```

use super::{Certificate, CertificateDirectory, DirectoryCapabilities, KeyHandle};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

const PEM_EXTENSIONS: [&str; 3] = ["pem", "crt", "cer"];
const DER_EXTENSION: &str = "der";

/// Certificates and keys stored as files in one directory.
#[derive(Debug, Clone)]
pub struct FileCertificateStore {
    root: PathBuf,
}

impl FileCertificateStore {
    /// Use `root` as the store. Nothing is read until [`list`](CertificateDirectory::list).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn certificate_files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {}", self.root.display(), e)))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::StoreUnavailable(format!("{}: {}", self.root.display(), e)))?
                .path();
            let is_certificate = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .is_some_and(|e| e == DER_EXTENSION || PEM_EXTENSIONS.contains(&e.as_str()));
            if is_certificate && path.is_file() {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    fn load(path: &Path) -> Result<Certificate> {
        let raw = std::fs::read(path)?;
        let der = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(DER_EXTENSION) => raw,
            _ => {
                let (_, pem) = x509_parser::pem::parse_x509_pem(&raw)
                    .map_err(|e| Error::Crypto(format!("not a PEM certificate: {}", e)))?;
                if pem.label != "CERTIFICATE" {
                    return Err(Error::Crypto(format!("unexpected PEM label {}", pem.label)));
                }
                pem.contents
            },
        };
        Certificate::from_der(der, Self::load_key(path)?)
    }

    fn load_key(certificate: &Path) -> Result<KeyHandle> {
        let key_path = certificate.with_extension("key");
        if key_path.is_file() {
            let pem = Zeroizing::new(std::fs::read_to_string(&key_path)?);
            let encrypted = match der::pem::decode_label(pem.as_bytes()) {
                Ok("ENCRYPTED PRIVATE KEY") => true,
                Ok("PRIVATE KEY") => false,
                Ok(other) => {
                    log::warn!("{}: unsupported key label {}, expected PKCS#8", key_path.display(), other);
                    return Ok(KeyHandle::None);
                },
                Err(e) => {
                    log::warn!("{}: not a PEM key: {}", key_path.display(), e);
                    return Ok(KeyHandle::None);
                },
            };
            return Ok(KeyHandle::Software { pem, encrypted });
        }

        let token_path = certificate.with_extension("token");
        if token_path.is_file() {
            let description = std::fs::read_to_string(&token_path)?.trim().to_string();
            let description = if description.is_empty() {
                "Hardware token".to_string()
            } else {
                description
            };
            return Ok(KeyHandle::HardwareToken { description });
        }
        Ok(KeyHandle::None)
    }
}

impl CertificateDirectory for FileCertificateStore {
    fn list(&self, include_only_with_private_key: bool) -> Result<Vec<Certificate>> {
        let mut certificates = Vec::new();
        for path in self.certificate_files()? {
            match Self::load(&path) {
                Ok(cert) => certificates.push(cert),
                Err(e) => log::warn!("skipping {}: {}", path.display(), e),
            }
        }
        if include_only_with_private_key {
            certificates.retain(|c| c.has_private_key);
        }
        for (index, cert) in certificates.iter_mut().enumerate() {
            cert.index = index;
        }
        log::debug!(
            "listed {} certificates from {} (keys only: {})",
            certificates.len(),
            self.root.display(),
            include_only_with_private_key
        );
        Ok(certificates)
    }

    fn capabilities(&self) -> DirectoryCapabilities {
        DirectoryCapabilities {
            supports_hardware_pin_entry: false,
        }
    }
}
