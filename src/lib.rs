// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::should_implement_trait)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # docsign-agent
//!
//! Local signing agent for a browser-based document-signing application.
//! Browsers cannot reach certificates stored on the signer's machine; this
//! crate does, and exposes them over a loopback HTTP API.
//!
//! ## Core Features
//!
//! - **Certificate discovery**: a directory of PEM/DER certificates with
//!   optional PKCS#8 keys, PIN-protected or not
//! - **PIN challenges**: at most three attempts per signing call, answered
//!   on the console, over HTTP, or handed back to the caller
//! - **Detached CMS**: SHA-256 / RSA PKCS#1 v1.5 SignedData with the signer
//!   certificate embedded
//! - **PDF signing**: visible protocol stamp plus an `adbe.pkcs7.detached`
//!   signature, appended as one incremental update so the submitted bytes
//!   stay untouched
//! - **Verification**: detached CMS and signed PDFs
//!
//! ## Quick Start
//!
//! ```ignore
//! use docsign_agent::certificates::CertificateSelector;
//! use docsign_agent::config::AgentConfig;
//! use docsign_agent::pin::ConsolePrompter;
//! use docsign_agent::service::SigningService;
//! use docsign_agent::stamp::PdfStampOptions;
//!
//! let service = SigningService::from_config(&AgentConfig::new().with_store("certs"));
//! let pdf = std::fs::read("contract.pdf")?;
//! let signed = service
//!     .sign_pdf(pdf, Some(&CertificateSelector::Index(0)), PdfStampOptions::default(), None, &ConsolePrompter, false)
//!     .await?;
//! std::fs::write("contract-signed.pdf", signed.pdf)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! agent (axum) / bin ──> service ──> certificates
//!                                 ├─> pin ──> signing
//!                                 └─> signatures ──> stamp ──> writer ──> document
//! ```
//!
//! ## Standards
//!
//! - ISO 32000-1:2008 (PDF 1.7): syntax, cross-reference streams, digital
//!   signatures (12.8)
//! - RFC 5652 (CMS)
//! - RFC 5958 / RFC 8018 (PKCS#8, PBES2)

#![warn(missing_docs)]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod filters;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;

// Writing
pub mod writer;

// Stamp and signature field
pub mod stamp;

// PDF signatures
pub mod signatures;

// Certificates, PINs and CMS
pub mod certificates;
pub mod pin;
pub mod signing;

// Agent
pub mod agent;
pub mod config;
pub mod service;

#[cfg(test)]
mod test_support;

// Re-exports
pub use document::PdfDocument;
pub use error::{Error, Result};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
