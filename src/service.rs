//! Signing operations shared by the HTTP host and the CLI.
//!
//! [`SigningService`] owns the device lock. Everything that touches a key
//! runs under it, so concurrent callers queue and at most one PIN challenge
//! is ever pending. PDF parsing and stamping happen before the lock is
//! taken. Wrong PINs are counted per thumbprint under the same lock, so a
//! client re-sending guesses one request at a time still hits the limit.

use crate::certificates::{
    normalize_thumbprint, Certificate, CertificateDirectory, CertificateSelector, DirectoryCapabilities,
    FileCertificateStore,
};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::pin::{Pin, PinChallengeController, PinPrompter};
use crate::signatures::{PdfSignOutput, PdfSigningPipeline};
use crate::signing::{CmsSigner, DetachedSignature, DetachedSigner};
use crate::stamp::PdfStampOptions;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A signature together with the certificate that made it.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    /// The certificate used
    pub certificate: Certificate,
    /// The detached CMS signature
    pub signature: DetachedSignature,
}

/// Lists certificates and signs payloads and PDFs.
pub struct SigningService {
    directory: Arc<dyn CertificateDirectory>,
    signer: Arc<dyn DetachedSigner>,
    pipeline: PdfSigningPipeline,
    controller: PinChallengeController,
    default_certificate: Option<String>,
    /// Wrong-PIN counts by thumbprint, held for the life of the service.
    device: Mutex<HashMap<String, u32>>,
}

impl std::fmt::Debug for SigningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningService")
            .field("pipeline", &self.pipeline)
            .field("default_certificate", &self.default_certificate)
            .finish_non_exhaustive()
    }
}

impl SigningService {
    /// Service over any directory and signer.
    pub fn new(directory: Arc<dyn CertificateDirectory>, signer: Arc<dyn DetachedSigner>) -> Self {
        Self {
            directory,
            signer,
            pipeline: PdfSigningPipeline::new(),
            controller: PinChallengeController::new(),
            default_certificate: None,
            device: Mutex::new(HashMap::new()),
        }
    }

    /// File store and software CMS signer as configured.
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut service = Self::new(
            Arc::new(FileCertificateStore::new(config.store.clone())),
            Arc::new(CmsSigner),
        )
        .with_pipeline(PdfSigningPipeline::with_capacity(config.signature_capacity));
        service.default_certificate = config.default_certificate.clone();
        service
    }

    /// Replace the PDF pipeline.
    pub fn with_pipeline(mut self, pipeline: PdfSigningPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Thumbprint used when a request names no certificate.
    pub fn with_default_certificate(mut self, thumbprint: impl Into<String>) -> Self {
        self.default_certificate = Some(thumbprint.into());
        self
    }

    /// Current listing. `all` includes certificates without a key.
    pub fn certificates(&self, all: bool) -> Result<Vec<Certificate>> {
        self.directory.list(!all)
    }

    /// Capabilities of the certificate directory.
    pub fn capabilities(&self) -> DirectoryCapabilities {
        self.directory.capabilities()
    }

    /// Whether a signing call currently holds the device.
    pub fn is_busy(&self) -> bool {
        self.device.try_lock().is_err()
    }

    /// Find the certificate a request refers to.
    ///
    /// Indexes refer to the default listing, which only holds certificates
    /// with a key. Without a selector the configured default thumbprint is
    /// used.
    pub fn resolve_certificate(&self, selector: Option<&CertificateSelector>) -> Result<Certificate> {
        let fallback;
        let selector = match (selector, &self.default_certificate) {
            (Some(selector), _) => selector,
            (None, Some(thumbprint)) => {
                fallback = CertificateSelector::Thumbprint(normalize_thumbprint(thumbprint));
                &fallback
            },
            (None, None) => {
                return Err(Error::InvalidCertificateSelector(
                    "no certificate selected and no default configured".to_string(),
                ))
            },
        };
        let listing = self.directory.list(true)?;
        let certificate = selector.select(&listing)?.clone();
        log::debug!("{} resolved to {}", selector, certificate.subject);
        Ok(certificate)
    }

    /// Produce a detached signature over `payload`.
    pub async fn sign(
        &self,
        payload: &[u8],
        selector: Option<&CertificateSelector>,
        pin: Option<Pin>,
        prompter: &dyn PinPrompter,
    ) -> Result<SignedPayload> {
        if payload.is_empty() {
            return Err(Error::InvalidRequest("payload is empty".to_string()));
        }
        let certificate = self.resolve_certificate(selector)?;
        let signature = self.sign_locked(payload, &certificate, pin, prompter).await?;
        log::info!("signed {} bytes with {}", payload.len(), certificate.subject);
        Ok(SignedPayload { certificate, signature })
    }

    /// Stamp and sign a PDF.
    ///
    /// Signer name and certificate and device descriptions default to the
    /// selected certificate.
    pub async fn sign_pdf(
        &self,
        pdf: Vec<u8>,
        selector: Option<&CertificateSelector>,
        mut options: PdfStampOptions,
        pin: Option<Pin>,
        prompter: &dyn PinPrompter,
        include_p7s: bool,
    ) -> Result<PdfSignOutput> {
        if pdf.is_empty() {
            return Err(Error::InvalidRequest("PDF is empty".to_string()));
        }
        let certificate = self.resolve_certificate(selector)?;
        options
            .signer_name
            .get_or_insert_with(|| certificate.display_name().to_string());
        options
            .certificate_description
            .get_or_insert_with(|| certificate.description());
        options
            .token_description
            .get_or_insert_with(|| certificate.key().description());

        let prepared = self.pipeline.prepare(pdf, &options)?;
        let signed_bytes = prepared.signed_bytes()?;
        let signature = self.sign_locked(&signed_bytes, &certificate, pin, prompter).await?;
        let output = prepared.finish(&signature.der, include_p7s)?;
        log::info!(
            "signed PDF {} with {} ({} bytes)",
            output.protocol,
            certificate.subject,
            output.pdf.len()
        );
        Ok(output)
    }

    async fn sign_locked(
        &self,
        payload: &[u8],
        certificate: &Certificate,
        pin: Option<Pin>,
        prompter: &dyn PinPrompter,
    ) -> Result<DetachedSignature> {
        let mut strikes = self.device.lock().await;
        let mut wrong = strikes.get(&certificate.thumbprint).copied().unwrap_or(0);
        let result = self
            .controller
            .run_counted(self.signer.as_ref(), payload, certificate, pin, prompter, &mut wrong)
            .await;
        if wrong == 0 {
            strikes.remove(&certificate.thumbprint);
        } else {
            strikes.insert(certificate.thumbprint.clone(), wrong);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::{test_certificate, KeyHandle};
    use crate::pin::DeferredPrompter;
    use crate::signing::SignOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticDirectory(Vec<Certificate>);

    impl CertificateDirectory for StaticDirectory {
        fn list(&self, include_only_with_private_key: bool) -> Result<Vec<Certificate>> {
            let mut out: Vec<Certificate> = self
                .0
                .iter()
                .filter(|c| !include_only_with_private_key || c.has_private_key)
                .cloned()
                .collect();
            for (i, c) in out.iter_mut().enumerate() {
                c.index = i;
            }
            Ok(out)
        }

        fn capabilities(&self) -> DirectoryCapabilities {
            DirectoryCapabilities::default()
        }
    }

    struct EchoSigner;

    impl DetachedSigner for EchoSigner {
        fn sign(&self, payload: &[u8], certificate: &Certificate, _pin: Option<&Pin>) -> Result<SignOutcome> {
            Ok(SignOutcome::Signed(DetachedSignature {
                der: payload[..payload.len().min(8)].to_vec(),
                subject: certificate.subject.clone(),
                issuer: certificate.issuer.clone(),
                serial_number: certificate.serial_number.clone(),
                signed_at: chrono::Utc::now(),
            }))
        }
    }

    fn service() -> SigningService {
        let software = KeyHandle::Software {
            pem: Default::default(),
            encrypted: false,
        };
        let no_key = test_certificate("CN=Nobody", KeyHandle::None);
        let mut alice = test_certificate("CN=Alice", software.clone());
        alice.thumbprint = "AA".repeat(20);
        let mut bob = test_certificate("CN=Bob", software);
        bob.thumbprint = "BB".repeat(20);
        SigningService::new(Arc::new(StaticDirectory(vec![no_key, alice, bob])), Arc::new(EchoSigner))
    }

    #[test]
    fn test_index_refers_to_key_listing() {
        let service = service();
        let cert = service.resolve_certificate(Some(&CertificateSelector::Index(0))).unwrap();
        assert_eq!(cert.subject, "CN=Alice");
        assert_eq!(service.certificates(true).unwrap().len(), 3);
        assert_eq!(service.certificates(false).unwrap().len(), 2);
    }

    #[test]
    fn test_default_certificate_fallback() {
        let err = service().resolve_certificate(None).unwrap_err();
        assert_eq!(err.kind(), "invalid_certificate_selector");

        let service = service().with_default_certificate("bb:".repeat(20));
        assert_eq!(service.resolve_certificate(None).unwrap().subject, "CN=Bob");
    }

    #[tokio::test]
    async fn test_sign_rejects_empty_payload() {
        let err = service()
            .sign(b"", Some(&CertificateSelector::Index(0)), None, &DeferredPrompter)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[tokio::test]
    async fn test_sign_reports_certificate() {
        let service = service();
        let signed = service
            .sign(b"hello", Some(&CertificateSelector::Index(1)), None, &DeferredPrompter)
            .await
            .unwrap();
        assert_eq!(signed.certificate.subject, "CN=Bob");
        assert_eq!(signed.signature.der, b"hello");
        assert!(!service.is_busy());
    }

    #[tokio::test]
    async fn test_sign_pdf_fills_labels_from_certificate() {
        let service = service().with_pipeline(PdfSigningPipeline::with_capacity(16));
        let output = service
            .sign_pdf(
                crate::test_support::sample_pdf(1),
                Some(&CertificateSelector::Index(0)),
                PdfStampOptions::default(),
                None,
                &DeferredPrompter,
                true,
            )
            .await
            .unwrap();
        assert!(output.protocol.starts_with("NS-"));
        assert_eq!(output.p7s.as_ref().map(Vec::len), Some(8));
        let text = String::from_utf8_lossy(&output.pdf);
        assert!(text.contains("/Name (Alice)"));
    }

    /// Accepts "1234" and records how many calls overlap.
    #[derive(Default)]
    struct TrackingSigner {
        calls: AtomicUsize,
        current: AtomicUsize,
        max: AtomicUsize,
    }

    impl DetachedSigner for TrackingSigner {
        fn sign(&self, payload: &[u8], certificate: &Certificate, pin: Option<&Pin>) -> Result<SignOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.current.fetch_sub(1, Ordering::SeqCst);
            match pin.map(Pin::expose) {
                None => Ok(SignOutcome::PinRequired),
                Some("1234") => EchoSigner.sign(payload, certificate, pin),
                Some(_) => Ok(SignOutcome::PinInvalid),
            }
        }
    }

    fn tracked_service() -> (Arc<SigningService>, Arc<TrackingSigner>) {
        let signer = Arc::new(TrackingSigner::default());
        let mut alice = test_certificate(
            "CN=Alice",
            KeyHandle::Software {
                pem: Default::default(),
                encrypted: true,
            },
        );
        alice.thumbprint = "AA".repeat(20);
        let service = SigningService::new(Arc::new(StaticDirectory(vec![alice])), signer.clone());
        (Arc::new(service), signer)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_signs_take_turns_on_device() {
        let (service, signer) = tracked_service();
        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let payload = format!("document {}", i);
                    service
                        .sign(
                            payload.as_bytes(),
                            Some(&CertificateSelector::Index(0)),
                            Some(Pin::new("1234")),
                            &DeferredPrompter,
                        )
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(signer.calls.load(Ordering::SeqCst), 4);
        assert_eq!(signer.max.load(Ordering::SeqCst), 1);
        assert!(!service.is_busy());
    }

    #[tokio::test]
    async fn test_wrong_pins_lock_certificate_across_calls() {
        let (service, signer) = tracked_service();
        let alice = Some(CertificateSelector::Index(0));
        let attempt = |pin: &'static str| {
            let service = service.clone();
            let alice = alice.clone();
            async move {
                service
                    .sign(b"doc", alice.as_ref(), Some(Pin::new(pin)), &DeferredPrompter)
                    .await
            }
        };

        let err = attempt("0000").await.unwrap_err();
        assert!(matches!(err, Error::PinInvalid { attempts_remaining: 2 }));
        let err = attempt("0000").await.unwrap_err();
        assert!(matches!(err, Error::PinInvalid { attempts_remaining: 1 }));
        let err = attempt("0000").await.unwrap_err();
        assert_eq!(err.kind(), "pin_attempts_exhausted");
        assert_eq!(signer.calls.load(Ordering::SeqCst), 3);

        let err = attempt("1234").await.unwrap_err();
        assert_eq!(err.kind(), "pin_attempts_exhausted");
        assert_eq!(signer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_correct_pin_clears_wrong_count() {
        let (service, _) = tracked_service();
        let alice = Some(CertificateSelector::Index(0));
        for _ in 0..2 {
            service
                .sign(b"doc", alice.as_ref(), Some(Pin::new("0000")), &DeferredPrompter)
                .await
                .unwrap_err();
        }
        service
            .sign(b"doc", alice.as_ref(), Some(Pin::new("1234")), &DeferredPrompter)
            .await
            .unwrap();
        let err = service
            .sign(b"doc", alice.as_ref(), Some(Pin::new("0000")), &DeferredPrompter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PinInvalid { attempts_remaining: 2 }));
    }
}
