//! The bounded PIN retry loop.

use super::{Pin, PinChallengeInfo, PinChallengeReason, PinPrompter, PinReply};
use crate::certificates::Certificate;
use crate::error::{Error, Result};
use crate::signing::{DetachedSignature, DetachedSigner, SignOutcome};
use uuid::Uuid;

/// Wrong PINs accepted in one run before giving up.
pub const MAX_PIN_ATTEMPTS: u32 = 3;

/// Drives a [`DetachedSigner`] through PIN prompts until it signs, the
/// device fails, the user gives up, or [`MAX_PIN_ATTEMPTS`] wrong PINs
/// have been tried.
///
/// The controller owns no device state. Callers that need one challenge
/// at a time hold their device lock around [`run`](Self::run), and keep the
/// wrong-PIN count for [`run_counted`](Self::run_counted) under that lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinChallengeController {
    max_attempts: u32,
}

impl PinChallengeController {
    /// Controller with the standard attempt limit.
    pub fn new() -> Self {
        Self {
            max_attempts: MAX_PIN_ATTEMPTS,
        }
    }

    /// Sign `payload`, prompting for a PIN as often as needed.
    pub async fn run(
        &self,
        signer: &dyn DetachedSigner,
        payload: &[u8],
        certificate: &Certificate,
        initial_pin: Option<Pin>,
        prompter: &dyn PinPrompter,
    ) -> Result<DetachedSignature> {
        let mut wrong = 0;
        self.run_counted(signer, payload, certificate, initial_pin, prompter, &mut wrong)
            .await
    }

    /// Like [`run`](Self::run), but wrong PINs are counted in `wrong`,
    /// which outlives the call.
    ///
    /// Callers that hand PIN errors back to a client (deferred prompting)
    /// keep one counter per key so the limit holds across requests. Once
    /// `wrong` has reached the limit the signer is not called again. A
    /// successful signature resets it.
    pub async fn run_counted(
        &self,
        signer: &dyn DetachedSigner,
        payload: &[u8],
        certificate: &Certificate,
        initial_pin: Option<Pin>,
        prompter: &dyn PinPrompter,
        wrong: &mut u32,
    ) -> Result<DetachedSignature> {
        let limit = if self.max_attempts == 0 {
            MAX_PIN_ATTEMPTS
        } else {
            self.max_attempts
        };
        if *wrong >= limit {
            log::warn!("PIN of {} is locked after {} wrong attempts", certificate.thumbprint, *wrong);
            return Err(Error::PinAttemptsExhausted);
        }
        let mut pin = initial_pin;
        let mut calls = 0u32;

        loop {
            calls += 1;
            let outcome = sign_blocking(signer, payload, certificate, pin.as_ref())?;
            let reason = match outcome {
                SignOutcome::Signed(signature) => {
                    *wrong = 0;
                    log::debug!("signed with {} after {} attempt(s)", certificate.thumbprint, calls);
                    return Ok(signature);
                },
                SignOutcome::DeviceError(message) => {
                    log::error!("device error for {}: {}", certificate.thumbprint, message);
                    return Err(Error::DeviceConfiguration(message));
                },
                SignOutcome::PinRequired if pin.is_none() => PinChallengeReason::Required,
                SignOutcome::PinRequired | SignOutcome::PinInvalid => {
                    *wrong += 1;
                    log::warn!("wrong PIN for {} ({} of {})", certificate.thumbprint, *wrong, limit);
                    if *wrong >= limit {
                        return Err(Error::PinAttemptsExhausted);
                    }
                    PinChallengeReason::Retry
                },
            };
            // The rejected PIN is dropped (and zeroized) before prompting again.
            pin = None;

            let challenge = PinChallengeInfo {
                id: Uuid::new_v4(),
                certificate_subject: certificate.subject.clone(),
                thumbprint: certificate.thumbprint.clone(),
                reason,
                attempts_remaining: limit - *wrong,
            };
            match prompter.prompt(&challenge).await {
                PinReply::Pin(entered) if !entered.is_empty() => pin = Some(entered),
                PinReply::Pin(_) | PinReply::Cancelled => {
                    log::info!("PIN prompt for {} cancelled", certificate.thumbprint);
                    return Err(Error::OperationCancelled);
                },
                PinReply::Deferred => {
                    return Err(match reason {
                        PinChallengeReason::Required => Error::PinRequired,
                        PinChallengeReason::Retry => Error::PinInvalid {
                            attempts_remaining: challenge.attempts_remaining,
                        },
                    });
                },
            }
        }
    }
}

/// Run the signer off the async worker when the runtime allows it. Key
/// decryption and RSA signing take long enough to stall other requests.
fn sign_blocking(
    signer: &dyn DetachedSigner,
    payload: &[u8],
    certificate: &Certificate,
    pin: Option<&Pin>,
) -> Result<SignOutcome> {
    match tokio::runtime::Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(tokio::runtime::RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(|| signer.sign(payload, certificate, pin))
        },
        _ => signer.sign(payload, certificate, pin),
    }
}
