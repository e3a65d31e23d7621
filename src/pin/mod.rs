//! PIN material and the challenge protocol around it.
//!
//! [`Pin`] wraps the secret so it is zeroized on drop and never shows up in
//! `Debug` output. The retry loop lives in [`PinChallengeController`];
//! [`PinPrompter`] is the seam between that loop and whoever can answer (a
//! console, an HTTP client, or nobody).

mod controller;
mod registry;

pub use controller::{PinChallengeController, MAX_PIN_ATTEMPTS};
pub use registry::{PendingChallenge, PinRegistry, RegistryPrompter};

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;
use zeroize::Zeroizing;

/// A PIN or passphrase.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(Zeroizing<String>);

impl Pin {
    /// Wrap a PIN.
    pub fn new(pin: impl Into<String>) -> Self {
        Self(Zeroizing::new(pin.into()))
    }

    /// The secret itself.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the PIN is the empty string, which means "cancel".
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(<redacted>)")
    }
}

impl From<String> for Pin {
    fn from(pin: String) -> Self {
        Self::new(pin)
    }
}

/// Answer to a PIN prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinReply {
    /// The user typed a PIN. Empty means cancel.
    Pin(Pin),
    /// The user dismissed the prompt
    Cancelled,
    /// Nobody can answer interactively; hand the state back to the caller
    Deferred,
}

/// Why a PIN is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PinChallengeReason {
    /// The key is protected and no PIN was given yet
    Required,
    /// The previous PIN was wrong
    Retry,
}

/// What a prompter may show to the user. Never carries the PIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinChallengeInfo {
    /// Identifier of the pending challenge
    pub id: Uuid,
    /// Subject of the certificate whose key is locked
    pub certificate_subject: String,
    /// Thumbprint of that certificate
    pub thumbprint: String,
    /// Why the PIN is asked for
    pub reason: PinChallengeReason,
    /// Attempts left, counting the one being prompted for
    pub attempts_remaining: u32,
}

/// Source of PINs for the challenge controller.
#[async_trait]
pub trait PinPrompter: Send + Sync {
    /// Ask for a PIN. Implementations must not log the answer.
    async fn prompt(&self, challenge: &PinChallengeInfo) -> PinReply;
}

/// Prompter for callers that cannot answer interactively, such as a plain
/// HTTP request. Every prompt is deferred.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredPrompter;

#[async_trait]
impl PinPrompter for DeferredPrompter {
    async fn prompt(&self, _challenge: &PinChallengeInfo) -> PinReply {
        PinReply::Deferred
    }
}

/// Masked terminal input through `rpassword`. Empty input cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    /// Prompt text for a challenge.
    pub fn message(challenge: &PinChallengeInfo) -> String {
        match challenge.reason {
            PinChallengeReason::Required => format!("PIN for {}: ", challenge.certificate_subject),
            PinChallengeReason::Retry => format!(
                "Wrong PIN, {} attempts remaining. PIN for {}: ",
                challenge.attempts_remaining, challenge.certificate_subject
            ),
        }
    }
}

#[async_trait]
impl PinPrompter for ConsolePrompter {
    async fn prompt(&self, challenge: &PinChallengeInfo) -> PinReply {
        let message = Self::message(challenge);
        let read = tokio::task::spawn_blocking(move || rpassword::prompt_password(message)).await;
        match read {
            Ok(Ok(pin)) if !pin.is_empty() => PinReply::Pin(Pin::new(pin)),
            Ok(Ok(_)) => PinReply::Cancelled,
            Ok(Err(e)) => {
                log::warn!("could not read PIN from the terminal: {}", e);
                PinReply::Cancelled
            },
            Err(e) => {
                log::warn!("PIN prompt task failed: {}", e);
                PinReply::Cancelled
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_debug_is_redacted() {
        let pin = Pin::new("1234");
        assert_eq!(format!("{:?}", pin), "Pin(<redacted>)");
        assert_eq!(format!("{:?}", PinReply::Pin(pin.clone())), "Pin(Pin(<redacted>))");
        assert_eq!(pin.expose(), "1234");
    }

    #[test]
    fn test_empty_pin() {
        assert!(Pin::new("").is_empty());
        assert!(!Pin::from("0".to_string()).is_empty());
    }

    #[test]
    fn test_console_messages() {
        let mut challenge = PinChallengeInfo {
            id: Uuid::new_v4(),
            certificate_subject: "CN=Alice".to_string(),
            thumbprint: "AB".to_string(),
            reason: PinChallengeReason::Required,
            attempts_remaining: 3,
        };
        assert_eq!(ConsolePrompter::message(&challenge), "PIN for CN=Alice: ");
        challenge.reason = PinChallengeReason::Retry;
        challenge.attempts_remaining = 2;
        assert!(ConsolePrompter::message(&challenge).starts_with("Wrong PIN, 2 attempts remaining"));
    }

    #[test]
    fn test_challenge_info_serializes_without_pin() {
        let challenge = PinChallengeInfo {
            id: Uuid::nil(),
            certificate_subject: "CN=Alice".to_string(),
            thumbprint: "AB".to_string(),
            reason: PinChallengeReason::Retry,
            attempts_remaining: 1,
        };
        let json = serde_json::to_value(&challenge).unwrap();
        assert_eq!(json["reason"], "retry");
        assert_eq!(json["attempts_remaining"], 1);
    }
}
