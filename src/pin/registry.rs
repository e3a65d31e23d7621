//! Pending PIN challenges awaiting an answer.
//!
//! A challenge is a `oneshot` channel keyed by the challenge id. The HTTP
//! handlers and the console responder answer through [`PinRegistry::resolve`];
//! [`RegistryPrompter`] is the controller-side end that registers and waits.

use super::{PinChallengeInfo, PinPrompter, PinReply};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// A challenge as listed by `GET /pin/pending`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingChallenge {
    /// What was asked
    #[serde(flatten)]
    pub challenge: PinChallengeInfo,
    /// When it was registered
    pub requested_at: DateTime<Utc>,
}

struct Waiting {
    listed: PendingChallenge,
    reply: oneshot::Sender<PinReply>,
}

/// Registry of pending challenges.
#[derive(Default)]
pub struct PinRegistry {
    pending: Mutex<HashMap<Uuid, Waiting>>,
}

impl std::fmt::Debug for PinRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinRegistry").field("pending", &self.len()).finish()
    }
}

impl PinRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Waiting>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a challenge and get the receiving end of its answer.
    pub fn register(&self, challenge: PinChallengeInfo) -> oneshot::Receiver<PinReply> {
        let (tx, rx) = oneshot::channel();
        let id = challenge.id;
        let listed = PendingChallenge {
            challenge,
            requested_at: Utc::now(),
        };
        self.lock().insert(id, Waiting { listed, reply: tx });
        log::debug!("PIN challenge {} registered", id);
        rx
    }

    /// Answer a challenge. Unknown or already answered ids give
    /// [`Error::InputNotFound`].
    pub fn resolve(&self, id: Uuid, reply: PinReply) -> Result<()> {
        let waiting = self
            .lock()
            .remove(&id)
            .ok_or_else(|| Error::InputNotFound(format!("no pending PIN challenge {}", id)))?;
        if waiting.reply.send(reply).is_err() {
            log::debug!("PIN challenge {} was abandoned before the answer arrived", id);
        }
        Ok(())
    }

    /// Cancel one challenge.
    pub fn cancel(&self, id: Uuid) -> Result<()> {
        self.resolve(id, PinReply::Cancelled)
    }

    /// Cancel every pending challenge and return how many there were.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Waiting> = self.lock().drain().map(|(_, w)| w).collect();
        let count = drained.len();
        for waiting in drained {
            let _ = waiting.reply.send(PinReply::Cancelled);
        }
        if count > 0 {
            log::info!("cancelled {} pending PIN challenges", count);
        }
        count
    }

    /// Pending challenges, oldest first.
    pub fn pending(&self) -> Vec<PendingChallenge> {
        let mut listed: Vec<PendingChallenge> = self.lock().values().map(|w| w.listed.clone()).collect();
        listed.sort_by_key(|p| p.requested_at);
        listed
    }

    /// Number of pending challenges.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, id: Uuid) {
        self.lock().remove(&id);
    }
}

type Notify = Arc<dyn Fn(&PinChallengeInfo) + Send + Sync>;

/// Prompter that parks each challenge in a [`PinRegistry`] until someone
/// answers it, the timeout elapses, or it is cancelled.
#[derive(Clone)]
pub struct RegistryPrompter {
    registry: Arc<PinRegistry>,
    timeout: Option<Duration>,
    notify: Notify,
}

impl std::fmt::Debug for RegistryPrompter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryPrompter")
            .field("registry", &self.registry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RegistryPrompter {
    /// Wait at most `timeout` (forever when `None`) for each answer.
    pub fn new(registry: Arc<PinRegistry>, timeout: Option<Duration>) -> Self {
        Self {
            registry,
            timeout,
            notify: Arc::new(|_| {}),
        }
    }

    /// Call `notify` right after each challenge is registered.
    pub fn with_notify(mut self, notify: impl Fn(&PinChallengeInfo) + Send + Sync + 'static) -> Self {
        self.notify = Arc::new(notify);
        self
    }
}

#[async_trait]
impl PinPrompter for RegistryPrompter {
    async fn prompt(&self, challenge: &PinChallengeInfo) -> PinReply {
        let answer = self.registry.register(challenge.clone());
        let _pending = Registered {
            registry: &self.registry,
            id: challenge.id,
        };
        (self.notify)(challenge);

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, answer).await {
                Ok(received) => received.unwrap_or(PinReply::Cancelled),
                Err(_) => {
                    log::warn!("PIN challenge {} timed out after {:?}", challenge.id, limit);
                    PinReply::Cancelled
                },
            },
            None => answer.await.unwrap_or(PinReply::Cancelled),
        }
    }
}

/// Removes a challenge from the registry when the prompt ends, including
/// when the prompting future is dropped mid-await.
struct Registered<'a> {
    registry: &'a PinRegistry,
    id: Uuid,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.registry.forget(self.id);
    }
}
