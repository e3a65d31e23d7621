//! Loopback HTTP host.
//!
//! [`AgentHost`] owns the configuration, the [`SigningService`], the PIN
//! challenge registry, its own lifecycle state and the event channel. There
//! is no global instance; the binary creates one host and tests create as
//! many as they like.
//!
//! Routes:
//!
//! | Route | |
//! |---|---|
//! | `GET /status` | lifecycle state, version, pending challenges |
//! | `GET /certificates?all=bool` | certificate listing |
//! | `POST /sign` | detached CMS over a base64 payload |
//! | `POST /sign/pdf` | stamped and signed PDF |
//! | `GET /pin/pending` | open PIN challenges |
//! | `POST /pin/{id}` | answer a challenge, empty PIN cancels |
//! | `DELETE /pin/{id}` | cancel a challenge |

pub mod dto;
mod handlers;
mod middleware;
mod router;

pub use router::build_router;

use crate::config::{AgentConfig, PinPromptMode};
use crate::error::{Error, Result};
use crate::pin::{DeferredPrompter, PinChallengeInfo, PinPrompter, PinRegistry, RegistryPrompter};
use crate::service::SigningService;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    /// Created, never started
    #[default]
    NotStarted,
    /// Accepting connections
    Listening {
        /// Bound address
        address: SocketAddr,
    },
    /// Stopped; cannot be restarted
    Stopped,
}

impl AgentState {
    /// snake_case name used by `GET /status`.
    pub fn name(&self) -> &'static str {
        match self {
            AgentState::NotStarted => "not_started",
            AgentState::Listening { .. } => "listening",
            AgentState::Stopped => "stopped",
        }
    }

    /// Bound address while listening.
    pub fn address(&self) -> Option<SocketAddr> {
        match self {
            AgentState::Listening { address } => Some(*address),
            _ => None,
        }
    }
}

/// Notifications published by a host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The listener is bound
    Started {
        /// Bound address
        address: SocketAddr,
    },
    /// The listener is closed
    Stopped,
    /// A signing call waits for a PIN
    PinRequested(PinChallengeInfo),
}

/// Warning for binds that leave the loopback interface, `None` otherwise.
pub fn bind_warning(address: &SocketAddr) -> Option<String> {
    if address.ip().is_loopback() {
        return None;
    }
    Some(format!(
        "agent bound to {}: this exposes private-key operations to the local network",
        address
    ))
}

/// State shared by every request.
pub struct AgentContext {
    pub(crate) config: AgentConfig,
    pub(crate) service: Arc<SigningService>,
    pub(crate) registry: Arc<PinRegistry>,
    events: broadcast::Sender<AgentEvent>,
    state: RwLock<AgentState>,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl AgentContext {
    pub(crate) fn state(&self) -> AgentState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: AgentState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Prompter for one HTTP signing call.
    pub(crate) fn prompter(&self) -> Box<dyn PinPrompter> {
        match self.config.pin_prompt {
            PinPromptMode::Defer => Box::new(DeferredPrompter),
            PinPromptMode::Await => {
                let events = self.events.clone();
                Box::new(
                    RegistryPrompter::new(self.registry.clone(), Some(self.config.pin_timeout())).with_notify(
                        move |challenge| {
                            let _ = events.send(AgentEvent::PinRequested(challenge.clone()));
                        },
                    ),
                )
            },
        }
    }
}

/// The agent: configuration, service, PIN registry, lifecycle and events.
#[derive(Debug)]
pub struct AgentHost {
    context: Arc<AgentContext>,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl AgentHost {
    /// Host with the file store and software signer from `config`.
    pub fn new(config: AgentConfig) -> Self {
        let service = Arc::new(SigningService::from_config(&config));
        Self::with_service(config, service)
    }

    /// Host around an existing service.
    pub fn with_service(config: AgentConfig, service: Arc<SigningService>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            context: Arc::new(AgentContext {
                config,
                service,
                registry: Arc::new(PinRegistry::new()),
                events,
                state: RwLock::new(AgentState::NotStarted),
            }),
            shutdown: None,
            server: None,
        }
    }

    /// Bind and serve in the background. Returns the bound address once
    /// the listener accepts connections.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.context.state() != AgentState::NotStarted {
            return Err(Error::InvalidRequest(format!(
                "agent is {}, it can only be started once",
                self.context.state().name()
            )));
        }
        let requested = self.context.config.address();
        match bind_warning(&requested) {
            Some(warning) => log::warn!("{}", warning),
            None => log::info!("binding loopback address {}", requested),
        }
        let listener = TcpListener::bind(requested).await?;
        let address = listener.local_addr()?;

        let (tx, rx) = oneshot::channel::<()>();
        let app = build_router(self.context.clone());
        let server = tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                log::error!("agent server terminated unexpectedly: {}", e);
            }
        });

        self.shutdown = Some(tx);
        self.server = Some(server);
        self.context.set_state(AgentState::Listening { address });
        self.context.publish(AgentEvent::Started { address });
        log::info!("agent listening on {}", address);
        Ok(address)
    }

    /// Close the listener and cancel every pending PIN challenge.
    ///
    /// Waits for in-flight requests to finish. Stopping a host that is not
    /// listening only marks it stopped.
    pub async fn stop(&mut self) -> Result<()> {
        let cancelled = self.context.registry.cancel_all();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            if let Err(e) = server.await {
                log::error!("agent server task failed: {}", e);
            }
        }
        if self.context.state() != AgentState::Stopped {
            self.context.set_state(AgentState::Stopped);
            self.context.publish(AgentEvent::Stopped);
            log::info!("agent stopped ({} PIN challenges cancelled)", cancelled);
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        self.context.state()
    }

    /// Receive future events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.context.events.subscribe()
    }

    /// The PIN challenge registry, for console responders.
    pub fn registry(&self) -> Arc<PinRegistry> {
        self.context.registry.clone()
    }

    /// The router, for serving elsewhere or driving in tests.
    pub fn router(&self) -> axum::Router {
        build_router(self.context.clone())
    }

    /// Configuration in use.
    pub fn config(&self) -> &AgentConfig {
        &self.context.config
    }
}

impl Drop for AgentHost {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            self.context.registry.cancel_all();
            let _ = tx.send(());
        }
    }
}
