//! Agent configuration.
//!
//! Every field has a default, so an empty TOML file (or none at all) gives a
//! loopback-only agent on port 17357 reading certificates from `./certs`.

use crate::error::{Error, Result};
use crate::signatures::{DEFAULT_SIGNATURE_CAPACITY, MAX_SIGNATURE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 17357;

/// Environment variable overriding the default store directory.
pub const STORE_ENV: &str = "DOCSIGN_STORE";

const DEFAULT_PIN_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// What the host does when a key needs a PIN the request did not carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinPromptMode {
    /// Answer `pin_required` / `pin_invalid` at once; the caller re-posts
    #[default]
    Defer,
    /// Register a challenge and wait for `POST /pin/{id}` or the console
    Await,
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Listening address
    pub bind: IpAddr,

    /// Listening port
    pub port: u16,

    /// Certificate store directory
    pub store: PathBuf,

    /// How long an awaited PIN challenge stays open
    pub pin_timeout_secs: u64,

    /// PIN behaviour of the HTTP host
    pub pin_prompt: PinPromptMode,

    /// Largest accepted request body
    pub max_body_bytes: usize,

    /// DER bytes reserved for a PDF signature
    pub signature_capacity: usize,

    /// Thumbprint used when a request names no certificate
    pub default_certificate: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentConfig {
    /// Configuration with all defaults.
    pub fn new() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            store: default_store(),
            pin_timeout_secs: DEFAULT_PIN_TIMEOUT_SECS,
            pin_prompt: PinPromptMode::Defer,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            signature_capacity: DEFAULT_SIGNATURE_CAPACITY,
            default_certificate: None,
        }
    }

    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_toml(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pin_timeout_secs == 0 {
            return Err(Error::Config("pin_timeout_secs must be positive".to_string()));
        }
        if self.signature_capacity == 0 {
            return Err(Error::Config("signature_capacity must be positive".to_string()));
        }
        if self.signature_capacity > MAX_SIGNATURE_CAPACITY {
            return Err(Error::Config(format!(
                "signature_capacity must not exceed {} bytes",
                MAX_SIGNATURE_CAPACITY
            )));
        }
        if self.max_body_bytes == 0 {
            return Err(Error::Config("max_body_bytes must be positive".to_string()));
        }
        Ok(())
    }

    /// Set the listening address.
    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Set the listening port. 0 picks a free one.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the certificate store directory.
    pub fn with_store(mut self, store: impl Into<PathBuf>) -> Self {
        self.store = store.into();
        self
    }

    /// Set the PIN behaviour.
    pub fn with_pin_prompt(mut self, mode: PinPromptMode) -> Self {
        self.pin_prompt = mode;
        self
    }

    /// Set the PIN challenge timeout, rounded up to whole seconds.
    pub fn with_pin_timeout(mut self, timeout: Duration) -> Self {
        let extra = u64::from(timeout.subsec_nanos() > 0);
        self.pin_timeout_secs = timeout.as_secs().saturating_add(extra);
        self
    }

    /// Set the reserved signature size.
    pub fn with_signature_capacity(mut self, capacity: usize) -> Self {
        self.signature_capacity = capacity;
        self
    }

    /// Set the fallback certificate thumbprint.
    pub fn with_default_certificate(mut self, thumbprint: impl Into<String>) -> Self {
        self.default_certificate = Some(thumbprint.into());
        self
    }

    /// Socket address to listen on.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// PIN challenge timeout.
    pub fn pin_timeout(&self) -> Duration {
        Duration::from_secs(self.pin_timeout_secs)
    }
}

/// `$DOCSIGN_STORE`, or `./certs`.
pub fn default_store() -> PathBuf {
    std::env::var_os(STORE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("certs"))
}
