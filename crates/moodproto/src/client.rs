//! Transport-agnostic client contract and shared configuration.

use std::time::Duration;

use async_trait::async_trait;
use moodconf::TransportConfig;

use crate::backoff::BackoffConfig;
use crate::health::ConnectionState;
use crate::params::MidiParams;
use crate::ClientError;

/// Configuration shared by every transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name used in log lines
    pub name: String,
    /// WebSocket URL, pipe name, or socket path
    pub endpoint: String,
    pub connect_timeout: Duration,
    /// Per-request read timeout. Generation takes a while.
    pub request_timeout: Duration,
    pub backoff: BackoffConfig,
    pub max_response_bytes: usize,
}

impl ClientConfig {
    pub fn new(name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
            backoff: BackoffConfig::default(),
            max_response_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Build from the `[transport]` config section for the given endpoint.
    pub fn from_transport(name: &str, endpoint: &str, transport: &TransportConfig) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            connect_timeout: Duration::from_millis(transport.connect_timeout_ms),
            request_timeout: Duration::from_millis(transport.request_timeout_ms),
            backoff: BackoffConfig {
                base: Duration::from_millis(transport.backoff_base_ms),
                max: Duration::from_millis(transport.backoff_max_ms),
                max_attempts: transport.max_connect_attempts.max(1),
            },
            max_response_bytes: transport.max_response_bytes,
        }
    }
}

/// A connection to the MIDI generation server.
///
/// Implementations serialize requests internally: at most one request is
/// on the wire per client, and concurrent callers queue.
#[async_trait]
pub trait MusicClient: Send + Sync {
    fn name(&self) -> &str;

    /// Establish the connection, retrying with backoff.
    async fn connect(&self) -> Result<(), ClientError>;

    /// Send one generation request and wait for the MIDI bytes.
    async fn request_midi(&self, params: &MidiParams) -> Result<Vec<u8>, ClientError>;

    /// Pump hook for the game tick. Transports that do their I/O inside
    /// their futures have nothing to do here.
    fn update(&self) {}

    async fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Human readable status line.
    fn status(&self) -> String {
        format!("{}: {}", self.name(), self.state().as_str())
    }
}
