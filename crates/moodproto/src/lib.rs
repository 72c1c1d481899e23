//! Wire protocol and transports for the MIDI generation server.
//!
//! A request is one JSON message:
//!
//! ```json
//! {"action":"generate-midi","params":{"seed":1001,"gen_events":256,"bpm":80, ...}}
//! ```
//!
//! and the reply carries base64 MIDI under `midi_base64` (or the older
//! `midi_b64`), or an `error` string. Two transports speak it:
//!
//! - [`WebSocketClient`]: one persistent connection, reset and retried once
//!   when a request hits a transport failure.
//! - [`PipeClient`]: a fresh local pipe connection per request (Unix domain
//!   socket on unix, named pipe on windows).
//!
//! Both implement [`MusicClient`] and never panic on server misbehaviour:
//! every failure comes back as a [`ClientError`].

pub mod backoff;
pub mod client;
pub mod health;
pub mod params;
pub mod pipe;
pub mod websocket;

pub use backoff::BackoffConfig;
pub use client::{ClientConfig, MusicClient};
pub use health::{ConnectionState, HealthTracker};
pub use params::{GenerateRequest, GenerateResponse, MidiParams, GENERATE_ACTION};
pub use pipe::PipeClient;
pub use websocket::WebSocketClient;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("failed to connect after {attempts} attempts: {last}")]
    ConnectFailed { attempts: u32, last: String },

    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("no response within {0:?}")]
    RequestTimeout(Duration),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("server returned an empty MIDI payload")]
    EmptyPayload,

    #[error("response exceeded {0} bytes")]
    ResponseTooLarge(usize),
}

impl ClientError {
    /// Failures that leave the connection in an unknown state. These reset
    /// the connection and earn the caller one retry.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectTimeout(_)
                | ClientError::RequestTimeout(_)
                | ClientError::ConnectionClosed
                | ClientError::Transport(_)
        )
    }
}
