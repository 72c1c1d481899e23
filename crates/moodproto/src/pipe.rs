//! Local pipe transport: a fresh connection per request.
//!
//! On windows the endpoint is the named pipe `\\.\pipe\{name}`. On unix it
//! is a Unix domain socket: absolute names are used as paths, anything else
//! becomes `$TMPDIR/{name}.sock`.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::{ClientConfig, MusicClient};
use crate::health::{ConnectionState, HealthTracker};
use crate::params::{GenerateRequest, GenerateResponse, MidiParams};
use crate::ClientError;

const READ_CHUNK: usize = 8 * 1024;

pub struct PipeClient {
    config: ClientConfig,
    request_lock: Mutex<()>,
    health: HealthTracker,
}

impl PipeClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            request_lock: Mutex::new(()),
            health: HealthTracker::new(),
        }
    }

    /// Filesystem location of the endpoint on unix.
    pub fn socket_path(name: &str) -> PathBuf {
        let path = PathBuf::from(name);
        if path.is_absolute() {
            path
        } else {
            std::env::temp_dir().join(format!("{}.sock", name))
        }
    }

    async fn open(&self) -> Result<impl AsyncRead + AsyncWrite + Unpin, ClientError> {
        let connect_timeout = self.config.connect_timeout;
        match timeout(connect_timeout, open_endpoint(&self.config.endpoint)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ClientError::Transport(e.to_string())),
            Err(_) => Err(ClientError::ConnectTimeout(connect_timeout)),
        }
    }

    async fn exchange(&self, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut stream = self.open().await?;

        stream
            .write_all(payload)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let request_timeout = self.config.request_timeout;
        let body = match timeout(request_timeout, read_response(&mut stream, self.config.max_response_bytes)).await {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::RequestTimeout(request_timeout)),
        };

        GenerateResponse::parse(&body)?.into_midi()
    }
}

/// Read until EOF, or until what we have is a complete JSON document.
async fn read_response<S: AsyncRead + Unpin>(stream: &mut S, max_bytes: usize) -> Result<Vec<u8>, ClientError> {
    let mut body = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
        if body.len() > max_bytes {
            return Err(ClientError::ResponseTooLarge(max_bytes));
        }

        let ends_object = body.iter().rev().find(|b| !b.is_ascii_whitespace()) == Some(&b'}');
        if ends_object && serde_json::from_slice::<serde_json::Value>(&body).is_ok() {
            break;
        }
    }

    if body.is_empty() {
        return Err(ClientError::ConnectionClosed);
    }
    Ok(body)
}

#[cfg(unix)]
async fn open_endpoint(name: &str) -> std::io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(PipeClient::socket_path(name)).await
}

#[cfg(windows)]
async fn open_endpoint(name: &str) -> std::io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    let pipe_name = if name.starts_with(r"\\.\pipe\") {
        name.to_string()
    } else {
        format!(r"\\.\pipe\{}", name)
    };
    tokio::net::windows::named_pipe::ClientOptions::new().open(pipe_name)
}

#[cfg(not(any(unix, windows)))]
async fn open_endpoint(_name: &str) -> std::io::Result<tokio::io::DuplexStream> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "pipe transport is not available on this platform",
    ))
}

#[async_trait]
impl MusicClient for PipeClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    /// Probe that the endpoint accepts connections.
    async fn connect(&self) -> Result<(), ClientError> {
        self.health.set_state(ConnectionState::Connecting);
        let result = self.config.backoff.retry(&self.config.name, |_| self.open()).await;

        match result {
            Ok(_probe) => {
                info!("{}: pipe {} is reachable", self.config.name, self.config.endpoint);
                self.health.record_success();
                Ok(())
            }
            Err(e) => {
                self.health.record_failure();
                self.health.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    async fn request_midi(&self, params: &MidiParams) -> Result<Vec<u8>, ClientError> {
        let payload = GenerateRequest::new(params).to_json()?;
        let _guard = self.request_lock.lock().await;

        for attempt in 0..2 {
            debug!(seed = params.seed, bpm = params.bpm, "{}: sending generation request", self.config.name);

            match self.exchange(payload.as_bytes()).await {
                Ok(midi) => {
                    self.health.record_success();
                    return Ok(midi);
                }
                Err(e) if e.is_transport() && attempt == 0 => {
                    self.health.record_failure();
                    self.health.set_state(ConnectionState::Disconnected);
                    warn!("{}: request failed ({}), retrying on a new connection", self.config.name, e);
                }
                Err(e) => {
                    if e.is_transport() {
                        self.health.record_failure();
                        self.health.set_state(ConnectionState::Disconnected);
                    }
                    warn!("{}: generation failed: {}", self.config.name, e);
                    return Err(e);
                }
            }
        }

        Err(ClientError::ConnectionClosed)
    }

    async fn disconnect(&self) {
        // Nothing persistent to close; wait out any in-flight request
        let _guard = self.request_lock.lock().await;
        self.health.set_state(ConnectionState::Disconnected);
    }

    fn state(&self) -> ConnectionState {
        self.health.state()
    }

    fn status(&self) -> String {
        self.health.summary(&self.config.name)
    }
}
