//! WebSocket transport: one persistent connection, one request at a time.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::client::{ClientConfig, MusicClient};
use crate::health::{ConnectionState, HealthTracker};
use crate::params::{GenerateRequest, GenerateResponse, MidiParams};
use crate::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client for the generation server's WebSocket endpoint.
///
/// The socket lives in a single-slot mutex. Holding the slot across the
/// whole send/receive exchange is what keeps requests from interleaving on
/// the wire.
pub struct WebSocketClient {
    config: ClientConfig,
    slot: Mutex<Option<WsStream>>,
    health: HealthTracker,
}

impl WebSocketClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
            health: HealthTracker::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn establish(&self) -> Result<WsStream, ClientError> {
        self.health.set_state(ConnectionState::Connecting);
        let url = self.config.endpoint.as_str();
        let connect_timeout = self.config.connect_timeout;

        let result = self
            .config
            .backoff
            .retry(&self.config.name, |_| async move {
                match timeout(connect_timeout, connect_async(url)).await {
                    Ok(Ok((stream, _response))) => Ok(stream),
                    Ok(Err(e)) => Err(ClientError::Transport(e.to_string())),
                    Err(_) => Err(ClientError::ConnectTimeout(connect_timeout)),
                }
            })
            .await;

        match result {
            Ok(stream) => {
                info!("{}: connected to {}", self.config.name, url);
                self.health.record_success();
                Ok(stream)
            }
            Err(e) => {
                self.health.record_failure();
                self.health.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Send a close frame, giving up after the connect timeout.
    async fn close_stream(&self, mut stream: WsStream) {
        match timeout(self.config.connect_timeout, stream.close(None)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("{}: close failed: {}", self.config.name, e),
            Err(_) => debug!("{}: close timed out, dropping socket", self.config.name),
        }
    }

    /// Send one request on `stream` and wait for its reply. The timeout
    /// covers the send as well as the wait.
    async fn exchange(&self, stream: &mut WsStream, payload: &str) -> Result<Vec<u8>, ClientError> {
        let request_timeout = self.config.request_timeout;
        let max_bytes = self.config.max_response_bytes;

        let reply = timeout(request_timeout, async {
            stream
                .send(Message::Text(payload.to_string()))
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;

            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > max_bytes {
                            return Err(ClientError::ResponseTooLarge(max_bytes));
                        }
                        return GenerateResponse::parse(text.as_bytes())?.into_midi();
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if bytes.len() > max_bytes {
                            return Err(ClientError::ResponseTooLarge(max_bytes));
                        }
                        return GenerateResponse::parse(&bytes)?.into_midi();
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(ClientError::ConnectionClosed),
                    // Pings are answered by tungstenite on the next poll
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
                }
            }
        })
        .await;

        match reply {
            Ok(result) => result,
            Err(_) => Err(ClientError::RequestTimeout(request_timeout)),
        }
    }
}

#[async_trait]
impl MusicClient for WebSocketClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn connect(&self) -> Result<(), ClientError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        *slot = Some(self.establish().await?);
        Ok(())
    }

    async fn request_midi(&self, params: &MidiParams) -> Result<Vec<u8>, ClientError> {
        let payload = GenerateRequest::new(params).to_json()?;
        let mut slot = self.slot.lock().await;

        // First try on the current socket, one more after a full reset
        for attempt in 0..2 {
            if slot.is_none() {
                *slot = Some(self.establish().await?);
            }
            let Some(stream) = slot.as_mut() else {
                return Err(ClientError::ConnectionClosed);
            };

            debug!(seed = params.seed, bpm = params.bpm, "{}: sending generation request", self.config.name);

            match self.exchange(stream, &payload).await {
                Ok(midi) => {
                    self.health.record_success();
                    debug!(bytes = midi.len(), "{}: received MIDI", self.config.name);
                    return Ok(midi);
                }
                Err(e) if e.is_transport() => {
                    self.health.record_failure();
                    self.health.set_state(ConnectionState::Disconnected);
                    if let Some(stale) = slot.take() {
                        self.close_stream(stale).await;
                    }
                    if attempt == 0 {
                        warn!("{}: request failed ({}), reconnecting for one retry", self.config.name, e);
                        continue;
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!("{}: generation failed: {}", self.config.name, e);
                    return Err(e);
                }
            }
        }

        Err(ClientError::ConnectionClosed)
    }

    async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(stream) = slot.take() {
            self.close_stream(stream).await;
            info!("{}: disconnected", self.config.name);
        }
        self.health.set_state(ConnectionState::Disconnected);
    }

    fn state(&self) -> ConnectionState {
        self.health.state()
    }

    fn status(&self) -> String {
        self.health.summary(&self.config.name)
    }
}
