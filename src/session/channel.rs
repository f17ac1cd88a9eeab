//! WebSocket duplex channel to the conversational speech service
//!
//! Manages the connection lifecycle for one session.
//!
//! # Connection Flow
//!
//! 1. `open()` - Establish WebSocket, send `session.setup`, await `session.opened`
//! 2. `send_audio()` / `send_text()` - Outbound envelopes (non-blocking queue)
//! 3. `recv()` - Inbound envelopes, order-preserving
//! 4. `close()` - Clean shutdown
//!
//! Mid-session disconnects do NOT reconnect; the session surfaces an error and
//! the caller decides whether to open a fresh session.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{ClientMessage, ServerMessage};
use super::SessionError;
use crate::config::Config;
use crate::voice::VoiceConfig;

/// Connection timeout for the initial WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for waiting for session.opened after setup
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to an open duplex channel
///
/// Owns the WebSocket write half; inbound envelopes are parsed by a background
/// task and delivered through an order-preserving queue.
pub struct LiveChannel {
    write: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    /// Wrapped in Option so it can be taken for concurrent processing
    incoming_rx: Option<mpsc::Receiver<ServerMessage>>,
    session_id: String,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl LiveChannel {
    /// Open a channel and complete the session handshake.
    ///
    /// Sends the setup envelope (model, voice, composed system instruction)
    /// and waits for `session.opened`. Any failure before that point is a
    /// `ChannelOpenFailure` (or `ConfigurationError` when the service rejects
    /// the credential or parameters).
    pub async fn open(config: &Config, voice: &VoiceConfig) -> Result<Self, SessionError> {
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::ConfigurationError(format!("invalid endpoint: {}", e)))?;

        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|e| SessionError::ConfigurationError(e.to_string()))?,
        );

        log::info!("Opening session channel to {}", config.url);

        // Connect with timeout; Nagle off for low latency
        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| SessionError::ChannelOpenFailure("connection timeout".to_string()))?
        .map_err(|e| SessionError::ChannelOpenFailure(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        // First message on the channel must be the setup envelope
        let instruction = voice.compose_system_instruction();
        let setup = ClientMessage::setup(
            &config.model,
            &voice.voice,
            (!instruction.is_empty()).then_some(instruction),
        );
        let json = serde_json::to_string(&setup)
            .map_err(|e| SessionError::ChannelOpenFailure(e.to_string()))?;
        write
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::ChannelOpenFailure(e.to_string()))?;

        log::info!("Setup sent, waiting for session.opened...");

        let session_id = timeout(OPEN_TIMEOUT, async {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::Opened { session }) => {
                            log::info!("Session opened: {}", session.id);
                            return Ok(session.id);
                        }
                        Ok(ServerMessage::Error { error }) => {
                            return Err(SessionError::ConfigurationError(error.message));
                        }
                        Ok(_) => {
                            log::debug!("Ignoring message while waiting for session.opened");
                        }
                        Err(e) => {
                            log::warn!("Failed to parse message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        return Err(SessionError::ChannelOpenFailure(
                            "connection closed before session opened".to_string(),
                        ));
                    }
                    Err(e) => {
                        return Err(SessionError::ChannelOpenFailure(e.to_string()));
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            Err(SessionError::ChannelOpenFailure("stream ended".to_string()))
        })
        .await
        .map_err(|_| SessionError::ChannelOpenFailure("session open timeout".to_string()))??;

        // Background task parses and forwards inbound envelopes in order
        let (incoming_tx, incoming_rx) = mpsc::channel(100);
        let receiver_task = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if incoming_tx.send(msg).await.is_err() {
                                log::debug!("Receiver channel closed");
                                break;
                            }
                        }
                        Err(e) => {
                            // Unrecognized shape: log and drop, the session
                            // stays alive
                            log::warn!("Failed to parse inbound envelope: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("Channel closed by service");
                        let _ = incoming_tx.send(ServerMessage::Closed).await;
                        break;
                    }
                    Err(e) => {
                        log::warn!("Channel error: {}", e);
                        let _ = incoming_tx
                            .send(ServerMessage::Error {
                                error: super::protocol::ErrorInfo {
                                    error_type: "transport".to_string(),
                                    code: None,
                                    message: e.to_string(),
                                },
                            })
                            .await;
                        break;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            log::debug!("Receiver task exiting");
        });

        Ok(Self {
            write,
            incoming_rx: Some(incoming_rx),
            session_id,
            receiver_task,
        })
    }

    async fn send_message(&mut self, msg: &ClientMessage) -> Result<(), SessionError> {
        let json = serde_json::to_string(msg)
            .map_err(|e| SessionError::ChannelRuntimeError(e.to_string()))?;

        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::ChannelRuntimeError(e.to_string()))?;

        Ok(())
    }

    /// Send one block of PCM16-encoded microphone audio.
    pub async fn send_audio(&mut self, pcm: &[u8], sample_rate: u32) -> Result<(), SessionError> {
        let msg = ClientMessage::audio(pcm, sample_rate);
        self.send_message(&msg).await
    }

    /// Send advisory text (live voice-parameter updates ride this way).
    pub async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        let msg = ClientMessage::text(text);
        self.send_message(&msg).await
    }

    /// Receive the next inbound envelope. Returns `None` once the channel has
    /// closed and the queue has drained, or if the receiver was taken.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        match self.incoming_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take ownership of the inbound queue so envelopes can be consumed
    /// concurrently with outbound sends. After this, `recv()` returns `None`.
    pub fn take_incoming_receiver(&mut self) -> Option<mpsc::Receiver<ServerMessage>> {
        self.incoming_rx.take()
    }

    /// Service-assigned session ID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Gracefully close the channel: close frame out, reader aborted.
    pub async fn close(mut self) {
        log::info!("Closing session channel...");
        self.receiver_task.abort();
        if let Err(e) = self.write.close().await {
            log::warn!("Error closing channel: {}", e);
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        // Reader must not outlive the handle if close() was skipped
        self.receiver_task.abort();
    }
}
