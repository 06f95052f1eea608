//! Connection-scoped state machine.
//!
//! ```text
//! Connecting → Handshaking → Streaming { AwaitingConfig | Idle | Recording } → Closed
//! ```
//!
//! The controller only decides; sending whatever [`ClientMessage`] it
//! returns is the caller's job.

use std::fmt;

use tracing::{debug, info};

use super::negotiation::NegotiationPolicy;
use crate::protocol::{ClientConfig, ClientMessage, ClientRecord, Message, ServerConfig};

/// Sub-state while frames are flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamPhase {
    /// Server limits received (or pending); no client config sent yet.
    AwaitingConfig,
    Idle,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Streaming(StreamPhase),
    Closed,
}

impl SessionState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Streaming(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Short operator-facing status line.
    pub fn status_text(&self) -> &'static str {
        match self {
            SessionState::Connecting => "Connecting...",
            SessionState::Handshaking => "Handshaking...",
            SessionState::Streaming(StreamPhase::AwaitingConfig) => "Waiting for config...",
            SessionState::Streaming(StreamPhase::Idle) => "Ready",
            SessionState::Streaming(StreamPhase::Recording) => "Recording data...",
            SessionState::Closed => "Disconnected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_text())
    }
}

pub struct SessionController {
    state: SessionState,
    policy: NegotiationPolicy,
    server: Option<ServerConfig>,
    client: Option<ClientConfig>,
    rows_to_record: u32,
}

impl SessionController {
    pub fn new(policy: NegotiationPolicy) -> Self {
        Self {
            state: SessionState::Connecting,
            policy,
            server: None,
            client: None,
            rows_to_record: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Limits advertised by the server, once received.
    pub fn server_config(&self) -> Option<ServerConfig> {
        self.server
    }

    /// Last configuration sent to the server.
    pub fn client_config(&self) -> Option<ClientConfig> {
        self.client
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Streaming(StreamPhase::Recording)
    }

    pub fn begin_handshake(&mut self) {
        self.state = SessionState::Handshaking;
    }

    pub fn handshake_complete(&mut self) {
        self.state = SessionState::Streaming(StreamPhase::AwaitingConfig);
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Observe a decoded message. Returns a message to send, if any.
    pub fn on_message(&mut self, message: &Message) -> Option<ClientMessage> {
        match message {
            Message::ServerConfig(server) => self.on_server_config(*server),
            Message::SpanUpdate(update) => {
                if self.is_recording() && update.run_count >= self.rows_to_record {
                    info!(
                        span = update.id,
                        run_count = update.run_count,
                        "row cap reached, recording stopped"
                    );
                    self.set_phase(StreamPhase::Idle);
                }
                None
            }
            _ => None,
        }
    }

    fn on_server_config(&mut self, server: ServerConfig) -> Option<ClientMessage> {
        debug!(
            max_rows = server.max_rows,
            min_period = server.min_period,
            "server config received"
        );
        self.server = Some(server);
        match self.policy.negotiate(&server) {
            Some(config) => Some(self.configure(config)),
            None => {
                self.set_phase(StreamPhase::AwaitingConfig);
                None
            }
        }
    }

    /// Operator (or policy) choice of client configuration.
    pub fn configure(&mut self, config: ClientConfig) -> ClientMessage {
        self.client = Some(config);
        self.apply_record(config.record);
        ClientMessage::Config(config)
    }

    /// Start or stop recording.
    pub fn record(&mut self, record: ClientRecord) -> ClientMessage {
        self.apply_record(record);
        ClientMessage::Record(record)
    }

    fn apply_record(&mut self, record: ClientRecord) {
        self.rows_to_record = record.max_rows;
        self.set_phase(if record.enable {
            StreamPhase::Recording
        } else {
            StreamPhase::Idle
        });
    }

    fn set_phase(&mut self, phase: StreamPhase) {
        if self.state.is_streaming() {
            self.state = SessionState::Streaming(phase);
        }
    }
}
