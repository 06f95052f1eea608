//! One live connection: reader, worker and writer tasks.
//!
//! ```text
//! Socket ─► reader task ─► WireCodec ─► MessageCodec ─┐
//!                                                      ├─► work queue ─► worker ─► store
//!                     Session::send_config / record ───┘                   │
//!                                                                          ▼
//! Socket ◄──────────────────────────────── writer task ◄─────────── OutboundFrame
//! ```
//!
//! The worker is the only task that touches the controller, the span tree
//! and the store, so every message is applied in arrival order.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::controller::{SessionController, SessionState};
use super::manager::{LinkGuard, SessionManager};
use super::negotiation::NegotiationPolicy;
use crate::dataset::{RowParser, DEFAULT_DELIMITER};
use crate::error::{DecodeError, Result, SpanwireError};
use crate::observe::{ErrorNotice, ErrorQueue, ProgressList};
use crate::pipeline::{EntityStore, IngestionPipeline};
use crate::protocol::{
    ClientConfig, ClientRecord, HandshakeMessage, Message, MessageCodec, WireCodec, WireItem,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::transport::Endpoint;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Default capacity of the worker's queue.
pub const DEFAULT_WORK_QUEUE_CAPACITY: usize = 1024;

/// Default socket read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Notice pushed when a connection ends without being asked to.
pub const LOST_CONNECTION: &str = "Lost connection with debug server";

/// Knobs for one connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    pub max_frame_size: u32,
    pub work_queue_capacity: usize,
    pub read_buffer_size: usize,
    pub writer: WriterConfig,
    /// Column delimiter for event and dataset rows.
    pub delimiter: char,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            work_queue_capacity: DEFAULT_WORK_QUEUE_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            writer: WriterConfig::default(),
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Debug server to connect to.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoint = endpoint;
        self
    }

    /// Largest frame length accepted before the connection is dropped.
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Decoded messages buffered ahead of the worker. The reader waits
    /// when the queue is full.
    pub fn work_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.work_queue_capacity = capacity.max(1);
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    /// Outbound frames buffered ahead of the writer task.
    pub fn writer_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity.max(1);
        self
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }

    /// Connect through `manager` with the configured knobs.
    pub async fn connect(
        self,
        manager: &SessionManager,
        store: Box<dyn EntityStore>,
    ) -> Result<Session> {
        manager.connect(&self.config, store).await
    }
}

/// Shared handles a session borrows from its manager.
pub(crate) struct SessionContext {
    pub errors: Arc<ErrorQueue>,
    pub progress: Arc<ProgressList>,
    pub policy: NegotiationPolicy,
    pub link: LinkGuard,
}

/// Operator requests routed through the worker.
#[derive(Debug)]
enum Command {
    Configure(ClientConfig),
    Record(ClientRecord),
}

/// Everything the worker consumes, in arrival order.
#[derive(Debug)]
enum Work {
    Handshake(HandshakeMessage),
    Message(Message),
    DecodeFailed(DecodeError),
    Command(Command),
    Closed {
        error: Option<SpanwireError>,
        requested: bool,
    },
}

/// Handle to a live connection.
///
/// Dropping the handle disconnects.
pub struct Session {
    state_rx: watch::Receiver<SessionState>,
    work_tx: mpsc::Sender<Work>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    close_rx: Option<oneshot::Receiver<()>>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Session {
    /// Spawn the tasks for an already connected stream.
    pub(crate) fn start<S>(
        stream: S,
        config: &SessionConfig,
        ctx: SessionContext,
        store: Box<dyn EntityStore>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer.clone());

        let mut controller = SessionController::new(ctx.policy);
        controller.begin_handshake();
        let (state_tx, state_rx) = watch::channel(controller.state());

        let (work_tx, work_rx) = mpsc::channel(config.work_queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (close_tx, close_rx) = oneshot::channel();

        let codec = WireCodec::with_max_frame_size(config.max_frame_size);
        let reader_tx = work_tx.clone();
        let buffer_size = config.read_buffer_size;
        tokio::spawn(async move {
            let (error, requested) =
                match read_loop(read_half, codec, buffer_size, &reader_tx, shutdown_rx).await {
                    Ok(requested) => (None, requested),
                    Err(e) => {
                        error!("Read loop error: {}", e);
                        (Some(e), false)
                    }
                };
            let _ = reader_tx.send(Work::Closed { error, requested }).await;
        });

        let worker = Worker {
            controller,
            pipeline: IngestionPipeline::with_parser(
                store,
                ctx.progress,
                RowParser::new(config.delimiter),
            ),
            writer,
            errors: ctx.errors,
            state_tx,
            _link: ctx.link,
        };
        tokio::spawn(async move {
            worker.run(work_rx).await;
            let _ = close_tx.send(());
        });

        Session {
            state_rx,
            work_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            close_rx: Some(close_rx),
            _writer_task: writer_task,
        }
    }

    /// Watch channel following the connection state.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Send a client configuration. Only honored while streaming.
    pub async fn send_config(&self, config: ClientConfig) -> Result<()> {
        self.submit(Command::Configure(config)).await
    }

    /// Start or stop recording. Only honored while streaming.
    pub async fn send_record(&self, record: ClientRecord) -> Result<()> {
        self.submit(Command::Record(record)).await
    }

    async fn submit(&self, command: Command) -> Result<()> {
        self.work_tx
            .send(Work::Command(command))
            .await
            .map_err(|_| SpanwireError::ConnectionClosed)
    }

    /// Ask the connection to close. Idempotent.
    pub fn disconnect(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Wait until the worker has torn the connection down. Cancel safe.
    pub async fn wait_for_close(&mut self) {
        if let Some(rx) = self.close_rx.as_mut() {
            let _ = rx.await;
            self.close_rx = None;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Read until EOF, a fatal error or a shutdown request.
///
/// Returns `Ok(true)` when the shutdown was requested.
async fn read_loop<R>(
    mut reader: R,
    mut codec: WireCodec,
    buffer_size: usize,
    work: &mpsc::Sender<Work>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut items = Vec::new();

    loop {
        let n = tokio::select! {
            _ = &mut shutdown => return Ok(true),
            read = reader.read(&mut buf) => match read {
                Ok(0) => return Ok(false), // Connection closed
                Ok(n) => n,
                Err(e) => return Err(SpanwireError::Io(e)),
            },
        };

        // Frames completed before a fatal error are still delivered.
        let pushed = codec.push(&buf[..n], &mut items);
        for item in items.drain(..) {
            let next = match item {
                WireItem::Handshake(hello) => Work::Handshake(hello),
                WireItem::Frame(body) => match MessageCodec::decode(&body) {
                    Ok(message) => Work::Message(message),
                    Err(e) => Work::DecodeFailed(e),
                },
            };
            if work.send(next).await.is_err() {
                return Ok(true);
            }
        }
        pushed?;
    }
}

// Borrows only the handle across the await: `Worker` is not `Sync`.
async fn send(writer: &WriterHandle, frame: OutboundFrame) {
    if let Err(e) = writer.send(frame).await {
        debug!("Outbound frame dropped: {}", e);
    }
}

struct Worker {
    controller: SessionController,
    pipeline: IngestionPipeline,
    writer: WriterHandle,
    errors: Arc<ErrorQueue>,
    state_tx: watch::Sender<SessionState>,
    _link: LinkGuard,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Work>) {
        let (error, requested) = loop {
            match rx.recv().await {
                Some(Work::Closed { error, requested }) => break (error, requested),
                Some(work) => self.process(work).await,
                None => break (None, false),
            }
            self.publish();
        };
        self.close(error, requested);
    }

    async fn process(&mut self, work: Work) {
        match work {
            Work::Handshake(hello) => {
                info!(version = %hello.version, "handshake accepted");
                send(&self.writer, OutboundFrame::hello(&HandshakeMessage::expected())).await;
                self.controller.handshake_complete();
            }
            Work::Message(message) => {
                debug!(kind = ?message.kind(), "message");
                if let Err(e) = self.pipeline.handle(&message) {
                    warn!("Store error: {}", e);
                    self.errors.push_error(&e);
                }
                if let Some(reply) = self.controller.on_message(&message) {
                    send(&self.writer, OutboundFrame::message(&reply)).await;
                }
            }
            Work::DecodeFailed(e) => {
                warn!("Frame discarded: {}", e);
                self.errors.push_error(&SpanwireError::Decode(e));
            }
            Work::Command(command) => {
                if !self.controller.state().is_streaming() {
                    warn!(?command, "not streaming, command dropped");
                    return;
                }
                let reply = match command {
                    Command::Configure(config) => self.controller.configure(config),
                    Command::Record(record) => self.controller.record(record),
                };
                send(&self.writer, OutboundFrame::message(&reply)).await;
            }
            Work::Closed { .. } => {}
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.controller.state());
    }

    fn close(mut self, error: Option<SpanwireError>, requested: bool) {
        if let Some(e) = &error {
            self.errors.push_error(e);
        }
        self.pipeline.reset();
        if let Err(e) = self.pipeline.flush() {
            warn!("Store error: {}", e);
            self.errors.push_error(&e);
        }
        if !requested {
            self.errors.push(ErrorNotice::new(LOST_CONNECTION));
        }
        self.controller.close();
        self.publish();
        info!(requested, "connection closed");
    }
}
