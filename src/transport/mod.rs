//! Connection lifecycle, and the acceptor/connector/resolver abstractions
//! that let TCP, Unix-domain, and shared-memory transports share one
//! executor.
//!
//! Transport polymorphism is expressed once, as the design notes ask: a
//! generic [`Connection<S>`] parameterized over a small [`Addressed`] +
//! `AsyncRead + AsyncWrite` socket trait, joined with the shared-memory
//! connection type (which does not fit that shape) through the
//! [`AnyConnection`] enum.

pub mod acceptor;
pub mod connector;
pub mod resolver;
pub mod tcp;
pub mod unix;

pub use acceptor::AnyAcceptor;
pub use connector::AnyConnector;
pub use resolver::AnyResolver;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use crate::addresses::Address;
use crate::common::{Result, Status};
use crate::config::MessageParserConfig;
use crate::executor::{Executor, ExecutorContext};
use crate::messages::{MessageParser, ParsedMessage, SerializedMessage};

/// Callback invoked from the Transport context whenever a complete frame
/// is decoded.
pub type OnReceived = Arc<dyn Fn(ParsedMessage) + Send + Sync>;
/// Callback invoked from the Transport context after one queued message
/// finishes writing.
pub type OnSent = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked from the Transport context exactly once, when the
/// connection transitions to `Stopped`.
pub type OnClosed = Arc<dyn Fn(Status) + Send + Sync>;

/// `Init -> Starting -> Processing -> Stopped`. See §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Init = 0,
    Starting = 1,
    Processing = 2,
    Stopped = 3,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Init,
            1 => ConnectionState::Starting,
            2 => ConnectionState::Processing,
            _ => ConnectionState::Stopped,
        }
    }
}

/// Classifies a read/write I/O error as an ordinary peer-initiated close
/// (`ConnectionReset`/`BrokenPipe`, folded into `Status::ok` so `on_closed`
/// reads the same as a clean EOF) or a genuinely unexpected failure.
fn status_for_io_error(err: std::io::Error) -> Status {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => Status::ok(),
        _ => Status::unexpected_error(err.to_string()),
    }
}

/// Endpoint query a concrete socket type supplies so [`Connection`] can
/// report `local_address`/`remote_address` without depending on any one
/// transport's address representation.
pub trait Addressed {
    fn local_address(&self) -> Address;
    fn remote_address(&self) -> Address;
}

/// The bound a concrete stream type needs to satisfy to be wrapped in a
/// [`Connection`]. Blanket-implemented; transports only need to implement
/// [`Addressed`] for their stream type (see `tcp.rs`, `unix.rs`).
pub trait Socket: AsyncRead + AsyncWrite + Addressed + Send + Unpin + 'static {}
impl<T: AsyncRead + AsyncWrite + Addressed + Send + Unpin + 'static> Socket for T {}

/// A single peer connection: one byte-stream transport, a buffered frame
/// parser, an outbound queue, and the `Init/Starting/Processing/Stopped`
/// state machine described in §4.2.
pub struct Connection<S: Socket> {
    state: AtomicU8,
    local_address: Address,
    remote_address: Address,
    outbound_tx: mpsc::UnboundedSender<SerializedMessage>,
    stream_slot: Mutex<Option<S>>,
    outbound_rx_slot: Mutex<Option<mpsc::UnboundedReceiver<SerializedMessage>>>,
    parser_config: MessageParserConfig,
}

impl<S: Socket> Connection<S> {
    pub fn new(stream: S, parser_config: MessageParserConfig) -> Arc<Self> {
        let local_address = stream.local_address();
        let remote_address = stream.remote_address();
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Connection {
            state: AtomicU8::new(ConnectionState::Init as u8),
            local_address,
            remote_address,
            outbound_tx: tx,
            stream_slot: Mutex::new(Some(stream)),
            outbound_rx_slot: Mutex::new(Some(rx)),
            parser_config,
        })
    }

    pub fn local_address(&self) -> &Address {
        &self.local_address
    }

    pub fn remote_address(&self) -> &Address {
        &self.remote_address
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transitions `Init -> Starting -> Processing` and posts the first
    /// read and the write loop to the Transport context. Fails with
    /// `PRECONDITION_NOT_MET` if already started.
    pub fn start(
        self: &Arc<Self>,
        executor: &Executor,
        on_received: OnReceived,
        on_sent: OnSent,
        on_closed: OnClosed,
    ) -> Result<()> {
        self.state
            .compare_exchange(
                ConnectionState::Init as u8,
                ConnectionState::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Status::precondition_not_met("connection already started"))?;

        let stream = self
            .stream_slot
            .lock()
            .unwrap()
            .take()
            .expect("stream present while in Init state");
        let (reader, writer) = tokio::io::split(stream);
        let rx = self
            .outbound_rx_slot
            .lock()
            .unwrap()
            .take()
            .expect("outbound receiver present while in Init state");

        self.state
            .store(ConnectionState::Processing as u8, Ordering::Release);

        let read_conn = self.clone();
        let read_received = on_received;
        let read_closed = on_closed.clone();
        executor.post(ExecutorContext::Transport, async move {
            read_conn.read_loop(reader, read_received, read_closed).await;
        });

        let write_conn = self.clone();
        executor.post(ExecutorContext::Transport, async move {
            write_conn.write_loop(writer, rx, on_sent, on_closed).await;
        });

        Ok(())
    }

    /// No-op outside `Processing`; otherwise enqueues `message` for the
    /// write loop.
    pub fn async_send(&self, message: SerializedMessage) {
        if self.state() != ConnectionState::Processing {
            return;
        }
        let _ = self.outbound_tx.send(message);
    }

    /// Transitions to `Stopped`, shuts down the transport, and fires
    /// `on_closed(Status::ok())`. Idempotent: a connection already
    /// `Stopped` does not fire `on_closed` again.
    pub async fn async_close(self: &Arc<Self>, on_closed: &OnClosed) {
        let previous = self.state.swap(ConnectionState::Stopped as u8, Ordering::AcqRel);
        if previous == ConnectionState::Stopped as u8 {
            return;
        }
        if let Some(mut stream) = self.stream_slot.lock().unwrap().take() {
            let _ = stream.shutdown().await;
        }
        on_closed(Status::ok());
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: ReadHalf<S>,
        on_received: OnReceived,
        on_closed: OnClosed,
    ) {
        let mut parser = MessageParser::new(self.parser_config);
        loop {
            if self.state() != ConnectionState::Processing {
                return;
            }
            let buf = parser.prepare_buffer(self.parser_config.read_buffer_size);
            match reader.read(buf).await {
                Ok(0) => {
                    self.close_with(Status::ok(), &on_closed);
                    return;
                }
                Ok(n) => {
                    parser.consumed(n);
                    loop {
                        match parser.try_parse() {
                            Ok(Some(message)) => on_received(message),
                            Ok(None) => break,
                            Err(status) => {
                                self.close_with(status, &on_closed);
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    self.close_with(status_for_io_error(err), &on_closed);
                    return;
                }
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: WriteHalf<S>,
        mut rx: mpsc::UnboundedReceiver<SerializedMessage>,
        on_sent: OnSent,
        on_closed: OnClosed,
    ) {
        while let Some(message) = rx.recv().await {
            if self.state() != ConnectionState::Processing {
                return;
            }
            if let Err(err) = writer.write_all(message.as_bytes()).await {
                self.close_with(status_for_io_error(err), &on_closed);
                return;
            }
            on_sent();
        }
    }

    fn close_with(self: &Arc<Self>, status: Status, on_closed: &OnClosed) {
        let previous = self.state.swap(ConnectionState::Stopped as u8, Ordering::AcqRel);
        if previous != ConnectionState::Stopped as u8 {
            on_closed(status);
        }
    }
}

/// Joins the stream-backed `Connection<S>` variants with the
/// shared-memory connection type, per the transport-polymorphism design
/// note: one enum of variants, not a trait-object hierarchy.
#[derive(Clone)]
pub enum AnyConnection {
    Tcp(Arc<Connection<tokio::net::TcpStream>>),
    Unix(Arc<Connection<tokio::net::UnixStream>>),
    Shm(Arc<crate::shm::ShmConnection>),
}

impl AnyConnection {
    pub fn start(
        &self,
        executor: &Executor,
        on_received: OnReceived,
        on_sent: OnSent,
        on_closed: OnClosed,
    ) -> Result<()> {
        match self {
            AnyConnection::Tcp(c) => c.start(executor, on_received, on_sent, on_closed),
            AnyConnection::Unix(c) => c.start(executor, on_received, on_sent, on_closed),
            AnyConnection::Shm(c) => c.start(executor, on_received, on_sent, on_closed),
        }
    }

    pub fn async_send(&self, message: SerializedMessage) {
        match self {
            AnyConnection::Tcp(c) => c.async_send(message),
            AnyConnection::Unix(c) => c.async_send(message),
            AnyConnection::Shm(c) => c.async_send(message),
        }
    }

    pub async fn async_close(&self, on_closed: &OnClosed) {
        match self {
            AnyConnection::Tcp(c) => c.async_close(on_closed).await,
            AnyConnection::Unix(c) => c.async_close(on_closed).await,
            AnyConnection::Shm(c) => c.async_close(on_closed).await,
        }
    }

    pub fn local_address(&self) -> Address {
        match self {
            AnyConnection::Tcp(c) => c.local_address().clone(),
            AnyConnection::Unix(c) => c.local_address().clone(),
            AnyConnection::Shm(c) => c.local_address(),
        }
    }

    pub fn remote_address(&self) -> Address {
        match self {
            AnyConnection::Tcp(c) => c.remote_address().clone(),
            AnyConnection::Unix(c) => c.remote_address().clone(),
            AnyConnection::Shm(c) => c.remote_address(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            AnyConnection::Tcp(c) => c.state(),
            AnyConnection::Unix(c) => c.state(),
            AnyConnection::Shm(c) => c.state(),
        }
    }
}
