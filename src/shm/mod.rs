//! Shared-memory transport (§4.8): two named regions (one per client, one
//! per server), lock-free ring buffers for the byte streams, a
//! process-shared mutex/condvar pair for wakeups, and a bootstrap
//! protocol built on a multi-producer event queue.
//!
//! Doesn't fit the `Connection<S: Socket>` shape the stream transports
//! share (there's no `AsyncRead`/`AsyncWrite` here, just two ring
//! buffers and OS-level wakeups), so it gets its own connection type
//! with an equivalent public surface and joins the others through
//! [`crate::transport::AnyConnection`] / [`crate::transport::AnyAcceptor`].

mod event_queue;
mod pool;
mod region;
mod ring_buffer;
mod sync;

pub use event_queue::{ServerEvent, ServerEventType};
pub use pool::{SharedObjectHandle, SharedObjectPool};
pub use region::{ClientState, ServerState, CHANGES_POLL_TIMEOUT};
pub use ring_buffer::{RingBuffer, RingBufferHeader};
pub use sync::{ChangesCell, ShmCondvar, ShmMutex};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::addresses::Address;
use crate::common::{Result, Status};
use crate::config::MessageParserConfig;
use crate::executor::{Executor, ExecutorContext};
use crate::messages::{MessageParser, SerializedMessage};
use crate::transport::{AnyConnection, ConnectionState, OnClosed, OnReceived, OnSent};

use region::{ClientRegion, ServerRegion};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, PartialEq, Eq)]
enum ShmRole {
    Client,
    Server,
}

/// A shared-memory peer connection. Mirrors `Connection<S>`'s public
/// surface: `start`/`async_send`/`async_close`/addresses/`state`.
pub struct ShmConnection {
    state: AtomicU8,
    role: ShmRole,
    client_id: u32,
    region: Arc<ClientRegion>,
    server_region: Arc<ServerRegion>,
    local_address: Address,
    remote_address: Address,
    outbound_tx: mpsc::UnboundedSender<SerializedMessage>,
    outbound_rx_slot: Mutex<Option<mpsc::UnboundedReceiver<SerializedMessage>>>,
    parser_config: MessageParserConfig,
}

impl ShmConnection {
    /// Client side of the bootstrap protocol (§6): open the server's
    /// region, mint a client id, create this client's own region, push a
    /// `Created` event, then wait for the server to mark it `Connected`.
    pub async fn connect(name: &str, parser_config: MessageParserConfig) -> Result<Arc<Self>> {
        let server_name = name.to_string();
        let server_region = tokio::task::spawn_blocking(move || ServerRegion::open(&server_name))
            .await
            .map_err(|e| Status::unexpected_error(e.to_string()))??;

        if server_region.state() != ServerState::Running {
            return Err(Status::connection_failure(format!(
                "shm server {name} is not running"
            )));
        }

        let client_id: u32 = rand::random::<u32>().max(1);
        let client_region_name = format!("{name}.{client_id}");
        let region = {
            let region_name = client_region_name.clone();
            tokio::task::spawn_blocking(move || ClientRegion::create(&region_name))
                .await
                .map_err(|e| Status::unexpected_error(e.to_string()))??
        };

        server_region
            .events()
            .push(client_id, ServerEventType::Created)?;

        let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
        loop {
            if region.client_state() == ClientState::Connected {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Status::connection_failure(
                    "timed out waiting for shm server to accept connection",
                ));
            }
            tokio::time::sleep(EVENT_POLL_INTERVAL).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Arc::new(ShmConnection {
            state: AtomicU8::new(ConnectionState::Init as u8),
            role: ShmRole::Client,
            client_id,
            region: Arc::new(region),
            server_region: Arc::new(server_region),
            local_address: Address::Shm(client_region_name),
            remote_address: Address::Shm(name.to_string()),
            outbound_tx: tx,
            outbound_rx_slot: Mutex::new(Some(rx)),
            parser_config,
        }))
    }

    fn from_accepted(
        region: Arc<ClientRegion>,
        client_id: u32,
        server_region: Arc<ServerRegion>,
        server_name: String,
        client_region_name: String,
        parser_config: MessageParserConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(ShmConnection {
            state: AtomicU8::new(ConnectionState::Init as u8),
            role: ShmRole::Server,
            client_id,
            region,
            server_region,
            local_address: Address::Shm(server_name),
            remote_address: Address::Shm(client_region_name),
            outbound_tx: tx,
            outbound_rx_slot: Mutex::new(Some(rx)),
            parser_config,
        })
    }

    pub fn local_address(&self) -> Address {
        self.local_address.clone()
    }

    pub fn remote_address(&self) -> Address {
        self.remote_address.clone()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

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
            .map_err(|_| Status::precondition_not_met("shm connection already started"))?;

        let rx = self
            .outbound_rx_slot
            .lock()
            .unwrap()
            .take()
            .expect("outbound receiver present while in Init state");

        self.state
            .store(ConnectionState::Processing as u8, Ordering::Release);

        let read_conn = self.clone();
        let read_closed = on_closed.clone();
        executor.post(ExecutorContext::Transport, async move {
            read_conn.read_loop(on_received, read_closed).await;
        });

        let write_conn = self.clone();
        executor.post(ExecutorContext::Transport, async move {
            write_conn.write_loop(rx, on_sent, on_closed).await;
        });

        Ok(())
    }

    pub fn async_send(&self, message: SerializedMessage) {
        if self.state() != ConnectionState::Processing {
            return;
        }
        let _ = self.outbound_tx.send(message);
    }

    pub async fn async_close(self: &Arc<Self>, on_closed: &OnClosed) {
        let previous = self
            .state
            .swap(ConnectionState::Stopped as u8, Ordering::AcqRel);
        if previous == ConnectionState::Stopped as u8 {
            return;
        }
        if self.role == ShmRole::Client {
            self.region.set_client_state(ClientState::Disconnected);
            self.announce(ServerEventType::Destroyed);
        }
        on_closed(Status::ok());
    }

    /// True while both this connection's own client-state and the
    /// server's global state are in their steady running condition. Read
    /// at the top of the read/write loops so a peer that died or was torn
    /// down without going through `async_close` (a crash, a killed
    /// process) is noticed instead of spinning on `wait_for_progress`
    /// forever.
    fn peer_alive(&self) -> bool {
        self.region.client_state() == ClientState::Connected
            && self.server_region.state() == ServerState::Running
    }

    /// Best-effort notification to the server's event queue. Only the
    /// client side of a connection announces itself this way; the
    /// server already owns the event queue it would otherwise be
    /// announcing to.
    fn announce(&self, event_type: ServerEventType) {
        if self.role != ShmRole::Client {
            return;
        }
        if let Err(status) = self.server_region.events().push(self.client_id, event_type) {
            tracing::warn!(%status, client_id = self.client_id, "failed to announce shm connection state");
        }
    }

    fn inbound(&self) -> &RingBuffer {
        match self.role {
            ShmRole::Client => self.region.server_to_client(),
            ShmRole::Server => self.region.client_to_server(),
        }
    }

    fn outbound(&self) -> &RingBuffer {
        match self.role {
            ShmRole::Client => self.region.client_to_server(),
            ShmRole::Server => self.region.server_to_client(),
        }
    }

    async fn read_loop(self: Arc<Self>, on_received: OnReceived, on_closed: OnClosed) {
        let mut parser = MessageParser::new(self.parser_config);
        loop {
            if self.state() != ConnectionState::Processing {
                return;
            }
            if !self.peer_alive() {
                self.close_with(Status::ok(), &on_closed);
                return;
            }
            let since = self.region.changes().snapshot();
            let buf = parser.prepare_buffer(self.parser_config.read_buffer_size);
            let n = self.inbound().read_some(buf);
            if n == 0 {
                if let Err(status) = self.wait_for_progress(since).await {
                    self.close_with(status, &on_closed);
                    return;
                }
                continue;
            }
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
    }

    async fn write_loop(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<SerializedMessage>,
        on_sent: OnSent,
        on_closed: OnClosed,
    ) {
        while let Some(message) = rx.recv().await {
            if self.state() != ConnectionState::Processing {
                return;
            }
            if !self.peer_alive() {
                self.close_with(Status::ok(), &on_closed);
                return;
            }
            let mut remaining = message.as_bytes();
            while !remaining.is_empty() {
                let since = self.region.changes().snapshot();
                let written = self.outbound().write_some(remaining);
                if written == 0 {
                    if let Err(status) = self.wait_for_progress(since).await {
                        self.close_with(status, &on_closed);
                        return;
                    }
                    continue;
                }
                remaining = &remaining[written..];
                self.region.changes().bump();
            }
            on_sent();
        }
    }

    async fn wait_for_progress(&self, since: u32) -> Result<()> {
        let region = self.region.clone();
        tokio::task::spawn_blocking(move || region.changes().wait_for_change(since, CHANGES_POLL_TIMEOUT))
            .await
            .map_err(|e| Status::unexpected_error(e.to_string()))??;
        Ok(())
    }

    fn close_with(self: &Arc<Self>, status: Status, on_closed: &OnClosed) {
        let previous = self
            .state
            .swap(ConnectionState::Stopped as u8, Ordering::AcqRel);
        if previous != ConnectionState::Stopped as u8 {
            if self.role == ShmRole::Client {
                if status.is_ok() {
                    self.region.set_client_state(ClientState::Disconnected);
                    self.announce(ServerEventType::Destroyed);
                } else {
                    self.region.set_client_state(ClientState::Error);
                    self.announce(ServerEventType::StateChanged);
                }
            }
            on_closed(status);
        }
    }
}

/// Owns the server's shared-memory region and discovers clients by
/// polling its `ServerEventQueue` for `Created` events (§4.8).
pub struct ShmAcceptor {
    state: AtomicU8,
    name: String,
    region: Mutex<Option<Arc<ServerRegion>>>,
    parser_config: MessageParserConfig,
    connections: Mutex<Vec<Arc<ShmConnection>>>,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ShmAcceptor {
    pub fn new(name: impl Into<String>, parser_config: MessageParserConfig) -> Result<Arc<Self>> {
        let name = name.into();
        let region = ServerRegion::create(&name)?;
        region.set_state(ServerState::Running);
        Ok(Arc::new(ShmAcceptor {
            state: AtomicU8::new(ConnectionState::Init as u8),
            name,
            region: Mutex::new(Some(Arc::new(region))),
            parser_config,
            connections: Mutex::new(Vec::new()),
            poll_task: Mutex::new(None),
        }))
    }

    pub fn local_address(&self) -> Address {
        Address::Shm(self.name.clone())
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn start(
        self: &Arc<Self>,
        executor: &Executor,
        on_connection: impl Fn(AnyConnection) + Send + 'static,
    ) -> Result<()> {
        self.state
            .compare_exchange(
                ConnectionState::Init as u8,
                ConnectionState::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Status::precondition_not_met("shm acceptor already started"))?;
        self.state
            .store(ConnectionState::Processing as u8, Ordering::Release);

        let this = self.clone();
        let handle = executor.transport_handle().spawn(async move {
            loop {
                if this.state() != ConnectionState::Processing {
                    return;
                }
                let event = {
                    let region = this.region.lock().unwrap();
                    region.as_ref().and_then(|r| r.events().pop())
                };
                match event {
                    Some(event) if event.event_type() == ServerEventType::Created => {
                        match this.accept_client(event.client_id).await {
                            Ok(connection) => on_connection(AnyConnection::Shm(connection)),
                            Err(status) => {
                                tracing::warn!(%status, client_id = event.client_id, "failed to accept shm client");
                            }
                        }
                    }
                    Some(event) if event.event_type() == ServerEventType::Destroyed => {
                        this.connections
                            .lock()
                            .unwrap()
                            .retain(|c| c.client_id != event.client_id);
                        tracing::debug!(client_id = event.client_id, "shm client disconnected");
                    }
                    Some(event) => {
                        tracing::trace!(
                            client_id = event.client_id,
                            event_type = ?event.event_type(),
                            "shm client state changed"
                        );
                    }
                    None => tokio::time::sleep(EVENT_POLL_INTERVAL).await,
                }
            }
        });
        *self.poll_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn accept_client(self: &Arc<Self>, client_id: u32) -> Result<Arc<ShmConnection>> {
        let server_region = self
            .region
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Status::precondition_not_met("shm acceptor region already torn down"))?;
        let client_region_name = format!("{}.{}", self.name, client_id);
        let region = {
            let region_name = client_region_name.clone();
            tokio::task::spawn_blocking(move || ClientRegion::open(&region_name))
                .await
                .map_err(|e| Status::unexpected_error(e.to_string()))??
        };
        region.set_client_state(ClientState::Connected);
        let connection = ShmConnection::from_accepted(
            Arc::new(region),
            client_id,
            server_region,
            self.name.clone(),
            client_region_name,
            self.parser_config,
        );
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }

    pub async fn stop(self: &Arc<Self>) {
        let previous = self
            .state
            .swap(ConnectionState::Stopped as u8, Ordering::AcqRel);
        if previous == ConnectionState::Stopped as u8 {
            return;
        }
        if let Some(handle) = self.poll_task.lock().unwrap().take() {
            handle.abort();
        }
        let connections = std::mem::take(&mut *self.connections.lock().unwrap());
        let on_closed: OnClosed = Arc::new(|_| {});
        for connection in connections {
            connection.async_close(&on_closed).await;
        }
        if let Some(region) = self.region.lock().unwrap().as_ref() {
            region.set_state(ServerState::Stopped);
        }
    }
}
