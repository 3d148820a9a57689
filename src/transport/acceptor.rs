use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::addresses::Address;
use crate::common::{Result, Status};
use crate::config::MessageParserConfig;
use crate::executor::Executor;

use super::{Connection, ConnectionState, Socket};

/// What a listening endpoint needs to supply to be wrapped in an
/// [`Acceptor`]: one `accept` operation yielding a socket, plus its own
/// bound address.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    type Stream: Socket;

    async fn accept(&self) -> std::io::Result<Self::Stream>;
    fn local_address(&self) -> Address;
}

/// Owns a listening endpoint, the connections it has accepted, and its
/// own `Init/Starting/Processing/Stopped` state machine (§4.3).
pub struct Acceptor<L: Listener> {
    state: AtomicU8,
    local_address: Address,
    listener_slot: Mutex<Option<L>>,
    connections: Mutex<Vec<Arc<Connection<L::Stream>>>>,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    unlink_path: Option<PathBuf>,
    parser_config: MessageParserConfig,
}

impl<L: Listener> Acceptor<L> {
    pub fn new(listener: L, parser_config: MessageParserConfig, unlink_path: Option<PathBuf>) -> Arc<Self> {
        let local_address = listener.local_address();
        Arc::new(Acceptor {
            state: AtomicU8::new(ConnectionState::Init as u8),
            local_address,
            listener_slot: Mutex::new(Some(listener)),
            connections: Mutex::new(Vec::new()),
            accept_task: Mutex::new(None),
            unlink_path,
            parser_config,
        })
    }

    pub fn local_address(&self) -> &Address {
        &self.local_address
    }

    fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            0 => ConnectionState::Init,
            1 => ConnectionState::Starting,
            2 => ConnectionState::Processing,
            _ => ConnectionState::Stopped,
        }
    }

    /// Accepts connections until `stop()` is called or the listener
    /// errors out. Each accepted socket is wrapped in a `Connection`,
    /// kept in this acceptor's connection list, and handed to
    /// `on_connection`. Calling `start` twice fails with
    /// `PRECONDITION_NOT_MET`.
    pub fn start<F>(self: &Arc<Self>, executor: &Executor, on_connection: F) -> Result<()>
    where
        F: Fn(Arc<Connection<L::Stream>>) + Send + 'static,
    {
        self.state
            .compare_exchange(
                ConnectionState::Init as u8,
                ConnectionState::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Status::precondition_not_met("acceptor already started"))?;

        let listener = self
            .listener_slot
            .lock()
            .unwrap()
            .take()
            .expect("listener present while in Init state");

        self.state
            .store(ConnectionState::Processing as u8, Ordering::Release);

        let this = self.clone();
        let parser_config = self.parser_config;
        let handle = executor.transport_handle().spawn(async move {
            loop {
                if this.state() != ConnectionState::Processing {
                    return;
                }
                match listener.accept().await {
                    Ok(stream) => {
                        let connection = Connection::new(stream, parser_config);
                        this.connections.lock().unwrap().push(connection.clone());
                        on_connection(connection);
                    }
                    Err(_) => return,
                }
            }
        });
        *self.accept_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Cancels the accept loop, closes every accepted connection, and (for
    /// Unix-socket acceptors) unlinks the listening path. Idempotent.
    pub async fn stop(self: &Arc<Self>) {
        let previous = self.state.swap(ConnectionState::Stopped as u8, Ordering::AcqRel);
        if previous == ConnectionState::Stopped as u8 {
            return;
        }
        if let Some(handle) = self.accept_task.lock().unwrap().take() {
            handle.abort();
        }
        let connections = std::mem::take(&mut *self.connections.lock().unwrap());
        let on_closed: super::OnClosed = Arc::new(|_| {});
        for connection in connections {
            connection.async_close(&on_closed).await;
        }
        if let Some(path) = &self.unlink_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Joins the per-scheme acceptors into one type, per the transport
/// polymorphism design note.
pub enum AnyAcceptor {
    Tcp(Arc<Acceptor<tokio::net::TcpListener>>),
    Unix(Arc<Acceptor<tokio::net::UnixListener>>),
    Shm(Arc<crate::shm::ShmAcceptor>),
}

impl AnyAcceptor {
    pub fn local_address(&self) -> Address {
        match self {
            AnyAcceptor::Tcp(a) => a.local_address().clone(),
            AnyAcceptor::Unix(a) => a.local_address().clone(),
            AnyAcceptor::Shm(a) => a.local_address(),
        }
    }

    pub fn start(
        &self,
        executor: &Executor,
        on_connection: impl Fn(super::AnyConnection) + Send + 'static,
    ) -> Result<()> {
        match self {
            AnyAcceptor::Tcp(a) => a.start(executor, move |c| on_connection(super::AnyConnection::Tcp(c))),
            AnyAcceptor::Unix(a) => a.start(executor, move |c| on_connection(super::AnyConnection::Unix(c))),
            AnyAcceptor::Shm(a) => a.start(executor, on_connection),
        }
    }

    pub async fn stop(&self) {
        match self {
            AnyAcceptor::Tcp(a) => a.stop().await,
            AnyAcceptor::Unix(a) => a.stop().await,
            AnyAcceptor::Shm(a) => a.stop().await,
        }
    }
}
