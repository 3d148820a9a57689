//! Reconnection loop for the client core (§4.6): resolves an ordered list
//! of server URIs, attempts them in order, installs whichever connects
//! first, and on disconnection schedules another attempt with bounded
//! exponential backoff and jitter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::addresses::Uri;
use crate::config::{MessageParserConfig, ReconnectConfig};
use crate::executor::Executor;
use crate::messages::ParsedMessage;
use crate::transport::{AnyConnection, AnyConnector, AnyResolver, Connector, Resolver};

use super::call_list::CallList;
use super::sender::{ConnectionSlot, MessageSender};

/// Given an ordered list of server URIs, maintains at most one live
/// connection and keeps retrying on disconnection until stopped.
pub struct ClientConnector {
    uris: Vec<Uri>,
    reconnect_config: ReconnectConfig,
    parser_config: MessageParserConfig,
    executor: Arc<Executor>,
    connection: ConnectionSlot,
    sender: Arc<MessageSender>,
    call_list: Arc<CallList>,
    running: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ClientConnector {
    pub fn new(
        uris: Vec<Uri>,
        reconnect_config: ReconnectConfig,
        parser_config: MessageParserConfig,
        executor: Arc<Executor>,
        connection: ConnectionSlot,
        sender: Arc<MessageSender>,
        call_list: Arc<CallList>,
    ) -> Arc<Self> {
        Arc::new(ClientConnector {
            uris,
            reconnect_config,
            parser_config,
            executor,
            connection,
            sender,
            call_list,
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    /// Spawns the connect/reconnect loop onto the Transport context.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::Release);
        let this = self.clone();
        let handle = self.executor.transport_handle().spawn(async move {
            this.run().await;
        });
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Stops retrying and drops the current connection, if any.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        let connection = self.connection.lock().unwrap().take();
        if let Some(connection) = connection {
            let on_closed: crate::transport::OnClosed = Arc::new(|_| {});
            connection.async_close(&on_closed).await;
        }
    }

    async fn run(self: Arc<Self>) {
        let mut attempt = 0u32;
        loop {
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            match self.try_connect_once().await {
                Some(connection) => {
                    attempt = 0;
                    *self.connection.lock().unwrap() = Some(connection);
                    self.sender.send_next();
                }
                None => {
                    tracing::warn!(attempt, "client connector exhausted its URI list");
                }
            }
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            self.wait_for_disconnection().await;
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            self.sender.handle_disconnection();
            let delay = self.reconnect_config.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tracing::debug!(?delay, attempt, "scheduling reconnect attempt");
            tokio::time::sleep(delay).await;
        }
    }

    async fn try_connect_once(&self) -> Option<AnyConnection> {
        for uri in &self.uris {
            let resolver = AnyResolver::for_scheme(uri.scheme());
            let addresses = match resolver.resolve(uri).await {
                Ok(addresses) => addresses,
                Err(status) => {
                    tracing::debug!(%uri, %status, "failed to resolve client uri");
                    continue;
                }
            };
            let connector = AnyConnector::for_scheme(uri.scheme());
            for address in &addresses {
                match connector.connect(address, self.parser_config).await {
                    Ok(connection) => {
                        tracing::debug!(%uri, "client connected");
                        return Some(self.attach_callbacks(connection));
                    }
                    Err(status) => {
                        tracing::debug!(%uri, %status, "failed to connect");
                    }
                }
            }
        }
        None
    }

    fn attach_callbacks(&self, connection: AnyConnection) -> AnyConnection {
        let sender = self.sender.clone();
        let on_sent: crate::transport::OnSent = Arc::new(move || sender.handle_sent());

        let call_list = self.call_list.clone();
        let on_received: crate::transport::OnReceived = Arc::new(move |message| {
            route_response(&call_list, message);
        });

        let connection_slot = self.connection.clone();
        let on_closed: crate::transport::OnClosed = Arc::new(move |status| {
            tracing::debug!(%status, "client connection closed");
            *connection_slot.lock().unwrap() = None;
        });

        if let Err(status) = connection.start(&self.executor, on_received, on_sent, on_closed) {
            tracing::warn!(%status, "failed to start client connection");
        }
        connection
    }

    async fn wait_for_disconnection(&self) {
        loop {
            if self.connection.lock().unwrap().is_none() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}

fn route_response(call_list: &Arc<CallList>, message: ParsedMessage) {
    match message {
        ParsedMessage::Response { id, result, .. } => call_list.handle(id, result),
        ParsedMessage::Request { method, .. } => {
            tracing::warn!(method = method.as_str(), "client received a request, ignoring");
        }
        ParsedMessage::Notification { method, .. } => {
            tracing::trace!(method = method.as_str(), "client received a notification, ignoring");
        }
    }
}
