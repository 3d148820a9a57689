//! Client core (§4.6): resolves and maintains a connection to a server
//! across an ordered list of URIs, tracks in-flight calls by id, and
//! serializes outbound frames one at a time.

mod call_list;
mod connector;
mod sender;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::addresses::Uri;
use crate::common::{Result, Status};
use crate::config::{MessageParserConfig, ReconnectConfig};
use crate::executor::{Executor, ExecutorContext};
use crate::messages::{CallResult, MessageId, MessageSerializer};

use call_list::CallList;
use connector::ClientConnector;
use sender::{ConnectionSlot, MessageSender, SentMessageQueue};

/// A pending call's promise. Returned by [`Client::async_call`]; resolves
/// once a matching response arrives, the client is stopped, or the call's
/// own deadline elapses.
pub struct CallHandle {
    id: MessageId,
    rx: oneshot::Receiver<Result<CallResult>>,
    executor: Arc<Executor>,
    call_list: Arc<CallList>,
}

impl CallHandle {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Awaits the response with no deadline of its own (the caller
    /// supplies cancellation, e.g. via `tokio::time::timeout`).
    pub async fn result(self) -> Result<CallResult> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(Status::operation_aborted("client stopped")))
    }

    /// Blocks the calling thread (not necessarily a `tokio` thread) until
    /// the response arrives or `timeout` elapses, per §5. Posts the wait
    /// onto the client's Callback context rather than requiring the
    /// caller's thread to be inside a `tokio` runtime. On a deadline
    /// elapsing, forgets the call so the call list doesn't keep a settled
    /// oneshot sender alive for the rest of the process.
    pub fn get_result_within(self, timeout: Duration) -> Result<CallResult> {
        let CallHandle {
            id,
            rx,
            executor,
            call_list,
        } = self;
        let (tx, result_rx) = std::sync::mpsc::channel();
        executor.post(ExecutorContext::Callback, async move {
            let outcome = match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Status::operation_aborted("client stopped")),
                Err(_) => {
                    call_list.forget(id);
                    Err(Status::timeout("call deadline elapsed"))
                }
            };
            let _ = tx.send(outcome);
        });
        result_rx
            .recv()
            .unwrap_or_else(|_| Err(Status::unexpected_error("call result channel closed")))
    }
}

/// Client lifecycle: `start` spawns the reconnecting connector,
/// `async_call`/`notify` enqueue frames, `stop` tears everything down.
pub struct Client {
    executor: Arc<Executor>,
    call_list: Arc<CallList>,
    sender: Arc<MessageSender>,
    connector: Arc<ClientConnector>,
    started: Mutex<bool>,
}

impl Client {
    /// Builds a client targeting `uris` in order (§4.6) but does not yet
    /// connect; call [`Client::start`] to spawn the connector.
    pub fn new(
        uris: Vec<Uri>,
        parser_config: MessageParserConfig,
        reconnect_config: ReconnectConfig,
        executor: Arc<Executor>,
    ) -> Arc<Self> {
        let connection: ConnectionSlot = Arc::new(Mutex::new(None));
        let queue = Arc::new(SentMessageQueue::new());
        let call_list = Arc::new(CallList::new());
        let sender = MessageSender::new(connection.clone(), queue);
        let connector = ClientConnector::new(
            uris,
            reconnect_config,
            parser_config,
            executor.clone(),
            connection,
            sender.clone(),
            call_list.clone(),
        );

        Arc::new(Client {
            executor,
            call_list,
            sender,
            connector,
            started: Mutex::new(false),
        })
    }

    /// Spawns the reconnecting connector. Idempotent: a second call is a
    /// no-op.
    pub fn start(&self) {
        let mut started = self.started.lock().unwrap();
        if *started {
            return;
        }
        self.connector.start();
        *started = true;
    }

    /// Enqueues a request and returns a handle to its eventual response.
    pub fn async_call<P: Serialize>(&self, method: &str, params: P) -> Result<CallHandle> {
        let (id, rx) = self.call_list.create();
        let message = MessageSerializer::serialize_request(method, id, params)?;
        self.sender.send(message, Some(id));
        Ok(CallHandle {
            id,
            rx,
            executor: self.executor.clone(),
            call_list: self.call_list.clone(),
        })
    }

    /// Convenience wrapper over `async_call` that awaits the response and
    /// decodes its result into `T`, turning a server-side error payload
    /// into `Status::server_error` (§7).
    pub async fn call<T: DeserializeOwned, P: Serialize>(&self, method: &str, params: P) -> Result<T> {
        let handle = self.async_call(method, params)?;
        let result = handle.result().await?;
        if result.is_ok() {
            result.result_as()
        } else {
            let message: String = result
                .error_as()
                .unwrap_or_else(|_| format!("{:?}", result.raw_value()));
            Err(Status::server_error(message))
        }
    }

    /// Enqueues a one-way message; no response is ever expected.
    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let message = MessageSerializer::serialize_notification(method, params)?;
        self.sender.send(message, None);
        Ok(())
    }

    /// Cancels every outstanding call with `OPERATION_ABORTED`, drops the
    /// connection, and stops the connector.
    pub async fn stop(&self) {
        self.call_list.cancel_all(Status::operation_aborted("client stopped"));
        self.connector.stop().await;
    }
}
