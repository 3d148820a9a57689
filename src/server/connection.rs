//! Per-accepted-connection dispatch (§4.7): routes inbound requests and
//! notifications to the method processor on the Callback context, and
//! serializes responses back through the connection's own sender
//! discipline.

use std::sync::Arc;

use crate::executor::{Executor, ExecutorContext};
use crate::messages::{MessageSerializer, ParsedMessage};
use crate::transport::AnyConnection;

use super::method_processor::MethodProcessor;

/// Wraps one accepted [`AnyConnection`] and a shared [`MethodProcessor`].
/// Requests get a response; notifications don't; a response received on
/// this side is a protocol violation and closes the connection (§4.7).
pub struct ServerConnection {
    connection: AnyConnection,
    processor: Arc<dyn MethodProcessor>,
    executor: Arc<Executor>,
}

impl ServerConnection {
    pub fn new(
        connection: AnyConnection,
        processor: Arc<dyn MethodProcessor>,
        executor: Arc<Executor>,
    ) -> Arc<Self> {
        Arc::new(ServerConnection {
            connection,
            processor,
            executor,
        })
    }

    /// Starts the underlying connection with callbacks that route inbound
    /// messages to `self`.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        let on_received: crate::transport::OnReceived = Arc::new(move |message| {
            this.handle_received(message);
        });

        let on_sent: crate::transport::OnSent = Arc::new(|| {});

        let closing = self.clone();
        let on_closed: crate::transport::OnClosed = Arc::new(move |status| {
            tracing::debug!(%status, remote = %closing.connection.remote_address(), "server connection closed");
        });

        if let Err(status) = self.connection.start(&self.executor, on_received, on_sent, on_closed) {
            tracing::warn!(%status, "failed to start server connection");
        }
    }

    fn handle_received(self: &Arc<Self>, message: ParsedMessage) {
        match message {
            ParsedMessage::Request { id, method, params, .. } => {
                let this = self.clone();
                self.executor.post(ExecutorContext::Callback, async move {
                    let outcome = this.processor.call(method.as_str(), &params);
                    let response = match outcome {
                        Ok(value) => MessageSerializer::serialize_successful_response(id, value),
                        Err(value) => MessageSerializer::serialize_error_response(id, value),
                    };
                    match response {
                        Ok(message) => this.connection.async_send(message),
                        Err(status) => tracing::warn!(%status, "failed to serialize response"),
                    }
                });
            }
            ParsedMessage::Notification { method, params, .. } => {
                let this = self.clone();
                self.executor.post(ExecutorContext::Callback, async move {
                    this.processor.notify(method.as_str(), &params);
                });
            }
            ParsedMessage::Response { id, .. } => {
                tracing::warn!(id, "server received a response, closing connection");
                let connection = self.connection.clone();
                let executor = self.executor.clone();
                executor.post(ExecutorContext::Transport, async move {
                    let on_closed: crate::transport::OnClosed = Arc::new(|_| {});
                    connection.async_close(&on_closed).await;
                });
            }
        }
    }
}
