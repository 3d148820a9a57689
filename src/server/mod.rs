//! Server core (§4.7): a set of acceptors sharing one method processor
//! and executor. `start()` puts every acceptor into Processing; `stop()`
//! tears them all down, which in turn closes every accepted connection.

mod connection;
mod method_processor;

pub use method_processor::{HandlerMap, MethodProcessor};

use std::sync::Arc;

use crate::addresses::{Address, Scheme, Uri};
use crate::common::{Result, Status};
use crate::config::MessageParserConfig;
use crate::executor::Executor;
use crate::transport::acceptor::Acceptor;
use crate::transport::{AnyAcceptor, AnyConnection};

use connection::ServerConnection;

/// Owns a vector of [`AnyAcceptor`]s, a shared [`MethodProcessor`], and
/// the [`Executor`] both run on.
pub struct Server {
    acceptors: Vec<Arc<AnyAcceptor>>,
    processor: Arc<dyn MethodProcessor>,
    executor: Arc<Executor>,
}

impl Server {
    /// Binds one listening endpoint per `uri` and returns a server ready
    /// to `start()`. Fails with `INVALID_ARGUMENT` if `uris` is empty, or
    /// with whatever status the first failing bind produces.
    pub async fn bind(
        uris: &[Uri],
        parser_config: MessageParserConfig,
        processor: Arc<dyn MethodProcessor>,
        executor: Arc<Executor>,
    ) -> Result<Arc<Server>> {
        if uris.is_empty() {
            return Err(Status::invalid_argument("server requires at least one listen uri"));
        }

        let mut acceptors = Vec::with_capacity(uris.len());
        for uri in uris {
            acceptors.push(Arc::new(bind_one(uri, parser_config).await?));
        }

        Ok(Arc::new(Server {
            acceptors,
            processor,
            executor,
        }))
    }

    pub fn local_addresses(&self) -> Vec<Address> {
        self.acceptors.iter().map(|a| a.local_address()).collect()
    }

    /// Starts every acceptor; each accepted connection becomes a
    /// [`ServerConnection`] routing to this server's processor.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        for acceptor in &self.acceptors {
            let processor = self.processor.clone();
            let executor = self.executor.clone();
            acceptor.start(&self.executor, move |connection: AnyConnection| {
                let server_connection = ServerConnection::new(connection, processor.clone(), executor.clone());
                server_connection.start();
            })?;
        }
        Ok(())
    }

    /// Stops every acceptor, which transitively closes every connection
    /// it accepted.
    pub async fn stop(&self) {
        for acceptor in &self.acceptors {
            acceptor.stop().await;
        }
    }
}

async fn bind_one(uri: &Uri, parser_config: MessageParserConfig) -> Result<AnyAcceptor> {
    match uri.scheme() {
        Scheme::Tcp => {
            let port = uri
                .port()
                .ok_or_else(|| Status::invalid_argument("tcp listen uri missing port"))?;
            let listener = tokio::net::TcpListener::bind((uri.host_or_path(), port))
                .await
                .map_err(|e| Status::operation_failure(e.to_string()))?;
            Ok(AnyAcceptor::Tcp(Acceptor::new(listener, parser_config, None)))
        }
        Scheme::Unix => {
            let path = std::path::PathBuf::from(uri.host_or_path());
            let listener = tokio::net::UnixListener::bind(&path)
                .map_err(|e| Status::operation_failure(e.to_string()))?;
            Ok(AnyAcceptor::Unix(Acceptor::new(listener, parser_config, Some(path))))
        }
        Scheme::Shm => {
            let acceptor = crate::shm::ShmAcceptor::new(uri.host_or_path(), parser_config)?;
            Ok(AnyAcceptor::Shm(acceptor))
        }
    }
}
