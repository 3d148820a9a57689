//! Unix domain socket transport: `Addressed`/`Listener` glue over
//! `tokio::net`.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::addresses::Address;

use super::acceptor::Listener;
use super::Addressed;

fn pathname(addr: std::io::Result<tokio::net::unix::SocketAddr>) -> PathBuf {
    addr.ok()
        .and_then(|a| a.as_pathname().map(|p| p.to_path_buf()))
        .unwrap_or_default()
}

impl Addressed for tokio::net::UnixStream {
    fn local_address(&self) -> Address {
        Address::Unix(pathname(self.local_addr()))
    }

    fn remote_address(&self) -> Address {
        Address::Unix(pathname(self.peer_addr()))
    }
}

#[async_trait]
impl Listener for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    async fn accept(&self) -> std::io::Result<Self::Stream> {
        let (stream, _peer) = tokio::net::UnixListener::accept(self).await?;
        Ok(stream)
    }

    fn local_address(&self) -> Address {
        Address::Unix(pathname(self.local_addr()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageParserConfig;
    use crate::executor::Executor;
    use crate::transport::acceptor::Acceptor;
    use crate::transport::Connection;
    use std::sync::Arc;

    #[tokio::test]
    async fn unix_accept_yields_connected_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let acceptor = Acceptor::new(listener, MessageParserConfig::default(), Some(path.clone()));
        let executor = Executor::from_current();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        acceptor
            .start(&executor, move |conn: Arc<Connection<tokio::net::UnixStream>>| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(conn);
                }
            })
            .unwrap();

        let _client = tokio::net::UnixStream::connect(&path).await.unwrap();
        let accepted = rx.await.unwrap();
        assert!(accepted.state() == crate::transport::ConnectionState::Init);
        acceptor.stop().await;
        assert!(!path.exists());
    }
}
