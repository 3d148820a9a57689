//! TCP socket transport: `Addressed`/`Listener` glue over `tokio::net`.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::addresses::Address;

use super::acceptor::Listener;
use super::Addressed;

impl Addressed for tokio::net::TcpStream {
    fn local_address(&self) -> Address {
        match self.local_addr() {
            Ok(addr) => Address::Tcp(addr.ip(), addr.port()),
            Err(_) => Address::Tcp(IpAddr::from([0, 0, 0, 0]), 0),
        }
    }

    fn remote_address(&self) -> Address {
        match self.peer_addr() {
            Ok(addr) => Address::Tcp(addr.ip(), addr.port()),
            Err(_) => Address::Tcp(IpAddr::from([0, 0, 0, 0]), 0),
        }
    }
}

#[async_trait]
impl Listener for tokio::net::TcpListener {
    type Stream = tokio::net::TcpStream;

    async fn accept(&self) -> std::io::Result<Self::Stream> {
        let (stream, _peer) = tokio::net::TcpListener::accept(self).await?;
        stream.set_nodelay(true).ok();
        Ok(stream)
    }

    fn local_address(&self) -> Address {
        match self.local_addr() {
            Ok(addr) => Address::Tcp(addr.ip(), addr.port()),
            Err(_) => Address::Tcp(IpAddr::from([0, 0, 0, 0]), 0),
        }
    }
}
