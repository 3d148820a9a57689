use async_trait::async_trait;

use crate::addresses::Address;
use crate::common::{Result, Status};
use crate::config::MessageParserConfig;

use super::AnyConnection;

/// Attempts to establish a [`crate::transport::Connection`] to a given
/// [`Address`]. The client core drives this with retry logic (§4.6).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &Address, parser_config: MessageParserConfig) -> Result<AnyConnection>;
}

pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &Address, parser_config: MessageParserConfig) -> Result<AnyConnection> {
        let (ip, port) = address.as_tcp()?;
        let stream = tokio::net::TcpStream::connect((ip, port))
            .await
            .map_err(|e| Status::connection_failure(e.to_string()))?;
        stream.set_nodelay(true).ok();
        Ok(AnyConnection::Tcp(super::Connection::new(stream, parser_config)))
    }
}

pub struct UnixConnector;

#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self, address: &Address, parser_config: MessageParserConfig) -> Result<AnyConnection> {
        let path = address.as_unix()?;
        let stream = tokio::net::UnixStream::connect(path)
            .await
            .map_err(|e| Status::connection_failure(e.to_string()))?;
        Ok(AnyConnection::Unix(super::Connection::new(stream, parser_config)))
    }
}

pub struct ShmConnector;

#[async_trait]
impl Connector for ShmConnector {
    async fn connect(&self, address: &Address, parser_config: MessageParserConfig) -> Result<AnyConnection> {
        let name = address.as_shm()?;
        let connection = crate::shm::ShmConnection::connect(name, parser_config)
            .await
            .map_err(|e| Status::connection_failure(e.to_string()))?;
        Ok(AnyConnection::Shm(connection))
    }
}

/// Joins the per-scheme connectors into one type, per the transport
/// polymorphism design note.
pub enum AnyConnector {
    Tcp(TcpConnector),
    Unix(UnixConnector),
    Shm(ShmConnector),
}

impl AnyConnector {
    pub fn for_scheme(scheme: crate::addresses::Scheme) -> Self {
        match scheme {
            crate::addresses::Scheme::Tcp => AnyConnector::Tcp(TcpConnector),
            crate::addresses::Scheme::Unix => AnyConnector::Unix(UnixConnector),
            crate::addresses::Scheme::Shm => AnyConnector::Shm(ShmConnector),
        }
    }
}

#[async_trait]
impl Connector for AnyConnector {
    async fn connect(&self, address: &Address, parser_config: MessageParserConfig) -> Result<AnyConnection> {
        match self {
            AnyConnector::Tcp(c) => c.connect(address, parser_config).await,
            AnyConnector::Unix(c) => c.connect(address, parser_config).await,
            AnyConnector::Shm(c) => c.connect(address, parser_config).await,
        }
    }
}
