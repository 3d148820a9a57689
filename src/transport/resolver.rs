use async_trait::async_trait;

use crate::addresses::{Address, Scheme, Uri};
use crate::common::{Result, Status};

/// Turns a [`Uri`] into a (possibly empty) ordered list of [`Address`]es.
/// For TCP this performs DNS resolution; Unix and shared-memory URIs map
/// trivially to one address.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, uri: &Uri) -> Result<Vec<Address>>;
}

pub struct TcpResolver;

#[async_trait]
impl Resolver for TcpResolver {
    async fn resolve(&self, uri: &Uri) -> Result<Vec<Address>> {
        let port = uri
            .port()
            .ok_or_else(|| Status::invalid_argument("tcp URI missing port"))?;
        let lookup_target = format!("{}:{}", uri.host_or_path(), port);
        let addrs = tokio::net::lookup_host(&lookup_target)
            .await
            .map_err(|e| Status::host_unresolved(e.to_string()))?;
        let resolved: Vec<Address> = addrs
            .map(|socket_addr| Address::Tcp(socket_addr.ip(), socket_addr.port()))
            .collect();
        if resolved.is_empty() {
            return Err(Status::host_unresolved(format!(
                "no addresses for {lookup_target}"
            )));
        }
        Ok(resolved)
    }
}

pub struct UnixResolver;

#[async_trait]
impl Resolver for UnixResolver {
    async fn resolve(&self, uri: &Uri) -> Result<Vec<Address>> {
        Ok(vec![Address::Unix(uri.host_or_path().into())])
    }
}

pub struct ShmResolver;

#[async_trait]
impl Resolver for ShmResolver {
    async fn resolve(&self, uri: &Uri) -> Result<Vec<Address>> {
        Ok(vec![Address::Shm(uri.host_or_path().to_string())])
    }
}

/// Joins the per-scheme resolvers into one type, per the transport
/// polymorphism design note.
pub enum AnyResolver {
    Tcp(TcpResolver),
    Unix(UnixResolver),
    Shm(ShmResolver),
}

impl AnyResolver {
    pub fn for_scheme(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Tcp => AnyResolver::Tcp(TcpResolver),
            Scheme::Unix => AnyResolver::Unix(UnixResolver),
            Scheme::Shm => AnyResolver::Shm(ShmResolver),
        }
    }
}

#[async_trait]
impl Resolver for AnyResolver {
    async fn resolve(&self, uri: &Uri) -> Result<Vec<Address>> {
        match self {
            AnyResolver::Tcp(r) => r.resolve(uri).await,
            AnyResolver::Unix(r) => r.resolve(uri).await,
            AnyResolver::Shm(r) => r.resolve(uri).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unix_resolver_maps_path_directly() {
        let uri = Uri::parse("unix:///tmp/sock").unwrap();
        let resolved = UnixResolver.resolve(&uri).await.unwrap();
        assert_eq!(resolved, vec![Address::Unix("/tmp/sock".into())]);
    }

    #[tokio::test]
    async fn tcp_resolver_resolves_loopback() {
        let uri = Uri::parse("tcp://127.0.0.1:9999").unwrap();
        let resolved = TcpResolver.resolve(&uri).await.unwrap();
        assert!(resolved
            .iter()
            .any(|a| matches!(a, Address::Tcp(_, 9999))));
    }
}
