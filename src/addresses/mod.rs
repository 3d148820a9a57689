//! URIs and resolved addresses for the three supported transports.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::common::{Result, Status};

/// Scheme recognized in a [`Uri`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Unix,
    Shm,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Unix => "unix",
            Scheme::Shm => "shm",
        }
    }
}

/// A parsed `scheme://authority` string, not yet resolved to a concrete
/// [`Address`] (TCP host names are resolved later, by a [`crate::transport::Resolver`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    scheme: Scheme,
    host_or_path: String,
    port: Option<u16>,
}

impl Uri {
    /// Parses one of the three accepted forms:
    /// `tcp://HOST:PORT`, `tcp://[IPv6]:PORT`, `unix://PATH`, `shm://NAME`
    /// (`NAME` must contain no `/`).
    pub fn parse(s: &str) -> Result<Uri> {
        let (scheme_str, rest) = s
            .split_once("://")
            .ok_or_else(|| Status::invalid_argument(format!("not a URI: {s}")))?;

        match scheme_str {
            "tcp" => parse_tcp_authority(rest),
            "unix" => {
                if rest.is_empty() {
                    return Err(Status::invalid_argument("unix URI missing path"));
                }
                Ok(Uri {
                    scheme: Scheme::Unix,
                    host_or_path: rest.to_string(),
                    port: None,
                })
            }
            "shm" => {
                if rest.is_empty() || rest.contains('/') {
                    return Err(Status::invalid_argument(format!(
                        "invalid shm name: {rest}"
                    )));
                }
                Ok(Uri {
                    scheme: Scheme::Shm,
                    host_or_path: rest.to_string(),
                    port: None,
                })
            }
            other => Err(Status::invalid_argument(format!(
                "unrecognized scheme: {other}"
            ))),
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host_or_path(&self) -> &str {
        &self.host_or_path
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

fn parse_tcp_authority(authority: &str) -> Result<Uri> {
    // `[host]:port` (IPv6) or `host:port` (IPv4 / hostname).
    let (host, port_str) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Status::invalid_argument("unterminated IPv6 literal in tcp URI"))?;
        let port_str = after
            .strip_prefix(':')
            .ok_or_else(|| Status::invalid_argument("tcp URI missing port"))?;
        (host, port_str)
    } else {
        authority
            .rsplit_once(':')
            .ok_or_else(|| Status::invalid_argument("tcp URI missing port"))?
    };

    if host.is_empty() {
        return Err(Status::invalid_argument("tcp URI missing host"));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| Status::invalid_argument(format!("invalid port: {port_str}")))?;

    Ok(Uri {
        scheme: Scheme::Tcp,
        host_or_path: host.to_string(),
        port: Some(port),
    })
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Tcp => {
                if self.host_or_path.contains(':') {
                    write!(
                        f,
                        "tcp://[{}]:{}",
                        self.host_or_path,
                        self.port.unwrap_or(0)
                    )
                } else {
                    write!(
                        f,
                        "tcp://{}:{}",
                        self.host_or_path,
                        self.port.unwrap_or(0)
                    )
                }
            }
            Scheme::Unix | Scheme::Shm => {
                write!(f, "{}://{}", self.scheme.as_str(), self.host_or_path)
            }
        }
    }
}

/// A resolved endpoint: either a socket address, a filesystem path, or a
/// shared-memory region name. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(IpAddr, u16),
    Unix(PathBuf),
    Shm(String),
}

impl Address {
    /// Round-trips this address back into the [`Uri`] it could have been
    /// resolved from.
    pub fn to_uri(&self) -> Uri {
        match self {
            Address::Tcp(ip, port) => Uri {
                scheme: Scheme::Tcp,
                host_or_path: ip.to_string(),
                port: Some(*port),
            },
            Address::Unix(path) => Uri {
                scheme: Scheme::Unix,
                host_or_path: path.to_string_lossy().into_owned(),
                port: None,
            },
            Address::Shm(name) => Uri {
                scheme: Scheme::Shm,
                host_or_path: name.clone(),
                port: None,
            },
        }
    }

    /// Returns the `(ip, port)` pair, or `PRECONDITION_NOT_MET` if this is
    /// not a TCP address.
    pub fn as_tcp(&self) -> Result<(IpAddr, u16)> {
        match self {
            Address::Tcp(ip, port) => Ok((*ip, *port)),
            _ => Err(Status::precondition_not_met(
                "address is not a tcp address",
            )),
        }
    }

    pub fn as_unix(&self) -> Result<&std::path::Path> {
        match self {
            Address::Unix(path) => Ok(path.as_path()),
            _ => Err(Status::precondition_not_met(
                "address is not a unix address",
            )),
        }
    }

    pub fn as_shm(&self) -> Result<&str> {
        match self {
            Address::Shm(name) => Ok(name.as_str()),
            _ => Err(Status::precondition_not_met(
                "address is not a shm address",
            )),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_uri() {
        let uri = Uri::parse("tcp://127.0.0.1:9000").unwrap();
        assert_eq!(uri.scheme(), Scheme::Tcp);
        assert_eq!(uri.host_or_path(), "127.0.0.1");
        assert_eq!(uri.port(), Some(9000));
    }

    #[test]
    fn parses_tcp_ipv6_uri() {
        let uri = Uri::parse("tcp://[::1]:9000").unwrap();
        assert_eq!(uri.host_or_path(), "::1");
        assert_eq!(uri.port(), Some(9000));
        assert_eq!(uri.to_string(), "tcp://[::1]:9000");
    }

    #[test]
    fn parses_unix_uri() {
        let uri = Uri::parse("unix:///tmp/sock").unwrap();
        assert_eq!(uri.scheme(), Scheme::Unix);
        assert_eq!(uri.host_or_path(), "/tmp/sock");
    }

    #[test]
    fn rejects_shm_name_with_slash() {
        let err = Uri::parse("shm://a/b").unwrap_err();
        assert_eq!(err.code(), crate::common::StatusCode::InvalidArgument);
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Uri::parse("ftp://host").is_err());
    }

    #[test]
    fn address_round_trips_through_uri() {
        let addr = Address::Unix(PathBuf::from("/tmp/sock"));
        assert_eq!(addr.to_uri().to_string(), "unix:///tmp/sock");
    }

    #[test]
    fn as_tcp_fails_on_wrong_variant() {
        let addr = Address::Shm("name".into());
        let err = addr.as_tcp().unwrap_err();
        assert_eq!(err.code(), crate::common::StatusCode::PreconditionNotMet);
    }
}
