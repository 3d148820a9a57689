//! # MessagePack-RPC runtime
//!
//! A client/server runtime for the MessagePack-RPC wire protocol, with
//! TCP, Unix-domain-socket, and shared-memory transports sharing one
//! connection and executor model.

pub mod addresses;
pub mod clients;
pub mod common;
pub mod config;
pub mod executor;
pub mod logging;
pub mod messages;
pub mod server;
pub mod shm;
pub mod transport;

pub use addresses::{Address, Scheme, Uri};
pub use clients::{CallHandle, Client};
pub use common::{Result, Status, StatusCode};
pub use config::{ExecutorConfig, LoggingConfig, MessageParserConfig, ReconnectConfig};
pub use executor::{Executor, ExecutorContext};
pub use messages::{CallResult, MessageId};
pub use server::{HandlerMap, MethodProcessor, Server};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
