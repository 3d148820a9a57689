//! Error taxonomy shared across the whole crate.
//!
//! Every fallible operation in this crate returns `Result<T>`, an alias for
//! `std::result::Result<T, Status>`. There is deliberately one error type:
//! callers never have to match on a per-module error enum to find out what
//! went wrong with a connection, a parse, or a configuration value.

use std::fmt;

/// Coarse classification of what went wrong.
///
/// Carried alongside a human-readable message inside [`Status`]; match on
/// this, not the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Not an error.
    Success,
    /// Caller supplied invalid configuration.
    InvalidArgument,
    /// Malformed MessagePack-RPC frame.
    InvalidMessage,
    /// A MessagePack object could not be decoded into the requested type.
    TypeError,
    /// Operation invoked while the owning state machine was in the wrong state.
    PreconditionNotMet,
    /// Cancelled by local shutdown.
    OperationAborted,
    /// OS-level failure (syscall).
    OperationFailure,
    /// DNS/address resolution failed.
    HostUnresolved,
    /// The peer could not be reached.
    ConnectionFailure,
    /// A deadline elapsed before completion.
    Timeout,
    /// The peer responded with an error.
    ServerError,
    /// Catch-all for violated invariants.
    UnexpectedError,
}

impl StatusCode {
    fn as_str(self) -> &'static str {
        match self {
            StatusCode::Success => "success",
            StatusCode::InvalidArgument => "invalid argument",
            StatusCode::InvalidMessage => "invalid message",
            StatusCode::TypeError => "type error",
            StatusCode::PreconditionNotMet => "precondition not met",
            StatusCode::OperationAborted => "operation aborted",
            StatusCode::OperationFailure => "operation failure",
            StatusCode::HostUnresolved => "host unresolved",
            StatusCode::ConnectionFailure => "connection failure",
            StatusCode::Timeout => "timeout",
            StatusCode::ServerError => "server error",
            StatusCode::UnexpectedError => "unexpected error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(code, message)` pair, the one error type used across the public API.
#[derive(Debug, Clone)]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    /// Builds a non-error status.
    pub fn ok() -> Self {
        Status {
            code: StatusCode::Success,
            message: String::new(),
        }
    }

    /// Builds a status carrying `code` and a human-readable `message`.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Success
    }
}

macro_rules! status_ctor {
    ($name:ident, $code:ident) => {
        impl Status {
            pub fn $name(message: impl Into<String>) -> Self {
                Status::new(StatusCode::$code, message)
            }
        }
    };
}

status_ctor!(invalid_argument, InvalidArgument);
status_ctor!(invalid_message, InvalidMessage);
status_ctor!(type_error, TypeError);
status_ctor!(precondition_not_met, PreconditionNotMet);
status_ctor!(operation_aborted, OperationAborted);
status_ctor!(operation_failure, OperationFailure);
status_ctor!(host_unresolved, HostUnresolved);
status_ctor!(connection_failure, ConnectionFailure);
status_ctor!(timeout, Timeout);
status_ctor!(server_error, ServerError);
status_ctor!(unexpected_error, UnexpectedError);

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for Status {}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        Status::operation_failure(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Status {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Status::invalid_message(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Status {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Status::invalid_message(err.to_string())
    }
}

/// Crate-wide result alias. Every public fallible operation returns this.
pub type Result<T> = std::result::Result<T, Status>;
