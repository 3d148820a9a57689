//! MessagePack-RPC frame types: ids, method names, serialized/parsed
//! messages, and the (de)serializer built on `rmpv`/`rmp-serde`.

mod parser;
mod serializer;

pub use parser::MessageParser;
pub use serializer::MessageSerializer;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::common::{Result, Status};

/// Client-assigned, monotonically increasing (with wraparound) request id.
pub type MessageId = u32;

/// Wire-level type tag: request (0), response (1), notification (2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Notification = 2,
}

/// A UTF-8 method name. Equality and hashing are by bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodName(String);

impl MethodName {
    pub fn new(name: impl Into<String>) -> Self {
        MethodName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MethodName {
    fn from(value: &str) -> Self {
        MethodName::new(value)
    }
}

impl From<String> for MethodName {
    fn from(value: String) -> Self {
        MethodName::new(value)
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable, reference-counted buffer holding one complete
/// MessagePack-encoded frame. Once constructed, the bytes are never
/// mutated; clones share the underlying allocation.
#[derive(Debug, Clone)]
pub struct SerializedMessage(Arc<Vec<u8>>);

impl SerializedMessage {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        SerializedMessage(Arc::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::ops::Deref for SerializedMessage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// The ref-counted arena backing a [`ParsedMessage`]: the raw bytes that
/// were decoded to produce it. Kept alongside the decoded `rmpv::Value`
/// tree so a parsed message's lifetime is tied to the buffer it came from,
/// mirroring the zone-arena ownership in the wire-format spec this codec
/// implements.
pub type Zone = Arc<Vec<u8>>;

/// A fully decoded MessagePack-RPC frame.
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Request {
        id: MessageId,
        method: MethodName,
        params: rmpv::Value,
        zone: Zone,
    },
    Response {
        id: MessageId,
        result: CallResult,
        zone: Zone,
    },
    Notification {
        method: MethodName,
        params: rmpv::Value,
        zone: Zone,
    },
}

/// The decoded `(error, result)` pair of a response frame: exactly one of
/// `error`/`result` is non-nil on the wire, recorded here as `ok`.
#[derive(Debug, Clone)]
pub struct CallResult {
    ok: bool,
    value: rmpv::Value,
    zone: Zone,
}

impl CallResult {
    pub(crate) fn success(value: rmpv::Value, zone: Zone) -> Self {
        CallResult {
            ok: true,
            value,
            zone,
        }
    }

    pub(crate) fn failure(value: rmpv::Value, zone: Zone) -> Self {
        CallResult {
            ok: false,
            value,
            zone,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    /// Deserializes the successful result into `T`. Fails with
    /// `PRECONDITION_NOT_MET` if this is actually an error result, or
    /// `TYPE_ERROR` if `T` does not match the decoded value.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T> {
        if !self.ok {
            return Err(Status::precondition_not_met(
                "call result is an error, not a success",
            ));
        }
        rmpv::ext::from_value(self.value.clone())
            .map_err(|e| Status::type_error(e.to_string()))
    }

    /// Deserializes the error payload into `T`. Fails with
    /// `PRECONDITION_NOT_MET` if this is actually a success result.
    pub fn error_as<T: DeserializeOwned>(&self) -> Result<T> {
        if self.ok {
            return Err(Status::precondition_not_met(
                "call result is a success, not an error",
            ));
        }
        rmpv::ext::from_value(self.value.clone())
            .map_err(|e| Status::type_error(e.to_string()))
    }

    pub fn raw_value(&self) -> &rmpv::Value {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_name_equality_is_by_bytes() {
        assert_eq!(MethodName::new("add"), MethodName::from("add"));
        assert_ne!(MethodName::new("add"), MethodName::from("sub"));
    }

    #[test]
    fn call_result_success_decodes_matching_type() {
        let zone: Zone = Arc::new(Vec::new());
        let result = CallResult::success(rmpv::Value::from(5_i64), zone);
        let value: i64 = result.result_as().unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn call_result_as_wrong_variant_is_precondition_not_met() {
        let zone: Zone = Arc::new(Vec::new());
        let result = CallResult::failure(rmpv::Value::from("boom"), zone);
        let err = result.result_as::<i64>().unwrap_err();
        assert_eq!(err.code(), Status::precondition_not_met("").code());
    }
}
