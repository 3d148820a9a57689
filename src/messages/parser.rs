use std::error::Error as _;
use std::io::Cursor;
use std::sync::Arc;

use rmpv::Value;

use crate::common::{Result, Status};
use crate::config::MessageParserConfig;

use super::{CallResult, MessageId, MethodName, ParsedMessage, Zone};

/// Stateful, incremental MessagePack-RPC frame parser.
///
/// Callers drive it in a loop: `prepare_buffer` hands back somewhere to
/// read into, `consumed` records how much was actually read, and
/// `try_parse` drains as many complete frames as are currently buffered.
/// Bytes may arrive split across any number of `consumed` calls; the
/// parser reassembles them transparently.
pub struct MessageParser {
    config: MessageParserConfig,
    buffer: Vec<u8>,
    filled: usize,
    /// Set once an `INVALID_MESSAGE` has been raised, so a caller that
    /// keeps driving the parser after a protocol violation (instead of
    /// closing the connection, as the component design expects) does not
    /// see the same error repeated forever.
    poisoned: bool,
}

impl MessageParser {
    pub fn new(config: MessageParserConfig) -> Self {
        MessageParser {
            config,
            buffer: Vec::new(),
            filled: 0,
            poisoned: false,
        }
    }

    /// Returns a writable region at least `min_additional.max(read_buffer_size)`
    /// bytes long, growing the internal buffer if necessary.
    pub fn prepare_buffer(&mut self, min_additional: usize) -> &mut [u8] {
        let needed = min_additional.max(self.config.read_buffer_size);
        let required_len = self.filled + needed;
        if self.buffer.len() < required_len {
            self.buffer.resize(required_len, 0);
        }
        &mut self.buffer[self.filled..self.filled + needed]
    }

    /// Marks `n` bytes, previously written into the slice returned by
    /// `prepare_buffer`, as received.
    pub fn consumed(&mut self, n: usize) {
        assert!(self.filled + n <= self.buffer.len());
        self.filled += n;
    }

    /// Attempts to decode one complete frame from the buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed, `Ok(Some(_))` when a
    /// frame was decoded (in which case calling this again may yield
    /// another frame already sitting in the buffer), and `Err` with
    /// `INVALID_MESSAGE` on malformed data.
    pub fn try_parse(&mut self) -> Result<Option<ParsedMessage>> {
        if self.poisoned {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buffer[..self.filled]);
        let value = match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => value,
            Err(err) if is_insufficient_data(&err) => return Ok(None),
            Err(err) => {
                self.poisoned = true;
                return Err(Status::invalid_message(err.to_string()));
            }
        };

        let consumed = cursor.position() as usize;
        let zone: Zone = Arc::new(self.buffer[..consumed].to_vec());
        self.buffer.drain(0..consumed);
        self.filled -= consumed;

        match validate_and_build(value, zone) {
            Ok(message) => Ok(Some(message)),
            Err(status) => {
                self.poisoned = true;
                Err(status)
            }
        }
    }
}

fn is_insufficient_data(err: &rmpv::decode::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        source = current.source();
    }
    false
}

fn validate_and_build(value: Value, zone: Zone) -> Result<ParsedMessage> {
    let mut items = match value {
        Value::Array(items) => items,
        other => {
            return Err(Status::invalid_message(format!(
                "expected a top-level array, got {other:?}"
            )))
        }
    };

    let len = items.len();
    if len != 3 && len != 4 {
        return Err(Status::invalid_message(format!(
            "array length {len} is not 3 (notification) or 4 (request/response)"
        )));
    }

    let tag = items[0]
        .as_u64()
        .ok_or_else(|| Status::invalid_message("type tag is not an unsigned integer"))?;

    match (tag, len) {
        (0, 4) => {
            let params = items.pop().unwrap();
            let method_v = items.pop().unwrap();
            let id_v = items.pop().unwrap();
            let id = require_id(&id_v)?;
            let method = require_method(&method_v)?;
            require_array(&params)?;
            Ok(ParsedMessage::Request {
                id,
                method,
                params,
                zone,
            })
        }
        (1, 4) => {
            let result = items.pop().unwrap();
            let error = items.pop().unwrap();
            let id_v = items.pop().unwrap();
            let id = require_id(&id_v)?;
            let call_result = match (&error, &result) {
                (Value::Nil, Value::Nil) => {
                    return Err(Status::invalid_message(
                        "response has neither error nor result",
                    ))
                }
                (Value::Nil, _) => CallResult::success(result, zone.clone()),
                (_, Value::Nil) => CallResult::failure(error, zone.clone()),
                _ => {
                    return Err(Status::invalid_message(
                        "response has both error and result",
                    ))
                }
            };
            Ok(ParsedMessage::Response {
                id,
                result: call_result,
                zone,
            })
        }
        (2, 3) => {
            let params = items.pop().unwrap();
            let method_v = items.pop().unwrap();
            let method = require_method(&method_v)?;
            require_array(&params)?;
            Ok(ParsedMessage::Notification {
                method,
                params,
                zone,
            })
        }
        (tag, len) => Err(Status::invalid_message(format!(
            "type tag {tag} does not match array length {len}"
        ))),
    }
}

fn require_id(value: &Value) -> Result<MessageId> {
    let raw = value
        .as_u64()
        .ok_or_else(|| Status::invalid_message("message id is not an unsigned integer"))?;
    u32::try_from(raw).map_err(|_| Status::invalid_message("message id does not fit in u32"))
}

fn require_method(value: &Value) -> Result<MethodName> {
    value
        .as_str()
        .map(MethodName::new)
        .ok_or_else(|| Status::invalid_message("method name is not a string"))
}

fn require_array(value: &Value) -> Result<()> {
    match value {
        Value::Array(_) => Ok(()),
        other => Err(Status::invalid_message(format!(
            "params is not an array, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageSerializer;

    fn feed(parser: &mut MessageParser, bytes: &[u8]) {
        let buf = parser.prepare_buffer(bytes.len());
        buf[..bytes.len()].copy_from_slice(bytes);
        parser.consumed(bytes.len());
    }

    #[test]
    fn returns_none_until_frame_is_complete() {
        let serialized = MessageSerializer::serialize_notification("write", ("hello",)).unwrap();
        let bytes = serialized.as_bytes();
        let mut parser = MessageParser::new(Default::default());

        // Feed one byte at a time; only the last byte should complete a frame.
        for (i, b) in bytes.iter().enumerate() {
            feed(&mut parser, std::slice::from_ref(b));
            let parsed = parser.try_parse().unwrap();
            if i + 1 < bytes.len() {
                assert!(parsed.is_none(), "should not parse before frame complete");
            } else {
                assert!(parsed.is_some(), "should parse once frame is complete");
            }
        }
    }

    #[test]
    fn chunking_does_not_change_result() {
        let serialized = MessageSerializer::serialize_request("add", 42, (1_i32, 2_i32)).unwrap();
        let bytes = serialized.as_bytes();

        let mut whole = MessageParser::new(Default::default());
        feed(&mut whole, bytes);
        let whole_msg = whole.try_parse().unwrap().unwrap();

        let mut split = MessageParser::new(Default::default());
        let (a, b) = bytes.split_at(bytes.len() / 2);
        feed(&mut split, a);
        assert!(split.try_parse().unwrap().is_none());
        feed(&mut split, b);
        let split_msg = split.try_parse().unwrap().unwrap();

        match (whole_msg, split_msg) {
            (
                ParsedMessage::Request { id: id1, method: m1, .. },
                ParsedMessage::Request { id: id2, method: m2, .. },
            ) => {
                assert_eq!(id1, id2);
                assert_eq!(m1, m2);
            }
            _ => panic!("expected matching requests"),
        }
    }

    #[test]
    fn invalid_prefix_raises_invalid_message_once() {
        let mut parser = MessageParser::new(Default::default());
        feed(&mut parser, &[0xC1]); // 0xC1 is "never used" in the msgpack spec.
        let err = parser.try_parse().unwrap_err();
        assert_eq!(err.code(), crate::common::StatusCode::InvalidMessage);
        // Poisoned: does not raise again, just reports no further messages.
        assert!(parser.try_parse().unwrap().is_none());
    }

    #[test]
    fn array_length_two_is_invalid() {
        let mut buf = Vec::new();
        rmpv::encode::write_value(
            &mut buf,
            &Value::Array(vec![Value::from(0u64), Value::from(1u64)]),
        )
        .unwrap();
        let mut parser = MessageParser::new(Default::default());
        feed(&mut parser, &buf);
        let err = parser.try_parse().unwrap_err();
        assert_eq!(err.code(), crate::common::StatusCode::InvalidMessage);
    }
}
