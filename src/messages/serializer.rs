use rmpv::Value;
use serde::Serialize;

use crate::common::{Result, Status};

use super::{MessageId, SerializedMessage};

/// Stateless builder of the four MessagePack-RPC frame shapes. Each
/// constructor produces one complete, immutable [`SerializedMessage`].
pub struct MessageSerializer;

impl MessageSerializer {
    /// `[0, id, method, params]`.
    pub fn serialize_request<P: Serialize>(
        method: &str,
        id: MessageId,
        params: P,
    ) -> Result<SerializedMessage> {
        let frame = Value::Array(vec![
            Value::from(0u64),
            Value::from(u64::from(id)),
            Value::from(method),
            params_array(params)?,
        ]);
        encode_frame(&frame)
    }

    /// `[1, id, nil, result]`.
    pub fn serialize_successful_response<T: Serialize>(
        id: MessageId,
        result: T,
    ) -> Result<SerializedMessage> {
        let result_value = to_value(result)?;
        let frame = Value::Array(vec![
            Value::from(1u64),
            Value::from(u64::from(id)),
            Value::Nil,
            result_value,
        ]);
        encode_frame(&frame)
    }

    /// `[1, id, error, nil]`.
    pub fn serialize_error_response<E: Serialize>(
        id: MessageId,
        error: E,
    ) -> Result<SerializedMessage> {
        let error_value = to_value(error)?;
        let frame = Value::Array(vec![
            Value::from(1u64),
            Value::from(u64::from(id)),
            error_value,
            Value::Nil,
        ]);
        encode_frame(&frame)
    }

    /// `[2, method, params]`.
    pub fn serialize_notification<P: Serialize>(
        method: &str,
        params: P,
    ) -> Result<SerializedMessage> {
        let frame = Value::Array(vec![
            Value::from(2u64),
            Value::from(method),
            params_array(params)?,
        ]);
        encode_frame(&frame)
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    rmpv::ext::to_value(value).map_err(|e| Status::invalid_argument(e.to_string()))
}

/// `params` must encode as a MessagePack array; a bare scalar is wrapped in
/// a one-element array rather than rejected, so a single-argument call can
/// be written without an explicit tuple.
fn params_array<P: Serialize>(params: P) -> Result<Value> {
    match to_value(params)? {
        Value::Array(items) => Ok(Value::Array(items)),
        other => Ok(Value::Array(vec![other])),
    }
}

fn encode_frame(value: &Value) -> Result<SerializedMessage> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value)
        .map_err(|e| Status::invalid_argument(e.to_string()))?;
    Ok(SerializedMessage::new(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageParser;

    #[test]
    fn request_round_trips_through_parser() {
        let serialized =
            MessageSerializer::serialize_request("add", 7, (2_i32, 3_i32)).unwrap();
        let mut parser = MessageParser::new(Default::default());
        let buf = parser.prepare_buffer(serialized.len());
        buf[..serialized.len()].copy_from_slice(serialized.as_bytes());
        parser.consumed(serialized.len());

        match parser.try_parse().unwrap().unwrap() {
            crate::messages::ParsedMessage::Request { id, method, params, .. } => {
                assert_eq!(id, 7);
                assert_eq!(method.as_str(), "add");
                assert_eq!(params, rmpv::Value::Array(vec![2.into(), 3.into()]));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn notification_has_three_elements() {
        let serialized = MessageSerializer::serialize_notification("write", ("hello",)).unwrap();
        let value: Value = rmpv::decode::read_value(&mut serialized.as_bytes()).unwrap();
        match value {
            Value::Array(items) => assert_eq!(items.len(), 3),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn scalar_params_are_wrapped_in_array() {
        let serialized = MessageSerializer::serialize_notification("ping", 42_i32).unwrap();
        let value: Value = rmpv::decode::read_value(&mut serialized.as_bytes()).unwrap();
        if let Value::Array(items) = value {
            assert_eq!(items[2], Value::Array(vec![42.into()]));
        } else {
            panic!("expected array");
        }
    }
}
