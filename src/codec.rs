//! JSON argument codec.

use bytes::Bytes;
use serde_json::Value;

use crate::error::Result;
use crate::interfaces::ArgsCodec;

/// Encodes invocation arguments as a JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArgsCodec;

impl ArgsCodec for JsonArgsCodec {
    fn serialize(&self, args: &[Value]) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(args)?))
    }

    fn deserialize(&self, body: &[u8]) -> Result<Vec<Value>> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackplaneError;
    use serde_json::json;

    #[test]
    fn test_encodes_json_array() {
        let body = JsonArgsCodec
            .serialize(&[json!("hello"), json!({"n": 1})])
            .unwrap();
        assert_eq!(&body[..], br#"["hello",{"n":1}]"#);
        assert_eq!(
            JsonArgsCodec.deserialize(&body).unwrap(),
            vec![json!("hello"), json!({"n": 1})]
        );
    }

    #[test]
    fn test_empty_args() {
        let body = JsonArgsCodec.serialize(&[]).unwrap();
        assert_eq!(&body[..], b"[]");
        assert!(JsonArgsCodec.deserialize(&body).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_array_body() {
        let err = JsonArgsCodec.deserialize(br#"{"not":"an array"}"#).unwrap_err();
        assert!(matches!(err, BackplaneError::Codec(_)));
        assert!(JsonArgsCodec.deserialize(b"not json").is_err());
    }
}
