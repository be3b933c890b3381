//! Payload argument codec interface.

use bytes::Bytes;
use serde_json::Value;

use crate::error::Result;

/// Converts invocation arguments to and from payload bodies.
///
/// The backplane treats encoded bodies as opaque; only the sending
/// coordinator encodes and only the delivering coordinator decodes.
pub trait ArgsCodec: Send + Sync {
    fn serialize(&self, args: &[Value]) -> Result<Bytes>;

    fn deserialize(&self, body: &[u8]) -> Result<Vec<Value>>;
}
