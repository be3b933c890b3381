//! Connection interface provided by the transport.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A decoded method call ready to be written to a client.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub method: String,
    pub args: Vec<Value>,
}

/// A live client connection terminated by this process.
///
/// `write` may be called concurrently from several delivery tasks.
#[async_trait]
pub trait HubConnection: Send + Sync {
    fn connection_id(&self) -> &str;

    /// Authenticated user identity, if any.
    fn user_identifier(&self) -> Option<&str>;

    /// True once the transport has started tearing the connection down.
    fn is_aborted(&self) -> bool;

    async fn write(&self, invocation: Invocation) -> Result<()>;
}
