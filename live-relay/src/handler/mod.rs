//! Event handlers.
//!
//! A handler turns a live event into zero or more outbound messages for the
//! destination of the binding it was resolved for.

pub mod builtin;

pub use builtin::TextHandler;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::domain::{Binding, Destination, LiveEvent, OutboundMessage, Subscriber};

/// Where a handler invocation comes from.
///
/// The subscriber and destination are the owners of the binding; handlers
/// read them but never mutate the configuration.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub subscriber: &'a Subscriber,
    pub destination: &'a Destination,
    pub binding: &'a Binding,
}

impl HandlerContext<'_> {
    /// Look up a string parameter of the binding.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.binding.params.get(key).and_then(Value::as_str)
    }
}

/// Pluggable handler logic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Qualified identifier bindings use to select this handler.
    fn id(&self) -> &str;

    /// Parameters assumed when a binding does not set them.
    fn default_params(&self) -> Value {
        Value::Object(Default::default())
    }

    async fn handle(
        &self,
        event: &LiveEvent,
        ctx: &HandlerContext<'_>,
    ) -> Result<Vec<OutboundMessage>>;
}
