//! Initial-load sources for the subscriber configuration.
//!
//! A source only produces the configured part of each subscriber: identity,
//! enabled flag and the destination/binding tree. Derived fields are filled
//! by completion when the store admits the subscribers.

pub mod json;
pub mod sqlite;

pub use json::JsonSource;
pub use sqlite::SqliteSource;

use async_trait::async_trait;

use crate::Result;
use crate::domain::Subscriber;

/// Produces a snapshot of the subscriber configuration.
#[async_trait]
pub trait SubscriberSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Read the full configuration. Called once at boot and on every reload.
    async fn load(&self) -> Result<Vec<Subscriber>>;
}

/// A source with no subscribers.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySource;

#[async_trait]
impl SubscriberSource for EmptySource {
    fn name(&self) -> &'static str {
        "empty"
    }

    async fn load(&self) -> Result<Vec<Subscriber>> {
        Ok(Vec::new())
    }
}
