//! Subscriber configuration events.
//!
//! Events are broadcast after the store has applied a mutation, so receivers
//! always observe a consistent store when they react.

use tokio::sync::broadcast;

use crate::domain::{Subscriber, SubscriberKey};

/// Events broadcast when the subscriber configuration changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigUpdateEvent {
    /// A subscriber was admitted into the store.
    SubscriberAdded { subscriber: Subscriber },
    /// A subscriber was removed. Carries the entry as it was stored.
    SubscriberRemoved { subscriber: Subscriber },
    /// A subscriber was replaced wholesale.
    SubscriberUpdated { subscriber: Subscriber },
    /// The initial load finished.
    LoadComplete { count: usize },
}

impl ConfigUpdateEvent {
    /// Key of the subscriber the event refers to, if any.
    pub fn key(&self) -> Option<SubscriberKey> {
        match self {
            Self::SubscriberAdded { subscriber }
            | Self::SubscriberRemoved { subscriber }
            | Self::SubscriberUpdated { subscriber } => Some(subscriber.key()),
            Self::LoadComplete { .. } => None,
        }
    }

    /// Get a description of the event for logging.
    pub fn description(&self) -> String {
        match self {
            Self::SubscriberAdded { subscriber } => {
                format!("Subscriber added: {}", subscriber.key())
            }
            Self::SubscriberRemoved { subscriber } => {
                format!("Subscriber removed: {}", subscriber.key())
            }
            Self::SubscriberUpdated { subscriber } => {
                format!("Subscriber updated: {}", subscriber.key())
            }
            Self::LoadComplete { count } => format!("Configuration loaded: {} subscribers", count),
        }
    }
}

/// Default channel capacity for config update events.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcaster for configuration update events.
///
/// Uses tokio's broadcast channel to distribute events to multiple subscribers.
#[derive(Clone)]
pub struct ConfigEventBroadcaster {
    sender: broadcast::Sender<ConfigUpdateEvent>,
}

impl ConfigEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdateEvent> {
        self.sender.subscribe()
    }

    /// Publish a configuration update event.
    ///
    /// Returns the number of receivers that received the event, 0 when nobody listens.
    pub fn publish(&self, event: ConfigUpdateEvent) -> usize {
        tracing::debug!("Publishing config event: {}", event.description());
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ConfigEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
