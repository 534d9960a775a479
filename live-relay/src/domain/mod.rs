//! Domain layer.
//!
//! Plain data types shared by the configuration store, the router and the
//! delivery scheduler.

pub mod event;
pub mod message;
pub mod subscriber;

pub use event::{EventKind, GiftInfo, LiveEvent, LiveEventPayload, StreamerInfo, UserInfo};
pub use message::OutboundMessage;
pub use subscriber::{Binding, Destination, DestinationKind, Subscriber, SubscriberKey};
