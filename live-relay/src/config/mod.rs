//! Subscriber configuration.
//!
//! The [`ConfigStore`] holds the subscriber tree in memory, fed by a
//! [`SubscriberSource`](crate::source::SubscriberSource) at boot and kept
//! current by the [`ConfigWatcher`] when hot reload is enabled.

pub mod completion;
pub mod events;
pub mod reconcile;
pub mod store;
pub mod watcher;

pub use completion::{CompleterRegistry, PassThroughCompleter, SubscriberCompleter};
pub use events::{ConfigEventBroadcaster, ConfigUpdateEvent};
pub use reconcile::SnapshotDiff;
pub use store::{ConfigStore, UpdateOutcome};
pub use watcher::{ConfigWatcher, Reload, ReloadDebouncer, SourceReloader};
