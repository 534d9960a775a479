//! Subscriber configuration tree.
//!
//! A [`Subscriber`] owns its [`Destination`]s, which own their [`Binding`]s.
//! Children never hold a pointer back to their parent: code that needs the
//! owning destination or subscriber receives it alongside the child.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a subscriber inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberKey {
    pub platform: String,
    pub uid: i64,
}

impl std::fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.uid)
    }
}

/// Kind of chat target on a push platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// A direct message to a single account.
    DirectMessage,
    /// A group chat.
    Group,
    #[default]
    Unknown,
}

impl DestinationKind {
    /// Numeric code used on the wire and in stored configuration.
    pub fn code(&self) -> i32 {
        match self {
            Self::DirectMessage => 0,
            Self::Group => 1,
            Self::Unknown => -1,
        }
    }

    /// Parse a numeric code; anything unrecognised maps to `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::DirectMessage,
            1 => Self::Group,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectMessage => "friend",
            Self::Group => "group",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from an event type to a handler, scoped to one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Event-type id this binding reacts to (e.g. `live_on`).
    pub event: String,
    /// Explicit handler id. `None` or empty selects the default handler.
    #[serde(default)]
    pub handler: Option<String>,
    /// Opaque handler parameters.
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Binding {
    pub fn new(event: impl Into<String>, handler: Option<&str>, params: Value) -> Self {
        Self {
            event: event.into(),
            handler: handler.map(str::to_string),
            params,
            enabled: true,
        }
    }

    /// Explicit handler id, treating an empty string as absent.
    pub fn handler_id(&self) -> Option<&str> {
        self.handler.as_deref().filter(|h| !h.is_empty())
    }

    /// Whether two bindings share the same identity (event, handler, params).
    pub fn same_identity(&self, other: &Binding) -> bool {
        self.event == other.event
            && self.handler_id() == other.handler_id()
            && self.params == other.params
    }
}

/// A target on an outbound chat platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    /// Push platform name, matching a configured sender endpoint.
    pub platform: String,
    pub kind: DestinationKind,
    /// Account or group number, depending on `kind`.
    pub id: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

impl Destination {
    pub fn new(platform: impl Into<String>, kind: DestinationKind, id: i64) -> Self {
        Self {
            platform: platform.into(),
            kind,
            id,
            enabled: true,
            bindings: Vec::new(),
        }
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn same_identity(&self, other: &Destination) -> bool {
        self.platform == other.platform && self.kind == other.kind && self.id == other.id
    }

    /// `platform/kind/id`, for logs and errors.
    pub fn identity(&self) -> String {
        format!("{}/{}/{}", self.platform, self.kind, self.id)
    }

    /// Enabled bindings for `event_type`, in configured order.
    pub fn bindings_for<'a>(&'a self, event_type: &'a str) -> impl Iterator<Item = &'a Binding> {
        self.bindings
            .iter()
            .filter(move |b| b.enabled && b.event == event_type)
    }
}

/// An entity on a live-streaming platform whose events are pushed to destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub uid: i64,
    pub platform: String,
    /// Display name, filled by the platform completer.
    #[serde(default)]
    pub uname: Option<String>,
    /// Room or channel id, filled by the platform completer.
    #[serde(default)]
    pub room_id: Option<i64>,
    /// Avatar URL, filled by the platform completer.
    #[serde(default)]
    pub face: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

impl Subscriber {
    pub fn new(platform: impl Into<String>, uid: i64) -> Self {
        Self {
            uid,
            platform: platform.into(),
            uname: None,
            room_id: None,
            face: None,
            enabled: true,
            destinations: Vec::new(),
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn key(&self) -> SubscriberKey {
        SubscriberKey {
            platform: self.platform.clone(),
            uid: self.uid,
        }
    }

    /// Display name for logs, falling back to the uid.
    pub fn display_name(&self) -> String {
        self.uname.clone().unwrap_or_else(|| self.uid.to_string())
    }

    /// Drop disabled destinations and disabled bindings.
    pub fn prune_disabled(&mut self) {
        self.destinations.retain(|d| d.enabled);
        for destination in &mut self.destinations {
            destination.bindings.retain(|b| b.enabled);
        }
    }

    /// First destination whose identity repeats an earlier one.
    pub fn duplicate_destination(&self) -> Option<&Destination> {
        self.destinations
            .iter()
            .enumerate()
            .find(|(i, d)| self.destinations[..*i].iter().any(|earlier| earlier.same_identity(d)))
            .map(|(_, d)| d)
    }

    /// Copy of this subscriber with disabled children removed.
    pub fn pruned(&self) -> Self {
        let mut copy = self.clone();
        copy.prune_disabled();
        copy
    }

    /// Compare the configured part of two subscribers.
    ///
    /// Derived fields (display name, room id, avatar) are ignored and disabled
    /// children are pruned on both sides first.
    pub fn same_configuration(&self, other: &Subscriber) -> bool {
        if self.platform != other.platform || self.uid != other.uid || self.enabled != other.enabled
        {
            return false;
        }

        let ours = self.pruned();
        let theirs = other.pruned();
        ours.destinations.len() == theirs.destinations.len()
            && ours
                .destinations
                .iter()
                .zip(&theirs.destinations)
                .all(|(a, b)| {
                    a.same_identity(b)
                        && a.bindings.len() == b.bindings.len()
                        && a.bindings
                            .iter()
                            .zip(&b.bindings)
                            .all(|(x, y)| x.same_identity(y))
                })
    }
}

fn default_enabled() -> bool {
    true
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscriber() -> Subscriber {
        Subscriber::new("bilibili", 1).with_destination(
            Destination::new("qq", DestinationKind::Group, 100)
                .with_binding(Binding::new("live_on", None, json!({"a": 1})))
                .with_binding(Binding::new("live_off", Some("x.Handler"), json!({}))),
        )
    }

    #[test]
    fn test_destination_kind_codes() {
        assert_eq!(DestinationKind::from_code(0), DestinationKind::DirectMessage);
        assert_eq!(DestinationKind::from_code(1), DestinationKind::Group);
        assert_eq!(DestinationKind::from_code(7), DestinationKind::Unknown);
        assert_eq!(DestinationKind::Group.code(), 1);
        assert_eq!(DestinationKind::DirectMessage.to_string(), "friend");
    }

    #[test]
    fn test_empty_handler_is_default() {
        let binding = Binding::new("live_on", Some(""), json!({}));
        assert_eq!(binding.handler_id(), None);
        assert!(binding.same_identity(&Binding::new("live_on", None, json!({}))));
    }

    #[test]
    fn test_prune_disabled() {
        let mut sub = subscriber();
        sub.destinations[0].bindings[1].enabled = false;
        sub.destinations
            .push(Destination { enabled: false, ..Destination::new("qq", DestinationKind::DirectMessage, 5) });

        sub.prune_disabled();
        assert_eq!(sub.destinations.len(), 1);
        assert_eq!(sub.destinations[0].bindings.len(), 1);
        assert_eq!(sub.destinations[0].bindings[0].event, "live_on");
    }

    #[test]
    fn test_same_configuration_ignores_derived_fields() {
        let a = subscriber();
        let mut b = subscriber();
        b.uname = Some("streamer".into());
        b.room_id = Some(9);
        assert!(a.same_configuration(&b));

        b.destinations[0].bindings[0].enabled = false;
        assert!(!a.same_configuration(&b));
    }

    #[test]
    fn test_duplicate_destination() {
        let mut sub = subscriber().with_destination(Destination::new("qq", DestinationKind::DirectMessage, 100));
        assert!(sub.duplicate_destination().is_none());

        sub = sub.with_destination(Destination::new("qq", DestinationKind::Group, 100));
        assert_eq!(sub.duplicate_destination().unwrap().identity(), "qq/group/100");
    }

    #[test]
    fn test_bindings_for_keeps_order() {
        let dest = Destination::new("qq", DestinationKind::Group, 1)
            .with_binding(Binding::new("danmu", Some("first"), json!({})))
            .with_binding(Binding::new("live_on", Some("other"), json!({})))
            .with_binding(Binding::new("danmu", Some("second"), json!({})));

        let ids: Vec<_> = dest.bindings_for("danmu").filter_map(|b| b.handler_id()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
