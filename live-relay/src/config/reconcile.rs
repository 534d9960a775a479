//! Snapshot diffing for hot reload.

use std::collections::BTreeMap;

use crate::domain::{Subscriber, SubscriberKey};

/// Difference between the live configuration and a freshly loaded snapshot.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SnapshotDiff {
    /// Present only in the new snapshot.
    pub added: Vec<Subscriber>,
    /// Present only in the current configuration, as currently stored.
    pub removed: Vec<Subscriber>,
    /// Present in both but configured differently; carries the new value.
    pub updated: Vec<Subscriber>,
}

impl SnapshotDiff {
    /// Compute the diff between `current` and `next`.
    ///
    /// Subscribers are matched by key and compared with
    /// [`Subscriber::same_configuration`], so derived fields filled by completion
    /// never count as a change. Output follows the order of the inputs.
    pub fn compute(current: &[Subscriber], next: &[Subscriber]) -> Self {
        let current_by_key: BTreeMap<SubscriberKey, &Subscriber> =
            current.iter().map(|s| (s.key(), s)).collect();
        let next_by_key: BTreeMap<SubscriberKey, &Subscriber> =
            next.iter().map(|s| (s.key(), s)).collect();

        let removed = current
            .iter()
            .filter(|s| !next_by_key.contains_key(&s.key()))
            .cloned()
            .collect();

        let mut added = Vec::new();
        let mut updated = Vec::new();
        for subscriber in next {
            match current_by_key.get(&subscriber.key()) {
                None => added.push(subscriber.clone()),
                Some(old) if !old.same_configuration(subscriber) => updated.push(subscriber.clone()),
                Some(_) => {}
            }
        }

        Self {
            added,
            removed,
            updated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Binding, Destination, DestinationKind};
    use serde_json::json;

    fn sub(uid: i64) -> Subscriber {
        Subscriber::new("bilibili", uid).with_destination(
            Destination::new("qq", DestinationKind::Group, 100)
                .with_binding(Binding::new("live_on", None, json!({})))
                .with_binding(Binding::new("live_off", None, json!({}))),
        )
    }

    #[test]
    fn test_diff_added_removed_updated() {
        let a = sub(1);
        let b = sub(2);
        let mut b2 = sub(2);
        b2.destinations[0].bindings[1].enabled = false;
        let c = sub(3);

        let diff = SnapshotDiff::compute(&[a.clone(), b], &[b2.clone(), c.clone()]);
        assert_eq!(diff.added, vec![c]);
        assert_eq!(diff.removed, vec![a]);
        assert_eq!(diff.updated, vec![b2]);
    }

    #[test]
    fn test_diff_ignores_completed_fields() {
        let mut stored = sub(1);
        stored.uname = Some("streamer".into());
        let diff = SnapshotDiff::compute(&[stored], &[sub(1)]);
        assert!(diff.is_empty());
    }
}
