//! In-memory subscriber configuration store.
//!
//! Every read and mutation runs under one async mutex. Completion of derived
//! fields happens inside the critical section, before insertion, so a failed
//! call leaves the index untouched. Notifications are collected while the
//! lock is held and published once it has been released.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use crate::domain::{Subscriber, SubscriberKey};
use crate::source::SubscriberSource;
use crate::{Error, Result};

use super::completion::CompleterRegistry;
use super::events::{ConfigEventBroadcaster, ConfigUpdateEvent};
use super::reconcile::SnapshotDiff;

/// Which branch an [`ConfigStore::update`] call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Added,
    Removed,
    Replaced,
}

#[derive(Default)]
struct StoreState {
    loaded: bool,
    /// platform -> uid -> subscriber
    index: BTreeMap<String, BTreeMap<i64, Subscriber>>,
}

impl StoreState {
    fn get(&self, platform: &str, uid: i64) -> Option<&Subscriber> {
        self.index.get(platform)?.get(&uid)
    }

    fn contains(&self, platform: &str, uid: i64) -> bool {
        self.index
            .get(platform)
            .is_some_and(|users| users.contains_key(&uid))
    }

    fn count(&self) -> usize {
        self.index.values().map(BTreeMap::len).sum()
    }

    fn all(&self) -> Vec<Subscriber> {
        self.index
            .values()
            .flat_map(|users| users.values().cloned())
            .collect()
    }

    fn take(&mut self, platform: &str, uid: i64) -> Option<Subscriber> {
        let users = self.index.get_mut(platform)?;
        let removed = users.remove(&uid);
        if users.is_empty() {
            self.index.remove(platform);
        }
        removed
    }

    fn put(&mut self, subscriber: Subscriber) {
        self.index
            .entry(subscriber.platform.clone())
            .or_default()
            .insert(subscriber.uid, subscriber);
    }
}

/// Hot-reloadable store of subscribers, their destinations and bindings.
pub struct ConfigStore {
    state: Mutex<StoreState>,
    completers: CompleterRegistry,
    broadcaster: ConfigEventBroadcaster,
}

impl ConfigStore {
    pub fn new(completers: CompleterRegistry) -> Self {
        Self::with_broadcaster(completers, ConfigEventBroadcaster::new())
    }

    pub fn with_broadcaster(
        completers: CompleterRegistry,
        broadcaster: ConfigEventBroadcaster,
    ) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            completers,
            broadcaster,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdateEvent> {
        self.broadcaster.subscribe()
    }

    /// Populate the store from `source`. May only be called once.
    ///
    /// Returns the number of admitted subscribers.
    pub async fn load(&self, source: &dyn SubscriberSource) -> Result<usize> {
        info!(source = source.name(), "Loading subscriber configuration");
        let subscribers = source.load().await?;

        let mut events = Vec::new();
        let count = {
            let mut state = self.state.lock().await;
            if state.loaded {
                return Err(Error::config("Subscriber configuration is already loaded"));
            }
            self.add_locked(&mut state, subscribers, &mut events).await?;
            state.loaded = true;
            state.count()
        };

        events.push(ConfigUpdateEvent::LoadComplete { count });
        self.publish(events);
        info!(source = source.name(), count, "Subscriber configuration loaded");
        Ok(count)
    }

    /// Add a single subscriber.
    pub async fn add(&self, subscriber: Subscriber) -> Result<usize> {
        self.add_all(vec![subscriber]).await
    }

    /// Add a batch of subscribers, all or nothing.
    ///
    /// Disabled subscribers, destinations and bindings are dropped before any
    /// other check. Returns the number of admitted subscribers.
    pub async fn add_all(&self, subscribers: Vec<Subscriber>) -> Result<usize> {
        let mut events = Vec::new();
        let admitted = {
            let mut state = self.state.lock().await;
            self.add_locked(&mut state, subscribers, &mut events).await?
        };
        self.publish(events);
        Ok(admitted)
    }

    /// Remove the subscriber with the same identity as `subscriber`.
    ///
    /// Returns the entry that was stored.
    pub async fn remove(&self, subscriber: &Subscriber) -> Result<Subscriber> {
        let mut events = Vec::new();
        let removed = {
            let mut state = self.state.lock().await;
            self.remove_locked(&mut state, &subscriber.key(), &mut events)?
        };
        self.publish(events);
        Ok(removed)
    }

    /// Apply `subscriber` to the store.
    ///
    /// | incoming | stored  | effect                       |
    /// |----------|---------|------------------------------|
    /// | enabled  | absent  | add                          |
    /// | disabled | present | remove                       |
    /// | enabled  | present | replace wholesale            |
    /// | disabled | absent  | `ConfigNotFound`             |
    pub async fn update(&self, subscriber: Subscriber) -> Result<UpdateOutcome> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.state.lock().await;
            self.update_locked(&mut state, subscriber, &mut events)
                .await?
        };
        self.publish(events);
        Ok(outcome)
    }

    /// Diff `snapshot` against the stored configuration and apply it.
    ///
    /// Removals are applied first, then additions, then updates, each through
    /// the same path as the point operations. A failing item is logged and
    /// skipped so the rest of the snapshot still converges.
    ///
    /// Returns the changes that were actually applied: a disabled entry that is
    /// not stored is not reported, and an update that disables a subscriber is
    /// reported as a removal.
    pub async fn reconcile(&self, snapshot: Vec<Subscriber>) -> Result<SnapshotDiff> {
        let mut events = Vec::new();
        let applied = {
            let mut state = self.state.lock().await;
            let diff = SnapshotDiff::compute(&state.all(), &snapshot);
            let mut applied = SnapshotDiff::default();

            for subscriber in &diff.removed {
                match self.remove_locked(&mut state, &subscriber.key(), &mut events) {
                    Ok(removed) => applied.removed.push(removed),
                    Err(e) => {
                        warn!(key = %subscriber.key(), error = %e, "Failed to remove subscriber during reload")
                    }
                }
            }

            for subscriber in &diff.added {
                let result = self
                    .add_locked(&mut state, vec![subscriber.clone()], &mut events)
                    .await;
                match result {
                    Ok(0) => {}
                    Ok(_) => applied.added.extend(state.get(&subscriber.platform, subscriber.uid).cloned()),
                    Err(e) => {
                        warn!(key = %subscriber.key(), error = %e, "Failed to add subscriber during reload")
                    }
                }
            }

            for subscriber in &diff.updated {
                let previous = state.get(&subscriber.platform, subscriber.uid).cloned();
                let result = self
                    .update_locked(&mut state, subscriber.clone(), &mut events)
                    .await;
                match result {
                    Ok(UpdateOutcome::Removed) => applied.removed.extend(previous),
                    Ok(UpdateOutcome::Added) => {
                        applied.added.extend(state.get(&subscriber.platform, subscriber.uid).cloned())
                    }
                    Ok(UpdateOutcome::Replaced) => {
                        applied.updated.extend(state.get(&subscriber.platform, subscriber.uid).cloned())
                    }
                    Err(e) => {
                        warn!(key = %subscriber.key(), error = %e, "Failed to update subscriber during reload")
                    }
                }
            }

            applied
        };

        info!(
            added = applied.added.len(),
            removed = applied.removed.len(),
            updated = applied.updated.len(),
            "Subscriber configuration reconciled"
        );
        self.publish(events);
        Ok(applied)
    }

    pub async fn get_subscriber(&self, platform: &str, uid: i64) -> Option<Subscriber> {
        let state = self.state.lock().await;
        state.index.get(platform)?.get(&uid).cloned()
    }

    pub async fn get_subscribers(&self, platform: &str) -> Vec<Subscriber> {
        let state = self.state.lock().await;
        state
            .index
            .get(platform)
            .map(|users| users.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn all(&self) -> Vec<Subscriber> {
        self.state.lock().await.all()
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.count()
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.loaded
    }

    async fn add_locked(
        &self,
        state: &mut StoreState,
        subscribers: Vec<Subscriber>,
        events: &mut Vec<ConfigUpdateEvent>,
    ) -> Result<usize> {
        let mut subscribers: Vec<Subscriber> =
            subscribers.into_iter().filter(|s| s.enabled).collect();

        let mut seen = HashSet::new();
        for subscriber in &subscribers {
            let key = subscriber.key();
            if state.contains(&key.platform, key.uid) || !seen.insert(key.clone()) {
                return Err(Error::conflict(key.platform, key.uid));
            }
        }

        for subscriber in &mut subscribers {
            subscriber.prune_disabled();
            check_destinations(subscriber)?;
        }

        self.completers.complete_all(&mut subscribers).await?;

        let admitted = subscribers.len();
        for subscriber in subscribers {
            info!(
                uid = subscriber.uid,
                uname = subscriber.uname.as_deref().unwrap_or(""),
                room_id = ?subscriber.room_id,
                platform = %subscriber.platform,
                "Subscriber added"
            );
            state.put(subscriber.clone());
            events.push(ConfigUpdateEvent::SubscriberAdded { subscriber });
        }
        Ok(admitted)
    }

    fn remove_locked(
        &self,
        state: &mut StoreState,
        key: &SubscriberKey,
        events: &mut Vec<ConfigUpdateEvent>,
    ) -> Result<Subscriber> {
        let removed = state
            .take(&key.platform, key.uid)
            .ok_or_else(|| Error::not_found(key.platform.clone(), key.uid))?;

        info!(
            uid = removed.uid,
            uname = removed.uname.as_deref().unwrap_or(""),
            room_id = ?removed.room_id,
            platform = %removed.platform,
            "Subscriber removed"
        );
        events.push(ConfigUpdateEvent::SubscriberRemoved {
            subscriber: removed.clone(),
        });
        Ok(removed)
    }

    async fn update_locked(
        &self,
        state: &mut StoreState,
        mut subscriber: Subscriber,
        events: &mut Vec<ConfigUpdateEvent>,
    ) -> Result<UpdateOutcome> {
        let present = state.contains(&subscriber.platform, subscriber.uid);

        if subscriber.enabled && !present {
            self.add_locked(state, vec![subscriber], events).await?;
            return Ok(UpdateOutcome::Added);
        }

        if !subscriber.enabled && present {
            self.remove_locked(state, &subscriber.key(), events)?;
            return Ok(UpdateOutcome::Removed);
        }

        if !present {
            return Err(Error::not_found(subscriber.platform, subscriber.uid));
        }

        subscriber.prune_disabled();
        check_destinations(&subscriber)?;
        self.completers
            .get(&subscriber.platform)?
            .complete(&mut subscriber)
            .await?;

        info!(
            uid = subscriber.uid,
            uname = subscriber.uname.as_deref().unwrap_or(""),
            room_id = ?subscriber.room_id,
            platform = %subscriber.platform,
            "Subscriber updated"
        );
        state.put(subscriber.clone());
        events.push(ConfigUpdateEvent::SubscriberUpdated { subscriber });
        Ok(UpdateOutcome::Replaced)
    }

    fn publish(&self, events: Vec<ConfigUpdateEvent>) {
        for event in events {
            self.broadcaster.publish(event);
        }
    }
}

/// Destination identities must be unique within a subscriber.
fn check_destinations(subscriber: &Subscriber) -> Result<()> {
    match subscriber.duplicate_destination() {
        Some(destination) => Err(Error::destination_conflict(
            subscriber.platform.clone(),
            subscriber.uid,
            destination.identity(),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::completion::tests::NamingCompleter;
    use crate::domain::{Binding, Destination, DestinationKind};
    use crate::source::EmptySource;
    use serde_json::json;

    fn store() -> ConfigStore {
        let mut registry = CompleterRegistry::with_pass_through();
        registry.register(NamingCompleter::new("bilibili"));
        ConfigStore::new(registry)
    }

    fn sub(uid: i64) -> Subscriber {
        Subscriber::new("bilibili", uid).with_destination(
            Destination::new("qq", DestinationKind::Group, 100)
                .with_binding(Binding::new("live_on", None, json!({"n": 1})))
                .with_binding(Binding::new("live_off", None, json!({}))),
        )
    }

    #[tokio::test]
    async fn test_add_then_get_returns_pruned_completed() {
        let store = store();
        let mut input = sub(1);
        input.destinations[0].bindings[1].enabled = false;
        input.destinations.push(Destination {
            enabled: false,
            ..Destination::new("qq", DestinationKind::DirectMessage, 5)
        });

        store.add(input.clone()).await.unwrap();

        let stored = store.get_subscriber("bilibili", 1).await.unwrap();
        assert!(stored.same_configuration(&input.pruned()));
        assert_eq!(stored.destinations.len(), 1);
        assert_eq!(stored.destinations[0].bindings.len(), 1);
        assert_eq!(stored.uname.as_deref(), Some("bilibili-1"));
    }

    #[tokio::test]
    async fn test_add_conflict_leaves_store_unchanged() {
        let store = store();
        store.add(sub(1)).await.unwrap();

        let mut changed = sub(1);
        changed.destinations[0].bindings[0].params = json!({"n": 2});
        let err = store.add(changed).await.unwrap_err();
        assert!(matches!(err, Error::ConfigConflict { uid: 1, .. }));

        assert_eq!(store.count().await, 1);
        let stored = store.get_subscriber("bilibili", 1).await.unwrap();
        assert_eq!(stored.destinations[0].bindings[0].params, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_add_batch_with_duplicates_is_rejected_whole() {
        let store = store();
        let err = store.add_all(vec![sub(1), sub(2), sub(1)]).await.unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_disabled_filtered_before_duplicate_check() {
        let store = store();
        let mut disabled = sub(1);
        disabled.enabled = false;
        let admitted = store.add_all(vec![disabled, sub(1)]).await.unwrap();
        assert_eq!(admitted, 1);
        assert_eq!(store.count().await, 1);
    }

    fn with_duplicate_destination(uid: i64) -> Subscriber {
        sub(uid).with_destination(
            Destination::new("qq", DestinationKind::Group, 100)
                .with_binding(Binding::new("live_on", None, json!({}))),
        )
    }

    #[tokio::test]
    async fn test_add_duplicate_destination_is_conflict() {
        let store = store();
        store.add(sub(1)).await.unwrap();
        let mut rx = store.subscribe();

        let err = store
            .add_all(vec![sub(2), with_duplicate_destination(3)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigConflict { uid: 3, .. }));
        assert_eq!(store.count().await, 1);
        assert!(store.get_subscriber("bilibili", 2).await.is_none());
        assert!(rx.try_recv().is_err());

        // A disabled duplicate is pruned first and does not conflict.
        let mut pruned = with_duplicate_destination(3);
        pruned.destinations[1].enabled = false;
        store.add(pruned).await.unwrap();
        assert_eq!(store.count().await, 2);
    }

    #[tokio::test]
    async fn test_replace_with_duplicate_destination_keeps_stored() {
        let store = store();
        store.add(sub(1)).await.unwrap();

        let err = store.update(with_duplicate_destination(1)).await.unwrap_err();
        assert!(matches!(err, Error::ConfigConflict { uid: 1, .. }));

        assert_eq!(store.count().await, 1);
        let stored = store.get_subscriber("bilibili", 1).await.unwrap();
        assert_eq!(stored.destinations.len(), 1);
        assert_eq!(stored.destinations[0].bindings[0].params, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let store = store();
        store.add(sub(1)).await.unwrap();

        let err = store.remove(&sub(2)).await.unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { uid: 2, .. }));
        assert_eq!(store.count().await, 1);

        store.remove(&sub(1)).await.unwrap();
        assert_eq!(store.count().await, 0);
        assert!(store.get_subscribers("bilibili").await.is_empty());
    }

    #[tokio::test]
    async fn test_update_dispatch_table() {
        let store = store();

        // enabled + absent -> add
        assert_eq!(store.update(sub(1)).await.unwrap(), UpdateOutcome::Added);
        assert_eq!(store.count().await, 1);

        // enabled + present -> replace
        let mut changed = sub(1);
        changed.destinations[0].bindings[0].params = json!({"n": 42});
        assert_eq!(store.update(changed).await.unwrap(), UpdateOutcome::Replaced);
        let stored = store.get_subscriber("bilibili", 1).await.unwrap();
        assert_eq!(stored.destinations[0].bindings[0].params, json!({"n": 42}));
        assert_eq!(stored.uname.as_deref(), Some("bilibili-1"));

        // disabled + present -> remove
        let mut disabled = sub(1);
        disabled.enabled = false;
        assert_eq!(
            store.update(disabled.clone()).await.unwrap(),
            UpdateOutcome::Removed
        );
        assert_eq!(store.count().await, 0);

        // disabled + absent -> not found
        let err = store.update(disabled).await.unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[tokio::test]
    async fn test_notifications_published_per_subscriber() {
        let store = store();
        let mut rx = store.subscribe();

        store.add_all(vec![sub(1), sub(2)]).await.unwrap();
        store.remove(&sub(1)).await.unwrap();

        for uid in [1, 2] {
            match rx.recv().await.unwrap() {
                ConfigUpdateEvent::SubscriberAdded { subscriber } => assert_eq!(subscriber.uid, uid),
                other => panic!("unexpected event {other:?}"),
            }
        }
        match rx.recv().await.unwrap() {
            ConfigUpdateEvent::SubscriberRemoved { subscriber } => {
                assert_eq!(subscriber.uid, 1);
                assert_eq!(subscriber.uname.as_deref(), Some("bilibili-1"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconcile_applies_diff() {
        let store = store();
        let a = sub(1);
        let b = sub(2);
        store.add_all(vec![a, b]).await.unwrap();

        let mut b2 = sub(2);
        b2.destinations[0].bindings[1].enabled = false;
        let c = sub(3);

        let diff = store.reconcile(vec![b2.clone(), c.clone()]).await.unwrap();
        assert_eq!(diff.added.iter().map(|s| s.uid).collect::<Vec<_>>(), vec![3]);
        assert_eq!(diff.removed.iter().map(|s| s.uid).collect::<Vec<_>>(), vec![1]);
        assert_eq!(diff.updated.iter().map(|s| s.uid).collect::<Vec<_>>(), vec![2]);

        let remaining = store.get_subscribers("bilibili").await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining[0].same_configuration(&b2));
        assert!(remaining[1].same_configuration(&c));
        assert_eq!(remaining[0].destinations[0].bindings.len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_reports_applied_changes() {
        let store = store();
        store.add_all(vec![sub(1), sub(2)]).await.unwrap();

        // uid 1 flips to disabled, uid 4 is disabled and was never stored.
        let mut off = sub(1);
        off.enabled = false;
        let mut never = sub(4);
        never.enabled = false;

        let applied = store.reconcile(vec![off, sub(2), never]).await.unwrap();
        assert!(applied.added.is_empty());
        assert!(applied.updated.is_empty());
        assert_eq!(applied.removed.len(), 1);
        assert_eq!(applied.removed[0].uid, 1);
        assert_eq!(applied.removed[0].uname.as_deref(), Some("bilibili-1"));
        assert_eq!(store.count().await, 1);

        // The next reload of the same file is a no-op.
        let mut off = sub(1);
        off.enabled = false;
        let mut never = sub(4);
        never.enabled = false;
        assert!(store.reconcile(vec![off, sub(2), never]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_only_once() {
        let store = store();
        let mut rx = store.subscribe();
        assert_eq!(store.load(&EmptySource).await.unwrap(), 0);
        assert_eq!(
            rx.recv().await.unwrap(),
            ConfigUpdateEvent::LoadComplete { count: 0 }
        );

        assert!(store.load(&EmptySource).await.is_err());
        assert!(store.is_loaded().await);
    }

    #[tokio::test]
    async fn test_reads_never_fail_on_miss() {
        let store = store();
        assert!(store.get_subscriber("nope", 1).await.is_none());
        assert!(store.get_subscribers("nope").await.is_empty());
        assert_eq!(store.count().await, 0);
    }
}
