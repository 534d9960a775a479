//! Completion of derived subscriber fields.
//!
//! Sources only fill the configured part of a subscriber. Before admission the
//! store asks the completer registered for the subscriber's platform to fill the
//! display name, room id and avatar.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Subscriber;
use crate::{Error, Result};

/// Fills derived fields of subscribers from one source platform.
#[async_trait]
pub trait SubscriberCompleter: Send + Sync {
    /// Platform this completer serves.
    fn platform(&self) -> &str;

    /// Complete a single subscriber in place.
    async fn complete(&self, subscriber: &mut Subscriber) -> Result<()>;

    /// Complete a batch in place. Must produce the same result as calling
    /// [`complete`](Self::complete) on each element.
    async fn complete_batch(&self, subscribers: &mut [Subscriber]) -> Result<()> {
        for subscriber in subscribers.iter_mut() {
            self.complete(subscriber).await?;
        }
        Ok(())
    }
}

/// Completer that leaves subscribers untouched.
#[derive(Debug, Default)]
pub struct PassThroughCompleter;

#[async_trait]
impl SubscriberCompleter for PassThroughCompleter {
    fn platform(&self) -> &str {
        "*"
    }

    async fn complete(&self, _subscriber: &mut Subscriber) -> Result<()> {
        Ok(())
    }
}

/// Completers keyed by source platform, with an optional fallback.
#[derive(Clone, Default)]
pub struct CompleterRegistry {
    completers: HashMap<String, Arc<dyn SubscriberCompleter>>,
    fallback: Option<Arc<dyn SubscriberCompleter>>,
}

impl CompleterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose fallback passes subscribers through unchanged.
    pub fn with_pass_through() -> Self {
        Self::new().with_fallback(Arc::new(PassThroughCompleter))
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn SubscriberCompleter>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn register(&mut self, completer: Arc<dyn SubscriberCompleter>) {
        self.completers
            .insert(completer.platform().to_string(), completer);
    }

    pub fn get(&self, platform: &str) -> Result<Arc<dyn SubscriberCompleter>> {
        self.completers
            .get(platform)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| Error::config(format!("No completer registered for platform {platform}")))
    }

    /// Complete `subscribers`, calling each platform's completer once with its batch.
    ///
    /// Relative order of the input is preserved.
    pub async fn complete_all(&self, subscribers: &mut Vec<Subscriber>) -> Result<()> {
        let mut by_platform: Vec<(String, Vec<usize>)> = Vec::new();
        for (idx, subscriber) in subscribers.iter().enumerate() {
            match by_platform.iter_mut().find(|(p, _)| *p == subscriber.platform) {
                Some((_, indices)) => indices.push(idx),
                None => by_platform.push((subscriber.platform.clone(), vec![idx])),
            }
        }

        let mut slots: Vec<Option<Subscriber>> = subscribers.drain(..).map(Some).collect();
        for (platform, indices) in by_platform {
            let completer = match self.get(&platform) {
                Ok(completer) => completer,
                Err(e) => {
                    subscribers.extend(slots.into_iter().flatten());
                    return Err(e);
                }
            };

            let mut batch: Vec<Subscriber> =
                indices.iter().filter_map(|&i| slots[i].take()).collect();
            let result = completer.complete_batch(&mut batch).await;
            for (&i, subscriber) in indices.iter().zip(batch) {
                slots[i] = Some(subscriber);
            }
            if let Err(e) = result {
                subscribers.extend(slots.into_iter().flatten());
                return Err(e);
            }
        }

        subscribers.extend(slots.into_iter().flatten());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sets `uname` to `<platform>-<uid>` and counts batch calls.
    pub(crate) struct NamingCompleter {
        pub platform: String,
        pub batches: AtomicUsize,
    }

    impl NamingCompleter {
        pub(crate) fn new(platform: &str) -> Arc<Self> {
            Arc::new(Self {
                platform: platform.to_string(),
                batches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SubscriberCompleter for NamingCompleter {
        fn platform(&self) -> &str {
            &self.platform
        }

        async fn complete(&self, subscriber: &mut Subscriber) -> Result<()> {
            subscriber.uname = Some(format!("{}-{}", subscriber.platform, subscriber.uid));
            subscriber.room_id = Some(subscriber.uid * 10);
            Ok(())
        }

        async fn complete_batch(&self, subscribers: &mut [Subscriber]) -> Result<()> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            for subscriber in subscribers.iter_mut() {
                self.complete(subscriber).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_complete_all_groups_by_platform() {
        let bili = NamingCompleter::new("bilibili");
        let douyu = NamingCompleter::new("douyu");
        let mut registry = CompleterRegistry::new();
        registry.register(bili.clone());
        registry.register(douyu.clone());

        let mut subs = vec![
            Subscriber::new("bilibili", 1),
            Subscriber::new("douyu", 2),
            Subscriber::new("bilibili", 3),
        ];
        registry.complete_all(&mut subs).await.unwrap();

        assert_eq!(bili.batches.load(Ordering::SeqCst), 1);
        assert_eq!(douyu.batches.load(Ordering::SeqCst), 1);
        let names: Vec<_> = subs.iter().map(|s| s.uname.clone().unwrap()).collect();
        assert_eq!(names, vec!["bilibili-1", "douyu-2", "bilibili-3"]);
    }

    #[tokio::test]
    async fn test_missing_completer_without_fallback() {
        let registry = CompleterRegistry::new();
        let mut subs = vec![Subscriber::new("bilibili", 1)];
        let err = registry.complete_all(&mut subs).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(subs.len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_passes_through() {
        let registry = CompleterRegistry::with_pass_through();
        let mut subs = vec![Subscriber::new("twitch", 5)];
        registry.complete_all(&mut subs).await.unwrap();
        assert_eq!(subs[0].uname, None);
    }
}
