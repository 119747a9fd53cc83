//! In-process [`SharedStore`] backend.
//!
//! [`MemoryStore`] keeps values, lists and pub/sub channels in [`DashMap`]s so
//! many relay tasks can hit it concurrently without a global lock. Expiry is
//! measured on the tokio clock, which lets paused-time tests fast-forward
//! through TTLs and idle timeouts deterministically.
//!
//! Semantics follow Redis where the relay depends on them:
//!
//! - a list whose last element is popped disappears;
//! - list operations on a plain value fail with [`StoreError::WrongType`];
//! - publishing with no subscribers silently drops the message.

use super::{SharedStore, StoreError, Subscription};
use async_trait::async_trait;
use core::time::Duration;
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
enum Entry {
    Value {
        data: String,
        expires_at: Option<Instant>,
    },
    List(VecDeque<String>),
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self, Self::Value { expires_at: Some(at), .. } if *at <= now)
    }
}

/// Thread-safe in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    channels: DashMap<String, broadcast::Sender<String>>,
    channel_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            channels: DashMap::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Sets how many unread messages a slow subscriber may lag behind before
    /// it starts missing announcements.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Number of live keys (values and non-empty lists).
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry::Value {
                data: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.purge_expired(key);
        match self.entries.get(key).as_deref() {
            Some(Entry::Value { data, .. }) => Ok(Some(data.clone())),
            Some(Entry::List(_)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.purge_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize, StoreError> {
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(*key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count();
        Ok(removed)
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        self.purge_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry.value_mut() {
            Entry::List(items) => {
                items.push_back(value.to_string());
                Ok(items.len())
            }
            Entry::Value { .. } => Err(wrong_type(key)),
        }
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.purge_expired(key);
        let (popped, drained) = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return Ok(None);
            };
            match entry.value_mut() {
                Entry::List(items) => {
                    let popped = items.pop_front();
                    (popped, items.is_empty())
                }
                Entry::Value { .. } => return Err(wrong_type(key)),
            }
        };

        if drained {
            self.entries
                .remove_if(key, |_, entry| matches!(entry, Entry::List(items) if items.is_empty()));
        }
        Ok(popped)
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        self.purge_expired(key);
        match self.entries.get(key).as_deref() {
            Some(Entry::List(items)) => Ok(items.len()),
            Some(Entry::Value { .. }) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        let delivered = self
            .channels
            .get(channel)
            .and_then(|tx| tx.send(message.to_string()).ok())
            .unwrap_or(0);
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe();

        // Lagged receivers skip what they missed, matching pub/sub's
        // at-most-once delivery.
        let stream = BroadcastStream::new(rx).filter_map(|msg| futures::future::ready(msg.ok()));
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn values_expire_on_the_tokio_clock() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn lists_are_fifo_and_vanish_when_drained() {
        let store = MemoryStore::new();
        assert_eq!(store.push_back("l", "a").await.unwrap(), 1);
        assert_eq!(store.push_back("l", "b").await.unwrap(), 2);
        assert_eq!(store.list_len("l").await.unwrap(), 2);

        assert_eq!(store.pop_front("l").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop_front("l").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop_front("l").await.unwrap(), None);
        assert!(!store.exists("l").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn list_ops_on_values_are_wrong_type() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            store.push_back("k", "x").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            store.pop_front("k").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            store.list_len("k").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        store.push_back("l", "a").await.unwrap();

        assert_eq!(store.delete(&["k", "l", "missing"]).await.unwrap(), 2);
        assert_eq!(store.delete(&["k", "l"]).await.unwrap(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_only_current_subscribers() {
        let store = MemoryStore::new();
        assert_eq!(store.publish("jobs", "lost").await.unwrap(), 0);

        let mut sub = store.subscribe("jobs").await.unwrap();
        assert_eq!(store.publish("jobs", "task-1").await.unwrap(), 1);
        assert_eq!(store.publish("other", "task-2").await.unwrap(), 0);

        assert_eq!(sub.next().await.as_deref(), Some("task-1"));
    }
}
