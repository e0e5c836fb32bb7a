//! Subscription registry
//!
//! Each streaming call owns a [`Subscription`] keyed by the call id. The
//! subscription's teardown runs exactly once: on `cancel(id)`, when the owning
//! port disconnects, when a new subscription replaces it, or when the handle
//! is dropped. Teardown never runs while the registry lock is held.

use crate::port::{ListenerId, Port};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use warden_core::{PortMessage, Result};

type Teardown = Box<dyn FnOnce() + Send>;

/// Owned subscription handle
pub struct Subscription {
    teardown: Option<Teardown>,
}

impl Subscription {
    /// Wrap a teardown function
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Subscription with nothing to release
    pub fn noop() -> Self {
        Self { teardown: None }
    }

    /// Run the teardown now
    pub fn close(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

struct Entry {
    port: Port,
    listener: Option<ListenerId>,
    subscription: Subscription,
}

impl Entry {
    fn close(self) {
        if let Some(listener) = self.listener {
            self.port.remove_listener(listener);
        }
        self.subscription.close();
    }
}

/// Registry of live subscriptions
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SubscriptionRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscription` under `id`, tied to `port`'s lifetime.
    ///
    /// An existing subscription with the same id is torn down first.
    pub fn register(&self, id: &str, port: &Port, subscription: Subscription) {
        let previous = self.entries.lock().insert(
            id.to_string(),
            Entry {
                port: port.clone(),
                listener: None,
                subscription,
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(subscription_id = %id, "Replacing existing subscription");
            previous.close();
        }

        let registry = self.clone();
        let key = id.to_string();
        let port_id = port.id().to_string();
        let listener = port.on_disconnect(move || {
            registry.cancel_for_port(&key, &port_id);
        });

        if let Some(listener) = listener {
            let mut entries = self.entries.lock();
            match entries.get_mut(id) {
                Some(entry) if entry.port.id() == port.id() => entry.listener = Some(listener),
                _ => port.remove_listener(listener),
            }
        }

        tracing::debug!(
            event = "subscription_registered",
            subscription_id = %id,
            port_id = %port.id(),
            "Subscription registered"
        );
    }

    /// Tear down the subscription with `id`; returns whether one existed
    pub fn cancel(&self, id: &str) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.close();
                tracing::debug!(event = "subscription_cancelled", subscription_id = %id, "Subscription cancelled");
                true
            }
            None => false,
        }
    }

    fn cancel_for_port(&self, id: &str, port_id: &str) {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.get(id) {
                Some(entry) if entry.port.id() == port_id => entries.remove(id),
                _ => None,
            }
        };
        if let Some(entry) = entry {
            entry.close();
            tracing::debug!(
                event = "subscription_cancelled",
                subscription_id = %id,
                port_id = %port_id,
                reason = "port_disconnected",
                "Subscription cancelled"
            );
        }
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear everything down
    pub fn cancel_all(&self) {
        let entries: Vec<Entry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.close();
        }
    }

    /// Push every value from `rx` to `port` as subscription messages.
    ///
    /// `producer` is released together with the forwarding task.
    pub fn forward<T>(&self, id: &str, port: &Port, mut rx: mpsc::Receiver<T>, producer: Subscription)
    where
        T: Serialize + Send + 'static,
    {
        let task_port = port.clone();
        let sub_id = id.to_string();
        let task = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                let message = match encode(&sub_id, &value) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(subscription_id = %sub_id, "Failed to encode update: {}", e);
                        continue;
                    }
                };
                if task_port.post(message).await.is_err() {
                    break;
                }
            }
        });

        self.register(
            id,
            port,
            Subscription::new(move || {
                task.abort();
                drop(producer);
            }),
        );
    }

    /// Forward a watch channel; returns the current value as the first response
    pub fn forward_watch<T>(&self, id: &str, port: &Port, mut rx: watch::Receiver<T>) -> Result<Value>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let snapshot = serde_json::to_value(&*rx.borrow_and_update())?;

        let task_port = port.clone();
        let sub_id = id.to_string();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let encoded = encode(&sub_id, &*rx.borrow_and_update());
                let message = match encoded {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(subscription_id = %sub_id, "Failed to encode update: {}", e);
                        continue;
                    }
                };
                if task_port.post(message).await.is_err() {
                    break;
                }
            }
        });

        self.register(id, port, Subscription::new(move || task.abort()));
        Ok(snapshot)
    }
}

fn encode<T: Serialize>(id: &str, value: &T) -> Result<PortMessage> {
    Ok(PortMessage::Subscription {
        id: id.to_string(),
        subscription: serde_json::to_value(value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Subscription, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            Subscription::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[tokio::test]
    async fn test_cancel_twice() {
        let registry = SubscriptionRegistry::new();
        let (port, _rx) = Port::new(8);
        let (sub, count) = counting();
        registry.register("sub1", &port, sub);

        assert!(registry.cancel("sub1"));
        assert!(!registry.cancel("sub1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        port.disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_tears_down_once() {
        let registry = SubscriptionRegistry::new();
        let (port, _rx) = Port::new(8);
        let (sub, count) = counting();
        registry.register("sub1", &port, sub);

        port.disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!registry.contains("sub1"));
        assert!(!registry.cancel("sub1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replace_tears_down_previous() {
        let registry = SubscriptionRegistry::new();
        let (port, _rx) = Port::new(8);
        let (first, first_count) = counting();
        let (second, second_count) = counting();

        registry.register("sub1", &port, first);
        registry.register("sub1", &port, second);
        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);

        port.disconnect();
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_old_port_disconnect_spares_new_owner() {
        let registry = SubscriptionRegistry::new();
        let (old_port, _old_rx) = Port::new(8);
        let (new_port, _new_rx) = Port::new(8);
        let (first, _) = counting();
        let (second, second_count) = counting();

        registry.register("sub1", &old_port, first);
        registry.register("sub1", &new_port, second);
        old_port.disconnect();

        assert!(registry.contains("sub1"));
        assert_eq!(second_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_register_on_closed_port_is_torn_down() {
        let registry = SubscriptionRegistry::new();
        let (port, _rx) = Port::new(8);
        port.disconnect();

        let (sub, count) = counting();
        registry.register("late", &port, sub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_forward_watch_pushes_updates() {
        let registry = SubscriptionRegistry::new();
        let (port, mut rx) = Port::new(8);
        let (tx, watch_rx) = watch::channel(1u32);

        let snapshot = registry.forward_watch("w1", &port, watch_rx).unwrap();
        assert_eq!(snapshot, serde_json::json!(1));

        tx.send(2).unwrap();
        let pushed = rx.recv().await.unwrap();
        assert_eq!(
            pushed,
            PortMessage::Subscription {
                id: "w1".to_string(),
                subscription: serde_json::json!(2),
            }
        );

        assert!(registry.cancel("w1"));
    }
}
