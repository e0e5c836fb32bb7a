//! Client port: one long-lived connection from a UI surface
//!
//! A port owns the outbound channel to its client and a set of disconnect
//! listeners. Listeners run once, on the first `disconnect()`; a listener
//! registered after that runs immediately.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use warden_core::{Error, PortMessage, Result};

/// Handle for removing a disconnect listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnOnce() + Send>;

struct PortInner {
    id: String,
    tx: mpsc::Sender<PortMessage>,
    connected: AtomicBool,
    notify: Notify,
    next_listener: AtomicU64,
    listeners: Mutex<HashMap<u64, Listener>>,
}

/// Cloneable client port
#[derive(Clone)]
pub struct Port {
    inner: Arc<PortInner>,
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.inner.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Port {
    /// Create a port and the receiver the transport drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PortMessage>) {
        Self::with_id(uuid::Uuid::new_v4().to_string(), capacity)
    }

    /// Create a port with a fixed id
    pub fn with_id(id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<PortMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let port = Self {
            inner: Arc::new(PortInner {
                id: id.into(),
                tx,
                connected: AtomicBool::new(true),
                notify: Notify::new(),
                next_listener: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
            }),
        };
        (port, rx)
    }

    /// Port id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Returns `true` until the port is disconnected
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Run `listener` when the port disconnects.
    ///
    /// Returns `None` when the port is already gone; the listener has then
    /// already run.
    pub fn on_disconnect<F>(&self, listener: F) -> Option<ListenerId>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut listeners = self.inner.listeners.lock();
            if self.is_connected() {
                let key = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
                listeners.insert(key, Box::new(listener));
                return Some(ListenerId(key));
            }
        }
        listener();
        None
    }

    /// Drop a listener that is no longer needed
    pub fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners.lock().remove(&id.0);
    }

    /// Disconnect the port and run every listener once
    pub fn disconnect(&self) {
        let listeners: Vec<Listener> = {
            let mut listeners = self.inner.listeners.lock();
            if !self.inner.connected.swap(false, Ordering::AcqRel) {
                return;
            }
            listeners.drain().map(|(_, l)| l).collect()
        };

        tracing::debug!(
            event = "port_disconnected",
            port_id = %self.inner.id,
            listeners = listeners.len(),
            "Port disconnected"
        );

        for listener in listeners {
            listener();
        }
        self.inner.notify.notify_waiters();
    }

    /// Await disconnection
    pub async fn disconnected(&self) {
        let notified = self.inner.notify.notified();
        if !self.is_connected() {
            return;
        }
        notified.await;
    }

    /// Send a message, waiting for buffer space
    pub async fn post(&self, message: PortMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        self.inner
            .tx
            .send(message)
            .await
            .map_err(|_| Error::Disconnected)
    }

    /// Send a message without waiting; fails when the buffer is full
    pub fn try_post(&self, message: PortMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        self.inner.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Other("Port buffer full".to_string()),
            mpsc::error::TrySendError::Closed(_) => Error::Disconnected,
        })
    }
}
