//! Session lifecycle notifications.

use crate::error::SessionError;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Something that happened to a stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A login was completed and persisted
    LoggedIn {
        /// Account key of the session
        account_key: String,
    },
    /// Tokens were refreshed and persisted
    Refreshed {
        /// Account key of the session
        account_key: String,
    },
    /// A refresh attempt failed; the stored session is unchanged
    RefreshFailed {
        /// Account key of the session
        account_key: String,
        /// Why the refresh failed
        error: SessionError,
    },
    /// The session was removed
    LoggedOut {
        /// Account key of the session
        account_key: String,
    },
    /// The session was copied into a shared access group
    HandedOff {
        /// Account key of the session
        account_key: String,
        /// Target access group
        access_group: String,
    },
}

impl SessionEvent {
    /// Account key the event is about.
    #[must_use]
    pub fn account_key(&self) -> &str {
        match self {
            Self::LoggedIn { account_key }
            | Self::Refreshed { account_key }
            | Self::RefreshFailed { account_key, .. }
            | Self::LoggedOut { account_key }
            | Self::HandedOff { account_key, .. } => account_key,
        }
    }
}

/// Handle returned when registering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Registered listeners, owned by the facade and shared with the coordinator.
#[derive(Clone, Default)]
pub struct Listeners {
    next_id: Arc<AtomicU64>,
    entries: Arc<RwLock<Vec<(ListenerHandle, Listener)>>>,
}

impl Listeners {
    /// Empty listener list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((handle, Arc::new(listener)));
        handle
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(h, _)| *h != handle);
        entries.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deliver an event to every listener, in registration order.
    pub fn emit(&self, event: &SessionEvent) {
        // Listeners may register or remove listeners themselves
        let snapshot: Vec<Listener> = self.entries.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_add_emit_remove() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let handle = listeners.add(move |e| sink.lock().push(e.clone()));
        assert_eq!(listeners.len(), 1);

        let event = SessionEvent::LoggedOut {
            account_key: "acct".to_string(),
        };
        listeners.emit(&event);
        assert!(listeners.remove(handle));
        assert!(!listeners.remove(handle));
        listeners.emit(&event);

        assert_eq!(seen.lock().as_slice(), &[event]);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_listener_may_unregister_itself() {
        let listeners = Listeners::new();
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

        let inner = listeners.clone();
        let own = Arc::clone(&slot);
        let handle = listeners.add(move |_| {
            if let Some(h) = *own.lock() {
                inner.remove(h);
            }
        });
        *slot.lock() = Some(handle);

        listeners.emit(&SessionEvent::Refreshed {
            account_key: "acct".to_string(),
        });
        assert!(listeners.is_empty());
    }
}
