//! Change notification for tracking sessions.
//!
//! This module defines the change events a session emits, the listener trait observers
//! implement, and the registry that fans each batch of changes out to every registered listener.
//! Listeners are decoupled from the session core: the core computes the changes produced by one
//! applied result and hands them to the registry together with a copy of the new state.

use crate::tracker::types::{Status, TrackingSession};
use crate::verification::ErrorKind;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Changes that can occur during a tracking session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    /// The classified status moved
    StatusChanged { from: Status, to: Status },
    /// A new snapshot replaced the previous one
    SnapshotUpdated,
    /// The latest fetch failed
    ErrorRecorded(ErrorKind),
    /// A successful fetch cleared the previous error
    ErrorCleared,
    /// Automatic polling ended (terminal status or attempt ceiling)
    PollingStopped,
    /// The session was disposed; no further changes follow
    Disposed,
}

/// Trait for observing session changes.
///
/// Listeners are called synchronously from the polling task, so they should return quickly.
pub trait SessionListener: Send + Sync {
    /// Handle one batch of changes together with the session state after them.
    fn on_change(&self, changes: &[SessionChange], session: &TrackingSession);

    /// Get the name of this listener for logging and diagnostics.
    fn name(&self) -> &'static str {
        "SessionListener"
    }
}

impl<F> SessionListener for F
where
    F: Fn(&[SessionChange], &TrackingSession) + Send + Sync,
{
    fn on_change(&self, changes: &[SessionChange], session: &TrackingSession) {
        self(changes, session)
    }

    fn name(&self) -> &'static str {
        "closure"
    }
}

type ListenerList = Mutex<Vec<(u64, Arc<dyn SessionListener>)>>;

/// Registry that manages the listeners of one session.
///
/// Listeners are called in the order they were registered.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Arc<ListenerList>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and return the handle that removes it again.
    pub fn register(&self, listener: Arc<dyn SessionListener>) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, listener));
        }
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Dispatch a batch of changes to all registered listeners.
    ///
    /// The listener list is copied before dispatching so a listener may unsubscribe itself (or
    /// register another) from inside its callback.
    pub fn dispatch(&self, changes: &[SessionChange], session: &TrackingSession) {
        if changes.is_empty() {
            return;
        }
        let listeners: Vec<Arc<dyn SessionListener>> = match self.listeners.lock() {
            Ok(guard) => guard.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };
        for listener in listeners {
            tracing::trace!(listener = listener.name(), ?changes, "Dispatching session changes");
            listener.on_change(changes, session);
        }
    }

    /// Drop every listener.
    pub fn clear(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Handle returned by `on_change`; removes the listener when unsubscribed.
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl ListenerHandle {
    /// Remove the listener. Calling this more than once, or after the session is gone, is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut listeners) = listeners.lock() {
                listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

/// Compute the changes between two states of the same session.
pub fn diff(before: &TrackingSession, after: &TrackingSession) -> Vec<SessionChange> {
    let mut changes = Vec::new();

    if before.status != after.status {
        changes.push(SessionChange::StatusChanged {
            from: before.status,
            to: after.status,
        });
    }
    if before.latest_snapshot != after.latest_snapshot {
        changes.push(SessionChange::SnapshotUpdated);
    }
    match (before.last_error, after.last_error) {
        (_, Some(kind)) if after.attempt_count != before.attempt_count => {
            changes.push(SessionChange::ErrorRecorded(kind));
        }
        (Some(_), None) => changes.push(SessionChange::ErrorCleared),
        _ => {}
    }
    if before.is_polling && !after.is_polling {
        changes.push(SessionChange::PollingStopped);
    }

    changes
}
