//! Event bus decoupling the core from whatever presents it
//!
//! Producers call [`EventBus::publish`]. Synchronous handlers registered with
//! [`EventBus::subscribe`] run in registration order on the publishing thread,
//! then the event is broadcast to async receivers from
//! [`EventBus::subscribe_all`]. The filesystem watcher publishes from its own
//! thread, so handlers must be `Send + Sync`.

use crate::context::AiResponse;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{trace, warn};

const BROADCAST_CAPACITY: usize = 1024;

/// Everything the core announces
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A file appeared under a watch root
    FileCreated(PathBuf),
    /// A file under a watch root changed
    FileModified(PathBuf),
    /// A file under a watch root went away
    FileDeleted(PathBuf),
    /// A command passed rate limiting and its request is about to open
    ResponseStarted,
    /// One streamed fragment, in arrival order
    ResponseChunk(String),
    /// A command finished streaming
    ResponseComplete(AiResponse),
    /// Something failed; the message is meant for display
    ErrorOccurred(String),
}

/// Discriminant of [`AppEvent`] used to key subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FileCreated,
    FileModified,
    FileDeleted,
    ResponseStarted,
    ResponseChunk,
    ResponseComplete,
    ErrorOccurred,
}

impl AppEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AppEvent::FileCreated(_) => EventKind::FileCreated,
            AppEvent::FileModified(_) => EventKind::FileModified,
            AppEvent::FileDeleted(_) => EventKind::FileDeleted,
            AppEvent::ResponseStarted => EventKind::ResponseStarted,
            AppEvent::ResponseChunk(_) => EventKind::ResponseChunk,
            AppEvent::ResponseComplete(_) => EventKind::ResponseComplete,
            AppEvent::ErrorOccurred(_) => EventKind::ErrorOccurred,
        }
    }

    /// Path carried by file events
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            AppEvent::FileCreated(path) | AppEvent::FileModified(path) | AppEvent::FileDeleted(path) => Some(path),
            _ => None,
        }
    }
}

impl EventKind {
    /// The three filesystem change kinds
    pub const FILE_CHANGES: [EventKind; 3] = [EventKind::FileCreated, EventKind::FileModified, EventKind::FileDeleted];
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&AppEvent) + Send + Sync>;

/// Publish/subscribe hub shared by every core component
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register `handler` for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&AppEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.entry(kind).or_default().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(existing, _)| *existing != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Receive every event published from now on
    pub fn subscribe_all(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Deliver `event` to its handlers, then to broadcast receivers
    pub fn publish(&self, event: AppEvent) {
        trace!("Publishing {:?}", event.kind());

        // Clone the list so handlers may (un)subscribe without deadlocking.
        let matching: Vec<Handler> = {
            let handlers = match self.handlers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            handlers
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in matching {
            handler(&event);
        }

        // No receivers is not an error.
        if self.sender.receiver_count() > 0 && self.sender.send(event).is_err() {
            warn!("Broadcast receivers dropped while publishing");
        }
    }

    /// Shorthand for publishing [`AppEvent::ErrorOccurred`]
    pub fn publish_error(&self, message: impl Into<String>) {
        self.publish(AppEvent::ErrorOccurred(message.into()));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_handlers_receive_only_their_kind_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        bus.subscribe(EventKind::ResponseChunk, move |event| {
            if let AppEvent::ResponseChunk(text) = event {
                first.lock().unwrap().push(format!("a:{text}"));
            }
        });
        let second = seen.clone();
        bus.subscribe(EventKind::ResponseChunk, move |event| {
            if let AppEvent::ResponseChunk(text) = event {
                second.lock().unwrap().push(format!("b:{text}"));
            }
        });

        bus.publish(AppEvent::ResponseStarted);
        bus.publish(AppEvent::ResponseChunk("x".into()));

        assert_eq!(*seen.lock().unwrap(), vec!["a:x", "b:x"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let id = bus.subscribe(EventKind::ErrorOccurred, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish_error("one");
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish_error("two");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_subscribe_while_publishing() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.subscribe(EventKind::ResponseStarted, move |_| {
            inner.subscribe(EventKind::ResponseStarted, |_| {});
        });

        bus.publish(AppEvent::ResponseStarted);
    }

    #[tokio::test]
    async fn test_broadcast_receivers_see_every_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();

        bus.publish(AppEvent::FileCreated(PathBuf::from("/a")));
        bus.publish_error("boom");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind(), EventKind::FileCreated);
        assert_eq!(first.path(), Some(&PathBuf::from("/a")));
        assert!(matches!(rx.recv().await.unwrap(), AppEvent::ErrorOccurred(msg) if msg == "boom"));
    }
}
