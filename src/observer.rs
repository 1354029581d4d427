//! Message observation and fan-out.
//!
//! Both gateway sessions publish their dispatches here. The observer
//! deduplicates by message id (the two sessions see the same traffic),
//! holds MESSAGE_CREATE events in a short per-channel reorder buffer so
//! subscribers see snowflake order, and fans events out to predicate
//! subscriptions.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::gateway::{DeletedMessage, GatewayEvent};
use crate::model::Message;
use crate::snowflake::Snowflake;

/// An event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum MessageEvent {
    /// A new message appeared
    Create(Message),
    /// A message was edited
    Update(Message),
    /// A message was deleted
    Delete(DeletedMessage),
}

impl MessageEvent {
    /// Id of the message the event concerns.
    pub fn message_id(&self) -> Snowflake {
        match self {
            Self::Create(m) | Self::Update(m) => m.id,
            Self::Delete(d) => d.id,
        }
    }

    /// Channel the event occurred in.
    pub fn channel_id(&self) -> Snowflake {
        match self {
            Self::Create(m) | Self::Update(m) => m.channel_id,
            Self::Delete(d) => d.channel_id,
        }
    }
}

type Predicate = Box<dyn Fn(&MessageEvent) -> bool + Send + Sync>;

struct Subscriber {
    id: u64,
    predicate: Predicate,
    sender: mpsc::UnboundedSender<MessageEvent>,
}

/// A cancellable subscription; dropping it unregisters the predicate.
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<MessageEvent>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl Subscription {
    /// Receive the next matching event; `None` after the observer stops.
    pub async fn recv(&mut self) -> Option<MessageEvent> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|s| s.id != self.id);
        }
    }
}

/// Handle the gateway sessions use to push events in.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl Publisher {
    /// Publish a gateway event. Never blocks; events arriving after the
    /// observer stopped are dropped.
    pub fn publish(&self, event: GatewayEvent) {
        let _ = self.tx.send(event);
    }
}

/// Bounded insertion-order set for message-id deduplication.
struct BoundedSeen {
    set: HashSet<(u8, u64, u64)>,
    order: VecDeque<(u8, u64, u64)>,
    capacity: usize,
}

impl BoundedSeen {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert a key; false when it was already present.
    fn insert(&mut self, key: (u8, u64, u64)) -> bool {
        if !self.set.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

struct PendingCreate {
    message: Message,
    arrived: Instant,
}

struct ObserverInner {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    pending: Mutex<HashMap<Snowflake, BTreeMap<Snowflake, PendingCreate>>>,
    seen: Mutex<BoundedSeen>,
    grace: Duration,
}

impl ObserverInner {
    fn deliver(&self, event: MessageEvent) {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(_) => return,
        };
        subs.retain(|s| !s.sender.is_closed());
        for sub in subs.iter() {
            if (sub.predicate)(&event) {
                let _ = sub.sender.send(event.clone());
            }
        }
    }

    fn handle(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::MessageCreate(message) => {
                let key = (0u8, message.id.value(), 0u64);
                if !self.seen.lock().map(|mut s| s.insert(key)).unwrap_or(false) {
                    trace!(id = %message.id, "Duplicate MESSAGE_CREATE dropped");
                    return;
                }
                let mut pending = match self.pending.lock() {
                    Ok(p) => p,
                    Err(_) => return,
                };
                pending
                    .entry(message.channel_id)
                    .or_default()
                    .insert(
                        message.id,
                        PendingCreate {
                            message,
                            arrived: Instant::now(),
                        },
                    );
            }
            GatewayEvent::MessageUpdate(message) => {
                let key = (1u8, message.id.value(), content_hash(&message.content));
                if !self.seen.lock().map(|mut s| s.insert(key)).unwrap_or(false) {
                    trace!(id = %message.id, "Duplicate MESSAGE_UPDATE dropped");
                    return;
                }
                self.deliver(MessageEvent::Update(message));
            }
            GatewayEvent::MessageDelete(deleted) => {
                let key = (2u8, deleted.id.value(), 0u64);
                if !self.seen.lock().map(|mut s| s.insert(key)).unwrap_or(false) {
                    return;
                }
                self.deliver(MessageEvent::Delete(deleted));
            }
            GatewayEvent::Ready(_) | GatewayEvent::Resumed => {
                // Session lifecycle events are consumed by the sessions.
            }
        }
    }

    /// Release buffered creates whose grace window has elapsed, in
    /// snowflake order per channel.
    fn flush_due(&self, now: Instant) {
        let mut due = Vec::new();
        {
            let mut pending = match self.pending.lock() {
                Ok(p) => p,
                Err(_) => return,
            };
            for buffer in pending.values_mut() {
                while let Some(entry) = buffer.first_entry() {
                    if now.duration_since(entry.get().arrived) >= self.grace {
                        due.push(entry.remove().message);
                    } else {
                        break;
                    }
                }
            }
            pending.retain(|_, buffer| !buffer.is_empty());
        }
        for message in due {
            self.deliver(MessageEvent::Create(message));
        }
    }
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Merges, deduplicates and orders events from both gateway sessions.
pub struct MessageObserver {
    inner: Arc<ObserverInner>,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    next_subscription: AtomicU64,
}

impl MessageObserver {
    /// Create an observer and spawn its dispatcher task.
    ///
    /// * `grace` - reorder window before a MESSAGE_CREATE is released
    /// * `dedupe_capacity` - bound on the message-id dedupe set
    /// * `parent` - cancellation scope the dispatcher lives under
    pub fn new(grace: Duration, dedupe_capacity: usize, parent: &CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<GatewayEvent>();
        let inner = Arc::new(ObserverInner {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            pending: Mutex::new(HashMap::new()),
            seen: Mutex::new(BoundedSeen::new(dedupe_capacity)),
            grace,
        });

        let dispatcher = inner.clone();
        let cancel = parent.child_token();
        let tick = (grace / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => dispatcher.flush_due(Instant::now()),
                    event = rx.recv() => match event {
                        Some(event) => dispatcher.handle(event),
                        None => break,
                    },
                }
            }
            debug!("Observer dispatcher stopped");
        });

        Self {
            inner,
            tx,
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Handle for gateway sessions to publish through.
    pub fn publisher(&self) -> Publisher {
        Publisher {
            tx: self.tx.clone(),
        }
    }

    /// Register a predicate subscription.
    ///
    /// Every event matching the predicate is delivered to the returned
    /// [`Subscription`] until it is dropped.
    pub fn subscribe<F>(&self, predicate: F) -> Subscription
    where
        F: Fn(&MessageEvent) -> bool + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.inner.subscribers.lock() {
            subs.push(Subscriber {
                id,
                predicate: Box::new(predicate),
                sender,
            });
        }
        Subscription {
            id,
            receiver,
            subscribers: self.inner.subscribers.clone(),
        }
    }

    /// Number of live subscriptions (diagnostics).
    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .map(|s| s.len())
            .unwrap_or(0)
    }
}
