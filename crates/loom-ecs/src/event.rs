//! Typed publish/subscribe.
//!
//! Every world owns an [`EventBus`]. Any `'static + Send + Sync` type can be
//! an event. Handlers receive `&mut World`, so they may mutate the world and
//! raise further events; nested dispatch runs depth-first before the outer
//! dispatch resumes.
//!
//! Subscriptions belong to a receiver ([`ReceiverId`]). A receiver must drop
//! all of its subscriptions before it is released; releasing one that still
//! holds subscriptions is reported as a contract violation.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::sample::SampleId;
use crate::scene::{SceneId, SceneState};
use crate::world::World;

// ---------------------------------------------------------------------------
// Builtin events
// ---------------------------------------------------------------------------

/// Raised once per frame before the pre-update systems run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreUpdate {
    pub dt: f32,
}

/// Raised once per frame before the update systems run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub dt: f32,
}

/// Raised once per frame before the post-update systems run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostUpdate {
    pub dt: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAdded {
    pub entity: EntityId,
}

/// Raised after the entity has left every sample, just before its slot is
/// recycled. Components are still readable from handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRemoved {
    pub entity: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAddedToSample {
    pub sample: SampleId,
    pub entity: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRemovedFromSample {
    pub sample: SampleId,
    pub entity: EntityId,
}

/// The entity's effective (in-hierarchy) activity flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityActiveChanged {
    pub entity: EntityId,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentChanged {
    pub entity: EntityId,
    pub old_parent: Option<EntityId>,
    pub new_parent: Option<EntityId>,
}

/// The child list of `entity` gained or lost a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenChanged {
    pub entity: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcsSceneStateChanged {
    pub scene: SceneId,
    pub state: SceneState,
}

/// Wrapper for events sent to a single entity with [`World::send_to`].
#[derive(Debug, Clone, PartialEq)]
pub struct Targeted<E> {
    pub target: EntityId,
    pub event: E,
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Identity of a subscribing object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiverId(u64);

impl fmt::Debug for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReceiverId({})", self.0)
    }
}

/// Handle returned by [`World::subscribe`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

pub(crate) type Handler<E> = Arc<dyn Fn(&mut World, &E) + Send + Sync>;

struct HandlerList<E> {
    entries: Vec<(SubscriptionId, Handler<E>)>,
}

struct SubscriptionRecord {
    event_type: TypeId,
    event_name: &'static str,
    receiver: ReceiverId,
}

struct ReceiverRecord {
    label: String,
    live: usize,
}

/// Subscriber bookkeeping for one world.
#[derive(Default)]
pub struct EventBus {
    /// `TypeId::of::<E>()` -> `HandlerList<E>`.
    lists: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    subscriptions: HashMap<SubscriptionId, SubscriptionRecord>,
    receivers: HashMap<ReceiverId, ReceiverRecord>,
    next_id: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.receivers.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn register_receiver(&mut self, label: &str) -> ReceiverId {
        let id = ReceiverId(self.next());
        self.receivers.insert(
            id,
            ReceiverRecord {
                label: label.to_owned(),
                live: 0,
            },
        );
        id
    }

    /// Forget a receiver. Any subscriptions it still holds are dropped after
    /// reporting the violation.
    pub fn release_receiver(&mut self, receiver: ReceiverId) {
        let Some(record) = self.receivers.remove(&receiver) else {
            tracing::warn!(?receiver, "releasing unknown event receiver");
            debug_assert!(false, "releasing unknown event receiver {receiver:?}");
            return;
        };
        if record.live > 0 {
            tracing::warn!(
                receiver = %record.label,
                live = record.live,
                "event receiver released with live subscriptions"
            );
            let dangling: Vec<SubscriptionId> = self
                .subscriptions
                .iter()
                .filter(|(_, s)| s.receiver == receiver)
                .map(|(id, _)| *id)
                .collect();
            for id in dangling {
                self.drop_subscription(id);
            }
            debug_assert!(
                false,
                "event receiver '{}' released with {} live subscriptions",
                record.label, record.live
            );
        }
    }

    pub fn subscribe<E: Any + Send + Sync>(&mut self, receiver: ReceiverId, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next());
        match self.receivers.get_mut(&receiver) {
            Some(record) => record.live += 1,
            None => {
                tracing::warn!(?receiver, "subscribing with an unregistered receiver");
                debug_assert!(false, "receiver {receiver:?} is not registered");
            }
        }
        self.subscriptions.insert(
            id,
            SubscriptionRecord {
                event_type: TypeId::of::<E>(),
                event_name: std::any::type_name::<E>(),
                receiver,
            },
        );
        self.list_mut::<E>().entries.push((id, handler));
        id
    }

    /// Returns `false` (and reports it) if `subscription` is not live.
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        if !self.subscriptions.contains_key(&subscription) {
            tracing::warn!(?subscription, "unsubscribing an unknown subscription");
            debug_assert!(false, "unsubscribing unknown subscription {subscription:?}");
            return false;
        }
        self.drop_subscription(subscription);
        true
    }

    /// Drop every subscription held by `receiver`; returns how many.
    pub fn unsubscribe_all(&mut self, receiver: ReceiverId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.receiver == receiver)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.drop_subscription(*id);
        }
        ids.len()
    }

    fn drop_subscription(&mut self, id: SubscriptionId) {
        let Some(record) = self.subscriptions.remove(&id) else {
            return;
        };
        if let Some(receiver) = self.receivers.get_mut(&record.receiver) {
            receiver.live = receiver.live.saturating_sub(1);
        }
        // Handler lists are purged lazily in `handlers`.
        tracing::trace!(event = record.event_name, ?id, "unsubscribed");
    }

    pub fn is_live(&self, subscription: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&subscription)
    }

    /// Number of live subscriptions for event type `E`.
    pub fn subscriber_count<E: Any>(&self) -> usize {
        let ty = TypeId::of::<E>();
        self.subscriptions.values().filter(|s| s.event_type == ty).count()
    }

    pub fn live_subscriptions(&self, receiver: ReceiverId) -> usize {
        self.receivers.get(&receiver).map_or(0, |r| r.live)
    }

    fn list_mut<E: Any + Send + Sync>(&mut self) -> &mut HandlerList<E> {
        self.lists
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(HandlerList::<E> { entries: Vec::new() }))
            .downcast_mut::<HandlerList<E>>()
            .unwrap_or_else(|| unreachable!("handler list keyed by its own TypeId"))
    }

    /// Snapshot of the live handlers for `E`, in subscription order. Dead
    /// entries are purged on the way.
    pub(crate) fn handlers<E: Any + Send + Sync>(&mut self) -> Vec<(SubscriptionId, Handler<E>)> {
        let Some(boxed) = self.lists.get_mut(&TypeId::of::<E>()) else {
            return Vec::new();
        };
        let Some(list) = boxed.downcast_mut::<HandlerList<E>>() else {
            return Vec::new();
        };
        let subscriptions = &self.subscriptions;
        list.entries.retain(|(id, _)| subscriptions.contains_key(id));
        list.entries.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping;

    fn noop() -> Handler<Ping> {
        Arc::new(|_: &mut World, _: &Ping| {})
    }

    #[test]
    fn subscribe_and_unsubscribe_track_counts() {
        let mut bus = EventBus::new();
        let r = bus.register_receiver("test");
        let a = bus.subscribe::<Ping>(r, noop());
        let b = bus.subscribe::<Ping>(r, noop());
        assert_eq!(bus.subscriber_count::<Ping>(), 2);
        assert_eq!(bus.live_subscriptions(r), 2);

        assert!(bus.unsubscribe(a));
        assert!(!bus.is_live(a));
        assert!(bus.is_live(b));
        assert_eq!(bus.handlers::<Ping>().len(), 1);
        assert_eq!(bus.unsubscribe_all(r), 1);
        assert!(bus.handlers::<Ping>().is_empty());
        bus.release_receiver(r);
    }

    #[test]
    fn handlers_for_unknown_event_are_empty() {
        let mut bus = EventBus::new();
        assert!(bus.handlers::<Ping>().is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "live subscriptions")]
    fn releasing_receiver_with_subscriptions_asserts() {
        let mut bus = EventBus::new();
        let r = bus.register_receiver("leaky");
        bus.subscribe::<Ping>(r, noop());
        bus.release_receiver(r);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unknown subscription")]
    fn double_unsubscribe_asserts() {
        let mut bus = EventBus::new();
        let r = bus.register_receiver("twice");
        let s = bus.subscribe::<Ping>(r, noop());
        bus.unsubscribe(s);
        bus.unsubscribe(s);
    }
}
