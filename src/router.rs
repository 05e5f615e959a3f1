//! Event router - the control plane.
//!
//! A topic-keyed publish/subscribe table shared by the orchestrator and every
//! unit. Delivery is synchronous and, within one topic, in subscription order.
//! Handlers may publish, subscribe and unsubscribe while being dispatched.
//!
//! Node-scoped topics follow `{node}.{port}.{verb}`:
//!
//! ```
//! use klangnetz::NodeId;
//! use klangnetz::router::{EventRouter, Event, Topic, Verb};
//! use std::{cell::Cell, rc::Rc};
//!
//! let router = EventRouter::new();
//! let clock = NodeId::new("clock").unwrap();
//! let hits = Rc::new(Cell::new(0));
//!
//! let h = hits.clone();
//! let _sub = router.subscribe(Topic::node(&clock, "output", Verb::SendNodeOn), move |_| h.set(h.get() + 1));
//! router.publish(&Topic::node(&clock, "output", Verb::SendNodeOn), &Event::bang());
//!
//! assert_eq!(hits.get(), 1);
//! assert_eq!(router.unsubscribe_all_for_node(&clock), 1);
//! ```
//!
//! The router is an explicit value, cloned into whoever needs it. Clones share
//! one subscriber table, so separate graph sessions simply use separate
//! routers.

use alloc::rc::{Rc, Weak};
use core::cell::{Cell, RefCell};
use core::fmt;

use hashbrown::HashMap;

use crate::description::NodeId;
use crate::error::EvalFault;
use crate::params::Params;

/// Published when a graph has been (re)built and is live.
pub const GRAPH_STARTED: &str = "graphStarted";
/// Published when a graph has been stopped by a fatal error or on request.
pub const GRAPH_STOPPED: &str = "graphStopped";
/// Unscoped topics. Node ids may not shadow these.
pub const RESERVED_TOPICS: &[&str] = &[GRAPH_STARTED, GRAPH_STOPPED];

/// Port used by units whose outputs are chosen per event (see [`Event::channel`]).
pub const ROUTED_PORT: &str = "routed";
/// Channel used for node-level topics such as status and parameter updates.
pub const NODE_CHANNEL: &str = "node";

/// Default limit for nested publishes.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// The last segment of a node-scoped topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Gate/trigger arriving at an input port.
    ReceiveNodeOn,
    /// Gate release arriving at an input port.
    ReceiveNodeOff,
    /// Gate/trigger leaving an output port.
    SendNodeOn,
    /// Gate release leaving an output port.
    SendNodeOff,
    /// Parameter bag pushed to a node from outside the editor.
    UpdateParams,
    /// Status, metering and error reports for the editor.
    Status,
}

impl Verb {
    /// The verb as it appears in a topic.
    pub const fn as_str(self) -> &'static str {
        match self {
            Verb::ReceiveNodeOn => "receiveNodeOn",
            Verb::ReceiveNodeOff => "receiveNodeOff",
            Verb::SendNodeOn => "sendNodeOn",
            Verb::SendNodeOff => "sendNodeOff",
            Verb::UpdateParams => "updateParams",
            Verb::Status => "status",
        }
    }

    /// `receiveNodeOn` or `receiveNodeOff`.
    #[inline]
    pub const fn receive(on: bool) -> Self {
        if on { Verb::ReceiveNodeOn } else { Verb::ReceiveNodeOff }
    }

    /// `sendNodeOn` or `sendNodeOff`.
    #[inline]
    pub const fn send(on: bool) -> Self {
        if on { Verb::SendNodeOn } else { Verb::SendNodeOff }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic construction and parsing.
pub struct Topic;

impl Topic {
    /// `{node}.{port}.{verb}`
    pub fn node(node: &NodeId, port: &str, verb: Verb) -> String {
        let mut topic = String::with_capacity(node.as_str().len() + port.len() + 16);
        topic.push_str(node.as_str());
        topic.push('.');
        topic.push_str(port);
        topic.push('.');
        topic.push_str(verb.as_str());
        topic
    }

    /// The node namespace of a scoped topic, `None` for unscoped topics.
    pub fn namespace(topic: &str) -> Option<&str> {
        topic.split_once('.').map(|(ns, _)| ns)
    }
}

/// Which node and port an event was forwarded from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin {
    /// Upstream node.
    pub node: NodeId,
    /// Upstream output port.
    pub port: String,
}

/// What an event carries.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// A bare trigger.
    Bang,
    /// A number (control value, note number, formula result).
    Value(f64),
    /// A pitched trigger.
    Note {
        /// Frequency in Hz.
        frequency: f64,
        /// Velocity, 0.0 to 1.0.
        velocity: f64,
    },
    /// A full parameter bag.
    Params(Params),
    /// Level metering from an analyzer.
    Meter {
        /// RMS of the last block.
        rms: f32,
        /// Absolute peak of the last block.
        peak: f32,
    },
    /// Free-form status for the editor.
    Status(String),
    /// A failed evaluation, forwarded so consumers can recover.
    Error(EvalFault),
}

impl Payload {
    /// The numeric content, if any. Notes yield their frequency.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Payload::Value(v) => Some(*v),
            Payload::Note { frequency, .. } => Some(*frequency),
            _ => None,
        }
    }

    /// True for [`Payload::Error`].
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Payload::Error(_))
    }
}

/// A control-plane event.
///
/// `channel` makes an event a *routed* event: units with a variable number of
/// outputs publish once on their [`ROUTED_PORT`] and tag the output index
/// here; the orchestrator's forwarding table delivers it only along edges
/// leaving that index.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Set by the orchestrator when forwarding along an edge.
    pub origin: Option<Origin>,
    /// Output index for routed events.
    pub channel: Option<usize>,
    /// The content.
    pub payload: Payload,
}

impl Event {
    /// An event with the given payload and no routing information.
    pub fn new(payload: Payload) -> Self {
        Self { origin: None, channel: None, payload }
    }

    /// A bare trigger.
    pub fn bang() -> Self {
        Self::new(Payload::Bang)
    }

    /// A numeric event.
    pub fn value(v: f64) -> Self {
        Self::new(Payload::Value(v))
    }

    /// A routed event for output `channel`.
    pub fn routed(channel: usize, payload: Payload) -> Self {
        Self { origin: None, channel: Some(channel), payload }
    }

    /// Replace the origin.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }
}

type Handler = Rc<dyn Fn(&Event)>;

struct Entry {
    id: u64,
    owner: Option<NodeId>,
    handler: Handler,
}

#[derive(Default)]
struct Table {
    topics: HashMap<String, Vec<Entry>>,
    next_id: u64,
}

impl Table {
    fn contains(&self, topic: &str, id: u64) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|entries| entries.iter().any(|e| e.id == id))
    }

    fn remove(&mut self, topic: &str, id: u64) -> bool {
        let Some(entries) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }
}

/// Capability to cancel one subscription.
///
/// Dropping it does *not* unsubscribe; units rely on
/// [`EventRouter::unsubscribe_all_for_node`] during disposal instead.
#[must_use = "keep the subscription if you need to cancel it individually"]
pub struct Subscription {
    topic: String,
    id: u64,
    table: Weak<RefCell<Table>>,
}

impl Subscription {
    /// The subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.cancel()
    }

    /// Remove the subscription without consuming the capability.
    pub fn cancel(&self) -> bool {
        match self.table.upgrade() {
            Some(table) => table.borrow_mut().remove(&self.topic, self.id),
            None => false,
        }
    }

    /// True while the subscription is registered.
    pub fn is_active(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.borrow().contains(&self.topic, self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

/// The publish/subscribe table. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventRouter {
    table: Rc<RefCell<Table>>,
    depth: Rc<Cell<usize>>,
    max_depth: usize,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl EventRouter {
    /// An empty router with the default dispatch depth limit.
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// An empty router that drops publishes nested deeper than `max_depth`.
    ///
    /// Control-plane edges may form loops; the limit turns an endless loop
    /// into a dropped event and a warning.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            table: Rc::new(RefCell::new(Table::default())),
            depth: Rc::new(Cell::new(0)),
            max_depth: max_depth.max(1),
        }
    }

    /// Subscribe `handler` to `topic`.
    pub fn subscribe(&self, topic: impl Into<String>, handler: impl Fn(&Event) + 'static) -> Subscription {
        self.insert(topic.into(), None, Rc::new(handler))
    }

    /// Subscribe on behalf of `owner`, so that disposing `owner` also removes
    /// this subscription even though the topic lives in another namespace.
    pub fn subscribe_owned(
        &self,
        topic: impl Into<String>,
        owner: &NodeId,
        handler: impl Fn(&Event) + 'static,
    ) -> Subscription {
        self.insert(topic.into(), Some(owner.clone()), Rc::new(handler))
    }

    fn insert(&self, topic: String, owner: Option<NodeId>, handler: Handler) -> Subscription {
        let mut table = self.table.borrow_mut();
        let id = table.next_id;
        table.next_id += 1;
        table
            .topics
            .entry(topic.clone())
            .or_default()
            .push(Entry { id, owner, handler });

        Subscription {
            topic,
            id,
            table: Rc::downgrade(&self.table),
        }
    }

    /// Deliver `event` to every subscriber of `topic`, in subscription order.
    ///
    /// Returns how many handlers ran. Subscribers added during dispatch do not
    /// see this event; subscribers removed during dispatch are skipped.
    pub fn publish(&self, topic: &str, event: &Event) -> usize {
        if self.depth.get() >= self.max_depth {
            tracing::warn!(topic, depth = self.depth.get(), "dispatch depth exceeded, dropping event");
            return 0;
        }

        let snapshot: Vec<(u64, Handler)> = match self.table.borrow().topics.get(topic) {
            Some(entries) => entries.iter().map(|e| (e.id, e.handler.clone())).collect(),
            None => return 0,
        };

        self.depth.set(self.depth.get() + 1);
        let _guard = DepthGuard(&self.depth);

        let mut delivered = 0;
        for (id, handler) in snapshot {
            if !self.table.borrow().contains(topic, id) {
                continue;
            }
            handler(event);
            delivered += 1;
        }
        delivered
    }

    /// Cancel one subscription.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.table.borrow_mut().remove(&subscription.topic, subscription.id)
    }

    /// Remove every subscription in `node`'s namespace or owned by `node`.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_all_for_node(&self, node: &NodeId) -> usize {
        let mut table = self.table.borrow_mut();
        let mut removed = 0;
        table.topics.retain(|topic, entries| {
            let in_namespace = Topic::namespace(topic) == Some(node.as_str());
            let before = entries.len();
            entries.retain(|e| !in_namespace && e.owner.as_ref() != Some(node));
            removed += before - entries.len();
            !entries.is_empty()
        });
        if removed > 0 {
            tracing::trace!(%node, removed, "unsubscribed node");
        }
        removed
    }

    /// Number of live subscriptions in `node`'s namespace or owned by it.
    pub fn subscriptions_for_node(&self, node: &NodeId) -> usize {
        self.table
            .borrow()
            .topics
            .iter()
            .map(|(topic, entries)| {
                if Topic::namespace(topic) == Some(node.as_str()) {
                    entries.len()
                } else {
                    entries.iter().filter(|e| e.owner.as_ref() == Some(node)).count()
                }
            })
            .sum()
    }

    /// Topics with at least one subscriber, sorted.
    pub fn list_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.table.borrow().topics.keys().cloned().collect();
        topics.sort_unstable();
        topics
    }

    /// Number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.table.borrow().topics.get(topic).map_or(0, Vec::len)
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.table.borrow_mut().topics.clear();
    }

    /// Drop every node-scoped subscription and every owned one, keeping
    /// listeners on unscoped topics. Used on full rebuild so the editor stays
    /// subscribed to `graphStarted`/`graphStopped`.
    pub fn clear_scoped(&self) -> usize {
        let mut table = self.table.borrow_mut();
        let mut removed = 0;
        table.topics.retain(|topic, entries| {
            let scoped = Topic::namespace(topic).is_some();
            let before = entries.len();
            entries.retain(|e| !scoped && e.owner.is_none());
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("topics", &self.table.borrow().topics.len())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    #[test]
    fn delivers_in_subscription_order() {
        let router = EventRouter::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            router.subscribe("a.out.sendNodeOn", move |_| log.borrow_mut().push(i));
        }
        assert_eq!(router.publish("a.out.sendNodeOn", &Event::bang()), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribe_capability_removes_only_that_handler() {
        let router = EventRouter::new();
        let a = router.subscribe("x.p.status", |_| {});
        let _b = router.subscribe("x.p.status", |_| {});
        assert!(a.is_active());
        assert!(a.unsubscribe());
        assert_eq!(router.subscriber_count("x.p.status"), 1);
    }

    #[test]
    fn bulk_unsubscribe_respects_namespace_boundaries() {
        let router = EventRouter::new();
        let _a = router.subscribe(Topic::node(&id("osc"), "output", Verb::SendNodeOn), |_| {});
        let _b = router.subscribe(Topic::node(&id("osc2"), "output", Verb::SendNodeOn), |_| {});
        let _c = router.subscribe_owned(Topic::node(&id("osc2"), "output", Verb::SendNodeOn), &id("osc"), |_| {});
        let _d = router.subscribe(GRAPH_STARTED, |_| {});

        assert_eq!(router.subscriptions_for_node(&id("osc")), 2);
        assert_eq!(router.unsubscribe_all_for_node(&id("osc")), 2);
        assert_eq!(router.list_topics(), vec![GRAPH_STARTED.to_owned(), "osc2.output.sendNodeOn".to_owned()]);
        assert_eq!(router.subscriber_count("osc2.output.sendNodeOn"), 1);
    }

    #[test]
    fn handlers_may_unsubscribe_later_handlers() {
        let router = EventRouter::new();
        let hits = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let v = victim.clone();
        let _killer = router.subscribe("t.p.sendNodeOn", move |_| {
            if let Some(sub) = v.borrow_mut().take() {
                sub.unsubscribe();
            }
        });
        let h = hits.clone();
        *victim.borrow_mut() = Some(router.subscribe("t.p.sendNodeOn", move |_| h.set(h.get() + 1)));

        assert_eq!(router.publish("t.p.sendNodeOn", &Event::bang()), 1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn feedback_loops_stop_at_depth_limit() {
        let router = EventRouter::with_max_depth(8);
        let hits = Rc::new(Cell::new(0));
        let r = router.clone();
        let h = hits.clone();
        let _loop = router.subscribe("a.out.sendNodeOn", move |e| {
            h.set(h.get() + 1);
            r.publish("a.out.sendNodeOn", e);
        });
        router.publish("a.out.sendNodeOn", &Event::bang());
        assert_eq!(hits.get(), 8);
    }

    #[test]
    fn scoped_clear_keeps_editor_listeners() {
        let router = EventRouter::new();
        let _a = router.subscribe("n.output.sendNodeOn", |_| {});
        let _b = router.subscribe_owned(GRAPH_STOPPED, &id("n"), |_| {});
        let _c = router.subscribe(GRAPH_STARTED, |_| {});
        assert_eq!(router.clear_scoped(), 2);
        assert_eq!(router.list_topics(), vec![GRAPH_STARTED.to_owned()]);
    }

    #[test]
    fn payload_numbers() {
        assert_eq!(Payload::Value(2.0).as_number(), Some(2.0));
        assert_eq!(Payload::Note { frequency: 440.0, velocity: 1.0 }.as_number(), Some(440.0));
        assert_eq!(Payload::Bang.as_number(), None);
        assert!(Payload::Error(EvalFault::NonFinite).is_error());
    }
}
