//! Units - the live side of a node.
//!
//! A unit couples at most one engine primitive with a set of event router
//! subscriptions under its node's namespace. The orchestrator builds one unit
//! per node through the [`catalog`], calls [`Unit::render`] whenever the
//! node's parameters change, [`Unit::pump`] after every block, and
//! [`Unit::dispose`] when the node goes away.
//!
//! Units never talk to the editor directly. Everything they want to say goes
//! through the router, and changes to their own parameters are queued on the
//! [`OnChange`] channel for the orchestrator to apply.

pub mod catalog;

mod audio;
mod clock;
mod control;
mod hybrid;
mod sequencer;
mod switch;
mod worklet;

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;

use hashbrown::HashMap;

use crate::description::{NodeDescriptor, NodeId};
use crate::engine::AudioEngine;
use crate::error::UnitError;
use crate::node::PrimitiveId;
use crate::nodes::AudioBuffer;
use crate::params::{Params, ParamsExt};
use crate::router::{Event, EventRouter, Payload, Topic, Verb, NODE_CHANNEL, ROUTED_PORT};
use crate::timers::Timers;

pub use catalog::{shape_of, KINDS};
pub use clock::Clock;
pub use switch::{BlockingSwitch, Switch};

/// Port every audio-capable unit produces audio on.
pub const AUDIO_OUTPUT: &str = "output";
/// Designated audio input port.
pub const AUDIO_INPUT: &str = "main-input";

/// What a unit does with audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitClass {
    /// Wraps a primitive; events only set parameters.
    Audio,
    /// No primitive. A control-plane state machine.
    Event,
    /// A primitive whose behavior is driven by events.
    Hybrid,
}

/// The declared shape of a node kind: which ports it has and what they carry.
#[derive(Debug)]
pub struct Shape {
    /// Kind name as used in graph descriptions.
    pub kind: &'static str,
    pub class: UnitClass,
    /// The designated audio input, if the unit accepts audio.
    pub audio_input: Option<&'static str>,
    /// True if the unit produces audio on [`AUDIO_OUTPUT`].
    pub audio_output: bool,
    /// Containers that carry audio through without producing their own.
    pub pass_through: bool,
    /// The orchestrator connects the primitive to the engine's destination.
    pub to_destination: bool,
    /// The primitive is rendered even with nothing downstream.
    pub keep_alive: bool,
    /// Output ports chosen per event: `{prefix}{index}`.
    pub routed_prefix: Option<&'static str>,
    /// Indexed input ports: `{prefix}{index}`.
    pub input_prefix: Option<&'static str>,
    /// Fixed control ports. `None` accepts any port name.
    pub ports: Option<&'static [&'static str]>,
    /// Numeric parameters that double as control input ports.
    pub params: &'static [&'static str],
}

impl Shape {
    pub(crate) const AUDIO: Shape = Shape {
        kind: "",
        class: UnitClass::Audio,
        audio_input: Some(AUDIO_INPUT),
        audio_output: true,
        pass_through: false,
        to_destination: false,
        keep_alive: false,
        routed_prefix: None,
        input_prefix: None,
        ports: Some(&[]),
        params: &[],
    };

    pub(crate) const EVENT: Shape = Shape {
        kind: "",
        class: UnitClass::Event,
        audio_input: None,
        audio_output: false,
        pass_through: false,
        to_destination: false,
        keep_alive: false,
        routed_prefix: None,
        input_prefix: None,
        ports: Some(&["input", "output"]),
        params: &[],
    };

    /// True if the unit can feed another unit's audio input.
    #[inline]
    pub fn is_audio_capable(&self) -> bool {
        self.audio_output || self.pass_through
    }

    /// True if `port` is the designated audio input.
    #[inline]
    pub fn is_audio_input(&self, port: &str) -> bool {
        self.audio_input == Some(port)
    }

    /// The output index encoded in a routed port name.
    pub fn routed_index(&self, port: &str) -> Option<usize> {
        indexed(self.routed_prefix?, port)
    }

    /// The input index encoded in an indexed input port name.
    pub fn input_index(&self, port: &str) -> Option<usize> {
        indexed(self.input_prefix?, port)
    }

    /// True if the kind declares `port`.
    pub fn has_port(&self, port: &str) -> bool {
        let Some(ports) = self.ports else {
            return true;
        };
        ports.contains(&port)
            || self.params.contains(&port)
            || self.is_audio_input(port)
            || (self.is_audio_capable() && port == AUDIO_OUTPUT)
            || self.routed_index(port).is_some()
            || self.input_index(port).is_some()
    }
}

fn indexed(prefix: &str, port: &str) -> Option<usize> {
    port.strip_prefix(prefix)?.parse().ok()
}

/// The live side of one node.
pub trait Unit {
    /// The kind's declared shape.
    fn shape(&self) -> &'static Shape;

    /// The primitive this unit owns, if any.
    fn primitive(&self) -> Option<PrimitiveId> {
        None
    }

    /// Apply `params`.
    ///
    /// Must be idempotent: values that did not change since the last call
    /// cause no messages and no new subscriptions. A unit without a primitive
    /// creates it here, so an inert unit recovers on a later render.
    fn render(&mut self, engine: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError>;

    /// Unsubscribe everything under the node's id, cancel its timers and
    /// release its primitive. Calling it again does nothing.
    fn dispose(&mut self, engine: Option<&mut AudioEngine>);

    /// Move data from the audio thread to the router.
    fn pump(&mut self) {}
}

/// Work a unit asks the orchestrator to do once the current dispatch is over.
#[derive(Clone, Debug, PartialEq)]
pub enum Deferred {
    /// Merge `patch` into the node's parameters, re-render, and tell the editor.
    Update { node: NodeId, patch: Params },
    /// Render the node again with its current parameters.
    Render(NodeId),
}

/// Queue of [`Deferred`] work. Clones share the queue.
#[derive(Clone, Default)]
pub struct OnChange {
    queue: Rc<RefCell<VecDeque<Deferred>>>,
}

impl OnChange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a parameter change for `node`.
    pub fn update(&self, node: &NodeId, patch: Params) {
        self.queue.borrow_mut().push_back(Deferred::Update {
            node: node.clone(),
            patch,
        });
    }

    /// Queue a re-render of `node`.
    pub fn render(&self, node: &NodeId) {
        self.queue.borrow_mut().push_back(Deferred::Render(node.clone()));
    }

    /// Take everything queued so far.
    pub fn drain(&self) -> Vec<Deferred> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl fmt::Debug for OnChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnChange").field("queued", &self.queue.borrow().len()).finish()
    }
}

/// Audio buffers shared between sample players and recorders, by name.
#[derive(Clone, Default)]
pub struct BufferStore {
    buffers: Rc<RefCell<HashMap<String, AudioBuffer>>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, buffer: AudioBuffer) {
        self.buffers.borrow_mut().insert(name.into(), buffer);
    }

    /// A shared reference to the named buffer.
    pub fn get(&self, name: &str) -> Option<AudioBuffer> {
        self.buffers.borrow().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<AudioBuffer> {
        self.buffers.borrow_mut().remove(name)
    }

    /// Stored names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buffers.borrow().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

/// Everything a unit is built from.
pub struct UnitContext<'a> {
    /// The engine, absent when building control-plane-only graphs.
    pub engine: Option<&'a mut AudioEngine>,
    pub router: &'a EventRouter,
    pub timers: &'a Timers,
    pub node: &'a NodeDescriptor,
    pub on_change: &'a OnChange,
    pub buffers: &'a BufferStore,
}

/// A unit's view of the router and timers, restricted to its own namespace.
#[derive(Clone)]
pub struct NodeScope {
    id: NodeId,
    router: EventRouter,
    timers: Timers,
    on_change: OnChange,
}

impl NodeScope {
    pub fn new(id: NodeId, router: EventRouter, timers: Timers, on_change: OnChange) -> Self {
        Self { id, router, timers, on_change }
    }

    pub(crate) fn from_context(ctx: &UnitContext<'_>) -> Self {
        Self::new(ctx.node.id.clone(), ctx.router.clone(), ctx.timers.clone(), ctx.on_change.clone())
    }

    #[inline]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    #[inline]
    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    #[inline]
    pub fn on_change(&self) -> &OnChange {
        &self.on_change
    }

    /// Listen on `{id}.{port}.{verb}`. Removed on [`detach`](Self::detach).
    pub fn on(&self, port: &str, verb: Verb, handler: impl Fn(&Event) + 'static) {
        let _ = self.router.subscribe(Topic::node(&self.id, port, verb), handler);
    }

    /// Listen for both gate edges on `port`; the handler gets `true` for on.
    pub fn on_gate(&self, port: &str, handler: impl Fn(&Event, bool) + 'static) {
        let handler = Rc::new(handler);
        let h = handler.clone();
        self.on(port, Verb::ReceiveNodeOn, move |e| h(e, true));
        self.on(port, Verb::ReceiveNodeOff, move |e| handler(e, false));
    }

    /// Publish on `{id}.{port}.sendNodeOn`.
    pub fn emit_on(&self, port: &str, payload: Payload) -> usize {
        self.router.publish(&Topic::node(&self.id, port, Verb::SendNodeOn), &Event::new(payload))
    }

    /// Publish on `{id}.{port}.sendNodeOff`.
    pub fn emit_off(&self, port: &str, payload: Payload) -> usize {
        self.router.publish(&Topic::node(&self.id, port, Verb::SendNodeOff), &Event::new(payload))
    }

    /// Publish a routed event for output `channel`.
    pub fn emit_routed(&self, channel: usize, on: bool, payload: Payload) -> usize {
        self.router.publish(
            &Topic::node(&self.id, ROUTED_PORT, Verb::send(on)),
            &Event::routed(channel, payload),
        )
    }

    /// Publish on `{id}.node.status`.
    pub fn report_status(&self, payload: Payload) -> usize {
        self.report(NODE_CHANNEL, payload)
    }

    /// Publish on `{id}.{channel}.status`.
    pub fn report(&self, channel: &str, payload: Payload) -> usize {
        self.router.publish(&Topic::node(&self.id, channel, Verb::Status), &Event::new(payload))
    }

    /// Expose numeric parameters as control inputs: a number arriving on
    /// `{id}.{param}.receiveNodeOn` becomes a parameter update.
    pub fn expose_params(&self, names: &'static [&'static str]) {
        for &name in names {
            let id = self.id.clone();
            let on_change = self.on_change.clone();
            self.on(name, Verb::ReceiveNodeOn, move |e| {
                if let Some(v) = e.payload.as_number() {
                    let mut patch = Params::new();
                    patch.set_number(name, v);
                    on_change.update(&id, patch);
                }
            });
        }
    }

    /// Remove every subscription and timer belonging to the node.
    pub fn detach(&self) -> usize {
        let removed = self.router.unsubscribe_all_for_node(&self.id);
        let cancelled = self.timers.cancel_owner(&self.id);
        if removed + cancelled > 0 {
            tracing::debug!(node = %self.id, removed, cancelled, "unit detached");
        }
        removed
    }
}

impl fmt::Debug for NodeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeScope").field(&self.id).finish()
    }
}

/// Release a primitive if there is one and an engine to release it from.
pub(crate) fn release(engine: Option<&mut AudioEngine>, primitive: Option<PrimitiveId>) {
    if let (Some(engine), Some(id)) = (engine, primitive) {
        if let Err(e) = engine.release(id) {
            tracing::debug!(?id, error = %e, "primitive already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::catalog::shape_of;

    #[test]
    fn shapes_declare_ports() {
        let switch = shape_of("switch").unwrap();
        assert!(switch.has_port("output-3"));
        assert!(switch.has_port("reset"));
        assert!(!switch.has_port("output-x"));
        assert!(!switch.has_port("frequency"));

        let osc = shape_of("oscillator").unwrap();
        assert!(osc.has_port("frequency"));
        assert!(osc.has_port(AUDIO_OUTPUT));
        assert!(osc.is_audio_capable());
        assert!(!shape_of("clock").unwrap().is_audio_capable());
        assert!(shape_of("bus").unwrap().pass_through);
    }

    #[test]
    fn scope_routes_and_detaches() {
        let router = EventRouter::new();
        let scope = NodeScope::new(NodeId::new("n").unwrap(), router.clone(), Timers::new(), OnChange::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = router.subscribe("n.routed.sendNodeOn", move |e| s.borrow_mut().push(e.channel));

        scope.emit_routed(2, true, Payload::Bang);
        scope.on("input", Verb::ReceiveNodeOn, |_| {});
        scope.timers().schedule_in(10.0, Some(scope.id()), |_| {});

        assert_eq!(*seen.borrow(), vec![Some(2)]);
        assert_eq!(scope.detach(), 2);
        assert_eq!(scope.timers().pending(), 0);
        assert_eq!(scope.detach(), 0);
    }

    #[test]
    fn exposed_params_queue_updates() {
        let on_change = OnChange::new();
        let router = EventRouter::new();
        let id = NodeId::new("osc").unwrap();
        let scope = NodeScope::new(id.clone(), router.clone(), Timers::new(), on_change.clone());
        scope.expose_params(&["frequency"]);

        router.publish("osc.frequency.receiveNodeOn", &Event::value(220.0));
        router.publish("osc.frequency.receiveNodeOn", &Event::bang());

        let mut patch = Params::new();
        patch.set_number("frequency", 220.0);
        assert_eq!(on_change.drain(), vec![Deferred::Update { node: id, patch }]);
    }
}
