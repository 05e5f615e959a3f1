//! The graph orchestrator: turns graph descriptions into live units, audio
//! connections and event forwarding.
//!
//! Edges land on one of two planes. An edge into a node's audio input from an
//! audio-capable source becomes a connection in the [`AudioEngine`]; every
//! other edge becomes a forwarding subscription on the [`EventRouter`], from
//! `{src}.{port}.sendNodeOn/Off` to `{dst}.{port}.receiveNodeOn/Off`.
//!
//! # Example
//!
//! ```
//! use klangnetz::{GraphDescription, Orchestrator, OrchestratorConfig};
//!
//! let (mut graph, _output) = Orchestrator::offline(OrchestratorConfig::default());
//! let description = GraphDescription::from_json(r#"{
//!     "nodes": [
//!         { "id": "osc", "kind": "oscillator", "parameters": { "frequency": 220 } },
//!         { "id": "out", "kind": "output" }
//!     ],
//!     "edges": [
//!         { "id": "e1", "sourceNodeId": "osc", "sourcePort": "output",
//!           "targetNodeId": "out", "targetPort": "main-input" }
//!     ]
//! }"#).unwrap();
//!
//! graph.load(description).unwrap();
//! graph.process().unwrap();
//! assert_eq!(graph.connections().len(), 1);
//! ```

use alloc::collections::BTreeMap;

use delegate::delegate;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use rtrb::Consumer;

use crate::config::{OrchestratorConfig, ReconcileMode};
use crate::description::{EdgeDescriptor, EdgeId, GraphDescription, NodeDescriptor, NodeId};
use crate::engine::AudioEngine;
use crate::error::GraphError;
use crate::node::PrimitiveId;
use crate::params::Params;
use crate::router::{
    Event, EventRouter, Origin, Payload, Subscription, Topic, Verb, GRAPH_STARTED, GRAPH_STOPPED, NODE_CHANNEL,
    ROUTED_PORT,
};
use crate::timers::Timers;
use crate::unit::catalog::{self, report_failure};
use crate::unit::{shape_of, BufferStore, Deferred, OnChange, Shape, Unit, UnitContext, AUDIO_OUTPUT};

/// Rounds of deferred work handled per drain. Units that keep asking for
/// more after this are cut off until the next drain.
const MAX_DRAIN_ROUNDS: usize = 16;

/// Which plane an edge was realized on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plane {
    /// A connection between primitives.
    Audio,
    /// A forwarding subscription.
    Control,
}

/// A rejected edge, kept for the editor.
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    /// The edge as it was submitted.
    pub edge: EdgeDescriptor,
    /// Why it was rejected.
    pub reason: String,
}

struct LiveNode {
    descriptor: NodeDescriptor,
    unit: Box<dyn Unit>,
    /// The `{id}.node.updateParams` listener.
    updates: Subscription,
}

impl LiveNode {
    fn dispose(mut self, engine: &mut AudioEngine) {
        self.unit.dispose(Some(engine));
        self.updates.unsubscribe();
    }
}

struct LiveEdge {
    descriptor: EdgeDescriptor,
    plane: Plane,
    forwards: Vec<Subscription>,
}

type ChangeCallback = Box<dyn FnMut(&NodeId, &Params)>;
type NoticeCallback = Box<dyn FnMut(&Notice)>;

/// Owns the engine, the router and every live unit.
pub struct Orchestrator {
    engine: AudioEngine,
    config: OrchestratorConfig,
    router: EventRouter,
    timers: Timers,
    deferred: OnChange,
    buffers: BufferStore,

    nodes: HashMap<NodeId, LiveNode>,
    edges: HashMap<EdgeId, LiveEdge>,
    notices: Vec<Notice>,

    on_change: Option<ChangeCallback>,
    on_notice: Option<NoticeCallback>,
    stopped: Option<String>,
}

impl Orchestrator {
    /// Orchestrate over `engine`. The engine's rate and channel count win over
    /// the ones in `config`.
    pub fn new(engine: AudioEngine, mut config: OrchestratorConfig) -> Self {
        config.sample_rate = engine.sample_rate();
        config.channels = engine.channels();
        let engine = engine
            .with_queue_size(config.queue_size)
            .with_max_primitives(config.max_primitives);

        Self {
            engine,
            router: EventRouter::with_max_depth(config.max_dispatch_depth),
            config,
            timers: Timers::new(),
            deferred: OnChange::new(),
            buffers: BufferStore::new(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            notices: Vec::new(),
            on_change: None,
            on_notice: None,
            stopped: None,
        }
    }

    /// Orchestrate over an engine rendering into a ring buffer, one second
    /// deep. Returns the consumer end (interleaved frames).
    pub fn offline(config: OrchestratorConfig) -> (Self, Consumer<f32>) {
        let capacity = config.sample_rate as usize * config.channels.max(1);
        let (engine, output) = AudioEngine::offline(config.sample_rate, config.channels, capacity);
        (Self::new(engine, config), output)
    }

    /// Orchestrate over the default output device, with capture from the
    /// default input device.
    #[cfg(feature = "cpal_sink")]
    pub fn with_default_output(config: OrchestratorConfig) -> Result<Self, crate::error::EngineError> {
        let engine = AudioEngine::default_output()?.with_capture(crate::device::CpalCapture::default());
        Ok(Self::new(engine, config))
    }

    /// Called with the node's full parameters whenever a unit changes its own
    /// parameters (a macro turned by an event, a clock started by a trigger).
    pub fn on_change(mut self, callback: impl FnMut(&NodeId, &Params) + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    /// Called for every rejected edge.
    pub fn on_notice(mut self, callback: impl FnMut(&Notice) + 'static) -> Self {
        self.on_notice = Some(Box::new(callback));
        self
    }

    /// Share a buffer with sample players under `name`.
    pub fn with_buffer(self, name: impl Into<String>, buffer: crate::nodes::AudioBuffer) -> Self {
        self.buffers.insert(name, buffer);
        self
    }

    delegate! {
        to self.engine {
            pub fn sample_rate(&self) -> u32;
            pub fn channels(&self) -> usize;
            pub fn blocks_processed(&self) -> u64;
        }
    }

    #[inline]
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    #[inline]
    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    #[inline]
    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    #[inline]
    pub fn buffers(&self) -> &BufferStore {
        &self.buffers
    }

    #[inline]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Rejected edges, oldest first.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Forget the recorded notices.
    pub fn clear_notices(&mut self) {
        self.notices.clear();
    }

    /// Node ids, sorted.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().sorted().collect()
    }

    /// The current parameters of a node.
    pub fn params(&self, node: &NodeId) -> Option<&Params> {
        self.nodes.get(node).map(|n| &n.descriptor.parameters)
    }

    /// The primitive a node owns, if it has one right now.
    pub fn primitive_of(&self, node: &NodeId) -> Option<PrimitiveId> {
        self.nodes.get(node)?.unit.primitive()
    }

    /// The live graph as a description.
    pub fn description(&self) -> GraphDescription {
        GraphDescription {
            nodes: self
                .nodes
                .values()
                .map(|n| n.descriptor.clone())
                .sorted_by(|a, b| a.id.cmp(&b.id))
                .collect(),
            edges: self
                .edges
                .values()
                .map(|e| e.descriptor.clone())
                .sorted_by(|a, b| a.id.cmp(&b.id))
                .collect(),
        }
    }

    /// Audio-plane edges, sorted by id.
    pub fn connections(&self) -> Vec<EdgeDescriptor> {
        self.edges
            .values()
            .filter(|e| e.plane == Plane::Audio)
            .map(|e| e.descriptor.clone())
            .sorted_by(|a, b| a.id.cmp(&b.id))
            .collect()
    }

    /// The plane `edge` was realized on.
    pub fn plane_of(&self, edge: &EdgeId) -> Option<Plane> {
        self.edges.get(edge).map(|e| e.plane)
    }

    /// The reason the graph stopped, if it did.
    pub fn stopped(&self) -> Option<&str> {
        self.stopped.as_deref()
    }

    fn ensure_running(&self) -> Result<(), GraphError> {
        match &self.stopped {
            Some(reason) => Err(GraphError::Stopped(reason.clone())),
            None => Ok(()),
        }
    }

    // Whole-graph operations

    /// Replace the live graph with `description`, building every unit anew.
    ///
    /// Nodes are validated first; nothing changes if one is invalid. Edges
    /// that cannot be realized are skipped and recorded as notices.
    pub fn load(&mut self, description: GraphDescription) -> Result<(), GraphError> {
        self.ensure_running()?;
        validate_nodes(&description.nodes)?;

        self.teardown();
        let removed = self.router.clear_scoped();
        self.timers.clear();
        tracing::info!(
            nodes = description.nodes.len(),
            edges = description.edges.len(),
            removed,
            "loading graph"
        );

        for node in description.nodes {
            self.build_node(node)?;
        }
        for edge in description.edges {
            if let Err(e) = self.insert_edge(edge.clone()) {
                self.notice(edge, &e);
            }
        }
        self.settle();
        self.router.publish(GRAPH_STARTED, &Event::bang());
        Ok(())
    }

    /// Move the live graph to `next` using the configured strategy.
    pub fn apply(&mut self, next: GraphDescription) -> Result<(), GraphError> {
        match self.config.reconcile {
            ReconcileMode::Rebuild => self.load(next),
            ReconcileMode::Diff => self.reconcile(next),
        }
    }

    /// Diff reconciliation. Units of nodes whose kind and parameters are
    /// unchanged are left alone, state and primitive included.
    fn reconcile(&mut self, next: GraphDescription) -> Result<(), GraphError> {
        self.ensure_running()?;
        validate_nodes(&next.nodes)?;

        let doomed: Vec<NodeId> = {
            let wanted: HashMap<&NodeId, &NodeDescriptor> = next.nodes.iter().map(|n| (&n.id, n)).collect();
            self.nodes
                .iter()
                .filter(|(id, live)| wanted.get(id).map_or(true, |n| n.kind != live.descriptor.kind))
                .map(|(id, _)| id.clone())
                .sorted()
                .collect()
        };
        for id in &doomed {
            self.teardown_node(id);
        }

        let stale: Vec<EdgeId> = {
            let wanted_edges: HashMap<&EdgeId, &EdgeDescriptor> = next.edges.iter().map(|e| (&e.id, e)).collect();
            self.edges
                .iter()
                .filter(|(id, live)| wanted_edges.get(id) != Some(&&live.descriptor))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &stale {
            self.drop_edge(id);
        }

        let mut built = 0;
        let mut rendered = 0;
        for node in next.nodes {
            match self.nodes.get_mut(&node.id) {
                Some(live) if live.descriptor.parameters != node.parameters => {
                    live.descriptor.parameters = node.parameters;
                    render(&mut self.engine, &self.router, live);
                    rendered += 1;
                }
                Some(_) => {}
                None => {
                    self.build_node(node)?;
                    built += 1;
                }
            }
        }
        for edge in next.edges {
            if self.edges.contains_key(&edge.id) {
                continue;
            }
            if let Err(e) = self.insert_edge(edge.clone()) {
                self.notice(edge, &e);
            }
        }
        self.settle();
        tracing::info!(removed = doomed.len(), built, rendered, unwired = stale.len(), "graph reconciled");
        Ok(())
    }

    /// Dispose everything and announce `graphStopped` with `reason`.
    ///
    /// Mutations fail with [`GraphError::Stopped`] until
    /// [`reinitialize`](Self::reinitialize).
    pub fn stop(&mut self, reason: &str) {
        if self.stopped.is_some() {
            return;
        }
        tracing::error!(reason, "graph stopped");
        self.teardown();
        self.router.clear_scoped();
        self.timers.clear();
        self.stopped = Some(reason.to_owned());
        self.router
            .publish(GRAPH_STOPPED, &Event::new(Payload::Status(reason.to_owned())));
    }

    /// Leave the stopped state with an empty graph.
    pub fn reinitialize(&mut self) {
        if let Some(reason) = self.stopped.take() {
            tracing::info!(%reason, "graph reinitialized");
        }
        self.notices.clear();
        self.deferred.drain();
    }

    // Single-node operations

    /// Add and render one node.
    pub fn add_node(&mut self, node: NodeDescriptor) -> Result<(), GraphError> {
        self.ensure_running()?;
        validate_node(&node)?;
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.build_node(node)?;
        self.settle();
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<(), GraphError> {
        self.ensure_running()?;
        if !self.teardown_node(id) {
            return Err(GraphError::UnknownNode(id.clone()));
        }
        self.settle();
        Ok(())
    }

    /// Merge `patch` into a node's parameters and render it.
    pub fn update_params(&mut self, id: &NodeId, patch: Params) -> Result<(), GraphError> {
        self.ensure_running()?;
        let live = self.nodes.get_mut(id).ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
        live.descriptor.parameters.extend(patch);
        render(&mut self.engine, &self.router, live);
        self.settle();
        Ok(())
    }

    /// Add an edge, returning the plane it was realized on.
    ///
    /// An edge into an audio input from a node that produces no audio is also
    /// recorded as a [`Notice`].
    pub fn add_edge(&mut self, edge: EdgeDescriptor) -> Result<Plane, GraphError> {
        self.ensure_running()?;
        match self.insert_edge(edge.clone()) {
            Ok(plane) => {
                self.settle();
                Ok(plane)
            }
            Err(e) => {
                if matches!(e, GraphError::InvalidAudioEdge { .. }) {
                    self.notice(edge, &e);
                }
                Err(e)
            }
        }
    }

    /// Remove an edge.
    pub fn remove_edge(&mut self, id: &EdgeId) -> Result<(), GraphError> {
        self.ensure_running()?;
        if !self.drop_edge(id) {
            return Err(GraphError::UnknownEdge(id.clone()));
        }
        self.settle();
        Ok(())
    }

    // Time

    /// Fire every timer due at or before `now_ms`, then apply whatever the
    /// fired callbacks queued. Returns the number of timers fired.
    pub fn advance(&mut self, now_ms: f64) -> usize {
        if self.stopped.is_some() {
            return 0;
        }
        let fired = self.timers.advance(now_ms);
        self.settle();
        fired
    }

    /// Render one block, then pump every unit and apply queued work.
    ///
    /// A fault reported by the output stream stops the graph.
    pub fn process(&mut self) -> Result<(), GraphError> {
        self.ensure_running()?;
        if let Some(fault) = self.engine.fault() {
            let reason = fault.to_string();
            self.stop(&reason);
            return Err(GraphError::Stopped(reason));
        }
        self.engine.process();
        self.pump();
        self.settle();
        Ok(())
    }

    /// Move data from the audio side to the router.
    pub fn pump(&mut self) {
        for live in self.nodes.values_mut() {
            live.unit.pump();
        }
    }

    /// Apply work queued by events published from outside (for example
    /// through [`router`](Self::router)).
    pub fn flush(&mut self) {
        if self.stopped.is_none() {
            self.settle();
        }
    }

    // Internals

    fn build_node(&mut self, descriptor: NodeDescriptor) -> Result<(), GraphError> {
        let unit = catalog::build(UnitContext {
            engine: Some(&mut self.engine),
            router: &self.router,
            timers: &self.timers,
            node: &descriptor,
            on_change: &self.deferred,
            buffers: &self.buffers,
        })?;

        // Parameter bags pushed from outside the editor
        let (id, deferred) = (descriptor.id.clone(), self.deferred.clone());
        let updates = self.router.subscribe(Topic::node(&id, NODE_CHANNEL, Verb::UpdateParams), move |e| {
            if let Payload::Params(patch) = &e.payload {
                deferred.update(&id, patch.clone());
            }
        });

        self.nodes.insert(descriptor.id.clone(), LiveNode { descriptor, unit, updates });
        Ok(())
    }

    fn teardown(&mut self) {
        for (_, live) in self.nodes.drain() {
            live.dispose(&mut self.engine);
        }
        for (_, live) in self.edges.drain() {
            for sub in live.forwards {
                sub.unsubscribe();
            }
        }
        self.deferred.drain();
    }

    /// Dispose a node's unit and drop its edges. False if there was no such node.
    fn teardown_node(&mut self, id: &NodeId) -> bool {
        let Some(live) = self.nodes.remove(id) else {
            return false;
        };
        live.dispose(&mut self.engine);
        let touching: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| e.descriptor.touches(id))
            .map(|e| e.descriptor.id.clone())
            .collect();
        for edge in &touching {
            self.drop_edge(edge);
        }
        tracing::debug!(node = %id, edges = touching.len(), "node removed");
        true
    }

    fn drop_edge(&mut self, id: &EdgeId) -> bool {
        let Some(live) = self.edges.remove(id) else {
            return false;
        };
        for sub in live.forwards {
            sub.unsubscribe();
        }
        tracing::debug!(edge = %id, plane = ?live.plane, "edge removed");
        true
    }

    fn shape(&self, node: &NodeId) -> Result<&'static Shape, GraphError> {
        self.nodes
            .get(node)
            .map(|n| n.unit.shape())
            .ok_or_else(|| GraphError::UnknownNode(node.clone()))
    }

    /// Decide the plane of `edge`, or why it cannot exist.
    fn classify(&self, edge: &EdgeDescriptor) -> Result<Plane, GraphError> {
        let source = self.shape(&edge.source_node_id)?;
        let target = self.shape(&edge.target_node_id)?;
        for (node, shape, port) in [
            (&edge.source_node_id, source, &edge.source_port),
            (&edge.target_node_id, target, &edge.target_port),
        ] {
            if !shape.has_port(port) {
                return Err(GraphError::UnknownPort {
                    node: node.clone(),
                    kind: shape.kind,
                    port: port.clone(),
                });
            }
        }
        if !target.is_audio_input(&edge.target_port) {
            return Ok(Plane::Control);
        }
        if source.is_audio_capable() && edge.source_port == AUDIO_OUTPUT {
            Ok(Plane::Audio)
        } else {
            Err(GraphError::InvalidAudioEdge {
                source_node: edge.source_node_id.clone(),
                source_kind: source.kind,
                target: edge.target_node_id.clone(),
                port: edge.target_port.clone(),
            })
        }
    }

    /// Validate and realize one edge. Nothing changes on error.
    fn insert_edge(&mut self, edge: EdgeDescriptor) -> Result<Plane, GraphError> {
        if self.edges.contains_key(&edge.id) {
            return Err(GraphError::DuplicateEdge(edge.id));
        }
        let plane = self.classify(&edge)?;
        let forwards = match plane {
            Plane::Audio => Vec::new(),
            Plane::Control => self.forward(&edge)?,
        };
        tracing::debug!(
            edge = %edge.id,
            from = %edge.source_node_id,
            to = %edge.target_node_id,
            ?plane,
            "edge added"
        );
        self.edges.insert(edge.id.clone(), LiveEdge { descriptor: edge, plane, forwards });
        Ok(plane)
    }

    /// Subscriptions carrying both gate edges of a control edge.
    ///
    /// Owned by the target, and on a topic in the source's namespace, so
    /// disposing either endpoint removes them.
    fn forward(&self, edge: &EdgeDescriptor) -> Result<Vec<Subscription>, GraphError> {
        let source = self.shape(&edge.source_node_id)?;
        let (port, channel) = match source.routed_index(&edge.source_port) {
            Some(i) => (ROUTED_PORT, Some(i)),
            None => (edge.source_port.as_str(), None),
        };
        let origin = Origin {
            node: edge.source_node_id.clone(),
            port: edge.source_port.clone(),
        };

        let forwards = [true, false]
            .into_iter()
            .map(|on| {
                let router = self.router.clone();
                let origin = origin.clone();
                let target = Topic::node(&edge.target_node_id, &edge.target_port, Verb::receive(on));
                self.router.subscribe_owned(
                    Topic::node(&edge.source_node_id, port, Verb::send(on)),
                    &edge.target_node_id,
                    move |e| {
                        if channel.is_some() && e.channel != channel {
                            return;
                        }
                        let forwarded = Event {
                            origin: Some(origin.clone()),
                            channel: None,
                            payload: e.payload.clone(),
                        };
                        router.publish(&target, &forwarded);
                    },
                )
            })
            .collect();
        Ok(forwards)
    }

    fn notice(&mut self, edge: EdgeDescriptor, error: &GraphError) {
        tracing::warn!(edge = %edge.id, %error, "edge rejected");
        let notice = Notice {
            edge,
            reason: error.to_string(),
        };
        if let Some(callback) = self.on_notice.as_mut() {
            callback(&notice);
        }
        self.notices.push(notice);
    }

    /// Apply deferred work, then bring primitive connections in line with
    /// the audio edges.
    fn settle(&mut self) {
        self.drain();
        self.sync_audio();
    }

    fn drain(&mut self) {
        for _ in 0..MAX_DRAIN_ROUNDS {
            let work = self.deferred.drain();
            if work.is_empty() {
                return;
            }
            // Updates to the same node within one round collapse into one render
            let mut touched: BTreeMap<NodeId, bool> = BTreeMap::new();
            for item in work {
                match item {
                    Deferred::Update { node, patch } => {
                        if let Some(live) = self.nodes.get_mut(&node) {
                            live.descriptor.parameters.extend(patch);
                            touched.insert(node, true);
                        }
                    }
                    Deferred::Render(node) => {
                        touched.entry(node).or_insert(false);
                    }
                }
            }
            for (node, updated) in touched {
                let Some(live) = self.nodes.get_mut(&node) else {
                    continue;
                };
                render(&mut self.engine, &self.router, live);
                if updated {
                    if let Some(callback) = self.on_change.as_mut() {
                        callback(&node, &live.descriptor.parameters);
                    }
                }
            }
        }
        if !self.deferred.is_empty() {
            tracing::warn!(rounds = MAX_DRAIN_ROUNDS, "deferred work still queued, continuing next drain");
        }
    }

    fn sync_audio(&mut self) {
        let destination = self.engine.destination();
        let mut desired: HashSet<(PrimitiveId, PrimitiveId)> = HashSet::new();
        for edge in self.edges.values().filter(|e| e.plane == Plane::Audio) {
            let from = self.nodes.get(&edge.descriptor.source_node_id).and_then(|n| n.unit.primitive());
            let to = self.nodes.get(&edge.descriptor.target_node_id).and_then(|n| n.unit.primitive());
            if let (Some(from), Some(to)) = (from, to) {
                desired.insert((from, to));
            }
        }
        for live in self.nodes.values() {
            let shape = live.unit.shape();
            let Some(primitive) = live.unit.primitive() else {
                continue;
            };
            if shape.to_destination {
                desired.insert((primitive, destination));
            }
            if shape.keep_alive {
                if let Err(e) = self.engine.keep_alive(primitive) {
                    tracing::warn!(node = %live.descriptor.id, error = %e, "keep-alive failed");
                }
            }
        }

        // Every non-internal connection in the engine is ours. Freed ids get
        // reused, so compare against what the engine has, not what we made.
        let actual: HashSet<(PrimitiveId, PrimitiveId)> = self.engine.connections().into_iter().collect();
        for &(from, to) in actual.difference(&desired) {
            if let Err(e) = self.engine.disconnect(from, to) {
                tracing::debug!(?from, ?to, error = %e, "disconnect skipped");
            }
        }
        for &(from, to) in desired.difference(&actual) {
            if let Err(e) = self.engine.connect(from, to) {
                tracing::warn!(?from, ?to, error = %e, "connect failed");
            }
        }
    }
}

impl core::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("engine", &self.engine)
            .field("stopped", &self.stopped)
            .finish()
    }
}

/// Render `live` with its current parameters, reporting a failure on the
/// node's status channel.
fn render(engine: &mut AudioEngine, router: &EventRouter, live: &mut LiveNode) {
    if let Err(e) = live.unit.render(Some(engine), &live.descriptor.parameters) {
        report_failure(router, &live.descriptor.id, &e);
    }
}

fn validate_node(node: &NodeDescriptor) -> Result<(), GraphError> {
    match shape_of(&node.kind) {
        Some(_) => Ok(()),
        None => Err(GraphError::UnknownKind(node.kind.clone())),
    }
}

fn validate_nodes(nodes: &[NodeDescriptor]) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    for node in nodes {
        validate_node(node)?;
        if !seen.insert(&node.id) {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
    }
    Ok(())
}
