//! Audio graph - owns primitives and message queues

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData;

use dasp_graph::{Buffer, Input, NodeData, Processor};
use hashbrown::HashMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::Direction;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::EngineError;
use crate::node::{AudioNode, PrimitiveId, ProcessContext};

/// Internal handle to send messages to a primitive in an AudioGraph
pub(crate) struct NodeHandle<M: Send + 'static> {
    pub(crate) id: PrimitiveId,
    pub(crate) sender: Producer<M>,
    pub(crate) _marker: PhantomData<M>,
}

// Type-erased wrapper so we can store heterogeneous nodes
trait ErasedNode: Send {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]);
}

struct NodeWrapper<N: AudioNode> {
    node: N,
    receiver: Consumer<N::Message>,
}

impl<N: AudioNode> ErasedNode for NodeWrapper<N> {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]) {
        // Split borrow to avoid conflict between receiver and node
        let receiver = &mut self.receiver;
        let node = &mut self.node;

        // Create a draining iterator directly from the consumer - no allocation!
        let messages = core::iter::from_fn(|| receiver.pop().ok());
        node.process(ctx, messages, inputs, outputs);
    }
}

// Adapter for dasp_graph
struct DaspAdapter {
    id: PrimitiveId,
    node: Box<dyn ErasedNode>,
    ctx: ProcessContext,
}

impl dasp_graph::Node for DaspAdapter {
    fn process(&mut self, inputs: &[Input], outputs: &mut [Buffer]) {
        self.node.process_erased(&self.ctx, inputs, outputs);
    }
}

// Stable indices: primitives are removed and hot-swapped while others keep theirs.
type InnerGraph = StableGraph<NodeData<DaspAdapter>, ()>;

/// An audio processing graph at a fixed sample rate
pub(crate) struct AudioGraph {
    graph: InnerGraph,
    processor: Processor<InnerGraph>,
    ctx: ProcessContext,

    node_indices: HashMap<PrimitiveId, NodeIndex>,
    next_node_id: u32,

    terminal: Option<NodeIndex>,
}

impl AudioGraph {
    /// Create a new graph with the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            graph: InnerGraph::with_capacity(64, 64),
            processor: Processor::with_capacity(64),
            ctx: ProcessContext {
                sample_rate,
                buffer_size: Buffer::LEN,
            },
            node_indices: HashMap::new(),
            next_node_id: 0,
            terminal: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.ctx.sample_rate
    }

    /// Number of live primitives
    pub fn len(&self) -> usize {
        self.node_indices.len()
    }

    pub fn contains(&self, id: PrimitiveId) -> bool {
        self.node_indices.contains_key(&id)
    }

    fn index(&self, id: PrimitiveId) -> Result<NodeIndex, EngineError> {
        self.node_indices
            .get(&id)
            .copied()
            .ok_or(EngineError::UnknownPrimitive(id))
    }

    fn insert<N: AudioNode>(&mut self, id: PrimitiveId, node: N, queue_size: usize) -> (NodeIndex, Producer<N::Message>) {
        let (producer, consumer) = RingBuffer::new(queue_size.max(1));

        let num_outputs = node.num_outputs();
        let wrapper = NodeWrapper { node, receiver: consumer };
        let adapter = DaspAdapter {
            id,
            node: Box::new(wrapper),
            ctx: self.ctx,
        };

        let node_data = match num_outputs {
            1 => NodeData::new1(adapter),
            2 => NodeData::new2(adapter),
            // 0 outputs = sink, but dasp_graph still needs a buffer for inputs
            0 => NodeData::new1(adapter),
            n => NodeData::new(adapter, vec![Buffer::default(); n]),
        };

        (self.graph.add_node(node_data), producer)
    }

    /// Add a primitive with a message queue of `queue_size` slots
    pub fn add<N: AudioNode>(&mut self, node: N, queue_size: usize) -> NodeHandle<N::Message> {
        let id = PrimitiveId(self.next_node_id);
        self.next_node_id += 1;

        let (idx, sender) = self.insert(id, node, queue_size);
        self.node_indices.insert(id, idx);

        NodeHandle {
            id,
            sender,
            _marker: PhantomData,
        }
    }

    /// Connect output of `from` to input of `to`. Returns `false` if the
    /// connection already existed.
    pub fn connect(&mut self, from: PrimitiveId, to: PrimitiveId) -> Result<bool, EngineError> {
        let from_idx = self.index(from)?;
        let to_idx = self.index(to)?;
        if self.graph.find_edge(from_idx, to_idx).is_some() {
            return Ok(false);
        }
        self.graph.add_edge(from_idx, to_idx, ());
        Ok(true)
    }

    /// Remove the connection from `from` to `to`. Returns `false` if there was none.
    pub fn disconnect(&mut self, from: PrimitiveId, to: PrimitiveId) -> Result<bool, EngineError> {
        let from_idx = self.index(from)?;
        let to_idx = self.index(to)?;
        match self.graph.find_edge(from_idx, to_idx) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a primitive and every connection touching it.
    pub fn remove(&mut self, id: PrimitiveId) -> Result<(), EngineError> {
        let idx = self.index(id)?;
        self.graph.remove_node(idx);
        self.node_indices.remove(&id);
        if self.terminal == Some(idx) {
            self.terminal = None;
        }
        Ok(())
    }

    /// Swap the primitive behind `id` for `node`, keeping every connection.
    ///
    /// The old primitive is disconnected, the new one inserted and wired to
    /// exactly the same neighbours, then the old one is dropped. Nothing is
    /// processed in between, so the swap lands on a block boundary.
    pub fn replace<N: AudioNode>(&mut self, id: PrimitiveId, node: N, queue_size: usize) -> Result<NodeHandle<N::Message>, EngineError> {
        let old = self.index(id)?;

        let self_loop = match self.graph.find_edge(old, old) {
            Some(edge) => self.graph.remove_edge(edge).is_some(),
            None => false,
        };
        let incoming: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(old, Direction::Incoming)
            .filter(|&n| n != old)
            .collect();
        let outgoing: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(old, Direction::Outgoing)
            .filter(|&n| n != old)
            .collect();

        // Disconnect the old primitive
        for &src in &incoming {
            if let Some(edge) = self.graph.find_edge(src, old) {
                self.graph.remove_edge(edge);
            }
        }
        for &dst in &outgoing {
            if let Some(edge) = self.graph.find_edge(old, dst) {
                self.graph.remove_edge(edge);
            }
        }

        // Bring in the new one on the same connections
        let (new, sender) = self.insert(id, node, queue_size);
        for &src in &incoming {
            self.graph.add_edge(src, new, ());
        }
        for &dst in &outgoing {
            self.graph.add_edge(new, dst, ());
        }
        if self_loop {
            self.graph.add_edge(new, new, ());
        }

        self.graph.remove_node(old);
        self.node_indices.insert(id, new);
        if self.terminal == Some(old) {
            self.terminal = Some(new);
        }

        Ok(NodeHandle {
            id,
            sender,
            _marker: PhantomData,
        })
    }

    /// Every connection as `(from, to)`, sorted.
    pub fn connections(&self) -> Vec<(PrimitiveId, PrimitiveId)> {
        let mut out: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].node.id, self.graph[b].node.id))
            .collect();
        out.sort_unstable();
        out
    }

    /// Set which primitive to process to (the engine root)
    pub fn set_terminal(&mut self, id: PrimitiveId) -> Result<(), EngineError> {
        self.terminal = Some(self.index(id)?);
        Ok(())
    }

    /// Process one block of audio through the graph
    pub fn process(&mut self) {
        if let Some(terminal) = self.terminal {
            self.processor.process(&mut self.graph, terminal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Gain, Mixer};

    #[test]
    fn replace_keeps_neighbours_and_id() {
        let mut g = AudioGraph::new(48_000);
        let a = g.add(Gain::new(1.0), 8).id;
        let b = g.add(Gain::new(1.0), 8).id;
        let c = g.add(Mixer::mono(), 8).id;
        g.connect(a, b).unwrap();
        g.connect(b, c).unwrap();
        let before = g.connections();

        let swapped = g.replace(b, Gain::new(0.5), 8).unwrap();
        assert_eq!(swapped.id, b);
        assert_eq!(g.connections(), before);
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn replace_carries_a_self_loop_over() {
        let mut g = AudioGraph::new(48_000);
        let a = g.add(Gain::new(1.0), 8).id;
        let b = g.add(Gain::new(1.0), 8).id;
        let c = g.add(Mixer::mono(), 8).id;
        g.connect(a, b).unwrap();
        g.connect(b, b).unwrap();
        g.connect(b, c).unwrap();
        let before = g.connections();
        assert_eq!(before.len(), 3);

        g.replace(b, Gain::new(0.5), 8).unwrap();
        assert_eq!(g.connections(), before);
    }

    #[test]
    fn duplicate_connections_are_ignored() {
        let mut g = AudioGraph::new(48_000);
        let a = g.add(Gain::new(1.0), 8).id;
        let b = g.add(Mixer::mono(), 8).id;
        assert!(g.connect(a, b).unwrap());
        assert!(!g.connect(a, b).unwrap());
        assert!(g.disconnect(a, b).unwrap());
        assert!(!g.disconnect(a, b).unwrap());
        g.remove(a).unwrap();
        assert!(matches!(g.connect(a, b), Err(EngineError::UnknownPrimitive(_))));
    }
}
