//! The real-time audio platform the orchestrator drives.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use rtrb::{Consumer, RingBuffer};

use crate::error::{EngineError, PermissionError, UnitError};
use crate::graph::AudioGraph;
use crate::node::{AudioNode, PrimitiveId};
use crate::nodes::sink::Terminal;
use crate::nodes::{CaptureSource, Mixer, RtrbSink};

#[cfg(feature = "cpal_sink")]
use crate::device::CpalDevice;
#[cfg(feature = "cpal_sink")]
use crate::nodes::StreamFault;

/// Default number of slots in each primitive's message queue.
pub const DEFAULT_QUEUE_SIZE: usize = 64;
/// Default primitive budget.
pub const DEFAULT_MAX_PRIMITIVES: usize = 1024;

/// A handle for sending messages to a primitive.
///
/// Returned by [`AudioEngine::add`] and [`AudioEngine::replace`]. The handle
/// is the only way to reach the primitive's parameters once it is in the
/// graph; whoever holds it owns the primitive.
///
/// # Message Delivery
///
/// Messages are buffered in a lock-free ring buffer and processed at the start
/// of each audio block. If the buffer is full, [`Handle::send`] returns `Err(msg)`
/// with the message that couldn't be sent.
pub struct Handle<M: Send + 'static> {
    pub(crate) id: PrimitiveId,
    pub(crate) sender: rtrb::Producer<M>,
}

impl<M: Send + 'static> Handle<M> {
    /// Send a message to the primitive.
    ///
    /// The message will be processed at the start of the next audio block.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the message was queued successfully
    /// - `Err(msg)` if the queue is full (message dropped)
    pub fn send(&mut self, msg: M) -> Result<(), M> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }

    /// The primitive this handle talks to.
    #[inline]
    pub fn id(&self) -> PrimitiveId {
        self.id
    }
}

impl<M: Send + 'static> fmt::Debug for Handle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.id).finish()
    }
}

/// Access to hardware capture devices.
///
/// Opening may be refused; callers treat that as a permission failure and
/// retry only when asked to.
pub trait CaptureProvider {
    /// Open a mono capture stream delivering samples at `sample_rate`.
    fn open(&mut self, sample_rate: u32) -> Result<Consumer<f32>, PermissionError>;
}

/// The audio engine - owns primitives, connections and the destination.
///
/// Every block is rendered by processing the graph up to an internal root
/// node. The destination (a mixer) feeds the output sink, which feeds the
/// root; taps that must run without feeding the destination are connected to
/// the root with [`keep_alive`](Self::keep_alive).
///
/// ```
/// use klangnetz::AudioEngine;
/// use klangnetz::nodes::{Oscillator, Waveform};
///
/// let (mut engine, mut output) = AudioEngine::offline(48_000, 1, 4096);
/// let osc = engine.add(Oscillator::new(Waveform::Sine, 440.0)).unwrap();
/// engine.connect(osc.id(), engine.destination()).unwrap();
///
/// engine.process();
/// assert_eq!(output.slots(), 64);
/// ```
pub struct AudioEngine {
    graph: AudioGraph,
    sample_rate: u32,
    channels: usize,
    queue_size: usize,
    max_primitives: usize,

    root: PrimitiveId,
    destination: PrimitiveId,
    sink: Option<PrimitiveId>,

    capture: Option<Box<dyn CaptureProvider>>,
    #[cfg(feature = "cpal_sink")]
    fault: Option<StreamFault>,

    blocks_processed: u64,
}

impl AudioEngine {
    /// Create an engine with no output sink.
    ///
    /// The destination is still rendered every block; use
    /// [`with_output`](Self::with_output) to send it somewhere.
    pub fn new(sample_rate: u32) -> Self {
        let mut graph = AudioGraph::new(sample_rate);
        let root = graph.add(Terminal, 1).id;
        let destination = graph.add(Mixer::stereo(), 1).id;
        // Both ids were just created
        let _ = graph.connect(destination, root);
        let _ = graph.set_terminal(root);

        Self {
            graph,
            sample_rate,
            channels: 2,
            queue_size: DEFAULT_QUEUE_SIZE,
            max_primitives: DEFAULT_MAX_PRIMITIVES,
            root,
            destination,
            sink: None,
            capture: None,
            #[cfg(feature = "cpal_sink")]
            fault: None,
            blocks_processed: 0,
        }
    }

    /// Create an engine that renders into a ring buffer of `capacity` samples.
    ///
    /// Returns the consumer end, which receives interleaved frames.
    pub fn offline(sample_rate: u32, channels: usize, capacity: usize) -> (Self, Consumer<f32>) {
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        let engine = Self::new(sample_rate)
            .with_channels(channels)
            .with_output(RtrbSink::new(producer, channels));
        (engine, consumer)
    }

    /// Create an engine playing through the system's default output device.
    #[cfg(feature = "cpal_sink")]
    pub fn default_output() -> Result<Self, EngineError> {
        let device = CpalDevice::default_output().ok_or(EngineError::NoOutputDevice)?;
        let sink = device.create_sink();
        let fault = sink.fault();

        let mut engine = Self::new(device.sample_rate())
            .with_channels(device.channels() as usize)
            .with_output(sink);
        engine.fault = Some(fault);
        Ok(engine)
    }

    /// Set the number of destination channels (builder pattern).
    ///
    /// Default is 2 (stereo).
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        // The destination always exists, replacing it keeps its connections
        let _ = self.graph.replace(self.destination, Mixer::new(self.channels), 1);
        self
    }

    /// Route the destination into `sink` (builder pattern).
    pub fn with_output<S: AudioNode<Message = ()>>(mut self, sink: S) -> Self {
        if let Some(old) = self.sink.take() {
            let _ = self.graph.remove(old);
        }
        let sink = self.graph.add(sink, 1).id;
        let _ = self.graph.disconnect(self.destination, self.root);
        let _ = self.graph.connect(self.destination, sink);
        let _ = self.graph.connect(sink, self.root);
        self.sink = Some(sink);
        self
    }

    /// Message queue length for primitives added from now on.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size.max(1);
        self
    }

    /// Refuse to hold more than `max` primitives.
    pub fn with_max_primitives(mut self, max: usize) -> Self {
        self.max_primitives = max;
        self
    }

    /// Use `provider` for [`capture`](Self::capture).
    pub fn with_capture(mut self, provider: impl CaptureProvider + 'static) -> Self {
        self.capture = Some(Box::new(provider));
        self
    }

    /// Get the sample rate in Hz.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the destination channel count.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Blocks rendered so far.
    #[inline]
    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    /// The configured primitive budget.
    #[inline]
    pub fn max_primitives(&self) -> usize {
        self.max_primitives
    }

    /// Primitives added through [`add`](Self::add) and not yet released.
    pub fn primitive_count(&self) -> usize {
        self.graph.len() - self.internal().count()
    }

    /// True if `id` refers to a live primitive.
    pub fn contains(&self, id: PrimitiveId) -> bool {
        self.graph.contains(id)
    }

    fn internal(&self) -> impl Iterator<Item = PrimitiveId> + '_ {
        [self.root, self.destination].into_iter().chain(self.sink)
    }

    fn owned(&self, id: PrimitiveId) -> Result<(), EngineError> {
        if self.internal().any(|i| i == id) || !self.graph.contains(id) {
            return Err(EngineError::UnknownPrimitive(id));
        }
        Ok(())
    }

    /// Add a primitive.
    ///
    /// Fails with [`EngineError::Exhausted`] once the budget is used up.
    pub fn add<N: AudioNode>(&mut self, node: N) -> Result<Handle<N::Message>, EngineError> {
        if self.primitive_count() >= self.max_primitives {
            return Err(EngineError::Exhausted { limit: self.max_primitives });
        }
        let handle = self.graph.add(node, self.queue_size);
        tracing::trace!(id = ?handle.id, "primitive added");
        Ok(Handle {
            id: handle.id,
            sender: handle.sender,
        })
    }

    /// Connect `from`'s output to `to`'s input. Returns `false` if the
    /// connection already existed.
    pub fn connect(&mut self, from: PrimitiveId, to: PrimitiveId) -> Result<bool, EngineError> {
        self.graph.connect(from, to)
    }

    /// Remove a connection. Returns `false` if there was none.
    pub fn disconnect(&mut self, from: PrimitiveId, to: PrimitiveId) -> Result<bool, EngineError> {
        self.graph.disconnect(from, to)
    }

    /// Remove a primitive together with all its connections.
    pub fn release(&mut self, id: PrimitiveId) -> Result<(), EngineError> {
        self.owned(id)?;
        self.graph.remove(id)?;
        tracing::trace!(?id, "primitive released");
        Ok(())
    }

    /// Hot-swap the primitive behind `id`.
    ///
    /// In one step, before the next block: the old primitive is disconnected,
    /// `node` takes its place on exactly the same connections, and the old
    /// primitive is dropped. The id stays the same; the old handle goes dead
    /// and the returned one replaces it.
    pub fn replace<N: AudioNode>(&mut self, id: PrimitiveId, node: N) -> Result<Handle<N::Message>, EngineError> {
        self.owned(id)?;
        let handle = self.graph.replace(id, node, self.queue_size)?;
        tracing::debug!(?id, "primitive replaced");
        Ok(Handle {
            id: handle.id,
            sender: handle.sender,
        })
    }

    /// The mixer everything audible connects to.
    #[inline]
    pub fn destination(&self) -> PrimitiveId {
        self.destination
    }

    /// Render `id` every block even if nothing downstream consumes it.
    pub fn keep_alive(&mut self, id: PrimitiveId) -> Result<(), EngineError> {
        self.owned(id)?;
        self.graph.connect(id, self.root).map(|_| ())
    }

    /// Every connection between primitives, sorted. Wiring internal to the
    /// engine (destination to sink, anything into the root) is left out.
    pub fn connections(&self) -> Vec<(PrimitiveId, PrimitiveId)> {
        let sink = self.sink;
        self.graph
            .connections()
            .into_iter()
            .filter(|&(_, to)| to != self.root && Some(to) != sink)
            .collect()
    }

    /// Open a capture stream and wrap it in a source primitive.
    ///
    /// The message type of the returned handle is the input gain.
    pub fn capture(&mut self) -> Result<Handle<f32>, UnitError> {
        let sample_rate = self.sample_rate;
        let provider = self.capture.as_mut().ok_or(PermissionError::NoDevice)?;
        let consumer = provider.open(sample_rate)?;
        Ok(self.add(CaptureSource::new(consumer))?)
    }

    /// A fatal stream failure, if the output device reported one.
    pub fn fault(&self) -> Option<EngineError> {
        #[cfg(feature = "cpal_sink")]
        if let Some(message) = self.fault.as_ref().and_then(StreamFault::get) {
            return Some(EngineError::Stream(message));
        }
        None
    }

    /// Process one block of audio (64 samples).
    ///
    /// Pending messages are delivered to each primitive at the start of its
    /// block, so everything sent before this call takes effect in it.
    pub fn process(&mut self) {
        self.graph.process();
        self.blocks_processed += 1;
    }
}

impl fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioEngine")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("primitives", &self.primitive_count())
            .field("blocks_processed", &self.blocks_processed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Gain, GainMessage, Oscillator, Waveform};

    struct Refuse;

    impl CaptureProvider for Refuse {
        fn open(&mut self, _: u32) -> Result<Consumer<f32>, PermissionError> {
            Err(PermissionError::Denied)
        }
    }

    #[test]
    fn budget_is_enforced() {
        let mut engine = AudioEngine::new(48_000).with_max_primitives(1);
        engine.add(Gain::new(1.0)).unwrap();
        assert!(matches!(engine.add(Gain::new(1.0)), Err(EngineError::Exhausted { limit: 1 })));
    }

    #[test]
    fn internal_primitives_cannot_be_released() {
        let mut engine = AudioEngine::new(48_000);
        let dest = engine.destination();
        assert!(matches!(engine.release(dest), Err(EngineError::UnknownPrimitive(_))));
        assert_eq!(engine.primitive_count(), 0);
    }

    #[test]
    fn renders_into_offline_sink() {
        let (mut engine, mut out) = AudioEngine::offline(48_000, 2, 1024);
        let osc = engine.add(Oscillator::new(Waveform::Square, 100.0).with_amplitude(0.5)).unwrap();
        let mut gain = engine.add(Gain::new(1.0).without_smoothing()).unwrap();
        engine.connect(osc.id(), gain.id()).unwrap();
        engine.connect(gain.id(), engine.destination()).unwrap();
        gain.send(GainMessage::SetGain(2.0)).unwrap();

        engine.process();
        assert_eq!(out.slots(), 128);
        assert_eq!(out.pop(), Ok(1.0));
        assert_eq!(engine.connections(), vec![(osc.id(), gain.id()), (gain.id(), engine.destination())]);
    }

    #[test]
    fn capture_without_permission_fails() {
        let mut engine = AudioEngine::new(48_000);
        assert!(matches!(engine.capture(), Err(UnitError::Permission(PermissionError::NoDevice))));
        let mut engine = AudioEngine::new(48_000).with_capture(Refuse);
        assert!(matches!(engine.capture(), Err(UnitError::Permission(PermissionError::Denied))));
    }
}
