//! Hybrid units: a primitive driven by events, or feeding data back to the
//! router.

use alloc::rc::Rc;
use core::cell::{Cell, RefCell};

use rtrb::{Consumer, RingBuffer};
use serde_json::Value;

use crate::engine::{AudioEngine, Handle};
use crate::error::UnitError;
use crate::node::PrimitiveId;
use crate::nodes::{Analyzer, AudioBuffer, Level, PlayerMessage, Recorder, RecorderMessage, SamplePlayer};
use crate::params::{changed, Params, ParamsExt};
use crate::router::{Event, Payload, Verb};

use super::audio::Shared;
use super::catalog;
use super::{release, BufferStore, NodeScope, Shape, Unit};

/// Samples the recorder ring can hold between two pumps.
const RECORDER_RING: usize = 1 << 15;
const ANALYZER_RING: usize = 64;

fn primitive_of<M: Send + 'static>(handle: &Shared<M>) -> Option<PrimitiveId> {
    handle.borrow().as_ref().map(Handle::id)
}

fn send<M: Send + 'static>(scope: &NodeScope, handle: &Shared<M>, msg: M) {
    if let Some(h) = handle.borrow_mut().as_mut() {
        if h.send(msg).is_err() {
            tracing::warn!(node = %scope.id(), "message queue full, event dropped");
        }
    }
}

/// A region of the player's buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// Start, seconds.
    pub start: f64,
    /// End, seconds.
    pub end: f64,
    /// Detected pitch of the region in Hz, if known.
    pub pitch: Option<f64>,
}

fn parse_segments(value: Option<&Value>) -> Vec<Segment> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let seg = item.as_object()?;
            Some(Segment {
                start: seg.number("start", 0.0).max(0.0),
                end: seg.number("end", f64::MAX),
                pitch: seg.get("pitch").and_then(Value::as_f64).filter(|p| *p > 0.0),
            })
        })
        .collect()
}

struct Playback {
    buffer_name: String,
    buffer: Option<AudioBuffer>,
    segments: Vec<Segment>,
    engine_rate: u32,
}

impl Playback {
    /// Frames and rate for playing `segment` (whole buffer when `None`),
    /// repitched when the event carries a target frequency.
    fn play(&self, segment: Option<&Segment>, payload: &Payload) -> Option<PlayerMessage> {
        let buffer = self.buffer.as_ref()?;
        let (start, end, pitch) = match segment {
            Some(s) => (s.start, s.end, s.pitch),
            None => (0.0, buffer.duration_secs(), None),
        };
        let mut rate = buffer.sample_rate() as f64 / self.engine_rate.max(1) as f64;
        if let (Payload::Note { frequency, .. }, Some(pitch)) = (payload, pitch) {
            rate *= frequency / pitch;
        }
        Some(PlayerMessage::Play {
            start: buffer.frame_at(start),
            end: buffer.frame_at(end),
            rate,
        })
    }
}

/// Plays regions of a named buffer from the [`BufferStore`].
///
/// `segment-{i}` plays segment `i`, `input` plays the whole buffer and
/// `stop` stops. A [`Payload::Note`] repitches a segment whose pitch is known.
pub struct SamplePlayerUnit {
    scope: NodeScope,
    buffers: BufferStore,
    handle: Shared<PlayerMessage>,
    state: Rc<RefCell<Playback>>,
    segment_ports: usize,
    applied: Params,
}

impl SamplePlayerUnit {
    pub fn new(scope: NodeScope, buffers: BufferStore) -> Self {
        let handle: Shared<PlayerMessage> = Rc::default();
        let state = Rc::new(RefCell::new(Playback {
            buffer_name: String::new(),
            buffer: None,
            segments: Vec::new(),
            engine_rate: 48_000,
        }));

        let unit = Self {
            scope,
            buffers,
            handle,
            state,
            segment_ports: 0,
            applied: Params::new(),
        };
        unit.on_play("input", None);
        let (sc, h) = (unit.scope.clone(), unit.handle.clone());
        unit.scope.on("stop", Verb::ReceiveNodeOn, move |_| send(&sc, &h, PlayerMessage::Stop));
        unit
    }

    fn on_play(&self, port: &str, segment: Option<usize>) {
        let (sc, h, st, store) = (self.scope.clone(), self.handle.clone(), self.state.clone(), self.buffers.clone());
        self.scope.on(port, Verb::ReceiveNodeOn, move |e: &Event| {
            let msg = {
                let mut st = st.borrow_mut();
                if st.buffer.is_none() {
                    // Recordings may land in the store after the player was rendered.
                    st.buffer = store.get(&st.buffer_name);
                    if let Some(buffer) = st.buffer.clone() {
                        send(&sc, &h, PlayerMessage::Load(buffer));
                    }
                }
                let seg = match segment {
                    Some(i) => match st.segments.get(i) {
                        Some(seg) => Some(seg.clone()),
                        None => return,
                    },
                    None => None,
                };
                st.play(seg.as_ref(), &e.payload)
            };
            match msg {
                Some(msg) => send(&sc, &h, msg),
                None => tracing::debug!(node = %sc.id(), "nothing to play"),
            }
        });
    }
}

impl Unit for SamplePlayerUnit {
    fn shape(&self) -> &'static Shape {
        &catalog::SAMPLE_PLAYER
    }

    fn primitive(&self) -> Option<PrimitiveId> {
        primitive_of(&self.handle)
    }

    fn render(&mut self, engine: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let name = params.text("buffer", "").to_owned();
        let segments = parse_segments(params.get("segments"));
        for i in self.segment_ports..segments.len() {
            self.on_play(&format!("segment-{i}"), Some(i));
        }
        self.segment_ports = self.segment_ports.max(segments.len());

        let reload = {
            let mut st = self.state.borrow_mut();
            st.segments = segments;
            let reload = st.buffer_name != name || st.buffer.is_none();
            if reload {
                st.buffer = self.buffers.get(&name);
                st.buffer_name = name;
            }
            reload
        };

        if self.handle.borrow().is_none() {
            if let Some(engine) = engine {
                let mut st = self.state.borrow_mut();
                st.engine_rate = engine.sample_rate();
                let player = SamplePlayer::new(st.buffer.clone(), engine.channels());
                *self.handle.borrow_mut() = Some(engine.add(player)?);
            }
        } else if reload {
            if let Some(buffer) = self.state.borrow().buffer.clone() {
                send(&self.scope, &self.handle, PlayerMessage::Load(buffer));
            }
        }
        if changed(&self.applied, params, "volume") {
            send(&self.scope, &self.handle, PlayerMessage::SetVolume(params.number("volume", 1.0) as f32));
        }
        self.applied = params.clone();
        Ok(())
    }

    fn dispose(&mut self, engine: Option<&mut AudioEngine>) {
        self.scope.detach();
        self.segment_ports = 0;
        let primitive = self.handle.borrow_mut().take().map(|h| h.id());
        release(engine, primitive);
    }
}

struct Take {
    consumer: Option<Consumer<f32>>,
    samples: Vec<f32>,
    armed: bool,
    finishing: bool,
}

/// Records what passes through it into the [`BufferStore`], under the
/// node's id.
///
/// Gate-on on `record` starts a take, gate-off ends it. Samples arrive in
/// blocks and are collected during `pump`; the finished take is announced on
/// `{id}.recording.status` with its length in seconds.
pub struct RecorderUnit {
    scope: NodeScope,
    buffers: BufferStore,
    handle: Shared<RecorderMessage>,
    take: Rc<RefCell<Take>>,
    sample_rate: Rc<Cell<u32>>,
}

impl RecorderUnit {
    pub fn new(scope: NodeScope, buffers: BufferStore) -> Self {
        let handle: Shared<RecorderMessage> = Rc::default();
        let take = Rc::new(RefCell::new(Take {
            consumer: None,
            samples: Vec::new(),
            armed: false,
            finishing: false,
        }));

        let (sc, h, t) = (scope.clone(), handle.clone(), take.clone());
        scope.on_gate("record", move |_, on| {
            {
                let mut t = t.borrow_mut();
                if t.armed == on {
                    return;
                }
                t.armed = on;
                if on {
                    t.samples.clear();
                    t.finishing = false;
                } else {
                    t.finishing = true;
                }
            }
            send(&sc, &h, RecorderMessage::Arm(on));
            sc.report("recording", Payload::Status(if on { "recording" } else { "stopped" }.to_owned()));
        });

        Self {
            scope,
            buffers,
            handle,
            take,
            sample_rate: Rc::new(Cell::new(48_000)),
        }
    }
}

impl Unit for RecorderUnit {
    fn shape(&self) -> &'static Shape {
        &catalog::RECORDER
    }

    fn primitive(&self) -> Option<PrimitiveId> {
        primitive_of(&self.handle)
    }

    fn render(&mut self, engine: Option<&mut AudioEngine>, _: &Params) -> Result<(), UnitError> {
        if self.handle.borrow().is_some() {
            return Ok(());
        }
        let Some(engine) = engine else {
            return Ok(());
        };
        let (producer, consumer) = RingBuffer::new(RECORDER_RING);
        let handle = engine.add(Recorder::new(producer, engine.channels()))?;
        self.sample_rate.set(engine.sample_rate());
        self.take.borrow_mut().consumer = Some(consumer);
        *self.handle.borrow_mut() = Some(handle);
        Ok(())
    }

    fn pump(&mut self) {
        let finished = {
            let mut guard = self.take.borrow_mut();
            let take = &mut *guard;
            if let Some(consumer) = take.consumer.as_mut() {
                let n = consumer.slots();
                if let Ok(chunk) = consumer.read_chunk(n) {
                    take.samples.extend(chunk.into_iter());
                }
            }
            if take.finishing {
                take.finishing = false;
                Some(core::mem::take(&mut take.samples))
            } else {
                None
            }
        };
        if let Some(samples) = finished {
            let buffer = AudioBuffer::new(samples, 1, self.sample_rate.get());
            let secs = buffer.duration_secs();
            self.buffers.insert(self.scope.id().as_str(), buffer);
            tracing::info!(node = %self.scope.id(), secs, "recording stored");
            self.scope.report("recording", Payload::Value(secs));
        }
    }

    fn dispose(&mut self, engine: Option<&mut AudioEngine>) {
        self.scope.detach();
        {
            let mut take = self.take.borrow_mut();
            take.consumer = None;
            take.armed = false;
            take.finishing = false;
        }
        let primitive = self.handle.borrow_mut().take().map(|h| h.id());
        release(engine, primitive);
    }
}

/// Meters what passes through it. The latest level is published on
/// `{id}.meter.status` after each block.
pub struct AnalyzerUnit {
    scope: NodeScope,
    handle: Option<Handle<()>>,
    levels: Option<Consumer<Level>>,
}

impl AnalyzerUnit {
    pub fn new(scope: NodeScope) -> Self {
        Self {
            scope,
            handle: None,
            levels: None,
        }
    }
}

impl Unit for AnalyzerUnit {
    fn shape(&self) -> &'static Shape {
        &catalog::ANALYZER
    }

    fn primitive(&self) -> Option<PrimitiveId> {
        self.handle.as_ref().map(Handle::id)
    }

    fn render(&mut self, engine: Option<&mut AudioEngine>, _: &Params) -> Result<(), UnitError> {
        if let (None, Some(engine)) = (&self.handle, engine) {
            let (producer, consumer) = RingBuffer::new(ANALYZER_RING);
            self.handle = Some(engine.add(Analyzer::new(producer, engine.channels()))?);
            self.levels = Some(consumer);
        }
        Ok(())
    }

    fn pump(&mut self) {
        let Some(levels) = self.levels.as_mut() else {
            return;
        };
        let mut latest = None;
        while let Ok(level) = levels.pop() {
            latest = Some(level);
        }
        if let Some(Level { rms, peak }) = latest {
            self.scope.report("meter", Payload::Meter { rms, peak });
        }
    }

    fn dispose(&mut self, engine: Option<&mut AudioEngine>) {
        self.scope.detach();
        self.levels = None;
        release(engine, self.handle.take().map(|h| h.id()));
    }
}

/// Live input from the engine's capture device.
///
/// A refused capture is reported once; the unit then stays silent until an
/// event arrives on `retry`.
pub struct MicrophoneUnit {
    scope: NodeScope,
    handle: Option<Handle<f32>>,
    refused: Rc<Cell<bool>>,
    applied: Params,
}

impl MicrophoneUnit {
    pub fn new(scope: NodeScope) -> Self {
        let refused = Rc::new(Cell::new(false));
        let (r, sc) = (refused.clone(), scope.clone());
        scope.on("retry", Verb::ReceiveNodeOn, move |_| {
            if r.replace(false) {
                sc.on_change().render(sc.id());
            }
        });
        scope.expose_params(catalog::MICROPHONE.params);
        Self {
            scope,
            handle: None,
            refused,
            applied: Params::new(),
        }
    }
}

impl Unit for MicrophoneUnit {
    fn shape(&self) -> &'static Shape {
        &catalog::MICROPHONE
    }

    fn primitive(&self) -> Option<PrimitiveId> {
        self.handle.as_ref().map(Handle::id)
    }

    fn render(&mut self, engine: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let gain = params.number("gain", 1.0) as f32;
        if let Some(handle) = self.handle.as_mut() {
            if changed(&self.applied, params, "gain") && handle.send(gain).is_err() {
                tracing::warn!(node = %self.scope.id(), "message queue full, gain change dropped");
            }
        } else if let Some(engine) = engine.filter(|_| !self.refused.get()) {
            match engine.capture() {
                Ok(mut handle) => {
                    if handle.send(gain).is_err() {
                        tracing::warn!(node = %self.scope.id(), "message queue full, initial gain dropped");
                    }
                    self.handle = Some(handle);
                }
                Err(e) => {
                    self.refused.set(true);
                    return Err(e);
                }
            }
        }
        self.applied = params.clone();
        Ok(())
    }

    fn dispose(&mut self, engine: Option<&mut AudioEngine>) {
        self.scope.detach();
        release(engine, self.handle.take().map(|h| h.id()));
    }
}
