//! Audio units: one primitive, parameters pushed as messages.

use alloc::rc::Rc;
use core::cell::RefCell;
use core::marker::PhantomData;

use crate::engine::{AudioEngine, Handle};
use crate::error::UnitError;
use crate::node::{AudioNode, PrimitiveId};
use crate::nodes::{
    Biquad, BiquadMessage, Delay, DelayMessage, Envelope, EnvelopeMessage, FilterMode, Gain, GainMessage, Mixer,
    Oscillator, OscillatorMessage, Panner, Reverb, ReverbMessage, SetPan, SlewLimiter, SlewLimiterMessage, Waveform,
};
use crate::params::{changed, Params, ParamsExt};

use super::catalog;
use super::{release, NodeScope, Shape, Unit};

/// A handle shared between a unit and its event handlers.
pub(crate) type Shared<M> = Rc<RefCell<Option<Handle<M>>>>;

type Message<K> = <<K as AudioKind>::Node as AudioNode>::Message;

/// A node kind backed by a single primitive.
pub(crate) trait AudioKind: 'static {
    type Node: AudioNode;

    fn shape() -> &'static Shape;

    /// Build the primitive from the node's parameters.
    fn create(params: &Params, sample_rate: u32, channels: usize) -> Self::Node;

    /// Messages that move the primitive from `old` to `new`.
    fn messages(old: &Params, new: &Params, out: &mut Vec<Message<Self>>);

    /// Subscribe handlers that talk to the primitive directly.
    fn events(_scope: &NodeScope, _handle: &Shared<Message<Self>>) {}
}

#[inline]
fn num(params: &Params, key: &str, default: f64) -> f32 {
    params.number(key, default) as f32
}

/// Generic unit for every [`AudioKind`].
pub(crate) struct AudioUnit<K: AudioKind> {
    scope: NodeScope,
    handle: Shared<Message<K>>,
    applied: Params,
    _kind: PhantomData<K>,
}

impl<K: AudioKind> AudioUnit<K> {
    pub(crate) fn new(scope: NodeScope) -> Self {
        let handle = Rc::new(RefCell::new(None));
        scope.expose_params(K::shape().params);
        K::events(&scope, &handle);
        Self {
            scope,
            handle,
            applied: Params::new(),
            _kind: PhantomData,
        }
    }
}

impl<K: AudioKind> Unit for AudioUnit<K> {
    fn shape(&self) -> &'static Shape {
        K::shape()
    }

    fn primitive(&self) -> Option<PrimitiveId> {
        self.handle.borrow().as_ref().map(Handle::id)
    }

    fn render(&mut self, engine: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let mut slot = self.handle.borrow_mut();
        if let Some(handle) = slot.as_mut() {
            let mut messages = Vec::new();
            K::messages(&self.applied, params, &mut messages);
            for msg in messages {
                if handle.send(msg).is_err() {
                    tracing::warn!(node = %self.scope.id(), "message queue full, parameter change dropped");
                }
            }
        } else if let Some(engine) = engine {
            let node = K::create(params, engine.sample_rate(), engine.channels());
            *slot = Some(engine.add(node)?);
        }
        self.applied = params.clone();
        Ok(())
    }

    fn dispose(&mut self, engine: Option<&mut AudioEngine>) {
        self.scope.detach();
        let primitive = self.handle.borrow_mut().take().map(|h| h.id());
        release(engine, primitive);
    }
}

pub(crate) struct OscillatorKind;

impl AudioKind for OscillatorKind {
    type Node = Oscillator;

    fn shape() -> &'static Shape {
        &catalog::OSCILLATOR
    }

    fn create(p: &Params, _: u32, _: usize) -> Oscillator {
        Oscillator::new(Waveform::from_name(p.text("waveform", "sine")), num(p, "frequency", 440.0))
            .with_detune(num(p, "detune", 0.0))
            .with_amplitude(num(p, "amplitude", 0.25))
    }

    fn messages(old: &Params, new: &Params, out: &mut Vec<OscillatorMessage>) {
        if changed(old, new, "waveform") {
            out.push(OscillatorMessage::SetWaveform(Waveform::from_name(new.text("waveform", "sine"))));
        }
        if changed(old, new, "frequency") {
            out.push(OscillatorMessage::SetFrequency(num(new, "frequency", 440.0)));
        }
        if changed(old, new, "detune") {
            out.push(OscillatorMessage::SetDetune(num(new, "detune", 0.0)));
        }
        if changed(old, new, "amplitude") {
            out.push(OscillatorMessage::SetAmplitude(num(new, "amplitude", 0.25)));
        }
    }
}

pub(crate) struct GainKind;

impl AudioKind for GainKind {
    type Node = Gain;

    fn shape() -> &'static Shape {
        &catalog::GAIN
    }

    fn create(p: &Params, _: u32, channels: usize) -> Gain {
        Gain::new(num(p, "gain", 1.0)).with_channels(channels)
    }

    fn messages(old: &Params, new: &Params, out: &mut Vec<GainMessage>) {
        if changed(old, new, "gain") {
            out.push(GainMessage::SetGain(num(new, "gain", 1.0)));
        }
    }
}

/// Master gain. The orchestrator wires it into the destination.
pub(crate) struct OutputKind;

impl AudioKind for OutputKind {
    type Node = Gain;

    fn shape() -> &'static Shape {
        &catalog::OUTPUT
    }

    fn create(p: &Params, sr: u32, channels: usize) -> Gain {
        GainKind::create(p, sr, channels)
    }

    fn messages(old: &Params, new: &Params, out: &mut Vec<GainMessage>) {
        GainKind::messages(old, new, out)
    }
}

pub(crate) struct FilterKind;

impl AudioKind for FilterKind {
    type Node = Biquad;

    fn shape() -> &'static Shape {
        &catalog::FILTER
    }

    fn create(p: &Params, _: u32, channels: usize) -> Biquad {
        Biquad::new(
            FilterMode::from_name(p.text("mode", "lowpass")),
            num(p, "frequency", 1000.0),
            num(p, "q", 0.707),
            channels,
        )
    }

    fn messages(old: &Params, new: &Params, out: &mut Vec<BiquadMessage>) {
        if changed(old, new, "mode") {
            out.push(BiquadMessage::SetMode(FilterMode::from_name(new.text("mode", "lowpass"))));
        }
        if changed(old, new, "frequency") {
            out.push(BiquadMessage::SetFrequency(num(new, "frequency", 1000.0)));
        }
        if changed(old, new, "q") {
            out.push(BiquadMessage::SetQ(num(new, "q", 0.707)));
        }
    }
}

pub(crate) struct DelayKind;

impl AudioKind for DelayKind {
    type Node = Delay;

    fn shape() -> &'static Shape {
        &catalog::DELAY
    }

    fn create(p: &Params, sr: u32, channels: usize) -> Delay {
        Delay::new(sr, channels).with_params(num(p, "time", 0.25), num(p, "feedback", 0.3), num(p, "mix", 0.5))
    }

    fn messages(old: &Params, new: &Params, out: &mut Vec<DelayMessage>) {
        if changed(old, new, "time") {
            out.push(DelayMessage::SetTime(num(new, "time", 0.25)));
        }
        if changed(old, new, "feedback") {
            out.push(DelayMessage::SetFeedback(num(new, "feedback", 0.3)));
        }
        if changed(old, new, "mix") {
            out.push(DelayMessage::SetMix(num(new, "mix", 0.5)));
        }
    }
}

pub(crate) struct ReverbKind;

impl AudioKind for ReverbKind {
    type Node = Reverb;

    fn shape() -> &'static Shape {
        &catalog::REVERB
    }

    fn create(p: &Params, sr: u32, channels: usize) -> Reverb {
        Reverb::new(sr, channels).with_params(num(p, "decay", 0.5), num(p, "mix", 0.3))
    }

    fn messages(old: &Params, new: &Params, out: &mut Vec<ReverbMessage>) {
        if changed(old, new, "decay") {
            out.push(ReverbMessage::SetDecay(num(new, "decay", 0.5)));
        }
        if changed(old, new, "mix") {
            out.push(ReverbMessage::SetMix(num(new, "mix", 0.3)));
        }
    }
}

pub(crate) struct PanKind;

impl AudioKind for PanKind {
    type Node = Panner;

    fn shape() -> &'static Shape {
        &catalog::PAN
    }

    fn create(p: &Params, _: u32, _: usize) -> Panner {
        Panner::new(num(p, "pan", 0.0))
    }

    fn messages(old: &Params, new: &Params, out: &mut Vec<SetPan>) {
        if changed(old, new, "pan") {
            out.push(SetPan(num(new, "pan", 0.0)));
        }
    }
}

pub(crate) struct MixerKind;

impl AudioKind for MixerKind {
    type Node = Mixer;

    fn shape() -> &'static Shape {
        &catalog::MIXER
    }

    fn create(_: &Params, _: u32, channels: usize) -> Mixer {
        Mixer::new(channels)
    }

    fn messages(_: &Params, _: &Params, _: &mut Vec<()>) {}
}

/// A container that sums whatever is routed into it and passes it on.
pub(crate) struct BusKind;

impl AudioKind for BusKind {
    type Node = Mixer;

    fn shape() -> &'static Shape {
        &catalog::BUS
    }

    fn create(_: &Params, _: u32, channels: usize) -> Mixer {
        Mixer::new(channels)
    }

    fn messages(_: &Params, _: &Params, _: &mut Vec<()>) {}
}

pub(crate) struct SlewKind;

impl AudioKind for SlewKind {
    type Node = SlewLimiter;

    fn shape() -> &'static Shape {
        &catalog::SLEW
    }

    fn create(p: &Params, _: u32, channels: usize) -> SlewLimiter {
        SlewLimiter::from_rate_per_second(num(p, "rate", 1000.0)).with_channels(channels)
    }

    fn messages(old: &Params, new: &Params, out: &mut Vec<SlewLimiterMessage>) {
        if changed(old, new, "rate") {
            out.push(SlewLimiterMessage::SetRatePerSecond(num(new, "rate", 1000.0)));
        }
    }
}

/// ADSR amplifier. Gate events on the `gate` port open and close it.
pub(crate) struct EnvelopeKind;

const ADSR: [(&str, f64); 4] = [("attack", 10.0), ("decay", 100.0), ("sustain", 0.7), ("release", 200.0)];

impl AudioKind for EnvelopeKind {
    type Node = Envelope;

    fn shape() -> &'static Shape {
        &catalog::ENVELOPE
    }

    fn create(p: &Params, _: u32, channels: usize) -> Envelope {
        let [a, d, s, r] = ADSR.map(|(key, default)| num(p, key, default));
        Envelope::new(a, d, s, r, channels)
    }

    fn messages(old: &Params, new: &Params, out: &mut Vec<EnvelopeMessage>) {
        if ADSR.iter().any(|(key, _)| changed(old, new, key)) {
            let [attack, decay, sustain, release] = ADSR.map(|(key, default)| num(new, key, default));
            out.push(EnvelopeMessage::SetAdsr { attack, decay, sustain, release });
        }
    }

    fn events(scope: &NodeScope, handle: &Shared<EnvelopeMessage>) {
        let (handle, node) = (handle.clone(), scope.id().clone());
        scope.on_gate("gate", move |_, on| {
            if let Some(h) = handle.borrow_mut().as_mut() {
                if h.send(EnvelopeMessage::Gate(on)).is_err() {
                    tracing::warn!(%node, on, "message queue full, gate dropped");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::description::NodeId;
    use crate::params::params;
    use crate::router::{Event, EventRouter};
    use crate::timers::Timers;
    use crate::unit::OnChange;

    fn scope(router: &EventRouter) -> NodeScope {
        NodeScope::new(NodeId::new("osc").unwrap(), router.clone(), Timers::new(), OnChange::new())
    }

    #[test]
    fn creates_once_and_renders_idempotently() {
        let router = EventRouter::new();
        let mut engine = AudioEngine::new(48_000);
        let mut unit = AudioUnit::<OscillatorKind>::new(scope(&router));
        let p = params(json!({ "frequency": 220.0 }));

        unit.render(Some(&mut engine), &p).unwrap();
        let id = unit.primitive().unwrap();
        unit.render(Some(&mut engine), &p).unwrap();
        unit.render(Some(&mut engine), &params(json!({ "frequency": 330.0 }))).unwrap();

        assert_eq!(unit.primitive(), Some(id));
        assert_eq!(engine.primitive_count(), 1);
    }

    #[test]
    fn budget_failure_leaves_unit_inert_until_retried() {
        let router = EventRouter::new();
        let mut engine = AudioEngine::new(48_000).with_max_primitives(0);
        let mut unit = AudioUnit::<GainKind>::new(scope(&router));

        assert!(unit.render(Some(&mut engine), &Params::new()).is_err());
        assert_eq!(unit.primitive(), None);

        let mut engine = AudioEngine::new(48_000);
        unit.render(Some(&mut engine), &Params::new()).unwrap();
        assert!(unit.primitive().is_some());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn dropped_gates_are_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let router = EventRouter::new();
            let mut engine = AudioEngine::new(48_000).with_queue_size(1);
            let mut unit = AudioUnit::<EnvelopeKind>::new(scope(&router));
            unit.render(Some(&mut engine), &Params::new()).unwrap();

            router.publish("osc.gate.receiveNodeOn", &Event::bang());
            router.publish("osc.gate.receiveNodeOff", &Event::bang());
        });

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("gate dropped"), "{log}");
        assert_eq!(log.matches("gate dropped").count(), 1);
    }

    #[test]
    fn dispose_is_idempotent() {
        let router = EventRouter::new();
        let mut engine = AudioEngine::new(48_000);
        let mut unit = AudioUnit::<EnvelopeKind>::new(scope(&router));
        unit.render(Some(&mut engine), &Params::new()).unwrap();
        router.publish("osc.gate.receiveNodeOn", &Event::bang());

        unit.dispose(Some(&mut engine));
        unit.dispose(Some(&mut engine));
        assert_eq!(engine.primitive_count(), 0);
        assert_eq!(router.subscriptions_for_node(&NodeId::new("osc").unwrap()), 0);
    }
}
