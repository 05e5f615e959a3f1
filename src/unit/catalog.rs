//! Every node kind the orchestrator can build.
//!
//! Each kind has a static [`Shape`] and a constructor in [`build`]. Kinds
//! not listed in [`KINDS`] are rejected with [`GraphError::UnknownKind`].

use crate::description::NodeId;
use crate::error::{GraphError, UnitError};
use crate::router::{Event, EventRouter, Payload, Topic, Verb, NODE_CHANNEL};

use super::audio::{
    AudioUnit, BusKind, DelayKind, EnvelopeKind, FilterKind, GainKind, MixerKind, OscillatorKind, OutputKind, PanKind,
    ReverbKind, SlewKind,
};
use super::clock::Clock;
use super::control::{Constant, Frequency, Function, Macro};
use super::hybrid::{AnalyzerUnit, MicrophoneUnit, RecorderUnit, SamplePlayerUnit};
use super::sequencer::Sequencer;
use super::switch::{BlockingSwitch, Switch};
use super::worklet::{WorkletKind, WorkletUnit};
use super::{NodeScope, Shape, Unit, UnitClass, UnitContext, AUDIO_INPUT};

// Audio

pub static OSCILLATOR: Shape = Shape {
    kind: "oscillator",
    audio_input: None,
    params: &["frequency", "detune", "amplitude"],
    ..Shape::AUDIO
};

pub static GAIN: Shape = Shape {
    kind: "gain",
    params: &["gain"],
    ..Shape::AUDIO
};

pub static OUTPUT: Shape = Shape {
    kind: "output",
    audio_output: false,
    to_destination: true,
    params: &["gain"],
    ..Shape::AUDIO
};

pub static FILTER: Shape = Shape {
    kind: "filter",
    params: &["frequency", "q"],
    ..Shape::AUDIO
};

pub static DELAY: Shape = Shape {
    kind: "delay",
    params: &["time", "feedback", "mix"],
    ..Shape::AUDIO
};

pub static REVERB: Shape = Shape {
    kind: "reverb",
    params: &["decay", "mix"],
    ..Shape::AUDIO
};

pub static PAN: Shape = Shape {
    kind: "pan",
    params: &["pan"],
    ..Shape::AUDIO
};

pub static MIXER: Shape = Shape {
    kind: "mixer",
    ..Shape::AUDIO
};

pub static BUS: Shape = Shape {
    kind: "bus",
    audio_output: false,
    pass_through: true,
    ..Shape::AUDIO
};

pub static SLEW: Shape = Shape {
    kind: "slew",
    params: &["rate"],
    ..Shape::AUDIO
};

pub static ENVELOPE: Shape = Shape {
    kind: "envelope",
    ports: Some(&["gate"]),
    params: &["attack", "decay", "sustain", "release"],
    ..Shape::AUDIO
};

// Worklets

pub static NOISE: Shape = Shape {
    kind: "noise",
    audio_input: None,
    ..Shape::AUDIO
};

pub static IIR: Shape = Shape {
    kind: "iir",
    ..Shape::AUDIO
};

/// Control ports are named by the user's expression, so any port goes.
pub static WORKLET: Shape = Shape {
    kind: "worklet",
    ports: None,
    ..Shape::AUDIO
};

pub static DISTORTION: Shape = Shape {
    kind: "distortion",
    params: &["drive"],
    ..Shape::AUDIO
};

// Events

pub static SWITCH: Shape = Shape {
    kind: "switch",
    routed_prefix: Some("output-"),
    ports: Some(&["input", "reset"]),
    ..Shape::EVENT
};

pub static BLOCKING_SWITCH: Shape = Shape {
    kind: "blocking-switch",
    routed_prefix: Some("output-"),
    ports: Some(&["input", "reset"]),
    ..Shape::EVENT
};

pub static CLOCK: Shape = Shape {
    kind: "clock",
    ports: Some(&["start", "stop", "reset", "output"]),
    params: &["bpm"],
    ..Shape::EVENT
};

pub static SEQUENCER: Shape = Shape {
    kind: "sequencer",
    routed_prefix: Some("row-"),
    ports: Some(&["advance", "reset", "sync"]),
    ..Shape::EVENT
};

pub static FUNCTION: Shape = Shape {
    kind: "function",
    ..Shape::EVENT
};

pub static CONSTANT: Shape = Shape {
    kind: "constant",
    params: &["value"],
    ..Shape::EVENT
};

pub static FREQUENCY: Shape = Shape {
    kind: "frequency",
    params: &["transpose", "octave"],
    ..Shape::EVENT
};

pub static MACRO: Shape = Shape {
    kind: "macro",
    ..Shape::EVENT
};

// Hybrids

pub static SAMPLE_PLAYER: Shape = Shape {
    kind: "sample-player",
    class: UnitClass::Hybrid,
    audio_input: None,
    input_prefix: Some("segment-"),
    ports: Some(&["input", "stop"]),
    ..Shape::AUDIO
};

pub static RECORDER: Shape = Shape {
    kind: "recorder",
    class: UnitClass::Hybrid,
    audio_input: Some(AUDIO_INPUT),
    keep_alive: true,
    ports: Some(&["record"]),
    ..Shape::AUDIO
};

pub static ANALYZER: Shape = Shape {
    kind: "analyzer",
    class: UnitClass::Hybrid,
    keep_alive: true,
    ..Shape::AUDIO
};

pub static MICROPHONE: Shape = Shape {
    kind: "microphone",
    class: UnitClass::Hybrid,
    audio_input: None,
    ports: Some(&["retry"]),
    params: &["gain"],
    ..Shape::AUDIO
};

static SHAPES: &[&Shape] = &[
    &OSCILLATOR,
    &GAIN,
    &OUTPUT,
    &FILTER,
    &DELAY,
    &REVERB,
    &PAN,
    &MIXER,
    &BUS,
    &SLEW,
    &ENVELOPE,
    &NOISE,
    &IIR,
    &WORKLET,
    &DISTORTION,
    &SWITCH,
    &BLOCKING_SWITCH,
    &CLOCK,
    &SEQUENCER,
    &FUNCTION,
    &CONSTANT,
    &FREQUENCY,
    &MACRO,
    &SAMPLE_PLAYER,
    &RECORDER,
    &ANALYZER,
    &MICROPHONE,
];

/// Names of every buildable kind.
pub const KINDS: &[&str] = &[
    "oscillator",
    "gain",
    "output",
    "filter",
    "delay",
    "reverb",
    "pan",
    "mixer",
    "bus",
    "slew",
    "envelope",
    "noise",
    "iir",
    "worklet",
    "distortion",
    "switch",
    "blocking-switch",
    "clock",
    "sequencer",
    "function",
    "constant",
    "frequency",
    "macro",
    "sample-player",
    "recorder",
    "analyzer",
    "microphone",
];

/// The shape of `kind`, if it is known.
pub fn shape_of(kind: &str) -> Option<&'static Shape> {
    SHAPES.iter().copied().find(|s| s.kind == kind)
}

/// Publish a render failure on `{node}.node.status`.
pub(crate) fn report_failure(router: &EventRouter, node: &NodeId, error: &UnitError) {
    tracing::warn!(%node, %error, "node is inert on the audio plane");
    router.publish(
        &Topic::node(node, NODE_CHANNEL, Verb::Status),
        &Event::new(Payload::Status(error.to_string())),
    );
}

/// Build and render the unit for `ctx.node`.
///
/// Only an unknown kind is an error. A unit whose first render fails is
/// returned anyway; the failure goes out on `{id}.node.status`.
pub fn build(ctx: UnitContext<'_>) -> Result<Box<dyn Unit>, GraphError> {
    let scope = NodeScope::from_context(&ctx);
    let UnitContext {
        engine,
        router,
        node,
        buffers,
        ..
    } = ctx;

    let mut unit: Box<dyn Unit> = match node.kind.as_str() {
        "oscillator" => Box::new(AudioUnit::<OscillatorKind>::new(scope)),
        "gain" => Box::new(AudioUnit::<GainKind>::new(scope)),
        "output" => Box::new(AudioUnit::<OutputKind>::new(scope)),
        "filter" => Box::new(AudioUnit::<FilterKind>::new(scope)),
        "delay" => Box::new(AudioUnit::<DelayKind>::new(scope)),
        "reverb" => Box::new(AudioUnit::<ReverbKind>::new(scope)),
        "pan" => Box::new(AudioUnit::<PanKind>::new(scope)),
        "mixer" => Box::new(AudioUnit::<MixerKind>::new(scope)),
        "bus" => Box::new(AudioUnit::<BusKind>::new(scope)),
        "slew" => Box::new(AudioUnit::<SlewKind>::new(scope)),
        "envelope" => Box::new(AudioUnit::<EnvelopeKind>::new(scope)),
        "noise" => Box::new(WorkletUnit::new(WorkletKind::Noise, scope)),
        "iir" => Box::new(WorkletUnit::new(WorkletKind::Iir, scope)),
        "worklet" => Box::new(WorkletUnit::new(WorkletKind::Custom, scope)),
        "distortion" => Box::new(WorkletUnit::new(WorkletKind::Distortion, scope)),
        "switch" => Box::new(Switch::new(scope)),
        "blocking-switch" => Box::new(BlockingSwitch::new(scope)),
        "clock" => Box::new(Clock::new(scope)),
        "sequencer" => Box::new(Sequencer::new(scope)),
        "function" => Box::new(Function::new(scope)),
        "constant" => Box::new(Constant::new(scope)),
        "frequency" => Box::new(Frequency::new(scope)),
        "macro" => Box::new(Macro::new(scope)),
        "sample-player" => Box::new(SamplePlayerUnit::new(scope, buffers.clone())),
        "recorder" => Box::new(RecorderUnit::new(scope, buffers.clone())),
        "analyzer" => Box::new(AnalyzerUnit::new(scope)),
        "microphone" => Box::new(MicrophoneUnit::new(scope)),
        other => return Err(GraphError::UnknownKind(other.to_owned())),
    };

    if let Err(e) = unit.render(engine, &node.parameters) {
        report_failure(router, &node.id, &e);
    }
    tracing::debug!(node = %node.id, kind = %node.kind, primitive = ?unit.primitive(), "unit built");
    Ok(unit)
}
